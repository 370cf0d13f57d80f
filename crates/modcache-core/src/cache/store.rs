use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::{ModuleEntry, PathCache};
use crate::engine::CompiledScript;
use crate::fs::FileSystem;

/// Every cache directory touched by the process, plus work deferred to flush
pub struct CacheStore {
    pub(crate) fs: Arc<dyn FileSystem>,

    /// Cache directory -> its state, loaded on first use
    pub(crate) by_path: IndexMap<PathBuf, PathCache>,

    /// Path-less bucket for eval'd code; never persisted
    pub(crate) eval: PathCache,

    /// Cache directory -> key -> module whose transpiled source needs a file
    pub(crate) pending_source_writes: IndexMap<PathBuf, IndexMap<String, ModuleEntry>>,

    /// Cache directory -> key -> compiled unit to extract bytecode from
    pub(crate) pending_bytecode: IndexMap<PathBuf, IndexMap<String, Box<dyn CompiledScript>>>,

    pub(crate) flushed: bool,
}

impl CacheStore {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            by_path: IndexMap::new(),
            eval: PathCache::new(),
            pending_source_writes: IndexMap::new(),
            pending_bytecode: IndexMap::new(),
            flushed: false,
        }
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// State of a cache directory, loading it from disk on first use
    pub fn path_cache(&mut self, dir: &Path) -> &mut PathCache {
        let fs = &self.fs;
        self.by_path
            .entry(dir.to_path_buf())
            .or_insert_with(|| PathCache::load(fs.as_ref(), dir))
    }

    /// State of a cache directory, if it was already touched
    pub fn get(&self, dir: &Path) -> Option<&PathCache> {
        self.by_path.get(dir)
    }

    pub fn eval_cache(&self) -> &PathCache {
        &self.eval
    }

    pub(crate) fn eval_cache_mut(&mut self) -> &mut PathCache {
        &mut self.eval
    }

    /// Cache directories touched so far, in first-use order
    pub fn directories(&self) -> impl Iterator<Item = &Path> {
        self.by_path.keys().map(PathBuf::as_path)
    }

    /// Force a full reset of `dir` at flush
    pub fn mark_dirty(&mut self, dir: &Path) {
        self.path_cache(dir).mark_dirty();
    }

    pub fn schedule_source_write(&mut self, dir: &Path, entry: ModuleEntry) {
        debug!("Scheduling source write for {} in {}", entry.cache_key, dir.display());
        self.pending_source_writes
            .entry(dir.to_path_buf())
            .or_default()
            .insert(entry.cache_key.clone(), entry);
    }

    pub fn schedule_bytecode(&mut self, dir: &Path, key: &str, script: Box<dyn CompiledScript>) {
        self.path_cache(dir);
        self.pending_bytecode
            .entry(dir.to_path_buf())
            .or_default()
            .insert(key.to_string(), script);
    }

    pub fn pending_source_writes(&self, dir: &Path) -> usize {
        self.pending_source_writes.get(dir).map_or(0, IndexMap::len)
    }

    pub fn pending_bytecode(&self, dir: &Path) -> usize {
        self.pending_bytecode.get(dir).map_or(0, IndexMap::len)
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Forget a directory and everything pending for it
    pub(crate) fn drop_directory(&mut self, dir: &Path) {
        self.by_path.shift_remove(dir);
        self.pending_source_writes.shift_remove(dir);
        self.pending_bytecode.shift_remove(dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;

    struct NoBytecode;

    impl CompiledScript for NoBytecode {
        fn cached_data(&self) -> Option<Vec<u8>> {
            None
        }

        fn cached_data_rejected(&self) -> bool {
            false
        }

        fn create_cached_data(&self) -> Vec<u8> {
            Vec::new()
        }
    }

    #[test]
    fn test_path_cache_loads_once() {
        let fs = Arc::new(MockFileSystem::new());
        let mut store = CacheStore::new(fs);
        let dir = Path::new("/cache");

        store.path_cache(dir).mark_dirty();
        assert!(store.path_cache(dir).dirty, "Second access must reuse state");
        assert_eq!(store.directories().count(), 1);
    }

    #[test]
    fn test_schedule_bytecode_touches_directory() {
        let fs = Arc::new(MockFileSystem::new());
        let mut store = CacheStore::new(fs);
        let dir = Path::new("/cache");

        store.schedule_bytecode(dir, "key", Box::new(NoBytecode));
        assert!(store.get(dir).is_some());
        assert_eq!(store.pending_bytecode(dir), 1);

        store.drop_directory(dir);
        assert!(store.get(dir).is_none());
        assert_eq!(store.pending_bytecode(dir), 0);
    }
}
