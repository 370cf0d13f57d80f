//! The one-shot flush that persists everything gathered during a run.
//!
//! Per cache directory, in order:
//! 1. the directory is created, or dropped with all its pending work;
//! 2. dirty directories are wiped and left with a `.dirty` marker;
//! 3. pending transpiled sources are written, each successful write evicting
//!    older versions of the same file;
//! 4. bytecode is collected from pending compiled units;
//! 5. directories whose bytecode changed get a freshly packed blob and sidecar.

use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    is_cache_key, key_path_hash, BlobRange, CacheError, CacheRecord, CacheStore, PathCache, Sidecar,
    BLOB_FILE_NAME, COVERAGE_MARKER_NAME, DIRTY_MARKER_NAME, SIDECAR_FILE_NAME,
};
use crate::engine::{CompiledScript, ScriptEngine};
use crate::fs::FileSystem;

/// What a flush did, for logging by the host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub source_files_written: usize,
    pub stale_files_removed: usize,
    pub bytecode_entries_changed: usize,
    pub blobs_written: usize,
    pub directories_reset: usize,
    pub directories_dropped: usize,
}

/// Key -> new bytecode; `None` means the previous bytecode was rejected
type ChangedBytecode = IndexMap<String, Option<Vec<u8>>>;

impl CacheStore {
    /// Persist all pending work; only the first call does anything
    pub fn flush(&mut self, engine: &dyn ScriptEngine, coverage: bool) -> FlushReport {
        let mut report = FlushReport::default();
        if self.flushed {
            debug!("Cache already flushed");
            return report;
        }
        self.flushed = true;

        let fs = Arc::clone(&self.fs);
        let dirs: Vec<PathBuf> = self.by_path.keys().cloned().collect();

        for dir in &dirs {
            if let Err(source) = fs.create_dir_all(dir) {
                let err = CacheError::DirectoryUnavailable {
                    path: dir.clone(),
                    source,
                };
                warn!("Dropping pending cache work: {}", err);
                self.drop_directory(dir);
                report.directories_dropped += 1;
                continue;
            }

            if coverage {
                write_marker(fs.as_ref(), &dir.join(COVERAGE_MARKER_NAME));
            }

            let dirty = self.by_path.get(dir).is_some_and(|cache| cache.dirty);
            if dirty {
                if let Some(cache) = self.by_path.shift_remove(dir) {
                    self.pending_source_writes.shift_remove(dir);
                    self.pending_bytecode.shift_remove(dir);
                    reset_directory(fs.as_ref(), dir, &cache);
                    report.directories_reset += 1;
                }
            }
        }

        self.write_sources(fs.as_ref(), &mut report);

        let changed = self.collect_bytecode(engine);
        for (dir, scripts) in changed {
            report.bytecode_entries_changed += scripts.len();
            if let Some(cache) = self.by_path.get_mut(&dir) {
                if write_blob(fs.as_ref(), &dir, cache, scripts) {
                    report.blobs_written += 1;
                }
            }
        }

        info!(
            "Cache flushed: {} source files, {} stale removed, {} blobs, {} reset, {} dropped",
            report.source_files_written,
            report.stale_files_removed,
            report.blobs_written,
            report.directories_reset,
            report.directories_dropped
        );
        report
    }

    fn write_sources(&mut self, fs: &dyn FileSystem, report: &mut FlushReport) {
        let pending = std::mem::take(&mut self.pending_source_writes);

        for (dir, entries) in pending {
            // Only the newest pending version of each file is written
            let mut latest: IndexMap<&str, &str> = IndexMap::new();
            for key in entries.keys() {
                latest.insert(key_path_hash(key).unwrap_or(key), key);
            }

            for key in latest.into_values() {
                let Some(cache) = self.by_path.get(&dir) else {
                    break;
                };
                let Some(code) = cache.compile.get(key).and_then(|data| data.code.clone()) else {
                    continue;
                };

                match fs.write(&dir.join(key), code.as_bytes()) {
                    Ok(()) => {
                        report.source_files_written += 1;
                        report.stale_files_removed += self.remove_expired(fs, &dir, key);
                    }
                    Err(e) => warn!("Failed to write cache file {}: {:?}", key, e),
                }
            }
        }
    }

    /// Delete every other version of the file `key` belongs to
    fn remove_expired(&mut self, fs: &dyn FileSystem, dir: &Path, key: &str) -> usize {
        let Some(prefix) = key_path_hash(key) else {
            return 0;
        };
        let is_sibling =
            |other: &str| other != key && is_cache_key(other) && other.starts_with(prefix);

        if let Some(cache) = self.by_path.get_mut(dir) {
            let stale: Vec<String> = cache
                .map
                .keys()
                .chain(cache.compile.keys())
                .filter(|other| is_sibling(other))
                .cloned()
                .collect();
            for other in &stale {
                cache.evict(other);
            }
        }
        if let Some(scripts) = self.pending_bytecode.get_mut(dir) {
            scripts.retain(|other, _| !is_sibling(other));
        }

        let names = match fs.list_files(dir) {
            Ok(names) => names,
            Err(e) => {
                debug!("Failed to list {}: {:?}", dir.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        for name in names.iter().filter(|name| is_sibling(name)) {
            match fs.remove_file(&dir.join(name)) {
                Ok(()) => {
                    debug!("Removed stale cache file {}", name);
                    removed += 1;
                }
                Err(e) => debug!("Failed to remove stale cache file {}: {:?}", name, e),
            }
        }
        removed
    }

    /// Gather bytecode from pending compiled units, per directory
    fn collect_bytecode(
        &mut self,
        engine: &dyn ScriptEngine,
    ) -> IndexMap<PathBuf, ChangedBytecode> {
        let pending = std::mem::take(&mut self.pending_bytecode);
        let on_demand = engine.supports_create_cached_data();
        let mut changed_by_dir = IndexMap::new();

        for (dir, scripts) in pending {
            let Some(cache) = self.by_path.get_mut(&dir) else {
                continue;
            };

            let mut changed = ChangedBytecode::new();
            for (key, script) in scripts {
                if let Some(bytecode) = extract(cache, &key, script.as_ref(), on_demand) {
                    changed.insert(key, bytecode);
                }
            }

            if !changed.is_empty() {
                changed_by_dir.insert(dir, changed);
            }
        }

        changed_by_dir
    }
}

/// Bytecode change for one entry; `None` when nothing changed
fn extract(
    cache: &mut PathCache,
    key: &str,
    script: &dyn CompiledScript,
    on_demand: bool,
) -> Option<Option<Vec<u8>>> {
    let attached = cache
        .compile
        .get(key)
        .is_some_and(|data| data.script_data.is_some());

    let mut bytecode = None;
    if !attached {
        bytecode = if on_demand && (!cache.map.contains_key(key) || script.cached_data_rejected()) {
            Some(script.create_cached_data())
        } else {
            script.cached_data()
        };
    }
    let bytecode = bytecode.filter(|data| !data.is_empty());

    if let Some(data) = cache.compile.get_mut(key) {
        if let Some(ref bytes) = bytecode {
            Arc::make_mut(data).script_data = Some(bytes.clone());
        } else if attached && script.cached_data_rejected() {
            debug!("Engine rejected bytecode for {}", key);
            Arc::make_mut(data).script_data = None;
            if let Some(record) = cache.map.get_mut(key) {
                record.set_blob(None);
            }
            return Some(None);
        }
    }

    bytecode.map(Some)
}

/// Repack the blob of one directory and write it with its sidecar
fn write_blob(
    fs: &dyn FileSystem,
    dir: &Path,
    cache: &mut PathCache,
    changed: ChangedBytecode,
) -> bool {
    for key in changed.keys() {
        match cache.compile.get(key) {
            Some(data) => {
                cache
                    .map
                    .insert(key.clone(), CacheRecord::from_compile_data(data));
            }
            None => {
                cache.map.entry(key.clone()).or_default();
            }
        }
    }

    let PathCache {
        map,
        buffer,
        compile,
        ..
    } = cache;

    let mut blob = Vec::new();
    for (key, record) in map.iter_mut() {
        let bytecode: Option<&[u8]> = match changed.get(key) {
            Some(data) => data.as_deref(),
            None => match compile.get(key) {
                Some(data) => data.script_data.as_deref(),
                None => record.blob().and_then(|range| range.slice(buffer)),
            },
        };

        match bytecode.filter(|bytes| !bytes.is_empty()) {
            Some(bytes) => {
                let start = blob.len();
                blob.extend_from_slice(bytes);
                record.set_blob(Some(BlobRange::new(start, blob.len())));
            }
            None => record.set_blob(None),
        }
    }

    let sidecar = match Sidecar::encode(map) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to encode sidecar for {}: {:?}", dir.display(), e);
            return false;
        }
    };

    if let Err(e) = fs.write(&dir.join(BLOB_FILE_NAME), &blob) {
        warn!("Failed to write cache blob in {}: {:?}", dir.display(), e);
        return false;
    }
    if let Err(e) = fs.write(&dir.join(SIDECAR_FILE_NAME), &sidecar) {
        warn!("Failed to write sidecar in {}: {:?}", dir.display(), e);
        // The old sidecar's offsets do not describe the new blob
        if let Err(e) = fs.remove_file(&dir.join(BLOB_FILE_NAME)) {
            debug!("Failed to remove orphaned blob in {}: {:?}", dir.display(), e);
        }
        return false;
    }

    debug!(
        "Packed {} entries ({} bytes) into {}",
        map.len(),
        blob.len(),
        dir.display()
    );
    *buffer = blob;
    true
}

/// Wipe a dirty directory so the next run starts from nothing
fn reset_directory(fs: &dyn FileSystem, dir: &Path, cache: &PathCache) {
    info!("Resetting cache directory {}", dir.display());
    write_marker(fs, &dir.join(DIRTY_MARKER_NAME));

    let mut doomed: Vec<String> = vec![BLOB_FILE_NAME.to_string(), SIDECAR_FILE_NAME.to_string()];
    doomed.extend(cache.compile.keys().cloned());
    match fs.list_files(dir) {
        Ok(names) => doomed.extend(names.into_iter().filter(|name| is_cache_key(name))),
        Err(e) => debug!("Failed to list {}: {:?}", dir.display(), e),
    }

    for name in doomed {
        let path = dir.join(&name);
        if fs.exists(&path) {
            if let Err(e) = fs.remove_file(&path) {
                debug!("Failed to remove {}: {:?}", path.display(), e);
            }
        }
    }
}

fn write_marker(fs: &dyn FileSystem, path: &Path) {
    if !fs.exists(path) {
        if let Err(e) = fs.write(path, b"") {
            debug!("Failed to write marker {}: {:?}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{cache_key, CompileData, ScriptRecord};
    use crate::compiler::SourceType;
    use crate::fs::MockFileSystem;

    struct Script {
        cached: Option<Vec<u8>>,
        on_demand: Vec<u8>,
        rejected: bool,
    }

    impl CompiledScript for Script {
        fn cached_data(&self) -> Option<Vec<u8>> {
            self.cached.clone()
        }

        fn cached_data_rejected(&self) -> bool {
            self.rejected
        }

        fn create_cached_data(&self) -> Vec<u8> {
            self.on_demand.clone()
        }
    }

    struct Engine(bool);

    impl ScriptEngine for Engine {
        fn supports_create_cached_data(&self) -> bool {
            self.0
        }
    }

    fn script(cached: Option<&[u8]>, on_demand: &[u8], rejected: bool) -> Box<dyn CompiledScript> {
        Box::new(Script {
            cached: cached.map(<[u8]>::to_vec),
            on_demand: on_demand.to_vec(),
            rejected,
        })
    }

    fn module_data() -> Arc<CompileData> {
        Arc::new(CompileData {
            changed: true,
            code: Some("code".to_string()),
            source_type: SourceType::Module,
            exported_names: vec!["x".to_string()],
            ..CompileData::default()
        })
    }

    fn setup() -> (Arc<MockFileSystem>, CacheStore, PathBuf) {
        let fs = Arc::new(MockFileSystem::new());
        let store = CacheStore::new(fs.clone());
        (fs, store, PathBuf::from("/cache"))
    }

    #[test]
    fn test_flush_runs_once() {
        let (fs, mut store, dir) = setup();
        store.path_cache(&dir).compile.insert("k".to_string(), module_data());
        store.schedule_bytecode(&dir, "k", script(Some(b"abc"), b"", false));

        let first = store.flush(&Engine(false), false);
        assert_eq!(first.blobs_written, 1);
        assert_eq!(fs.file(&dir.join(BLOB_FILE_NAME)).unwrap(), b"abc");

        let second = store.flush(&Engine(false), false);
        assert_eq!(second, FlushReport::default());
    }

    #[test]
    fn test_on_demand_extraction_for_new_entries() {
        let (fs, mut store, dir) = setup();
        store.path_cache(&dir).compile.insert("k".to_string(), module_data());
        store.schedule_bytecode(&dir, "k", script(None, b"fresh", false));

        store.flush(&Engine(true), false);

        let cache = store.get(&dir).unwrap();
        assert_eq!(cache.map["k"].blob(), Some(BlobRange::new(0, 5)));
        assert_eq!(cache.compile["k"].script_data.as_deref(), Some(&b"fresh"[..]));
        assert_eq!(fs.file(&dir.join(BLOB_FILE_NAME)).unwrap(), b"fresh");
    }

    #[test]
    fn test_attached_bytecode_is_not_re_extracted() {
        let (fs, mut store, dir) = setup();
        let mut data = (*module_data()).clone();
        data.script_data = Some(b"old".to_vec());
        store.path_cache(&dir).compile.insert("k".to_string(), Arc::new(data));
        store.schedule_bytecode(&dir, "k", script(None, b"new", false));

        let report = store.flush(&Engine(true), false);

        assert_eq!(report.bytecode_entries_changed, 0);
        assert!(fs.file(&dir.join(BLOB_FILE_NAME)).is_none());
    }

    #[test]
    fn test_rejected_bytecode_resets_offsets() {
        let (fs, mut store, dir) = setup();
        let key = "k".to_string();
        {
            let cache = store.path_cache(&dir);
            cache.buffer = b"stale".to_vec();
            cache.map.insert(
                key.clone(),
                CacheRecord::Script(ScriptRecord {
                    blob: Some(BlobRange::new(0, 5)),
                    ..ScriptRecord::default()
                }),
            );
            let data = CompileData::from_record(&cache.map[&key], &cache.buffer);
            cache.compile.insert(key.clone(), Arc::new(data));
        }
        store.schedule_bytecode(&dir, &key, script(None, b"", true));

        let report = store.flush(&Engine(false), false);

        assert_eq!(report.bytecode_entries_changed, 1);
        let cache = store.get(&dir).unwrap();
        assert_eq!(cache.map[&key].blob(), None);
        assert_eq!(fs.file(&dir.join(BLOB_FILE_NAME)).unwrap(), b"");
    }

    #[test]
    fn test_rejection_without_attached_bytecode_extracts_on_demand() {
        let (fs, mut store, dir) = setup();
        let key = "k".to_string();
        store
            .path_cache(&dir)
            .map
            .insert(key.clone(), CacheRecord::Script(ScriptRecord::default()));
        store.schedule_bytecode(&dir, &key, script(None, b"fresh", true));

        let report = store.flush(&Engine(true), false);

        assert_eq!(report.bytecode_entries_changed, 1);
        let cache = store.get(&dir).unwrap();
        assert_eq!(cache.map[&key].blob(), Some(BlobRange::new(0, 5)));
        assert_eq!(fs.file(&dir.join(BLOB_FILE_NAME)).unwrap(), b"fresh");
    }

    #[test]
    fn test_rejection_of_attached_bytecode_skips_on_demand_extraction() {
        let (fs, mut store, dir) = setup();
        let key = "k".to_string();
        {
            let cache = store.path_cache(&dir);
            cache.buffer = b"stale".to_vec();
            cache.map.insert(
                key.clone(),
                CacheRecord::Script(ScriptRecord {
                    blob: Some(BlobRange::new(0, 5)),
                    ..ScriptRecord::default()
                }),
            );
            let data = CompileData::from_record(&cache.map[&key], &cache.buffer);
            cache.compile.insert(key.clone(), Arc::new(data));
        }
        store.schedule_bytecode(&dir, &key, script(None, b"fresh", true));

        let report = store.flush(&Engine(true), false);

        assert_eq!(report.bytecode_entries_changed, 1);
        let cache = store.get(&dir).unwrap();
        assert_eq!(cache.map[&key].blob(), None);
        assert!(cache.compile[&key].script_data.is_none());
        assert_eq!(fs.file(&dir.join(BLOB_FILE_NAME)).unwrap(), b"");
    }

    #[test]
    fn test_unchanged_entries_keep_old_bytes() {
        let (fs, mut store, dir) = setup();
        {
            let cache = store.path_cache(&dir);
            cache.buffer = b"AAAABB".to_vec();
            for (key, range) in [("a", BlobRange::new(0, 4)), ("b", BlobRange::new(4, 6))] {
                cache.map.insert(
                    key.to_string(),
                    CacheRecord::Script(ScriptRecord {
                        blob: Some(range),
                        ..ScriptRecord::default()
                    }),
                );
            }
            cache.map.shift_remove("a");
        }
        store.path_cache(&dir).compile.insert("c".to_string(), module_data());
        store.schedule_bytecode(&dir, "c", script(Some(b"CCC"), b"", false));

        store.flush(&Engine(false), false);

        let cache = store.get(&dir).unwrap();
        assert_eq!(fs.file(&dir.join(BLOB_FILE_NAME)).unwrap(), b"BBCCC");
        assert_eq!(cache.map["b"].blob(), Some(BlobRange::new(0, 2)));
        assert_eq!(cache.map["c"].blob(), Some(BlobRange::new(2, 5)));
        assert!(cache.verify().is_empty());
    }

    #[test]
    fn test_unwritable_directory_is_dropped() {
        let (fs, mut store, dir) = setup();
        fs.set_read_only(&dir);
        store.path_cache(&dir).compile.insert("k".to_string(), module_data());
        store.schedule_bytecode(&dir, "k", script(Some(b"abc"), b"", false));

        let report = store.flush(&Engine(false), false);

        assert_eq!(report.directories_dropped, 1);
        assert!(store.get(&dir).is_none());
        assert!(fs.paths().is_empty());
    }

    #[test]
    fn test_failed_source_write_skips_eviction() {
        let (fs, mut store, dir) = setup();
        let old_key = cache_key(Some(Path::new("/src/a.js")), "old");
        let new_key = cache_key(Some(Path::new("/src/a.js")), "new");
        fs.add_file(dir.join(&old_key), b"old".to_vec());
        fs.fail_writes_to(dir.join(&new_key));

        let config = crate::config::CacheConfig {
            cache_dir: Some(dir.clone()),
            ..crate::config::CacheConfig::default()
        };
        let entry = crate::cache::ModuleEntry::new("/src/a.js", "new", &config);
        store.path_cache(&dir).compile.insert(new_key.clone(), module_data());
        store.schedule_source_write(&dir, entry);

        let report = store.flush(&Engine(false), false);

        assert_eq!(report.source_files_written, 0);
        assert!(fs.exists(&dir.join(&old_key)));
    }

    #[test]
    fn test_failed_sidecar_write_removes_new_blob() {
        let (fs, mut store, dir) = setup();
        fs.fail_writes_to(dir.join(SIDECAR_FILE_NAME));
        store.path_cache(&dir).compile.insert("k".to_string(), module_data());
        store.schedule_bytecode(&dir, "k", script(Some(b"abc"), b"", false));

        let report = store.flush(&Engine(false), false);

        assert_eq!(report.blobs_written, 0);
        assert!(!fs.exists(&dir.join(BLOB_FILE_NAME)));
        assert!(!fs.exists(&dir.join(SIDECAR_FILE_NAME)));
    }

    #[test]
    fn test_coverage_marker() {
        let (fs, mut store, dir) = setup();
        store.path_cache(&dir);

        store.flush(&Engine(false), true);
        assert!(fs.exists(&dir.join(COVERAGE_MARKER_NAME)));
    }
}
