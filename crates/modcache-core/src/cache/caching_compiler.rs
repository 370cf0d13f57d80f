//! Lookup and compile-and-cache.
//!
//! A compile request first asks [`lookup`] for a persisted result; on a miss
//! [`compile`] runs the compiler, memoizes the output and, for changed code
//! backed by a real file, schedules its transpiled source to be written at
//! flush.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::{cache_key, CacheStore, CompileData};
use crate::compiler::{CompileError, CompileOptions, Compiler, SourceType};
use crate::config::CacheConfig;

/// Loader a module needs once its compile output is known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryKind {
    #[default]
    Unknown,
    Cjs,
    Esm,
}

impl EntryKind {
    fn for_source_type(source_type: SourceType) -> Self {
        match source_type {
            SourceType::Module => EntryKind::Esm,
            SourceType::Script => EntryKind::Cjs,
        }
    }
}

/// A module about to be compiled, bound to its cache directory and key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEntry {
    /// Backing file; `None` for anonymous sources
    pub filename: Option<PathBuf>,

    /// Cache directory of the owning package
    pub cache_dir: Option<PathBuf>,

    pub cache_key: String,

    pub kind: EntryKind,

    /// Package enables CommonJS interop
    pub cjs: bool,

    pub runtime_name: String,
}

impl ModuleEntry {
    /// Entry for a file, using the configured cache directory
    pub fn new(filename: impl Into<PathBuf>, source: &str, config: &CacheConfig) -> Self {
        let filename = filename.into();
        Self {
            cache_key: cache_key(Some(&filename), source),
            filename: Some(filename),
            cache_dir: config.effective_cache_dir().map(Path::to_path_buf),
            kind: EntryKind::Unknown,
            cjs: config.cjs,
            runtime_name: config.runtime_name.clone(),
        }
    }

    /// Entry for source with no backing file
    pub fn anonymous(source: &str, config: &CacheConfig) -> Self {
        Self {
            filename: None,
            cache_dir: None,
            cache_key: cache_key(None, source),
            kind: EntryKind::Unknown,
            cjs: config.cjs,
            runtime_name: config.runtime_name.clone(),
        }
    }

    fn is_mjs(&self) -> bool {
        self.filename
            .as_deref()
            .and_then(Path::extension)
            .is_some_and(|ext| ext == "mjs")
    }
}

/// Per-request options from the host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileRequest {
    /// Code comes from `eval` and has no stable identity
    pub eval: bool,
    pub hint: Option<SourceType>,
    pub pragmas: bool,
    pub source_type: Option<SourceType>,
    pub strict: Option<bool>,
    pub var: bool,
}

impl CompileRequest {
    pub fn eval() -> Self {
        Self {
            eval: true,
            ..Self::default()
        }
    }
}

/// Reconstruct a persisted compile result, or `None` on a miss
pub(crate) fn lookup(store: &mut CacheStore, entry: &mut ModuleEntry) -> Option<Arc<CompileData>> {
    let dir = entry.cache_dir.clone()?;
    let cache = store.path_cache(&dir);
    let record = cache.map.get(&entry.cache_key)?;

    let data = match cache.compile.get(&entry.cache_key) {
        Some(data) => Arc::clone(data),
        None => {
            let data = Arc::new(CompileData::from_record(record, &cache.buffer));
            cache
                .compile
                .insert(entry.cache_key.clone(), Arc::clone(&data));
            data
        }
    };

    debug!("Cache hit: {}", entry.cache_key);
    entry.kind = EntryKind::for_source_type(data.source_type);
    Some(data)
}

/// Compile `code` and memoize the result, scheduling a source write if useful
pub(crate) fn compile(
    store: &mut CacheStore,
    compiler: &dyn Compiler,
    entry: &mut ModuleEntry,
    code: &str,
    request: &CompileRequest,
) -> Result<Arc<CompileData>, CompileError> {
    if !request.eval && entry.filename.is_some() && entry.cache_dir.is_some() {
        return compile_and_write(store, compiler, entry, code, request);
    }

    compile_and_cache(store, compiler, entry, code, request)
}

fn compile_and_cache(
    store: &mut CacheStore,
    compiler: &dyn Compiler,
    entry: &mut ModuleEntry,
    code: &str,
    request: &CompileRequest,
) -> Result<Arc<CompileData>, CompileError> {
    let output = compiler.compile(code, &to_compile_options(entry, request))?;
    let data = Arc::new(CompileData::from_output(output));

    if request.eval {
        store
            .eval_cache_mut()
            .compile
            .insert(cache_key(None, code), Arc::clone(&data));
        return Ok(data);
    }

    entry.kind = EntryKind::for_source_type(data.source_type);

    let cache = match entry.cache_dir.as_deref() {
        Some(dir) => store.path_cache(dir),
        None => store.eval_cache_mut(),
    };
    cache
        .compile
        .insert(entry.cache_key.clone(), Arc::clone(&data));

    Ok(data)
}

fn compile_and_write(
    store: &mut CacheStore,
    compiler: &dyn Compiler,
    entry: &mut ModuleEntry,
    code: &str,
    request: &CompileRequest,
) -> Result<Arc<CompileData>, CompileError> {
    let data = compile_and_cache(store, compiler, entry, code, request)?;

    if data.changed {
        if let Some(dir) = entry.cache_dir.clone() {
            store.schedule_source_write(&dir, entry.clone());
        }
    }

    Ok(data)
}

fn to_compile_options(entry: &ModuleEntry, request: &CompileRequest) -> CompileOptions {
    let cjs = entry.cjs && !entry.is_mjs();

    if request.eval {
        return CompileOptions {
            cjs,
            runtime_name: entry.runtime_name.clone(),
            ..CompileOptions::default()
        };
    }

    CompileOptions {
        cjs,
        hint: request.hint,
        pragmas: request.pragmas,
        runtime_name: entry.runtime_name.clone(),
        source_type: request.source_type,
        strict: request.strict,
        var: request.var,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompileOutput;
    use crate::fs::MockFileSystem;
    use std::sync::Mutex;

    /// Echoes the source back, recording the options it was given
    #[derive(Default)]
    struct RecordingCompiler {
        seen: Mutex<Vec<CompileOptions>>,
    }

    impl Compiler for RecordingCompiler {
        fn compile(
            &self,
            source: &str,
            options: &CompileOptions,
        ) -> Result<CompileOutput, CompileError> {
            self.seen.lock().unwrap().push(options.clone());
            let module = source.starts_with("export");
            Ok(CompileOutput {
                changed: module,
                code: source.to_string(),
                source_type: if module {
                    SourceType::Module
                } else {
                    SourceType::Script
                },
                ..CompileOutput::default()
            })
        }
    }

    fn config() -> CacheConfig {
        CacheConfig {
            cache_dir: Some(PathBuf::from("/cache")),
            ..CacheConfig::default()
        }
    }

    fn store() -> CacheStore {
        CacheStore::new(Arc::new(MockFileSystem::new()))
    }

    #[test]
    fn test_changed_file_is_scheduled() {
        let mut store = store();
        let compiler = RecordingCompiler::default();
        let source = "export const x = 1";
        let mut entry = ModuleEntry::new("/src/a.js", source, &config());

        let data = compile(&mut store, &compiler, &mut entry, source, &CompileRequest::default())
            .unwrap();

        assert!(data.changed);
        assert_eq!(entry.kind, EntryKind::Esm);
        assert_eq!(store.pending_source_writes(Path::new("/cache")), 1);
    }

    #[test]
    fn test_unchanged_file_is_not_scheduled() {
        let mut store = store();
        let compiler = RecordingCompiler::default();
        let source = "module.exports = 1";
        let mut entry = ModuleEntry::new("/src/a.js", source, &config());

        compile(&mut store, &compiler, &mut entry, source, &CompileRequest::default()).unwrap();

        assert_eq!(entry.kind, EntryKind::Cjs);
        assert_eq!(store.pending_source_writes(Path::new("/cache")), 0);
        assert!(store
            .get(Path::new("/cache"))
            .unwrap()
            .compile
            .contains_key(&entry.cache_key));
    }

    #[test]
    fn test_eval_goes_to_pathless_bucket() {
        let mut store = store();
        let compiler = RecordingCompiler::default();
        let source = "export const x = 1";
        let mut entry = ModuleEntry::new("/src/a.js", source, &config());

        compile(&mut store, &compiler, &mut entry, source, &CompileRequest::eval()).unwrap();

        assert_eq!(store.pending_source_writes(Path::new("/cache")), 0);
        assert!(store
            .eval_cache()
            .compile
            .contains_key(&cache_key(None, source)));
        assert_eq!(entry.kind, EntryKind::Unknown);
    }

    #[test]
    fn test_lookup_miss_without_record() {
        let mut store = store();
        let mut entry = ModuleEntry::new("/src/a.js", "x", &config());
        assert!(lookup(&mut store, &mut entry).is_none());

        let mut anonymous = ModuleEntry::anonymous("x", &config());
        assert!(lookup(&mut store, &mut anonymous).is_none());
    }

    #[test]
    fn test_mjs_never_gets_cjs_interop() {
        let mut store = store();
        let compiler = RecordingCompiler::default();
        let request = CompileRequest {
            strict: Some(true),
            ..CompileRequest::default()
        };

        let mut mjs = ModuleEntry::new("/src/a.mjs", "export {}", &config());
        compile(&mut store, &compiler, &mut mjs, "export {}", &request).unwrap();
        let mut js = ModuleEntry::new("/src/b.js", "export {}", &config());
        compile(&mut store, &compiler, &mut js, "export {}", &request).unwrap();
        let mut evaluated = ModuleEntry::anonymous("1", &config());
        compile(&mut store, &compiler, &mut evaluated, "1", &CompileRequest::eval()).unwrap();

        let seen = compiler.seen.lock().unwrap();
        assert!(!seen[0].cjs);
        assert!(seen[1].cjs);
        assert_eq!(seen[1].strict, Some(true));
        assert_eq!(seen[2].strict, None);
        assert_eq!(seen[2].runtime_name, config().runtime_name);
    }
}
