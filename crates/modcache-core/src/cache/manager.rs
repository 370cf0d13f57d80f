use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use super::caching_compiler;
use super::{CacheStore, CompileData, CompileRequest, FlushReport, ModuleEntry};
use crate::compiler::{CompileError, Compiler};
use crate::config::CacheConfig;
use crate::engine::{CompiledScript, ScriptEngine};
use crate::fs::FileSystem;

/// Main interface for cache operations
///
/// Construct one per process and call [`CacheManager::close`] before exiting.
/// If the manager is dropped without being closed (an early return or a
/// panic unwinding through the host), the flush runs from `Drop` instead.
pub struct CacheManager {
    config: CacheConfig,

    store: CacheStore,

    compiler: Arc<dyn Compiler>,

    engine: Arc<dyn ScriptEngine>,

    closed: bool,
}

impl CacheManager {
    pub fn new(
        config: CacheConfig,
        file_system: Arc<dyn FileSystem>,
        compiler: Arc<dyn Compiler>,
        engine: Arc<dyn ScriptEngine>,
    ) -> Self {
        Self {
            config,
            store: CacheStore::new(file_system),
            compiler,
            engine,
            closed: false,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Entry for a file under the configured cache directory
    pub fn entry(&self, filename: impl Into<PathBuf>, source: &str) -> ModuleEntry {
        ModuleEntry::new(filename, source, &self.config)
    }

    /// Persisted compile result for `entry`, if there is one
    pub fn lookup(&mut self, entry: &mut ModuleEntry) -> Option<Arc<CompileData>> {
        caching_compiler::lookup(&mut self.store, entry)
    }

    /// Compile unconditionally and memoize the result
    pub fn compile(
        &mut self,
        entry: &mut ModuleEntry,
        code: &str,
        request: &CompileRequest,
    ) -> Result<Arc<CompileData>, CompileError> {
        caching_compiler::compile(&mut self.store, self.compiler.as_ref(), entry, code, request)
    }

    /// Cached result if present, otherwise a fresh compile
    pub fn load_or_compile(
        &mut self,
        entry: &mut ModuleEntry,
        code: &str,
        request: &CompileRequest,
    ) -> Result<Arc<CompileData>, CompileError> {
        if !request.eval {
            if let Some(data) = self.lookup(entry) {
                return Ok(data);
            }
        }
        self.compile(entry, code, request)
    }

    /// Hand over an engine-compiled unit so its bytecode is cached at close
    pub fn schedule_bytecode(&mut self, entry: &ModuleEntry, script: Box<dyn CompiledScript>) {
        match entry.cache_dir.as_deref() {
            Some(dir) => self.store.schedule_bytecode(dir, &entry.cache_key, script),
            None => debug!("No cache directory for {}, dropping bytecode", entry.cache_key),
        }
    }

    /// Discard the whole directory at close instead of merging into it
    pub fn mark_dirty(&mut self, dir: &Path) {
        self.store.mark_dirty(dir);
    }

    /// Flush everything to disk
    pub fn close(mut self) -> FlushReport {
        self.flush_once()
    }

    fn flush_once(&mut self) -> FlushReport {
        self.closed = true;
        self.store.flush(self.engine.as_ref(), self.config.coverage)
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Cache manager dropped without close(), flushing");
            self.flush_once();
        }
    }
}
