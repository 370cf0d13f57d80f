//! Persistent compilation cache for source-to-source module compilers.
//!
//! Compiled modules are memoized in memory while a process runs and written
//! out once, when the host closes the [`CacheManager`]. Secondary engine
//! bytecode from every module of a cache directory is packed into one blob
//! addressed by byte offsets recorded in a JSON sidecar.

pub mod cache;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod fs;

pub use cache::{
    CacheError, CacheManager, CacheRecord, CacheStore, CompileData, CompileRequest, FlushReport,
    ModuleEntry, PathCache,
};
pub use compiler::{CompileError, CompileOptions, CompileOutput, Compiler, SourceType};
pub use config::{CacheConfig, CliOverrides};
pub use engine::{CompiledScript, ScriptEngine};
pub use fs::{FileSystem, MockFileSystem, RealFileSystem};
