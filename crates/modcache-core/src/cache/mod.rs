//! Compilation cache
//!
//! Compile results live in memory for the lifetime of the process and are
//! persisted once, when the [`CacheManager`] is closed. Each cache directory
//! holds one transpiled-source file per changed module, a packed bytecode
//! blob, and a JSON sidecar describing every entry.

mod caching_compiler;
mod compile_data;
mod error;
mod flush;
mod hash;
mod manager;
mod path_cache;
mod record;
mod sidecar;
mod store;

pub use caching_compiler::{CompileRequest, EntryKind, ModuleEntry};
pub use compile_data::{CompileData, DependencySpecifier, ExportedSpecifier};
pub use error::{CacheError, Result};
pub use flush::FlushReport;
pub use hash::{cache_key, is_cache_key, key_path_hash, path_hash, PATH_HASH_LEN};
pub use manager::CacheManager;
pub use path_cache::{OffsetViolation, PathCache};
pub use record::{BlobRange, CacheRecord, ModuleRecord, ScriptRecord};
pub use sidecar::Sidecar;
pub use store::CacheStore;

/// Cache format version - increment when the sidecar layout changes
pub const CACHE_VERSION: u32 = 1;

/// Packed bytecode of every entry in a cache directory
pub const BLOB_FILE_NAME: &str = ".data.blob";

/// JSON metadata describing the entries of the blob
pub const SIDECAR_FILE_NAME: &str = ".data.json";

/// Marker left behind when a directory was reset
pub const DIRTY_MARKER_NAME: &str = ".dirty";

/// Marker telling coverage tooling the directory holds instrumented output
pub const COVERAGE_MARKER_NAME: &str = ".nyc";
