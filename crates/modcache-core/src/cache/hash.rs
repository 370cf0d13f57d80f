//! Cache key derivation
//!
//! A key is `<path hash><content hash><ext>`. The path hash depends only on
//! the module path, so every historical version of one file shares it and
//! can be swept together once a newer version is written.

use std::path::Path;

use super::CACHE_VERSION;

/// Length of the path-derived key prefix, in hex characters
pub const PATH_HASH_LEN: usize = 16;

const CONTENT_HASH_LEN: usize = 16;

const DEFAULT_EXTENSION: &str = "js";

/// Hash of a module path; anonymous (eval) sources hash the empty path
pub fn path_hash(path: Option<&Path>) -> String {
    let path = path.map(|p| p.to_string_lossy()).unwrap_or_default();
    let hash = blake3::hash(path.as_bytes());
    hash.to_hex()[..PATH_HASH_LEN].to_string()
}

fn content_hash(content: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&CACHE_VERSION.to_le_bytes());
    hasher.update(content.as_bytes());
    hasher.finalize().to_hex()[..CONTENT_HASH_LEN].to_string()
}

/// Derive the cache key for a module
pub fn cache_key(path: Option<&Path>, content: &str) -> String {
    let ext = path
        .and_then(|p| p.extension())
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());

    format!("{}{}.{}", path_hash(path), content_hash(content), ext)
}

/// The path-hash prefix of a key, if the key is long enough to have one
pub fn key_path_hash(key: &str) -> Option<&str> {
    key.get(..PATH_HASH_LEN)
}

/// Whether a file name in a cache directory names a per-key source file
pub fn is_cache_key(name: &str) -> bool {
    let hashes = PATH_HASH_LEN + CONTENT_HASH_LEN;
    name.len() > hashes + 1
        && name.as_bytes()[..hashes]
            .iter()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b))
        && name.as_bytes()[hashes] == b'.'
}
