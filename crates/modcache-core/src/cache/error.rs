use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Corrupted cache file: {path}")]
    CorruptedFile { path: PathBuf },

    #[error("Cache directory unavailable: {path}: {source}")]
    DirectoryUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_mismatch_display() {
        let err = CacheError::VersionMismatch {
            expected: 2,
            found: 1,
        };
        assert_eq!(
            err.to_string(),
            "Cache version mismatch: expected 2, found 1"
        );
    }

    #[test]
    fn test_directory_unavailable_display() {
        let err = CacheError::DirectoryUnavailable {
            path: PathBuf::from("/cache"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/cache"));
        assert!(msg.contains("denied"));
    }
}
