use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{
    BlobRange, CacheError, CacheRecord, CompileData, Sidecar, BLOB_FILE_NAME, DIRTY_MARKER_NAME,
};
use crate::fs::FileSystem;

/// A record whose blob range breaks the packing invariant
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OffsetViolation {
    #[error("{key}: range {start}..{end} is empty or reversed")]
    EmptyRange { key: String, start: usize, end: usize },

    #[error("{key}: range {start}..{end} exceeds blob length {len}")]
    OutOfBounds {
        key: String,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("{first} and {second} overlap")]
    Overlap { first: String, second: String },
}

/// In-memory state of one cache directory
#[derive(Debug, Default)]
pub struct PathCache {
    /// Persisted records, in blob order
    pub map: IndexMap<String, CacheRecord>,

    /// Blob contents as loaded from disk
    pub buffer: Vec<u8>,

    /// Reconstructed or freshly compiled output, never persisted directly
    pub compile: FxHashMap<String, Arc<CompileData>>,

    /// Discard and reset the directory at flush instead of merging
    pub dirty: bool,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a cache directory's sidecar and blob
    ///
    /// Never fails: a missing sidecar yields an empty cache, a corrupt or
    /// outdated one yields an empty cache marked dirty.
    pub fn load(fs: &dyn FileSystem, dir: &Path) -> Self {
        let marker = dir.join(DIRTY_MARKER_NAME);
        if fs.exists(&marker) {
            info!("Cache in {} was reset, starting fresh", dir.display());
            if let Err(e) = fs.remove_file(&marker) {
                debug!("Failed to remove dirty marker: {:?}", e);
            }
            return Self::new();
        }

        let map = match Sidecar::read(fs, dir) {
            Ok(Some(sidecar)) => sidecar.map,
            Ok(None) => return Self::new(),
            Err(CacheError::VersionMismatch { expected, found }) => {
                warn!(
                    "Cache version mismatch in {}: expected {}, found {}",
                    dir.display(),
                    expected,
                    found
                );
                return Self::dirty();
            }
            Err(e) => {
                warn!("Corrupted cache sidecar in {}: {:?}", dir.display(), e);
                return Self::dirty();
            }
        };

        let blob_path = dir.join(BLOB_FILE_NAME);
        let buffer = if fs.exists(&blob_path) {
            fs.read(&blob_path).unwrap_or_else(|e| {
                warn!("Failed to read cache blob {}: {:?}", blob_path.display(), e);
                Vec::new()
            })
        } else {
            Vec::new()
        };

        info!(
            "Loaded cache for {} with {} entries ({} blob bytes)",
            dir.display(),
            map.len(),
            buffer.len()
        );

        Self {
            map,
            buffer,
            compile: FxHashMap::default(),
            dirty: false,
        }
    }

    fn dirty() -> Self {
        Self {
            dirty: true,
            ..Self::default()
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn record(&self, key: &str) -> Option<&CacheRecord> {
        self.map.get(key)
    }

    /// Drop a key from both indexes, keeping the order of the others
    pub fn evict(&mut self, key: &str) {
        self.map.shift_remove(key);
        self.compile.remove(key);
    }

    /// Check every record's range against the loaded buffer
    pub fn verify(&self) -> Vec<OffsetViolation> {
        let mut violations = Vec::new();
        let mut ranges: Vec<(&str, BlobRange)> = Vec::new();

        for (key, record) in &self.map {
            let Some(range) = record.blob() else {
                continue;
            };

            if range.start >= range.end {
                violations.push(OffsetViolation::EmptyRange {
                    key: key.clone(),
                    start: range.start,
                    end: range.end,
                });
            } else if range.end > self.buffer.len() {
                violations.push(OffsetViolation::OutOfBounds {
                    key: key.clone(),
                    start: range.start,
                    end: range.end,
                    len: self.buffer.len(),
                });
            } else {
                ranges.push((key.as_str(), range));
            }
        }

        ranges.sort_by_key(|(_, range)| range.start);
        for pair in ranges.windows(2) {
            let (first, a) = pair[0];
            let (second, b) = pair[1];
            if b.start < a.end {
                violations.push(OffsetViolation::Overlap {
                    first: first.to_string(),
                    second: second.to_string(),
                });
            }
        }

        violations
    }
}
