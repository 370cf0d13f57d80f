use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use super::{CacheError, CacheRecord, Result, CACHE_VERSION, SIDECAR_FILE_NAME};
use crate::fs::FileSystem;

/// Contents of `.data.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sidecar {
    /// Schema version for the sidecar format
    pub version: u32,

    /// Cache key -> record, in blob order
    pub map: IndexMap<String, CacheRecord>,
}

#[derive(Serialize)]
struct SidecarRef<'a> {
    version: u32,
    map: &'a IndexMap<String, CacheRecord>,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

impl Sidecar {
    pub fn new(map: IndexMap<String, CacheRecord>) -> Self {
        Self {
            version: CACHE_VERSION,
            map,
        }
    }

    /// Serialize a map under the current version without copying it
    pub fn encode(map: &IndexMap<String, CacheRecord>) -> Result<Vec<u8>> {
        let sidecar = SidecarRef {
            version: CACHE_VERSION,
            map,
        };
        serde_json::to_vec(&sidecar).map_err(CacheError::from)
    }

    /// Deserialize, checking the version before the records
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let probe: VersionProbe = serde_json::from_slice(bytes)?;
        if probe.version != CACHE_VERSION {
            return Err(CacheError::VersionMismatch {
                expected: CACHE_VERSION,
                found: probe.version,
            });
        }
        serde_json::from_slice(bytes).map_err(CacheError::from)
    }

    /// Read the sidecar of a cache directory; `Ok(None)` if there is none
    pub fn read(fs: &dyn FileSystem, dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(SIDECAR_FILE_NAME);
        if !fs.exists(&path) {
            debug!("No sidecar in {}", dir.display());
            return Ok(None);
        }

        let bytes = fs.read(&path)?;
        match Self::from_bytes(&bytes) {
            Err(CacheError::Serialization(e)) => {
                debug!("Unparsable sidecar {}: {}", path.display(), e);
                Err(CacheError::CorruptedFile { path })
            }
            other => other.map(Some),
        }
    }
}
