use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::compile_data::CompileData;
use crate::compiler::{ExportPair, SourceType};

/// Byte range `[start, end)` of one entry's bytecode inside the packed blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(usize, usize)", into = "(usize, usize)")]
pub struct BlobRange {
    pub start: usize,
    pub end: usize,
}

impl BlobRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slice this range out of `buffer`; `None` if it does not fit
    pub fn slice<'a>(&self, buffer: &'a [u8]) -> Option<&'a [u8]> {
        buffer.get(self.start..self.end)
    }
}

impl From<(usize, usize)> for BlobRange {
    fn from((start, end): (usize, usize)) -> Self {
        Self { start, end }
    }
}

impl From<BlobRange> for (usize, usize) {
    fn from(range: BlobRange) -> Self {
        (range.start, range.end)
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Persisted metadata for a script-kind module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<BlobRange>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub changed: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub top_level_return: bool,
}

/// Persisted metadata for a module-kind module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<BlobRange>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub changed: bool,

    /// Imported specifier -> names it must export
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dependency_specifiers: IndexMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub exported_from: IndexMap<String, Vec<ExportPair>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exported_names: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exported_stars: Vec<String>,
}

/// One cache entry as stored in the sidecar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CacheRecord {
    Script(ScriptRecord),
    Module(ModuleRecord),
}

impl Default for CacheRecord {
    fn default() -> Self {
        CacheRecord::Script(ScriptRecord::default())
    }
}

impl CacheRecord {
    /// Deflate live compile output into its persisted shape, without bytecode
    pub fn from_compile_data(data: &CompileData) -> Self {
        match data.source_type {
            SourceType::Script => CacheRecord::Script(ScriptRecord {
                blob: None,
                changed: data.changed,
                top_level_return: data.top_level_return,
            }),
            SourceType::Module => CacheRecord::Module(ModuleRecord {
                blob: None,
                changed: data.changed,
                dependency_specifiers: data.deflate_dependency_specifiers(),
                exported_from: data.exported_from.clone(),
                exported_names: data.exported_names.clone(),
                exported_stars: data.exported_stars.clone(),
            }),
        }
    }

    pub fn source_type(&self) -> SourceType {
        match self {
            CacheRecord::Script(_) => SourceType::Script,
            CacheRecord::Module(_) => SourceType::Module,
        }
    }

    pub fn changed(&self) -> bool {
        match self {
            CacheRecord::Script(record) => record.changed,
            CacheRecord::Module(record) => record.changed,
        }
    }

    pub fn blob(&self) -> Option<BlobRange> {
        match self {
            CacheRecord::Script(record) => record.blob,
            CacheRecord::Module(record) => record.blob,
        }
    }

    pub fn set_blob(&mut self, blob: Option<BlobRange>) {
        match self {
            CacheRecord::Script(record) => record.blob = blob,
            CacheRecord::Module(record) => record.blob = blob,
        }
    }
}
