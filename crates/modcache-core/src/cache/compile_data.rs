//! Live compile output and the inflate/deflate conversions.
//!
//! The compiler and the sidecar share a compact shape. Module linking wants a
//! richer one: per-dependency slots the linker fills in, and a table resolving
//! every exported name to either a local binding or a re-export.

use indexmap::IndexMap;
use std::path::PathBuf;

use super::record::CacheRecord;
use crate::compiler::{CompileOutput, ExportPair, SourceType};

/// A dependency of a module, as seen by the linker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySpecifier {
    /// Filled in by the linker once the specifier is resolved
    pub resolved: Option<PathBuf>,

    /// Names the importing module expects the dependency to export
    pub exported_names: Vec<String>,
}

/// How an exported name is satisfied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportedSpecifier {
    /// Declared by the module itself
    Own,

    /// Forwarded from another module's `local` binding
    Reexport { local: String, specifier: String },
}

/// Compile output in the shape the rest of the system consumes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileData {
    pub changed: bool,

    /// Transpiled code; `None` when reconstructed from the sidecar
    pub code: Option<String>,

    pub source_type: SourceType,
    pub top_level_return: bool,
    pub dependency_specifiers: IndexMap<String, DependencySpecifier>,
    pub exported_from: IndexMap<String, Vec<ExportPair>>,
    pub exported_names: Vec<String>,
    pub exported_specifiers: IndexMap<String, ExportedSpecifier>,
    pub exported_stars: Vec<String>,
    pub script_data: Option<Vec<u8>>,
}

impl CompileData {
    /// Inflate fresh compiler output
    pub fn from_output(output: CompileOutput) -> Self {
        let mut data = Self {
            changed: output.changed,
            code: Some(output.code),
            source_type: output.source_type,
            top_level_return: output.top_level_return,
            dependency_specifiers: IndexMap::new(),
            exported_from: IndexMap::new(),
            exported_names: Vec::new(),
            exported_specifiers: IndexMap::new(),
            exported_stars: Vec::new(),
            script_data: output.script_data.filter(|data| !data.is_empty()),
        };

        if data.source_type == SourceType::Module {
            data.inflate_module_fields(
                &output.dependency_specifiers,
                output.exported_from,
                output.exported_names,
                output.exported_stars,
            );
        }

        data
    }

    /// Reconstruct compile output from a persisted record and the blob buffer
    pub fn from_record(record: &CacheRecord, buffer: &[u8]) -> Self {
        let script_data = record
            .blob()
            .and_then(|range| range.slice(buffer))
            .filter(|bytes| !bytes.is_empty())
            .map(<[u8]>::to_vec);

        match record {
            CacheRecord::Script(script) => Self {
                changed: script.changed,
                source_type: SourceType::Script,
                top_level_return: script.top_level_return,
                script_data,
                ..Self::default()
            },
            CacheRecord::Module(module) => {
                let mut data = Self {
                    changed: module.changed,
                    source_type: SourceType::Module,
                    script_data,
                    ..Self::default()
                };
                data.inflate_module_fields(
                    &module.dependency_specifiers,
                    module.exported_from.clone(),
                    module.exported_names.clone(),
                    module.exported_stars.clone(),
                );
                data
            }
        }
    }

    pub fn is_module(&self) -> bool {
        self.source_type == SourceType::Module
    }

    fn inflate_module_fields(
        &mut self,
        dependency_specifiers: &IndexMap<String, Vec<String>>,
        exported_from: IndexMap<String, Vec<ExportPair>>,
        exported_names: Vec<String>,
        exported_stars: Vec<String>,
    ) {
        self.dependency_specifiers = inflate_dependency_specifiers(dependency_specifiers);
        self.exported_specifiers = inflate_exported_specifiers(&exported_names, &exported_from);
        self.exported_from = exported_from;
        self.exported_names = exported_names;
        self.exported_stars = exported_stars;
    }

    /// Compact dependency specifiers back to specifier -> expected names
    pub fn deflate_dependency_specifiers(&self) -> IndexMap<String, Vec<String>> {
        self.dependency_specifiers
            .iter()
            .map(|(specifier, dependency)| (specifier.clone(), dependency.exported_names.clone()))
            .collect()
    }
}

fn inflate_dependency_specifiers(
    compact: &IndexMap<String, Vec<String>>,
) -> IndexMap<String, DependencySpecifier> {
    compact
        .iter()
        .map(|(specifier, names)| {
            (
                specifier.clone(),
                DependencySpecifier {
                    resolved: None,
                    exported_names: names.clone(),
                },
            )
        })
        .collect()
}

/// Own exports map to themselves; re-exports later in the table win over
/// earlier ones with the same exported name.
fn inflate_exported_specifiers(
    exported_names: &[String],
    exported_from: &IndexMap<String, Vec<ExportPair>>,
) -> IndexMap<String, ExportedSpecifier> {
    let mut result: IndexMap<String, ExportedSpecifier> = exported_names
        .iter()
        .map(|name| (name.clone(), ExportedSpecifier::Own))
        .collect();

    for (specifier, pairs) in exported_from {
        for pair in pairs {
            result.insert(
                pair.exported.clone(),
                ExportedSpecifier::Reexport {
                    local: pair.local.clone(),
                    specifier: specifier.clone(),
                },
            );
        }
    }

    result
}
