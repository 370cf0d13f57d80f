//! Seam to the external source-to-source compiler.
//!
//! The cache treats the compiler as a black box: source text and options go
//! in, a [`CompileOutput`] comes out. Everything the cache persists about a
//! module is derived from that output.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether a source compiled as a classic script or as an ES module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Script,
    Module,
}

/// One `export { local as exported } from "specifier"` binding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct ExportPair {
    pub exported: String,
    pub local: String,
}

impl ExportPair {
    pub fn new(exported: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            exported: exported.into(),
            local: local.into(),
        }
    }
}

impl From<(String, String)> for ExportPair {
    fn from((exported, local): (String, String)) -> Self {
        Self { exported, local }
    }
}

impl From<ExportPair> for (String, String) {
    fn from(pair: ExportPair) -> Self {
        (pair.exported, pair.local)
    }
}

/// Options handed to the compiler for one compilation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOptions {
    /// Enable CommonJS interop in the emitted code
    pub cjs: bool,

    /// Source type to assume when the source is ambiguous
    pub hint: Option<SourceType>,

    /// Honor `"use module"` / `"use script"` directives
    pub pragmas: bool,

    /// Identifier of the runtime object injected into compiled code
    pub runtime_name: String,

    /// Force a source type instead of detecting it
    pub source_type: Option<SourceType>,

    /// Compile in strict mode
    pub strict: Option<bool>,

    /// Emit `var` instead of `let`/`const` for hoisted bindings
    pub var: bool,
}

/// Structured result of one compilation, in the compiler's compact shape
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOutput {
    /// Transpiled code differs from the input
    pub changed: bool,

    /// Transpiled code
    pub code: String,

    pub source_type: SourceType,

    /// Script allows a top-level `return`
    pub top_level_return: bool,

    /// Imported specifier -> names expected to be exported by it
    pub dependency_specifiers: IndexMap<String, Vec<String>>,

    /// Re-exported specifier -> `[exported, local]` pairs
    pub exported_from: IndexMap<String, Vec<ExportPair>>,

    pub exported_names: Vec<String>,

    /// Specifiers re-exported with `export *`
    pub exported_stars: Vec<String>,

    /// Engine bytecode produced alongside compilation, if any
    pub script_data: Option<Vec<u8>>,
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Syntax error at {line}:{column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Compiler failure: {0}")]
    Internal(String),
}

/// The external source-to-source compiler
pub trait Compiler: Send + Sync {
    fn compile(
        &self,
        source: &str,
        options: &CompileOptions,
    ) -> Result<CompileOutput, CompileError>;
}
