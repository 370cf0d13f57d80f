//! Mock implementations for testing

use indexmap::IndexMap;
use modcache_core::compiler::{
    CompileError, CompileOptions, CompileOutput, Compiler, ExportPair, SourceType,
};
use modcache_core::engine::{CompiledScript, ScriptEngine};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A line-oriented stand-in for a real module compiler
///
/// Understands one statement per line: `import { a, b } from "x"`,
/// `export const|let|var|function|class name`, `export { a as b } from "x"`
/// and `export * from "x"`. A line containing `@@` is a syntax error.
#[derive(Debug, Default)]
pub struct MockCompiler {
    calls: AtomicUsize,
}

impl MockCompiler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of times `compile` ran
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn quoted(text: &str) -> Option<String> {
    let start = text.find(|c: char| c == '"' || c == '\'')?;
    let quote = text[start..].chars().next()?;
    let rest = &text[start + 1..];
    let end = rest.find(quote)?;
    Some(rest[..end].to_string())
}

fn braced(text: &str) -> Vec<String> {
    let (Some(open), Some(close)) = (text.find('{'), text.find('}')) else {
        return Vec::new();
    };
    text[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn declared_name(rest: &str) -> Option<String> {
    let mut words = rest.split_whitespace();
    match words.next()? {
        "const" | "let" | "var" | "function" | "class" => words
            .next()
            .map(|name| name.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_'))
            .filter(|name| !name.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

impl Compiler for MockCompiler {
    fn compile(
        &self,
        source: &str,
        options: &CompileOptions,
    ) -> Result<CompileOutput, CompileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut dependency_specifiers: IndexMap<String, Vec<String>> = IndexMap::new();
        let mut exported_from: IndexMap<String, Vec<ExportPair>> = IndexMap::new();
        let mut exported_names = Vec::new();
        let mut exported_stars = Vec::new();
        let mut has_module_syntax = false;
        let mut top_level_return = false;

        for (index, line) in source.lines().enumerate() {
            let line = line.trim();
            if let Some(column) = line.find("@@") {
                return Err(CompileError::Syntax {
                    line: index + 1,
                    column: column + 1,
                    message: "unexpected token".to_string(),
                });
            }

            if let Some(rest) = line.strip_prefix("import ") {
                has_module_syntax = true;
                if let Some(specifier) = quoted(rest) {
                    let names = braced(rest);
                    dependency_specifiers
                        .entry(specifier)
                        .or_default()
                        .extend(names);
                }
            } else if let Some(rest) = line.strip_prefix("export ") {
                has_module_syntax = true;
                if rest.starts_with('*') {
                    if let Some(specifier) = quoted(rest) {
                        exported_stars.push(specifier);
                    }
                } else if rest.starts_with('{') {
                    let pairs = braced(rest).into_iter().map(|binding| {
                        match binding.split_once(" as ") {
                            Some((local, exported)) => {
                                ExportPair::new(exported.trim(), local.trim())
                            }
                            None => ExportPair::new(binding.clone(), binding),
                        }
                    });
                    match quoted(rest) {
                        Some(specifier) => {
                            exported_from.entry(specifier).or_default().extend(pairs)
                        }
                        None => exported_names.extend(pairs.map(|pair| pair.exported)),
                    }
                } else if let Some(name) = declared_name(rest) {
                    exported_names.push(name);
                }
            } else if line == "return" || line.starts_with("return ") {
                top_level_return = true;
            }
        }

        let source_type = options.source_type.unwrap_or(if has_module_syntax {
            SourceType::Module
        } else {
            options.hint.unwrap_or(SourceType::Script)
        });

        if source_type == SourceType::Script {
            return Ok(CompileOutput {
                changed: false,
                code: source.to_string(),
                source_type,
                top_level_return,
                ..CompileOutput::default()
            });
        }

        Ok(CompileOutput {
            changed: true,
            code: format!("{}.r(function () {{\n{}\n}})", options.runtime_name, source),
            source_type,
            top_level_return: false,
            dependency_specifiers,
            exported_from,
            exported_names,
            exported_stars,
            script_data: None,
        })
    }
}

/// A compiled unit with scripted bytecode behavior
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    /// Returned by `cached_data`
    pub cached: Option<Vec<u8>>,

    /// Returned by `create_cached_data`
    pub on_demand: Vec<u8>,

    pub rejected: bool,
}

impl MockScript {
    /// Bytecode produced at compile time
    pub fn with_cached(bytes: &[u8]) -> Box<Self> {
        Box::new(Self {
            cached: Some(bytes.to_vec()),
            ..Self::default()
        })
    }

    /// Bytecode only available through on-demand extraction
    pub fn on_demand(bytes: &[u8]) -> Box<Self> {
        Box::new(Self {
            on_demand: bytes.to_vec(),
            ..Self::default()
        })
    }

    /// The engine refused previously supplied bytecode
    pub fn rejected() -> Box<Self> {
        Box::new(Self {
            rejected: true,
            ..Self::default()
        })
    }
}

impl CompiledScript for MockScript {
    fn cached_data(&self) -> Option<Vec<u8>> {
        self.cached.clone()
    }

    fn cached_data_rejected(&self) -> bool {
        self.rejected
    }

    fn create_cached_data(&self) -> Vec<u8> {
        self.on_demand.clone()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MockEngine {
    pub on_demand: bool,
}

impl MockEngine {
    pub fn with_on_demand() -> Arc<Self> {
        Arc::new(Self { on_demand: true })
    }

    pub fn compile_time_only() -> Arc<Self> {
        Arc::new(Self { on_demand: false })
    }
}

impl ScriptEngine for MockEngine {
    fn supports_create_cached_data(&self) -> bool {
        self.on_demand
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn compile(source: &str) -> CompileOutput {
        MockCompiler::default()
            .compile(source, &CompileOptions::default())
            .unwrap()
    }

    #[test]
    fn test_mock_compiler_module() {
        let output = compile(fixtures::reexporting_module());

        assert_eq!(output.source_type, SourceType::Module);
        assert!(output.changed);
        assert_eq!(output.exported_names, vec!["answer", "run"]);
        assert_eq!(output.dependency_specifiers["./util.js"], vec!["helper"]);
        assert_eq!(
            output.exported_from["./util.js"],
            vec![
                ExportPair::new("util", "helper"),
                ExportPair::new("renamed", "inner")
            ]
        );
        assert_eq!(output.exported_stars, vec!["./all.js"]);
    }

    #[test]
    fn test_mock_compiler_script() {
        let output = compile(fixtures::script_with_return());

        assert_eq!(output.source_type, SourceType::Script);
        assert!(!output.changed);
        assert!(output.top_level_return);
        assert_eq!(output.code, fixtures::script_with_return());
    }

    #[test]
    fn test_mock_compiler_syntax_error() {
        let compiler = MockCompiler::default();
        let err = compiler
            .compile(fixtures::syntax_error(), &CompileOptions::default())
            .unwrap_err();

        assert!(matches!(err, CompileError::Syntax { line: 1, .. }));
        assert_eq!(compiler.calls(), 1);
    }
}
