//! Test fixtures - source code snippets for testing

/// Module exporting a single constant
pub fn simple_module() -> &'static str {
    "export const x = 1"
}

/// Same file as [`simple_module`] after an edit
pub fn simple_module_edited() -> &'static str {
    "export const x = 2"
}

pub fn reexporting_module() -> &'static str {
    r#"import { helper } from "./util.js"
export const answer = 42
export function run() {}
export { helper as util, inner as renamed } from "./util.js"
export * from "./all.js""#
}

/// Classic script that needs no transformation
pub fn plain_script() -> &'static str {
    "var total = 1 + 2"
}

pub fn script_with_return() -> &'static str {
    "if (done) {\nreturn\n}"
}

/// Rejected by the mock compiler
pub fn syntax_error() -> &'static str {
    "export const = @@"
}
