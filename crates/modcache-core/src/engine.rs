//! Seam to the host script engine that produces bytecode.

/// A unit of code the engine has compiled
///
/// The cache holds these until shutdown, then asks them for bytecode.
pub trait CompiledScript {
    /// Bytecode the engine produced while compiling, if it was asked to
    fn cached_data(&self) -> Option<Vec<u8>>;

    /// The engine refused the bytecode it was given for this unit
    fn cached_data_rejected(&self) -> bool;

    /// Produce bytecode now, after the unit has run
    fn create_cached_data(&self) -> Vec<u8>;
}

/// Capabilities of the host engine
pub trait ScriptEngine: Send + Sync {
    /// Bytecode can be extracted from an already compiled unit
    fn supports_create_cached_data(&self) -> bool;
}

/// Engine that can only hand back bytecode produced at compile time
#[derive(Debug, Default, Clone, Copy)]
pub struct CompileTimeOnlyEngine;

impl ScriptEngine for CompileTimeOnlyEngine {
    fn supports_create_cached_data(&self) -> bool {
        false
    }
}
