/// Configuration for the code generation pipeline.
///
/// Controls the optional parts of [`crate::compiler::ModuleCompiler`]: the store/load
/// peephole of the lowering, slot reuse of the allocator, debug information and the
/// structural checks run before code generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenConfig {
    /// Remove `STORES v; LOADS v` pairs whose value is consumed right away.
    pub eliminate_store_load_pairs: bool,
    /// Let a new version of a variable reuse the slot of an earlier version.
    pub reuse_variable_slots: bool,
    /// Produce debug location records.
    ///
    /// When disabled, values of user-visible variables may be kept on the evaluation
    /// stack like temporaries.
    pub emit_debug_info: bool,
    /// Verify IL invariants before generating code.
    pub verify: bool,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            eliminate_store_load_pairs: true,
            reuse_variable_slots: true,
            emit_debug_info: true,
            verify: cfg!(debug_assertions),
        }
    }
}

impl CodegenConfig {
    /// Creates a new default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration that emits every store and load verbatim and gives each
    /// value its own slot.
    ///
    /// Useful for comparing against optimized output.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            eliminate_store_load_pairs: false,
            reuse_variable_slots: false,
            emit_debug_info: true,
            verify: true,
        }
    }

    /// Sets store/load pair elimination.
    #[must_use]
    pub fn with_store_load_elimination(mut self, enabled: bool) -> Self {
        self.eliminate_store_load_pairs = enabled;
        self
    }

    /// Sets slot reuse across versions of a variable.
    #[must_use]
    pub fn with_slot_reuse(mut self, enabled: bool) -> Self {
        self.reuse_variable_slots = enabled;
        self
    }

    /// Sets debug information generation.
    #[must_use]
    pub fn with_debug_info(mut self, enabled: bool) -> Self {
        self.emit_debug_info = enabled;
        self
    }

    /// Sets IL verification.
    #[must_use]
    pub fn with_verification(mut self, enabled: bool) -> Self {
        self.verify = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CodegenConfig::default();
        assert!(config.eliminate_store_load_pairs);
        assert!(config.reuse_variable_slots);
        assert!(config.emit_debug_info);
        assert_eq!(config.verify, cfg!(debug_assertions));
    }

    #[test]
    fn test_builder_methods() {
        let config = CodegenConfig::new()
            .with_debug_info(false)
            .with_verification(true);
        assert!(!config.emit_debug_info);
        assert!(config.verify);

        let minimal = CodegenConfig::minimal();
        assert!(!minimal.eliminate_store_load_pairs);
        assert!(!minimal.reuse_variable_slots);
    }
}
