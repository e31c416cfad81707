//! Compilation driver.
//!
//! The `ModuleCompiler` runs the back-end stages over a whole module in a fixed order:
//! verification, liveness, and per function lowering, slot allocation and linking.

use crate::{
    analysis::LivenessAnalyzer,
    compiler::{
        BlockLinker, CodegenConfig, CompiledModule, ConservativeUsage, EventLog,
        InstructionLowerer, StackAllocator, SymbolUsage,
    },
    il::{verify_global_exclusivity, verify_module, FunctionId, Module},
    Result,
};

/// Compiles an SSA [`Module`] into a [`CompiledModule`].
///
/// The compiler consumes the SSA form: phis are eliminated and critical edges split in
/// the module it is given. Any error aborts the whole compilation.
///
/// # Example
///
/// ```rust,ignore
/// use stackgen::prelude::*;
///
/// let mut compiler = ModuleCompiler::new().with_config(CodegenConfig::minimal());
/// let output = compiler.compile(&mut module)?;
/// println!("{output}");
/// println!("{}", compiler.events().summary());
/// ```
pub struct ModuleCompiler {
    /// Code generation options.
    config: CodegenConfig,
    /// Oracle for calls touching imported globals.
    usage: Box<dyn SymbolUsage>,
    /// Events recorded by all stages.
    events: EventLog,
}

impl Default for ModuleCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleCompiler {
    /// Creates a compiler with the default configuration and conservative symbol usage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: CodegenConfig::default(),
            usage: Box::new(ConservativeUsage),
            events: EventLog::new(),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: CodegenConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the symbol usage oracle.
    #[must_use]
    pub fn with_symbol_usage(mut self, usage: Box<dyn SymbolUsage>) -> Self {
        self.usage = usage;
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &CodegenConfig {
        &self.config
    }

    /// Events recorded by all compilations so far.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Compiles every function of `module`.
    ///
    /// # Errors
    ///
    /// Returns the first error of any stage. With [`CodegenConfig::verify`] set, malformed
    /// input is reported by the verifier before code generation starts.
    pub fn compile(&mut self, module: &mut Module) -> Result<CompiledModule> {
        if self.config.verify {
            verify_module(module)?;
        }
        let mut liveness = LivenessAnalyzer::new().execute(module);
        if self.config.verify {
            verify_global_exclusivity(module, &liveness)?;
        }

        let functions: Vec<FunctionId> = module.functions().map(|(id, _)| id).collect();
        let mut output = CompiledModule::default();
        for function in functions {
            log::debug!("compiling '{}'", module.function(function).name());
            let mut blocks = InstructionLowerer::new(
                module,
                &liveness,
                &self.config,
                self.usage.as_ref(),
                &self.events,
            )
            .lower_function(function)?;
            let allocation = StackAllocator::new(module, &liveness, &self.config, &self.events)
                .allocate(function, &mut blocks)?;
            BlockLinker::new(&self.config, &self.events).link(
                module,
                &mut liveness,
                function,
                &mut blocks,
                &allocation,
                &mut output,
            )?;
        }

        self.events.info(format!(
            "compiled {} functions into {} instructions",
            output.functions().len(),
            output.code().len()
        ));
        Ok(output)
    }
}
