//! # stackgen Prelude
//!
//! Re-exports the types needed to build an IL module, compile it and inspect the result.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all stackgen operations
pub use crate::Error;

/// The result type used throughout stackgen
pub use crate::Result;

// ================================================================================================
// IL Construction
// ================================================================================================

/// Module arena and handles
pub use crate::il::{BlockId, FunctionId, Module, ValueId, VariableId};

/// Closure-based builders
pub use crate::il::{BlockBuilder, FunctionContext, ModuleBuilder};

/// Operands and operators
pub use crate::il::{BinaryOp, Constant, PtrArg, SourcePosition, UnaryOp, ValueType};

/// Variables and storage classes
pub use crate::il::{StorageType, Variable};

// ================================================================================================
// Analysis
// ================================================================================================

/// Live-variable analysis
pub use crate::analysis::{Liveness, LivenessAnalyzer};

// ================================================================================================
// Target Instructions
// ================================================================================================

/// Stack-machine instructions
pub use crate::assembly::{Instruction, Opcode, Reference};

// ================================================================================================
// Compilation
// ================================================================================================

/// Driver and configuration
pub use crate::compiler::{CodegenConfig, ModuleCompiler};

/// Output of a compilation
pub use crate::compiler::{CompiledModule, DebugRecord, FunctionInfo, LocationChange};

/// Symbol usage oracles
pub use crate::compiler::{ConservativeUsage, SymbolUsage, SymbolUsageTable};

/// Event log
pub use crate::compiler::{EventKind, EventLog};
