//! SSA intermediate language consumed by the back-end.
//!
//! The IL is stored in a [`Module`] arena and addressed through index handles
//! ([`VariableId`], [`ValueId`], [`BlockId`], [`FunctionId`]). Blocks reference each other
//! only through these handles, which keeps the many-to-many relations of a CFG (edges,
//! dominees, phi operands naming predecessors) free of ownership cycles and lets later
//! stages rewrite the graph in place.
//!
//! # Key Components
//!
//! - [`Module`] - the arena and graph queries such as [`Module::dominates`]
//! - [`IlOp`] / [`IlInstruction`] - the closed instruction set with use/def tracking
//! - [`BasicBlock`] / [`PhiNode`] - CFG nodes
//! - [`ModuleBuilder`] - closure-based construction API
//! - [`verify_module`] - structural checks run in debug builds

mod block;
mod builder;
mod dominators;
mod function;
mod instruction;
mod module;
mod variable;
mod verify;

pub use block::{BasicBlock, BlockId, PhiNode, PhiOperand};
pub use builder::{BlockBuilder, FunctionContext, ModuleBuilder};
pub use dominators::DominatorTree;
pub use function::{CodedFunction, FunctionId};
pub use instruction::{
    BinaryOp, Constant, IlInstruction, IlOp, PtrArg, SourcePosition, UnaryOp, UseDefTracker,
    ValueType,
};
pub use module::{Module, OUTSIDE_WORLD};
pub use variable::{SsaValue, StorageType, ValueId, Variable, VariableId, INTERNAL_PREFIX};
pub use verify::{verify_dominator_closure, verify_global_exclusivity, verify_module};
