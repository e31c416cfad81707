//! Code generation from SSA IL to stack-machine instructions.
//!
//! This module sits between the IL and the final instruction stream:
//!
//! - [`crate::il`] - SSA input, built by a front-end or [`crate::il::ModuleBuilder`]
//! - [`crate::analysis`] - liveness consumed by every stage here
//! - [`compiler`](self) - lowering, slot allocation, phi elimination, linking
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       Code Generation                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ModuleCompiler              Driver, one module at a time        │
//! │    ├─ verify_module           (structural checks, optional)      │
//! │    └─ LivenessAnalyzer        (entry/exit live sets)             │
//! │                                                                  │
//! │  Per function:                                                   │
//! │    InstructionLowerer         IL → CodeBlocks                    │
//! │      ├─ fragment merging      (expression trees → stack code)    │
//! │      └─ store/load peephole                                      │
//! │    StackAllocator             values → frame slots               │
//! │      ├─ phi trivialization    (shared slot, no copies)           │
//! │      └─ last-use marking      (LOADSD, POP, DESTROYS)            │
//! │    BlockLinker                CodeBlocks → flat code             │
//! │      ├─ phi elimination       (stores at joins, edge splitting)  │
//! │      ├─ layout + jumps        (true successor falls through)     │
//! │      └─ DebugLocationTracker  (variable location records)        │
//! │                                                                  │
//! │  EventLog                    Change tracking and diagnostics     │
//! │  SymbolUsage                 Which globals a call may touch      │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod allocator;
pub mod builtins;
mod codeblock;
mod config;
mod debuginfo;
mod events;
mod linker;
mod lowering;
mod output;
mod pipeline;
mod usage;

pub use allocator::{StackAllocation, StackAllocator};
pub use codeblock::{CodeBlock, PendingLoad};
pub use config::CodegenConfig;
pub use debuginfo::{DebugLocationTracker, DebugRecord, LocationChange, VarLocation};
pub use events::{Event, EventBuilder, EventKind, EventLog};
pub use linker::BlockLinker;
pub use lowering::InstructionLowerer;
pub use output::{CompiledModule, FunctionInfo, HandlerRange};
pub use pipeline::ModuleCompiler;
pub use usage::{ConservativeUsage, SymbolUsage, SymbolUsageTable};
