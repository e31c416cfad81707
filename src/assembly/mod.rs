//! Stack-machine instruction set emitted by the back-end.
//!
//! # Key Components
//!
//! - [`Opcode`] - operations with their stack effects
//! - [`Instruction`] - an emitted instruction with operand, slot and debug annotations
//! - [`VarPosition`] - "value lives at this location" annotations consumed by the debug
//!   information builder

mod instruction;
mod position;

pub use instruction::{Instruction, Opcode, Reference};
pub use position::{VarPosition, VarPositionFlags};
