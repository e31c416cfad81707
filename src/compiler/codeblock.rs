//! Lowered blocks.

use std::fmt;

use crate::{
    assembly::Instruction,
    il::{BlockId, ValueId},
};

/// A value that must be on the evaluation stack before a code sequence runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingLoad {
    /// The value to push.
    pub value: ValueId,
    /// Index of the IL instruction that consumes it, `None` for phi sources.
    pub cause: Option<usize>,
}

/// Target code of one basic block.
///
/// `loads` lists the values expected on the stack when the block starts, bottom first;
/// `stores` the values it leaves on the stack when it ends. After lowering both are empty;
/// phi elimination fills them in.
#[derive(Debug, Clone)]
pub struct CodeBlock {
    pub(crate) block: BlockId,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) loads: Vec<PendingLoad>,
    pub(crate) stores: Vec<ValueId>,
    pub(crate) uses: Vec<ValueId>,
    pub(crate) defs: Vec<ValueId>,
    pub(crate) throw_uses: Vec<ValueId>,
}

impl CodeBlock {
    /// Creates an empty code block for `block`.
    #[must_use]
    pub fn new(block: BlockId) -> Self {
        Self {
            block,
            instructions: Vec::new(),
            loads: Vec::new(),
            stores: Vec::new(),
            uses: Vec::new(),
            defs: Vec::new(),
            throw_uses: Vec::new(),
        }
    }

    /// The basic block this code was generated from.
    #[must_use]
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Instructions in execution order.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Values expected on the stack at entry, bottom first.
    #[must_use]
    pub fn loads(&self) -> &[PendingLoad] {
        &self.loads
    }

    /// Values left on the stack at exit, bottom first.
    #[must_use]
    pub fn stores(&self) -> &[ValueId] {
        &self.stores
    }

    /// Values read by the block.
    #[must_use]
    pub fn uses(&self) -> &[ValueId] {
        &self.uses
    }

    /// Values defined by the block.
    #[must_use]
    pub fn defs(&self) -> &[ValueId] {
        &self.defs
    }

    /// Values an exception handler of the block still needs.
    #[must_use]
    pub fn throw_uses(&self) -> &[ValueId] {
        &self.throw_uses
    }
}

impl fmt::Display for CodeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.block)?;
        for instr in &self.instructions {
            writeln!(f, "    {instr}")?;
        }
        Ok(())
    }
}
