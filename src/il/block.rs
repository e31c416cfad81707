//! Basic blocks and phi nodes.
//!
//! A [`BasicBlock`] owns its phi nodes followed by its instructions. Control flow edges,
//! exception edges and the dominator tree are stored as [`BlockId`] vectors so the graph
//! can be walked and rewritten without shared ownership.
//!
//! # Edge conventions
//!
//! - 0 successors: the block ends in a return.
//! - 1 successor: the block falls through (or jumps) to it.
//! - 2 successors: the block ends in exactly one conditional jump; successor 0 is the
//!   target taken when the condition is true, successor 1 when it is false.
//!
//! Throw successors are kept apart from normal successors. Any instruction that may throw
//! transfers control to them mid-block.

use std::fmt;

use crate::il::{IlInstruction, ValueId};

/// Handle of a [`BasicBlock`] inside a [`crate::il::Module`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(usize);

impl BlockId {
    /// Creates a handle from a raw arena index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the raw arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// One incoming value of a phi node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhiOperand {
    value: ValueId,
    predecessor: BlockId,
}

impl PhiOperand {
    /// Creates an operand selecting `value` when control arrives from `predecessor`.
    #[must_use]
    pub const fn new(value: ValueId, predecessor: BlockId) -> Self {
        Self { value, predecessor }
    }

    /// The incoming value.
    #[must_use]
    pub const fn value(&self) -> ValueId {
        self.value
    }

    /// The predecessor block of the edge.
    #[must_use]
    pub const fn predecessor(&self) -> BlockId {
        self.predecessor
    }
}

impl fmt::Display for PhiOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {}", self.value, self.predecessor)
    }
}

/// A phi node: `result = phi(operand per predecessor)`.
///
/// The operand count always equals the predecessor count of the owning block, and operands
/// are kept in predecessor order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhiNode {
    result: ValueId,
    operands: Vec<PhiOperand>,
}

impl PhiNode {
    /// Creates a phi node without operands.
    #[must_use]
    pub fn new(result: ValueId) -> Self {
        Self {
            result,
            operands: Vec::new(),
        }
    }

    /// The defined value.
    #[must_use]
    pub const fn result(&self) -> ValueId {
        self.result
    }

    /// Operands in predecessor order.
    #[must_use]
    pub fn operands(&self) -> &[PhiOperand] {
        &self.operands
    }

    /// Appends an operand.
    pub fn add_operand(&mut self, operand: PhiOperand) {
        self.operands.push(operand);
    }

    /// The value flowing in from `predecessor`.
    #[must_use]
    pub fn operand_from(&self, predecessor: BlockId) -> Option<ValueId> {
        self.operands
            .iter()
            .find(|op| op.predecessor == predecessor)
            .map(PhiOperand::value)
    }

    /// Redirects the operand coming from `old` to come from `new`.
    pub(crate) fn replace_predecessor(&mut self, old: BlockId, new: BlockId) {
        for op in &mut self.operands {
            if op.predecessor == old {
                op.predecessor = new;
            }
        }
    }

    /// Reorders operands to follow `predecessors`.
    pub(crate) fn sort_by_predecessors(&mut self, predecessors: &[BlockId]) {
        self.operands.sort_by_key(|op| {
            predecessors
                .iter()
                .position(|&p| p == op.predecessor)
                .unwrap_or(usize::MAX)
        });
    }
}

impl fmt::Display for PhiNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = phi(", self.result)?;
        for (i, op) in self.operands.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{op}")?;
        }
        write!(f, ")")
    }
}

/// A node of the control flow graph.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub(crate) phis: Vec<PhiNode>,
    pub(crate) instructions: Vec<IlInstruction>,
    pub(crate) successors: Vec<BlockId>,
    pub(crate) predecessors: Vec<BlockId>,
    pub(crate) throw_successors: Vec<BlockId>,
    pub(crate) dominator: Option<BlockId>,
    pub(crate) dominees: Vec<BlockId>,
}

impl BasicBlock {
    /// Phi nodes, evaluated at block entry.
    #[must_use]
    pub fn phis(&self) -> &[PhiNode] {
        &self.phis
    }

    /// Instructions in program order.
    #[must_use]
    pub fn instructions(&self) -> &[IlInstruction] {
        &self.instructions
    }

    /// Normal successors. See the module docs for the ordering convention.
    #[must_use]
    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }

    /// Normal predecessors.
    #[must_use]
    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    /// Exception handlers reachable from any throwing instruction of this block.
    #[must_use]
    pub fn throw_successors(&self) -> &[BlockId] {
        &self.throw_successors
    }

    /// Immediate dominator. `None` only for function entries.
    #[must_use]
    pub const fn dominator(&self) -> Option<BlockId> {
        self.dominator
    }

    /// Blocks immediately dominated by this one.
    #[must_use]
    pub fn dominees(&self) -> &[BlockId] {
        &self.dominees
    }

    /// Returns `true` if the block ends the function.
    #[must_use]
    pub fn is_exit(&self) -> bool {
        self.successors.is_empty()
    }

    /// Iterates the values defined by phi nodes and instructions.
    pub fn defs(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.phis.iter().map(PhiNode::result).chain(
            self.instructions
                .iter()
                .flat_map(|instr| instr.usedefs().defs().iter().copied()),
        )
    }

    /// Iterates the values read by instructions. Phi operands are edge uses and not included.
    pub fn uses(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.instructions
            .iter()
            .flat_map(|instr| instr.usedefs().uses().iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phi_operands() {
        let (b0, b1, b2) = (BlockId::new(0), BlockId::new(1), BlockId::new(2));
        let mut phi = PhiNode::new(ValueId::new(9));
        phi.add_operand(PhiOperand::new(ValueId::new(2), b1));
        phi.add_operand(PhiOperand::new(ValueId::new(1), b0));

        phi.sort_by_predecessors(&[b0, b1]);
        assert_eq!(phi.operands()[0].predecessor(), b0);
        assert_eq!(phi.operand_from(b1), Some(ValueId::new(2)));

        phi.replace_predecessor(b1, b2);
        assert_eq!(phi.operand_from(b2), Some(ValueId::new(2)));
        assert_eq!(phi.operand_from(b1), None);
        assert_eq!(phi.to_string(), "v9 = phi(v1 from B0, v2 from B2)");
    }
}
