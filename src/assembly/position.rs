//! Debug annotations attached to target instructions.

use std::fmt;

use bitflags::bitflags;

use crate::il::ValueId;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// How a [`VarPosition`] is to be interpreted
    pub struct VarPositionFlags: u8 {
        /// The position is an evaluation-stack depth, not a frame slot
        const PUSH_POS = 0x01;
        /// Takes effect after the instruction executed
        const POST_INSTR = 0x02;
        /// The value stops living at the position
        const ERASE = 0x04;
        /// Restates the location of a value without claiming it is the current version
        const LOC_ONLY = 0x08;
    }
}

/// "This value now lives (or no longer lives) at this location."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarPosition {
    /// The SSA value.
    pub value: ValueId,
    /// Frame slot, or stack depth with [`VarPositionFlags::PUSH_POS`].
    pub position: i32,
    /// Interpretation flags.
    pub flags: VarPositionFlags,
}

impl VarPosition {
    /// Creates a position annotation.
    #[must_use]
    pub const fn new(value: ValueId, position: i32, flags: VarPositionFlags) -> Self {
        Self {
            value,
            position,
            flags,
        }
    }

    /// Returns `true` if the annotation applies after the instruction.
    #[must_use]
    pub fn is_post_instr(&self) -> bool {
        self.flags.contains(VarPositionFlags::POST_INSTR)
    }
}

impl fmt::Display for VarPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let place = if self.flags.contains(VarPositionFlags::PUSH_POS) {
            "stack"
        } else {
            "slot"
        };
        let verb = if self.flags.contains(VarPositionFlags::ERASE) {
            "leaves"
        } else {
            "at"
        };
        write!(f, "{} {} {} {}", self.value, verb, place, self.position)?;
        if self.flags.contains(VarPositionFlags::LOC_ONLY) {
            write!(f, " (loc)")?;
        }
        if self.is_post_instr() {
            write!(f, " (post)")?;
        }
        Ok(())
    }
}
