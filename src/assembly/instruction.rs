//! Target instruction representation.
//!
//! The virtual machine has no registers: every operation takes its operands from the
//! evaluation stack and pushes its result back. Values that outlive a single expression are
//! parked in numbered frame slots (`LOADS`/`STORES`). Negative slots address the caller's
//! arguments; slot `-1` is the last argument.
//!
//! # Key Components
//!
//! - [`Opcode`] - the instruction set, with stack effects and exception behaviour
//! - [`Reference`] - symbolic operand (value, global, callee, member, jump target, ...)
//! - [`Instruction`] - one emitted instruction with its debug annotations

use std::fmt;

use strum::{EnumIter, IntoStaticStr};

use crate::{
    assembly::VarPosition,
    il::{BlockId, Constant, SourcePosition, ValueId, ValueType, VariableId},
};

/// Operations of the stack machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Opcode {
    /// Push the value of a frame slot.
    LoadS,
    /// Push the value of a frame slot and release the slot.
    LoadSD,
    /// Pop into a frame slot.
    StoreS,
    /// Release a frame slot without reading it.
    DestroyS,
    /// Push the value of a global.
    LoadG,
    /// Pop into a global.
    StoreG,
    /// Push a constant.
    LoadC,
    /// Duplicate the top of stack.
    Dup,
    /// Discard the top of stack.
    Pop,
    /// Do nothing.
    Nop,
    /// Arithmetic negation.
    Neg,
    /// Logical not.
    Not,
    /// Bitwise complement.
    BitNot,
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Remainder.
    Mod,
    /// String concatenation.
    Concat,
    /// Logical and.
    And,
    /// Logical or.
    Or,
    /// Bitwise and.
    BitAnd,
    /// Bitwise or.
    BitOr,
    /// Bitwise xor.
    BitXor,
    /// Shift left.
    Shl,
    /// Shift right.
    Shr,
    /// Equality.
    CmpEq,
    /// Inequality.
    CmpNe,
    /// Less than.
    CmpLt,
    /// Less than or equal.
    CmpLe,
    /// Greater than.
    CmpGt,
    /// Greater than or equal.
    CmpGe,
    /// Type conversion.
    Cast,
    /// Read a record column.
    CellGet,
    /// Replace a record column.
    CellSet,
    /// Remove a record column.
    CellDelete,
    /// Call a named function.
    Call,
    /// Call a method on the object on top of the stack.
    CallMethod,
    /// Call through the function pointer on top of the stack.
    CallPtr,
    /// Read an object member.
    MemberGet,
    /// Write an object member.
    MemberSet,
    /// Add an object member.
    MemberInsert,
    /// Remove an object member.
    MemberDelete,
    /// Array element read.
    ArrayIndex,
    /// Array length.
    ArraySize,
    /// Append to an array.
    ArrayAppend,
    /// Insert into an array.
    ArrayInsert,
    /// Remove from an array.
    ArrayDelete,
    /// Replace an array element.
    ArraySet,
    /// Set along a nested member/column path.
    DeepSet,
    /// Append along a nested path.
    DeepAppend,
    /// Delete along a nested path.
    DeepDelete,
    /// Construct an object.
    ObjNew,
    /// Test for the default value.
    IsDefault,
    /// Unconditional jump.
    Jump,
    /// Pop and jump if true.
    JumpIfTrue,
    /// Pop and jump if false.
    JumpIfFalse,
    /// Leave the function.
    Return,
}

impl Opcode {
    /// Values popped and pushed.
    ///
    /// `arg_count` is the number of explicit arguments of call-like opcodes (and of
    /// `RETURN`, 0 or 1); `has_result` tells whether such an opcode pushes a result.
    #[must_use]
    pub fn stack_effect(self, arg_count: u32, has_result: bool) -> (u32, u32) {
        let result = u32::from(has_result);
        match self {
            Opcode::LoadS | Opcode::LoadSD | Opcode::LoadG | Opcode::LoadC => (0, 1),
            Opcode::StoreS | Opcode::StoreG | Opcode::Pop => (1, 0),
            Opcode::Dup => (1, 2),
            Opcode::DestroyS | Opcode::Nop | Opcode::Jump => (0, 0),
            Opcode::Neg
            | Opcode::Not
            | Opcode::BitNot
            | Opcode::Cast
            | Opcode::CellGet
            | Opcode::CellDelete
            | Opcode::MemberGet => (1, 1),
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Concat
            | Opcode::And
            | Opcode::Or
            | Opcode::BitAnd
            | Opcode::BitOr
            | Opcode::BitXor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::CmpEq
            | Opcode::CmpNe
            | Opcode::CmpLt
            | Opcode::CmpLe
            | Opcode::CmpGt
            | Opcode::CmpGe
            | Opcode::CellSet => (2, 1),
            Opcode::MemberSet | Opcode::MemberInsert => (2, 0),
            Opcode::MemberDelete | Opcode::JumpIfTrue | Opcode::JumpIfFalse => (1, 0),
            Opcode::Return => (arg_count, 0),
            Opcode::CallMethod | Opcode::CallPtr => (arg_count + 1, result),
            Opcode::Call
            | Opcode::ArrayIndex
            | Opcode::ArraySize
            | Opcode::ArrayAppend
            | Opcode::ArrayInsert
            | Opcode::ArrayDelete
            | Opcode::ArraySet
            | Opcode::DeepSet
            | Opcode::DeepAppend
            | Opcode::DeepDelete
            | Opcode::ObjNew
            | Opcode::IsDefault => (arg_count, result),
        }
    }

    /// Returns `true` if executing the opcode may raise an exception.
    #[must_use]
    pub const fn may_throw(self) -> bool {
        matches!(
            self,
            Opcode::Div
                | Opcode::Mod
                | Opcode::Cast
                | Opcode::CellGet
                | Opcode::CellSet
                | Opcode::CellDelete
                | Opcode::Call
                | Opcode::CallMethod
                | Opcode::CallPtr
                | Opcode::MemberGet
                | Opcode::MemberSet
                | Opcode::MemberInsert
                | Opcode::MemberDelete
                | Opcode::ArrayIndex
                | Opcode::ArrayInsert
                | Opcode::ArrayDelete
                | Opcode::ArraySet
                | Opcode::DeepSet
                | Opcode::DeepAppend
                | Opcode::DeepDelete
                | Opcode::ObjNew
        )
    }

    /// Returns `true` for jumps and branches.
    #[must_use]
    pub const fn is_jump(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse)
    }

    /// Returns `true` for calls and builtins, whose pop count depends on the argument count.
    #[must_use]
    pub const fn takes_arguments(self) -> bool {
        matches!(
            self,
            Opcode::Call
                | Opcode::CallMethod
                | Opcode::CallPtr
                | Opcode::ArrayIndex
                | Opcode::ArraySize
                | Opcode::ArrayAppend
                | Opcode::ArrayInsert
                | Opcode::ArrayDelete
                | Opcode::ArraySet
                | Opcode::DeepSet
                | Opcode::DeepAppend
                | Opcode::DeepDelete
                | Opcode::ObjNew
                | Opcode::IsDefault
        )
    }

    /// Returns `true` for opcodes addressing a frame slot.
    #[must_use]
    pub const fn uses_slot(self) -> bool {
        matches!(
            self,
            Opcode::LoadS | Opcode::LoadSD | Opcode::StoreS | Opcode::DestroyS
        )
    }
}

/// Symbolic operand of an [`Instruction`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Reference {
    /// No operand.
    #[default]
    None,
    /// An SSA value held in a frame slot.
    Value(ValueId),
    /// A global variable.
    Global {
        /// Variable handle.
        variable: VariableId,
        /// Symbol name.
        name: String,
    },
    /// A callee.
    Function(String),
    /// A record column.
    Column(String),
    /// An object member.
    Member {
        /// Member name.
        name: String,
        /// Private member (insert only).
        private: bool,
    },
    /// Target type of a cast.
    Type(ValueType),
    /// Jump target before linking.
    Block(BlockId),
    /// Jump target after linking.
    Offset(usize),
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::None => Ok(()),
            Reference::Value(v) => write!(f, "{v}"),
            Reference::Global { name, .. } => write!(f, "@{name}"),
            Reference::Function(name) => write!(f, "{name}"),
            Reference::Column(name) => write!(f, ".{name}"),
            Reference::Member { name, private } => {
                write!(f, "->{name}{}", if *private { " private" } else { "" })
            }
            Reference::Type(ty) => write!(f, "{ty}"),
            Reference::Block(block) => write!(f, "{block}"),
            Reference::Offset(offset) => write!(f, "{offset:04}"),
        }
    }
}

/// One emitted instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Operation.
    pub opcode: Opcode,
    /// Literal operand of `LOADC`.
    pub constant: Option<Constant>,
    /// Symbolic operand.
    pub reference: Reference,
    /// Frame slot of slot instructions, assigned by the allocator.
    pub slot: Option<i32>,
    /// Explicit argument count of call-like opcodes and `RETURN`.
    pub arg_count: u32,
    /// Call-like opcode pushes a result.
    pub has_result: bool,
    /// Stack depth below which the instruction leaves the stack untouched.
    pub lowstacksize: u32,
    /// Source position the instruction was generated from.
    pub position: Option<SourcePosition>,
    /// Debug annotations.
    pub positions: Vec<VarPosition>,
}

impl Instruction {
    /// Creates an instruction without operands.
    #[must_use]
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            constant: None,
            reference: Reference::None,
            slot: None,
            arg_count: 0,
            has_result: false,
            lowstacksize: 0,
            position: None,
            positions: Vec::new(),
        }
    }

    /// `LOADC constant`
    #[must_use]
    pub fn load_constant(constant: Constant) -> Self {
        let mut instr = Self::new(Opcode::LoadC);
        instr.constant = Some(constant);
        instr
    }

    /// A slot instruction on `value`; the slot is filled in by the allocator.
    #[must_use]
    pub fn slot_op(opcode: Opcode, value: ValueId) -> Self {
        Self::new(opcode).with_reference(Reference::Value(value))
    }

    /// Sets the symbolic operand.
    #[must_use]
    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = reference;
        self
    }

    /// Sets argument count and result flag of a call-like opcode.
    #[must_use]
    pub fn with_args(mut self, arg_count: usize, has_result: bool) -> Self {
        self.arg_count = u32::try_from(arg_count).unwrap_or(u32::MAX);
        self.has_result = has_result;
        self
    }

    /// Sets the source position.
    #[must_use]
    pub fn at(mut self, position: SourcePosition) -> Self {
        self.position = Some(position);
        self
    }

    /// Values popped and pushed by this instruction.
    #[must_use]
    pub fn stack_effect(&self) -> (u32, u32) {
        self.opcode.stack_effect(self.arg_count, self.has_result)
    }

    /// The SSA value of a slot instruction.
    #[must_use]
    pub fn value(&self) -> Option<ValueId> {
        match self.reference {
            Reference::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Returns `true` if this is `opcode` on `value`.
    #[must_use]
    pub fn is(&self, opcode: Opcode, value: ValueId) -> bool {
        self.opcode == opcode && self.value() == Some(value)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        if let Some(slot) = self.slot {
            write!(f, " {slot}")?;
        } else if let Some(constant) = &self.constant {
            write!(f, " {constant}")?;
        } else if self.reference != Reference::None {
            write!(f, " {}", self.reference)?;
        }
        if self.opcode.takes_arguments() {
            write!(f, "/{}", self.arg_count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_mnemonics() {
        assert_eq!(Opcode::LoadSD.to_string(), "LOADSD");
        assert_eq!(Opcode::JumpIfFalse.to_string(), "JUMPIFFALSE");
        let name: &'static str = Opcode::StoreS.into();
        assert_eq!(name, "STORES");
    }

    #[test]
    fn test_stack_effects() {
        assert_eq!(Opcode::Add.stack_effect(0, false), (2, 1));
        assert_eq!(Opcode::Call.stack_effect(3, true), (3, 1));
        assert_eq!(Opcode::CallMethod.stack_effect(2, false), (3, 0));
        assert_eq!(Opcode::Return.stack_effect(1, false), (1, 0));
        assert_eq!(Opcode::Jump.stack_effect(0, false), (0, 0));
    }

    #[test]
    fn test_every_slot_opcode_touches_at_most_one_value() {
        for op in Opcode::iter().filter(|op| op.uses_slot()) {
            let (pops, pushes) = op.stack_effect(0, false);
            assert!(pops + pushes <= 1, "{op}");
            assert!(!op.may_throw());
        }
    }

    #[test]
    fn test_display() {
        let mut load = Instruction::slot_op(Opcode::LoadS, ValueId::new(4));
        assert_eq!(load.to_string(), "LOADS v4");
        load.slot = Some(-1);
        assert_eq!(load.to_string(), "LOADS -1");

        let call = Instruction::new(Opcode::Call)
            .with_reference(Reference::Function("PRINT".into()))
            .with_args(2, false);
        assert_eq!(call.to_string(), "CALL PRINT/2");
        assert_eq!(
            Instruction::load_constant(Constant::Integer(7)).to_string(),
            "LOADC 7"
        );
    }
}
