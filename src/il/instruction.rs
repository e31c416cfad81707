//! IL instructions.
//!
//! The instruction set is closed: [`IlOp`] enumerates every shape the front-end produces and
//! every consumer matches it exhaustively. Each [`IlInstruction`] owns a [`UseDefTracker`]
//! that is computed once when the instruction is built and read through its API afterwards.

use std::fmt;

use crate::il::ValueId;

/// A literal operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// The null / default value.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Integer literal.
    Integer(i64),
    /// Floating point literal.
    Float(f64),
    /// String literal.
    String(String),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null => write!(f, "null"),
            Constant::Bool(b) => write!(f, "{b}"),
            Constant::Integer(i) => write!(f, "{i}"),
            Constant::Float(x) => write!(f, "{x}"),
            Constant::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// Target types of a cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ValueType {
    /// Boolean.
    Bool,
    /// Integer.
    Integer,
    /// Floating point.
    Float,
    /// String.
    String,
    /// Record (column map).
    Record,
    /// Array.
    Array,
    /// Object reference.
    Object,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Logical not.
    Not,
    /// Bitwise complement.
    BitNot,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
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
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// An argument of a call through a function pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrArg {
    /// A regular value argument.
    Value(ValueId),
    /// Forwards the caller's remaining arguments unchanged.
    Passthrough,
}

/// Source location attached to IL and target instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SourcePosition {
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

impl SourcePosition {
    /// Creates a position.
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The IL operation set.
///
/// Operands are listed in the order they are pushed on the evaluation stack.
#[derive(Debug, Clone, PartialEq)]
pub enum IlOp {
    /// `target = constant`
    Constant {
        /// Defined value.
        target: ValueId,
        /// Literal.
        value: Constant,
    },
    /// `target = source`
    Copy {
        /// Defined value.
        target: ValueId,
        /// Copied value.
        source: ValueId,
    },
    /// `target = (to) source`
    Cast {
        /// Defined value.
        target: ValueId,
        /// Converted value.
        source: ValueId,
        /// Destination type.
        to: ValueType,
    },
    /// `target = op operand`
    Unary {
        /// Defined value.
        target: ValueId,
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: ValueId,
    },
    /// `target = lhs op rhs`
    Binary {
        /// Defined value.
        target: ValueId,
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: ValueId,
        /// Right operand.
        rhs: ValueId,
    },
    /// `target = record.column`
    ColumnGet {
        /// Defined value.
        target: ValueId,
        /// Record.
        record: ValueId,
        /// Column name.
        column: String,
    },
    /// `target = record with column := value`
    ColumnSet {
        /// Updated record.
        target: ValueId,
        /// Original record.
        record: ValueId,
        /// Column name.
        column: String,
        /// New cell value.
        value: ValueId,
    },
    /// `target = record without column`
    ColumnDelete {
        /// Updated record.
        target: ValueId,
        /// Original record.
        record: ValueId,
        /// Column name.
        column: String,
    },
    /// `target = function(args...)`
    FunctionCall {
        /// Result, if used.
        target: Option<ValueId>,
        /// Callee name. Names of builtins map to dedicated opcodes.
        function: String,
        /// Arguments.
        args: Vec<ValueId>,
    },
    /// `target = object.member(args...)`
    MethodCall {
        /// Result, if used.
        target: Option<ValueId>,
        /// Receiver.
        object: ValueId,
        /// Method name.
        member: String,
        /// Arguments.
        args: Vec<ValueId>,
    },
    /// `target = (*pointer)(args...)`
    FunctionPtrCall {
        /// Result, if used.
        target: Option<ValueId>,
        /// Function pointer.
        pointer: ValueId,
        /// Arguments.
        args: Vec<PtrArg>,
    },
    /// Two-way branch on `condition`; successor 0 is taken when it is true.
    ConditionalJump {
        /// Branch condition.
        condition: ValueId,
    },
    /// Leaves the function.
    Return {
        /// Returned value.
        value: Option<ValueId>,
    },
    /// `target = object.member`
    MemberGet {
        /// Defined value.
        target: ValueId,
        /// Object.
        object: ValueId,
        /// Member name.
        member: String,
    },
    /// `object.member = value`
    MemberSet {
        /// Object.
        object: ValueId,
        /// Member name.
        member: String,
        /// New value.
        value: ValueId,
    },
    /// Adds a new member to `object`.
    MemberInsert {
        /// Object.
        object: ValueId,
        /// Member name.
        member: String,
        /// Initial value.
        value: ValueId,
        /// Member is private to the object.
        private: bool,
    },
    /// Removes a member from `object`.
    MemberDelete {
        /// Object.
        object: ValueId,
        /// Member name.
        member: String,
    },
}

impl IlOp {
    /// Explicit operands in evaluation-stack push order.
    #[must_use]
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            IlOp::Constant { .. } => Vec::new(),
            IlOp::Copy { source, .. } | IlOp::Cast { source, .. } => vec![*source],
            IlOp::Unary { operand, .. } => vec![*operand],
            IlOp::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            IlOp::ColumnGet { record, .. } | IlOp::ColumnDelete { record, .. } => vec![*record],
            IlOp::ColumnSet { record, value, .. } => vec![*record, *value],
            IlOp::FunctionCall { args, .. } => args.clone(),
            IlOp::MethodCall { object, args, .. } => {
                let mut ops = args.clone();
                ops.push(*object);
                ops
            }
            IlOp::FunctionPtrCall { pointer, args, .. } => {
                let mut ops: Vec<ValueId> = args
                    .iter()
                    .filter_map(|arg| match arg {
                        PtrArg::Value(v) => Some(*v),
                        PtrArg::Passthrough => None,
                    })
                    .collect();
                ops.push(*pointer);
                ops
            }
            IlOp::ConditionalJump { condition } => vec![*condition],
            IlOp::Return { value } => value.iter().copied().collect(),
            IlOp::MemberGet { object, .. } | IlOp::MemberDelete { object, .. } => vec![*object],
            IlOp::MemberSet { object, value, .. } | IlOp::MemberInsert { object, value, .. } => {
                vec![*object, *value]
            }
        }
    }

    /// The value this operation defines, if any.
    #[must_use]
    pub fn target(&self) -> Option<ValueId> {
        match self {
            IlOp::Constant { target, .. }
            | IlOp::Copy { target, .. }
            | IlOp::Cast { target, .. }
            | IlOp::Unary { target, .. }
            | IlOp::Binary { target, .. }
            | IlOp::ColumnGet { target, .. }
            | IlOp::ColumnSet { target, .. }
            | IlOp::ColumnDelete { target, .. }
            | IlOp::MemberGet { target, .. } => Some(*target),
            IlOp::FunctionCall { target, .. }
            | IlOp::MethodCall { target, .. }
            | IlOp::FunctionPtrCall { target, .. } => *target,
            IlOp::ConditionalJump { .. }
            | IlOp::Return { .. }
            | IlOp::MemberSet { .. }
            | IlOp::MemberInsert { .. }
            | IlOp::MemberDelete { .. } => None,
        }
    }

    /// Returns `true` for operations that end a block.
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        matches!(self, IlOp::ConditionalJump { .. } | IlOp::Return { .. })
    }

    /// Returns `true` for operations that interact with state outside the frame.
    ///
    /// These thread the module's outside-world token.
    #[must_use]
    pub const fn touches_outside_world(&self) -> bool {
        matches!(
            self,
            IlOp::FunctionCall { .. }
                | IlOp::MethodCall { .. }
                | IlOp::FunctionPtrCall { .. }
                | IlOp::MemberGet { .. }
                | IlOp::MemberSet { .. }
                | IlOp::MemberInsert { .. }
                | IlOp::MemberDelete { .. }
        )
    }
}

/// Use and def sets of one instruction.
///
/// Contains the explicit operands and target of the operation plus implicit effects such as
/// the outside-world token or globals read by a call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UseDefTracker {
    uses: Vec<ValueId>,
    defs: Vec<ValueId>,
}

impl UseDefTracker {
    /// Computes the explicit uses and defs of `op`.
    #[must_use]
    pub fn new(op: &IlOp) -> Self {
        let mut tracker = Self::default();
        for operand in op.operands() {
            tracker.add_use(operand);
        }
        if let Some(target) = op.target() {
            tracker.add_def(target);
        }
        tracker
    }

    fn add_use(&mut self, value: ValueId) {
        if !self.uses.contains(&value) {
            self.uses.push(value);
        }
    }

    fn add_def(&mut self, value: ValueId) {
        if !self.defs.contains(&value) {
            self.defs.push(value);
        }
    }

    /// Values read by the instruction, without duplicates.
    #[must_use]
    pub fn uses(&self) -> &[ValueId] {
        &self.uses
    }

    /// Values defined by the instruction.
    #[must_use]
    pub fn defs(&self) -> &[ValueId] {
        &self.defs
    }

    /// Returns `true` if `value` is read.
    #[must_use]
    pub fn is_use(&self, value: ValueId) -> bool {
        self.uses.contains(&value)
    }

    /// Returns `true` if `value` is defined.
    #[must_use]
    pub fn is_def(&self, value: ValueId) -> bool {
        self.defs.contains(&value)
    }
}

/// An IL instruction with its source position and use/def sets.
#[derive(Debug, Clone, PartialEq)]
pub struct IlInstruction {
    op: IlOp,
    position: SourcePosition,
    usedefs: UseDefTracker,
}

impl IlInstruction {
    /// Wraps `op`, computing its use/def sets.
    #[must_use]
    pub fn new(op: IlOp, position: SourcePosition) -> Self {
        let usedefs = UseDefTracker::new(&op);
        Self {
            op,
            position,
            usedefs,
        }
    }

    /// Adds implicit uses and defs, such as the outside-world token.
    #[must_use]
    pub fn with_effects(mut self, uses: &[ValueId], defs: &[ValueId]) -> Self {
        for &value in uses {
            self.usedefs.add_use(value);
        }
        for &value in defs {
            self.usedefs.add_def(value);
        }
        self
    }

    /// The operation.
    #[must_use]
    pub fn op(&self) -> &IlOp {
        &self.op
    }

    /// Source position.
    #[must_use]
    pub const fn position(&self) -> SourcePosition {
        self.position
    }

    /// Use/def sets.
    #[must_use]
    pub fn usedefs(&self) -> &UseDefTracker {
        &self.usedefs
    }
}
