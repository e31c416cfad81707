//! Builtin pseudo-functions.
//!
//! The front-end expresses array, deep-path and object construction primitives as calls to
//! reserved function names. The lowering replaces such calls with a dedicated opcode by
//! exact name match.

use crate::assembly::Opcode;

/// Lowering of one builtin pseudo-function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Builtin {
    /// Reserved function name.
    pub name: &'static str,
    /// Opcode replacing the call.
    pub opcode: Opcode,
    /// The opcode pushes a result.
    pub has_result: bool,
}

const fn builtin(name: &'static str, opcode: Opcode, has_result: bool) -> Builtin {
    Builtin {
        name,
        opcode,
        has_result,
    }
}

static BUILTINS: &[Builtin] = &[
    builtin("__ARRAYINDEX", Opcode::ArrayIndex, true),
    builtin("__ARRAYSIZE", Opcode::ArraySize, true),
    builtin("__ARRAYAPPEND", Opcode::ArrayAppend, true),
    builtin("__ARRAYINSERT", Opcode::ArrayInsert, true),
    builtin("__ARRAYDELETE", Opcode::ArrayDelete, true),
    builtin("__ARRAYSET", Opcode::ArraySet, true),
    builtin("__DEEPSET", Opcode::DeepSet, true),
    builtin("__DEEPAPPEND", Opcode::DeepAppend, true),
    builtin("__DEEPDELETE", Opcode::DeepDelete, true),
    builtin("__OBJECTNEW", Opcode::ObjNew, true),
    builtin("__ISDEFAULTVALUE", Opcode::IsDefault, true),
];

/// Looks up the builtin called `name`.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

/// All builtins.
#[must_use]
pub fn all() -> &'static [Builtin] {
    BUILTINS
}
