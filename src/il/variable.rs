//! Source-level variables and their SSA versions.
//!
//! A [`Variable`] is a named storage location. Every definition of it creates a new
//! [`SsaValue`] (one "version"), addressed by its own [`ValueId`] handle. Values are never
//! identified by the (variable, version) pair; the handle is the identity.
//!
//! # Storage classes
//!
//! | Storage | Meaning |
//! |---------|---------|
//! | [`StorageType::Global`] | Process-wide singleton. At most one version may be live at any point. |
//! | [`StorageType::Stack`] | Frame-local. Versions are assigned stack slots and may coexist. |
//! | [`StorageType::None`] | Not materialized. Used for the outside-world effect token. |

use std::fmt;

/// Prefix marking compiler-synthesized variable names.
///
/// Variables whose name starts with this character are invisible to the debugger and are
/// free to be optimized away entirely.
pub const INTERNAL_PREFIX: char = ':';

/// Handle of a [`Variable`] inside a [`crate::il::Module`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(usize);

impl VariableId {
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

impl fmt::Debug for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var{}", self.0)
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var{}", self.0)
    }
}

/// Where the values of a variable live at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum StorageType {
    /// Module-wide storage, accessed by name.
    Global,
    /// A slot in the current stack frame.
    Stack,
    /// Never stored; only orders side effects.
    None,
}

/// A named storage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    name: String,
    storage: StorageType,
    imported: bool,
}

impl Variable {
    /// Creates a variable with the given storage class.
    #[must_use]
    pub fn new(name: impl Into<String>, storage: StorageType) -> Self {
        Self {
            name: name.into(),
            storage,
            imported: false,
        }
    }

    /// Marks a global as imported from another compilation unit.
    ///
    /// Calls that touch the outside world may read or write imported globals, so the
    /// scheduler keeps them ordered relative to each other.
    #[must_use]
    pub fn imported(mut self) -> Self {
        self.imported = true;
        self
    }

    /// Source-level name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage class.
    #[must_use]
    pub const fn storage(&self) -> StorageType {
        self.storage
    }

    /// Returns `true` for [`StorageType::Global`].
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.storage == StorageType::Global
    }

    /// Returns `true` for [`StorageType::Stack`].
    #[must_use]
    pub fn is_stack(&self) -> bool {
        self.storage == StorageType::Stack
    }

    /// Returns `true` if this global comes from another compilation unit.
    #[must_use]
    pub const fn is_imported(&self) -> bool {
        self.imported
    }

    /// Returns `true` for compiler-synthesized variables.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.name.is_empty() || self.name.starts_with(INTERNAL_PREFIX)
    }
}

/// Handle of an [`SsaValue`] inside a [`crate::il::Module`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(usize);

impl ValueId {
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

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// One versioned definition of a [`Variable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SsaValue {
    variable: VariableId,
    version: u32,
}

impl SsaValue {
    /// Creates a value for `variable` with the given version number.
    #[must_use]
    pub const fn new(variable: VariableId, version: u32) -> Self {
        Self { variable, version }
    }

    /// The variable this value is a version of.
    #[must_use]
    pub const fn variable(&self) -> VariableId {
        self.variable
    }

    /// Version number, unique per variable.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Version 0 only exists while the IL is under construction.
    #[must_use]
    pub const fn is_placeholder(&self) -> bool {
        self.version == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_names() {
        assert!(Variable::new(":t0", StorageType::Stack).is_internal());
        assert!(Variable::new("", StorageType::Stack).is_internal());
        assert!(!Variable::new("counter", StorageType::Stack).is_internal());
    }

    #[test]
    fn test_storage_predicates() {
        let g = Variable::new("g", StorageType::Global).imported();
        assert!(g.is_global());
        assert!(!g.is_stack());
        assert!(g.is_imported());
        assert_eq!(g.storage().to_string(), "Global");
    }

    #[test]
    fn test_placeholder() {
        let var = VariableId::new(3);
        assert!(SsaValue::new(var, 0).is_placeholder());
        assert!(!SsaValue::new(var, 1).is_placeholder());
        assert_eq!(format!("{}", ValueId::new(7)), "v7");
    }
}
