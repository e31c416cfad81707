use std::fmt;

use crate::il::{BlockId, ValueId};

/// Handle of a [`CodedFunction`] inside a [`crate::il::Module`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(usize);

impl FunctionId {
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

impl fmt::Debug for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

/// A function body in SSA form.
///
/// Parameters and globals-on-entry are defined "before" the entry block: they are the
/// values every block of the function may use without a local definition.
#[derive(Debug, Clone)]
pub struct CodedFunction {
    name: String,
    entry: BlockId,
    parameters: Vec<ValueId>,
    globals_on_entry: Vec<ValueId>,
}

impl CodedFunction {
    /// Creates a function.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        entry: BlockId,
        parameters: Vec<ValueId>,
        globals_on_entry: Vec<ValueId>,
    ) -> Self {
        Self {
            name: name.into(),
            entry,
            parameters,
            globals_on_entry,
        }
    }

    /// Symbol name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entry block.
    #[must_use]
    pub const fn entry(&self) -> BlockId {
        self.entry
    }

    /// Parameter values in declaration order.
    #[must_use]
    pub fn parameters(&self) -> &[ValueId] {
        &self.parameters
    }

    /// Values of globals (and the outside-world token) as seen on function entry.
    #[must_use]
    pub fn globals_on_entry(&self) -> &[ValueId] {
        &self.globals_on_entry
    }

    /// Returns `true` if `value` is defined on function entry.
    #[must_use]
    pub fn defines_on_entry(&self, value: ValueId) -> bool {
        self.parameters.contains(&value) || self.globals_on_entry.contains(&value)
    }
}
