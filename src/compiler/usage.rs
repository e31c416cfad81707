//! Symbol usage oracle.
//!
//! Calls and member operations are ordered against each other through the outside-world
//! token, but reads and writes of an imported global are plain loads and stores. When a
//! callee may read or write such a global, the lowering must not move the global access
//! across the call. [`SymbolUsage`] answers that question; the driver of the front-end
//! usually has a cross-module table of which symbols each function touches.

use std::collections::{HashMap, HashSet};

use crate::il::Variable;

/// Answers whether calling a function may touch a global variable.
pub trait SymbolUsage {
    /// Returns `true` if `function` may read or write `global`.
    ///
    /// `function` is the callee name of a direct call, or `None` for method calls, calls
    /// through function pointers and member operations.
    fn may_touch(&self, function: Option<&str>, global: &Variable) -> bool;
}

/// Assumes every call touches every global.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConservativeUsage;

impl SymbolUsage for ConservativeUsage {
    fn may_touch(&self, _function: Option<&str>, _global: &Variable) -> bool {
        true
    }
}

/// Table of the globals each known function may touch.
///
/// Functions missing from the table, and indirect calls, are treated conservatively.
#[derive(Debug, Clone, Default)]
pub struct SymbolUsageTable {
    touches: HashMap<String, HashSet<String>>,
}

impl SymbolUsageTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `function` touches exactly the globals in `globals`.
    pub fn insert<I, S>(&mut self, function: &str, globals: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.touches.insert(
            function.to_string(),
            globals.into_iter().map(Into::into).collect(),
        );
    }

    /// Number of functions in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.touches.len()
    }

    /// Returns `true` if the table knows no function.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.touches.is_empty()
    }
}

impl SymbolUsage for SymbolUsageTable {
    fn may_touch(&self, function: Option<&str>, global: &Variable) -> bool {
        match function.and_then(|name| self.touches.get(name)) {
            Some(globals) => globals.contains(global.name()),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::StorageType;

    #[test]
    fn test_conservative() {
        let g = Variable::new("G", StorageType::Global).imported();
        assert!(ConservativeUsage.may_touch(Some("PRINT"), &g));
        assert!(ConservativeUsage.may_touch(None, &g));
    }

    #[test]
    fn test_table() {
        let g = Variable::new("G", StorageType::Global).imported();
        let h = Variable::new("H", StorageType::Global).imported();

        let mut table = SymbolUsageTable::new();
        table.insert("PRINT", Vec::<String>::new());
        table.insert("SETG", ["G"]);
        assert_eq!(table.len(), 2);

        assert!(!table.may_touch(Some("PRINT"), &g));
        assert!(table.may_touch(Some("SETG"), &g));
        assert!(!table.may_touch(Some("SETG"), &h));
        assert!(table.may_touch(Some("UNKNOWN"), &h));
        assert!(table.may_touch(None, &h));
    }
}
