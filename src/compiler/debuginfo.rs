//! Debug location tracking.
//!
//! The allocator annotates instructions with [`VarPosition`]s: "value v is now in slot s",
//! "value v left slot s". Many of them restate what is already known. The tracker folds
//! them into, per source variable, the SSA value currently representing it and its
//! location, and emits a [`DebugRecord`] only when that pair changes between two
//! instructions. Compiler-internal variables are ignored.
//!
//! At each block start the state is rebuilt from the locations the allocator reported for
//! the block entry, because control may arrive from anywhere.

use std::{collections::BTreeMap, fmt};

use crate::{
    assembly::{Instruction, VarPosition, VarPositionFlags},
    il::{Module, ValueId, VariableId},
};

/// Where a value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarLocation {
    /// A frame slot; negative slots are arguments.
    Slot(i32),
    /// A position on the evaluation stack.
    Stack(i32),
}

impl fmt::Display for VarLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarLocation::Slot(slot) => write!(f, "slot {slot}"),
            VarLocation::Stack(depth) => write!(f, "stack {depth}"),
        }
    }
}

/// What happened to a source variable at an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationChange {
    /// The variable now has the value `value`, held at `location`.
    Appeared {
        /// The SSA value now representing the variable.
        value: ValueId,
        /// Its location.
        location: VarLocation,
    },
    /// The same value moved to another location.
    Moved {
        /// The SSA value representing the variable.
        value: ValueId,
        /// The new location.
        location: VarLocation,
    },
    /// The variable has no value anymore.
    Disappeared,
}

/// One entry of the debug location table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugRecord {
    /// Offset of the first instruction the change applies to.
    pub offset: usize,
    /// The source variable.
    pub variable: VariableId,
    /// Its name.
    pub name: String,
    /// The change.
    pub change: LocationChange,
}

impl fmt::Display for DebugRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.change {
            LocationChange::Appeared { value, location } => {
                write!(f, "{} = {} in {}", self.name, value, location)
            }
            LocationChange::Moved { value, location } => {
                write!(f, "{} ({}) moved to {}", self.name, value, location)
            }
            LocationChange::Disappeared => write!(f, "{} gone", self.name),
        }
    }
}

type VariableState = BTreeMap<VariableId, (ValueId, VarLocation)>;

/// Builds the debug location table of one function while the linker emits its blocks.
pub struct DebugLocationTracker<'a> {
    module: &'a Module,
    committed: VariableState,
    working: VariableState,
    records: Vec<DebugRecord>,
}

impl<'a> DebugLocationTracker<'a> {
    /// Creates a tracker with no visible variables.
    #[must_use]
    pub fn new(module: &'a Module) -> Self {
        Self {
            module,
            committed: BTreeMap::new(),
            working: BTreeMap::new(),
            records: Vec::new(),
        }
    }

    /// Processes one block about to be appended at `start`.
    pub fn track_block(
        &mut self,
        start: usize,
        entry: &[VarPosition],
        instructions: &[Instruction],
    ) {
        self.enter_block(entry);
        for (index, instr) in instructions.iter().enumerate() {
            self.track_instruction(start + index, instr);
        }
    }

    /// Resets the working state to the locations visible at a block entry.
    ///
    /// If several values of one variable are visible, a definite position wins over a
    /// location-only one, and otherwise the highest version.
    pub fn enter_block(&mut self, entry: &[VarPosition]) {
        self.working.clear();
        let mut definite: BTreeMap<VariableId, bool> = BTreeMap::new();
        for pos in entry {
            let Some(variable) = self.tracked(pos.value) else {
                continue;
            };
            let is_definite = !pos.flags.contains(VarPositionFlags::LOC_ONLY);
            let replace = match (self.working.get(&variable), definite.get(&variable)) {
                (None, _) => true,
                (Some(_), Some(true)) => false,
                (Some(_), _) if is_definite => true,
                (Some(&(current, _)), _) => {
                    self.module.value(pos.value).version() > self.module.value(current).version()
                }
            };
            if replace {
                self.working.insert(variable, (pos.value, location(pos)));
                definite.insert(variable, is_definite);
            }
        }
    }

    /// Applies the annotations of the instruction at `offset`.
    pub fn track_instruction(&mut self, offset: usize, instr: &Instruction) {
        for pos in instr.positions.iter().filter(|p| !p.is_post_instr()) {
            self.apply(pos);
        }
        self.flush(offset);
        for pos in instr.positions.iter().filter(|p| p.is_post_instr()) {
            self.apply(pos);
        }
    }

    /// Returns the records produced so far.
    #[must_use]
    pub fn finish(self) -> Vec<DebugRecord> {
        self.records
    }

    fn tracked(&self, value: ValueId) -> Option<VariableId> {
        let variable = self.module.value(value).variable();
        let var = self.module.variable(variable);
        (var.is_stack() && !var.is_internal()).then_some(variable)
    }

    fn apply(&mut self, pos: &VarPosition) {
        let Some(variable) = self.tracked(pos.value) else {
            return;
        };
        if pos.flags.contains(VarPositionFlags::ERASE) {
            if self.working.get(&variable).is_some_and(|&(v, _)| v == pos.value) {
                self.working.remove(&variable);
            }
            return;
        }
        let current = self.working.get(&variable).map(|&(v, _)| v);
        if pos.flags.contains(VarPositionFlags::LOC_ONLY) && current.is_some_and(|v| v != pos.value)
        {
            return;
        }
        self.working.insert(variable, (pos.value, location(pos)));
    }

    fn flush(&mut self, offset: usize) {
        let mut changes = Vec::new();
        for &variable in self.committed.keys() {
            if !self.working.contains_key(&variable) {
                changes.push((variable, LocationChange::Disappeared));
            }
        }
        for (&variable, &(value, location)) in &self.working {
            let change = match self.committed.get(&variable) {
                Some(&(old, _)) if old != value => LocationChange::Appeared { value, location },
                Some(&(_, old)) if old != location => LocationChange::Moved { value, location },
                Some(_) => continue,
                None => LocationChange::Appeared { value, location },
            };
            changes.push((variable, change));
        }
        for (variable, change) in changes {
            let record = self.record(offset, variable, change);
            self.records.push(record);
        }
        self.committed.clone_from(&self.working);
    }

    fn record(&self, offset: usize, variable: VariableId, change: LocationChange) -> DebugRecord {
        DebugRecord {
            offset,
            variable,
            name: self.module.variable(variable).name().to_string(),
            change,
        }
    }
}

fn location(pos: &VarPosition) -> VarLocation {
    if pos.flags.contains(VarPositionFlags::PUSH_POS) {
        VarLocation::Stack(pos.position)
    } else {
        VarLocation::Slot(pos.position)
    }
}
