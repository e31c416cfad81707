//! Stack-slot allocation.
//!
//! Walks the dominator tree of a function and gives every stack value a frame slot. The
//! contents of the frame at block entry are reconstructed from the values live on entry,
//! which all come from dominating blocks and therefore already have a slot.
//!
//! Per block:
//!
//! 1. Phi results get a slot. A phi whose operands do not survive into the block and
//!    whose already placed operands agree on one free slot takes that slot, and the
//!    remaining operands are asked to prefer it. Such a phi costs nothing at runtime.
//!    The other phis take the first free slot.
//! 2. A backward scan finds the last use of each value: the load becomes a
//!    load-and-destroy, a store of a dead value becomes a pop, and values that only an
//!    exception handler still needs are destroyed right after the last throwing
//!    instruction.
//! 3. A forward scan assigns slots at each store: the preferred slot, else the slot the
//!    same variable used last, else the first free one.
//!
//! Whether a phi really ended up trivial is decided after the walk, by comparing the slots
//! of its result and operands.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{
    analysis::Liveness,
    assembly::{Instruction, Opcode, VarPosition, VarPositionFlags},
    compiler::{CodeBlock, CodegenConfig, EventKind, EventLog},
    il::{BlockId, FunctionId, Module, ValueId, VariableId},
    Result,
};

/// Result of [`StackAllocator::allocate`].
#[derive(Debug, Clone, Default)]
pub struct StackAllocation {
    slots: HashMap<ValueId, i32>,
    frame_size: u32,
    entry_positions: HashMap<BlockId, Vec<VarPosition>>,
    trivial_phis: HashSet<ValueId>,
}

impl StackAllocation {
    /// The slot of `value`. Parameters have negative slots.
    #[must_use]
    pub fn slot(&self, value: ValueId) -> Option<i32> {
        self.slots.get(&value).copied()
    }

    /// Number of non-parameter slots the frame needs.
    #[must_use]
    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    /// Locations of the values visible when `block` starts.
    #[must_use]
    pub fn entry_positions(&self, block: BlockId) -> &[VarPosition] {
        self.entry_positions.get(&block).map_or(&[], Vec::as_slice)
    }

    /// Returns `true` if the phi defining `result` shares one slot with all its operands.
    #[must_use]
    pub fn is_trivial_phi(&self, result: ValueId) -> bool {
        self.trivial_phis.contains(&result)
    }

    /// Number of values with a slot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if no value has a slot.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Occupied slots at one program point, parameter slots included.
#[derive(Debug, Clone, Default)]
struct StackContents {
    slots: BTreeMap<i32, ValueId>,
}

impl StackContents {
    fn is_free(&self, slot: i32) -> bool {
        !self.slots.contains_key(&slot)
    }

    /// Lowest free non-negative slot. Parameter slots are only reused on request.
    fn first_free(&self) -> i32 {
        (0..i32::MAX).find(|s| self.is_free(*s)).unwrap_or(i32::MAX)
    }

    fn occupy(&mut self, slot: i32, value: ValueId) {
        self.slots.insert(slot, value);
    }

    fn release(&mut self, slot: i32) {
        self.slots.remove(&slot);
    }
}

/// Assigns frame slots for one function at a time.
pub struct StackAllocator<'a> {
    module: &'a Module,
    liveness: &'a Liveness,
    config: &'a CodegenConfig,
    events: &'a EventLog,
}

impl<'a> StackAllocator<'a> {
    /// Creates an allocator.
    #[must_use]
    pub fn new(
        module: &'a Module,
        liveness: &'a Liveness,
        config: &'a CodegenConfig,
        events: &'a EventLog,
    ) -> Self {
        Self {
            module,
            liveness,
            config,
            events,
        }
    }

    /// Allocates slots for `function`, rewriting its lowered blocks in place.
    ///
    /// Every slot instruction gets its slot, loads at the end of a live range become
    /// `LOADSD`, dead stores become `POP`, and `DESTROYS` is inserted where a value dies on
    /// the normal path but is still needed by an exception handler.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvariantViolation`] if a slot instruction refers to a value
    /// that has no slot yet, or a phi on a global mixes variables.
    pub fn allocate(
        &self,
        function: FunctionId,
        blocks: &mut BTreeMap<BlockId, CodeBlock>,
    ) -> Result<StackAllocation> {
        let func = self.module.function(function);
        let mut state = AllocationState {
            allocation: StackAllocation::default(),
            preferred: HashMap::new(),
            variable_slots: HashMap::new(),
        };

        let count = func.parameters().len();
        for (index, &param) in func.parameters().iter().enumerate() {
            let slot = i32::try_from(index).unwrap_or(i32::MAX) - i32::try_from(count).unwrap_or(0);
            state.allocation.slots.insert(param, slot);
        }

        let mut stack = vec![func.entry()];
        while let Some(block_id) = stack.pop() {
            let code = blocks.get_mut(&block_id).ok_or_else(|| {
                invariant_error!("block {} of '{}' was not lowered", block_id, func.name())
            })?;
            self.allocate_block(block_id, code, &mut state)?;
            stack.extend(self.module.block(block_id).dominees().iter().rev().copied());
        }

        self.finish(function, &mut state.allocation);
        log::debug!(
            "'{}': {} slots, {} trivial phis",
            func.name(),
            state.allocation.frame_size,
            state.allocation.trivial_phis.len()
        );
        self.events
            .record(EventKind::SlotsAssigned)
            .function(func.name())
            .message(format!("frame size {}", state.allocation.frame_size));
        Ok(state.allocation)
    }

    fn allocate_block(
        &self,
        block_id: BlockId,
        code: &mut CodeBlock,
        state: &mut AllocationState,
    ) -> Result<()> {
        let mut contents = StackContents::default();
        for value in self.liveness.entry_values(block_id) {
            if let Some(slot) = state.allocation.slot(value) {
                contents.occupy(slot, value);
            }
        }

        self.assign_phis(block_id, &mut contents, state)?;
        self.mark_last_uses(block_id, code);
        self.assign_slots(code, &mut contents, state)
    }

    fn assign_phis(
        &self,
        block_id: BlockId,
        contents: &mut StackContents,
        state: &mut AllocationState,
    ) -> Result<()> {
        let block = self.module.block(block_id);
        let entry_live = self.liveness.entry_live(block_id);

        let mut deferred = Vec::new();
        for phi in block.phis() {
            let variable = self.module.variable_of(phi.result());
            if variable.is_global() {
                let target = self.module.value(phi.result()).variable();
                for op in phi.operands() {
                    if self.module.value(op.value()).variable() != target {
                        return Err(invariant_error!(
                            "phi {} on global '{}' merges {} of another variable",
                            phi.result(),
                            variable.name(),
                            op.value()
                        ));
                    }
                }
                continue;
            }
            if !variable.is_stack() {
                continue;
            }

            let survives = phi
                .operands()
                .iter()
                .any(|op| entry_live.contains(op.value().index()));
            let mut assigned = phi
                .operands()
                .iter()
                .filter_map(|op| state.allocation.slot(op.value()));
            let shared = match assigned.next() {
                None => Some(contents.first_free()),
                Some(first) if assigned.all(|s| s == first) => Some(first),
                Some(_) => None,
            };

            match shared.filter(|&s| !survives && contents.is_free(s)) {
                Some(slot) => {
                    state.place(phi.result(), slot, variable_id(self.module, phi.result()));
                    contents.occupy(slot, phi.result());
                    for op in phi.operands() {
                        if state.allocation.slot(op.value()).is_none() {
                            state.preferred.insert(op.value(), slot);
                        }
                    }
                }
                None => deferred.push(phi.result()),
            }
        }

        for result in deferred {
            let slot = contents.first_free();
            state.place(result, slot, variable_id(self.module, result));
            contents.occupy(slot, result);
        }
        Ok(())
    }

    /// Backward scan over the block: last uses, dead stores, exception-only values.
    fn mark_last_uses(&self, block_id: BlockId, code: &mut CodeBlock) {
        let is_stack = |v: &ValueId| self.module.variable_of(*v).is_stack();
        let mut live: HashSet<ValueId> = self
            .liveness
            .flow_exit_live(block_id)
            .iter()
            .map(ValueId::new)
            .filter(is_stack)
            .collect();
        let handler_live: Vec<ValueId> = code.throw_uses.iter().copied().filter(is_stack).collect();
        let stored_at: HashMap<ValueId, usize> = code
            .instructions
            .iter()
            .enumerate()
            .filter(|(_, i)| i.opcode == Opcode::StoreS)
            .filter_map(|(index, i)| i.value().map(|v| (v, index)))
            .collect();

        let instructions = std::mem::take(&mut code.instructions);
        let mut reversed = Vec::with_capacity(instructions.len());
        for (index, mut instr) in instructions.into_iter().enumerate().rev() {
            if instr.opcode.may_throw() {
                for &value in &handler_live {
                    let defined = stored_at.get(&value).is_none_or(|&at| at < index);
                    if defined && live.insert(value) {
                        let mut destroy = Instruction::slot_op(Opcode::DestroyS, value);
                        destroy.position = instr.position;
                        reversed.push(destroy);
                    }
                }
            }
            match (instr.opcode, instr.value()) {
                (Opcode::LoadS, Some(value)) => {
                    if live.insert(value) {
                        instr.opcode = Opcode::LoadSD;
                    }
                }
                (Opcode::StoreS, Some(value)) => {
                    if !live.remove(&value) {
                        instr = Instruction {
                            opcode: Opcode::Pop,
                            reference: crate::assembly::Reference::None,
                            ..instr
                        };
                    }
                }
                _ => {}
            }
            reversed.push(instr);
        }

        // Values entering the block that are already dead on the normal path.
        let block = self.module.block(block_id);
        let mut dead_on_entry: Vec<ValueId> = self
            .liveness
            .entry_values(block_id)
            .chain(block.phis().iter().map(|phi| phi.result()))
            .filter(|v| is_stack(v) && !live.contains(v))
            .collect();
        dead_on_entry.sort();
        dead_on_entry.dedup();
        for value in dead_on_entry.into_iter().rev() {
            reversed.push(Instruction::slot_op(Opcode::DestroyS, value));
        }

        reversed.reverse();
        code.instructions = reversed;
    }

    /// Forward scan: slots for stores, annotations for every slot instruction.
    fn assign_slots(
        &self,
        code: &mut CodeBlock,
        contents: &mut StackContents,
        state: &mut AllocationState,
    ) -> Result<()> {
        let erase = VarPositionFlags::ERASE | VarPositionFlags::POST_INSTR;
        for instr in &mut code.instructions {
            let Some(value) = instr.value().filter(|_| instr.opcode.uses_slot()) else {
                continue;
            };
            match instr.opcode {
                Opcode::StoreS => {
                    let slot = match state.allocation.slot(value) {
                        Some(slot) => slot,
                        None => {
                            let variable = variable_id(self.module, value);
                            let slot = self.choose_slot(value, variable, contents, state);
                            state.place(value, slot, variable);
                            slot
                        }
                    };
                    contents.occupy(slot, value);
                    instr.slot = Some(slot);
                    instr
                        .positions
                        .push(VarPosition::new(value, slot, VarPositionFlags::POST_INSTR));
                }
                Opcode::LoadS | Opcode::LoadSD | Opcode::DestroyS => {
                    let slot = state.allocation.slot(value).ok_or_else(|| {
                        invariant_error!("{} reads {} which has no slot", instr.opcode, value)
                    })?;
                    instr.slot = Some(slot);
                    if instr.opcode != Opcode::LoadS {
                        contents.release(slot);
                        instr.positions.push(VarPosition::new(value, slot, erase));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn choose_slot(
        &self,
        value: ValueId,
        variable: VariableId,
        contents: &StackContents,
        state: &AllocationState,
    ) -> i32 {
        if let Some(&slot) = state.preferred.get(&value) {
            if contents.is_free(slot) {
                return slot;
            }
        }
        if self.config.reuse_variable_slots {
            if let Some(&slot) = state.variable_slots.get(&variable) {
                if contents.is_free(slot) {
                    return slot;
                }
            }
        }
        contents.first_free()
    }

    /// Decides trivial phis and records the locations visible at each block entry.
    fn finish(&self, function: FunctionId, allocation: &mut StackAllocation) {
        let func = self.module.function(function);
        for block_id in self.module.function_blocks(function) {
            let block = self.module.block(block_id);
            let mut positions = Vec::new();

            if block_id == func.entry() {
                for &param in func.parameters() {
                    if let Some(slot) = allocation.slot(param) {
                        positions.push(VarPosition::new(param, slot, VarPositionFlags::empty()));
                    }
                }
            }
            for value in self.liveness.entry_values(block_id) {
                if let Some(slot) = allocation.slot(value) {
                    positions.push(VarPosition::new(value, slot, VarPositionFlags::LOC_ONLY));
                }
            }
            for phi in block.phis() {
                let Some(slot) = allocation.slot(phi.result()) else {
                    continue;
                };
                let trivial = phi
                    .operands()
                    .iter()
                    .all(|op| allocation.slot(op.value()) == Some(slot));
                if trivial {
                    allocation.trivial_phis.insert(phi.result());
                    positions.push(VarPosition::new(
                        phi.result(),
                        slot,
                        VarPositionFlags::empty(),
                    ));
                    self.events
                        .record(EventKind::PhiTrivialized)
                        .at(func.name(), block_id.index())
                        .message(format!("{phi} in slot {slot}"));
                }
            }
            allocation.entry_positions.insert(block_id, positions);
        }
    }
}

fn variable_id(module: &Module, value: ValueId) -> VariableId {
    module.value(value).variable()
}

struct AllocationState {
    allocation: StackAllocation,
    preferred: HashMap<ValueId, i32>,
    variable_slots: HashMap<VariableId, i32>,
}

impl AllocationState {
    fn place(&mut self, value: ValueId, slot: i32, variable: VariableId) {
        self.allocation.slots.insert(value, slot);
        self.variable_slots.insert(variable, slot);
        if let Ok(size) = u32::try_from(slot + 1) {
            self.allocation.frame_size = self.allocation.frame_size.max(size);
        }
    }
}
