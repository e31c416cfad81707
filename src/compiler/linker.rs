//! Phi elimination, block layout and jump resolution.
//!
//! [`BlockLinker::link`] turns the allocated [`CodeBlock`]s of one function into a flat
//! instruction sequence appended to a [`CompiledModule`]. It runs in three steps.
//!
//! # Phi elimination
//!
//! Phis the allocator could not trivialize become stack transfers. The join block starts
//! with one `STORES` per phi, in reverse declaration order, and expects the sources on the
//! stack. Each incoming edge pushes its sources in declaration order: at the end of the
//! predecessor if that has a single successor, otherwise in a new block spliced onto the
//! edge.
//!
//! # Layout
//!
//! Depth first from the entry. The true successor of a branch is placed right after it
//! whenever possible, then the false successor, then exception handlers. Conditional
//! jumps are inverted or completed with an unconditional jump so the fall-through always
//! reaches the right block.
//!
//! # Resolution
//!
//! Jump targets are recorded as fixups while emitting and patched to absolute offsets
//! once every block start is known. The evaluation stack is simulated along the way to
//! fill in `lowstacksize` and the maximum stack depth.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{
    analysis::Liveness,
    assembly::{Instruction, Opcode, Reference, VarPosition, VarPositionFlags},
    compiler::{
        CodeBlock, CodegenConfig, CompiledModule, DebugLocationTracker, EventKind, EventLog,
        FunctionInfo, HandlerRange, PendingLoad, StackAllocation,
    },
    il::{BlockId, FunctionId, Module, SourcePosition, StorageType, ValueId},
    Result,
};

/// A jump whose target offset is not known yet.
#[derive(Debug, Clone, Copy)]
struct JumpFixup {
    /// Offset of the jump instruction in the module code.
    offset: usize,
    /// The block it jumps to.
    target: BlockId,
}

/// Links functions into a [`CompiledModule`].
pub struct BlockLinker<'a> {
    config: &'a CodegenConfig,
    events: &'a EventLog,
}

impl<'a> BlockLinker<'a> {
    /// Creates a linker.
    #[must_use]
    pub fn new(config: &'a CodegenConfig, events: &'a EventLog) -> Self {
        Self { config, events }
    }

    /// Eliminates the phis of `function`, lays out its blocks and appends them to `output`.
    ///
    /// Critical edges into blocks with phis are split in `module`, and the new blocks are
    /// registered in `liveness`. All phis of the function are removed afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvariantViolation`] if a block was not lowered, a phi
    /// source has no slot or no operand for an edge, or the simulated stack depth does not
    /// match at a block boundary.
    pub fn link(
        &self,
        module: &mut Module,
        liveness: &mut Liveness,
        function: FunctionId,
        blocks: &mut BTreeMap<BlockId, CodeBlock>,
        allocation: &StackAllocation,
        output: &mut CompiledModule,
    ) -> Result<()> {
        let mut edge_positions = HashMap::new();
        self.eliminate_phis(module, liveness, function, blocks, allocation, &mut edge_positions)?;

        let module_ref: &Module = module;
        let func = module_ref.function(function);
        let layout = Self::layout(module_ref, function);
        let start = output.code.len();

        let mut tracker = self
            .config
            .emit_debug_info
            .then(|| DebugLocationTracker::new(module_ref));
        let mut block_starts: HashMap<BlockId, usize> = HashMap::with_capacity(layout.len());
        let mut fixups = Vec::new();
        let mut handler_fixups = Vec::new();
        let mut max_stack = 0u32;
        let mut last_position: Option<SourcePosition> =
            output.line_table.last().map(|&(_, position)| position);

        for (index, &block_id) in layout.iter().enumerate() {
            let mut code = blocks.remove(&block_id).ok_or_else(|| {
                invariant_error!("block {} of '{}' was not lowered", block_id, func.name())
            })?;
            let next = layout.get(index + 1).copied();
            let local_fixups = Self::terminate(module_ref, block_id, next, &mut code)?;
            max_stack = max_stack.max(Self::simulate_stack(&mut code)?);

            let block_start = output.code.len();
            block_starts.insert(block_id, block_start);
            if let Some(tracker) = tracker.as_mut() {
                let entry = edge_positions
                    .get(&block_id)
                    .map_or_else(|| allocation.entry_positions(block_id), Vec::as_slice);
                tracker.track_block(block_start, entry, &code.instructions);
            }
            for (offset, instr) in (block_start..).zip(&code.instructions) {
                if let Some(position) = instr.position {
                    if last_position != Some(position) {
                        output.line_table.push((offset, position));
                        last_position = Some(position);
                    }
                }
            }
            fixups.extend(local_fixups.into_iter().map(|(at, target)| JumpFixup {
                offset: block_start + at,
                target,
            }));
            let block_end = block_start + code.instructions.len();
            for &handler in module_ref.block(block_id).throw_successors() {
                if block_end > block_start {
                    handler_fixups.push((block_start, block_end, handler));
                }
            }
            output.code.append(&mut code.instructions);
        }

        for fixup in fixups {
            let target = *block_starts.get(&fixup.target).ok_or_else(|| {
                invariant_error!("jump to {} which was not laid out", fixup.target)
            })?;
            output.code[fixup.offset].reference = Reference::Offset(target);
        }
        for (range_start, range_end, handler) in handler_fixups {
            let handler = *block_starts.get(&handler).ok_or_else(|| {
                invariant_error!("exception handler {} was not laid out", handler)
            })?;
            output.handlers.push(HandlerRange {
                start: range_start,
                end: range_end,
                handler,
            });
        }

        if let Some(tracker) = tracker {
            let records = tracker.finish();
            if !records.is_empty() {
                self.events
                    .record(EventKind::DebugRecordsEmitted)
                    .function(func.name())
                    .message(format!("{} records", records.len()));
            }
            output.debug_records.extend(records);
        }

        let info = FunctionInfo {
            name: func.name().to_string(),
            start,
            end: output.code.len(),
            frame_size: allocation.frame_size(),
            parameter_count: func.parameters().len(),
            max_stack,
        };
        log::debug!(
            "linked '{}' at {}..{} ({} blocks, max stack {})",
            info.name,
            info.start,
            info.end,
            layout.len(),
            max_stack
        );
        self.events
            .record(EventKind::FunctionLinked)
            .function(&info.name)
            .message(format!("{} instructions", info.end - info.start));
        output.symbols.insert(info.name.clone(), start);
        output.functions.push(info);

        for block_id in module.function_blocks(function) {
            module.block_mut(block_id).phis.clear();
        }
        Ok(())
    }

    /// Replaces non-trivial stack phis by stores in the join block and loads on each edge.
    fn eliminate_phis(
        &self,
        module: &mut Module,
        liveness: &mut Liveness,
        function: FunctionId,
        blocks: &mut BTreeMap<BlockId, CodeBlock>,
        allocation: &StackAllocation,
        edge_positions: &mut HashMap<BlockId, Vec<VarPosition>>,
    ) -> Result<()> {
        let name = module.function(function).name().to_string();
        for join in module.function_blocks(function) {
            let targets: Vec<ValueId> = module
                .block(join)
                .phis()
                .iter()
                .map(|phi| phi.result())
                .filter(|&r| module.variable_of(r).is_stack() && !allocation.is_trivial_phi(r))
                .collect();
            if targets.is_empty() {
                continue;
            }

            let mut stores = Vec::with_capacity(targets.len());
            for &target in targets.iter().rev() {
                let slot = allocation
                    .slot(target)
                    .ok_or_else(|| invariant_error!("phi result {} has no slot", target))?;
                let mut store = Instruction::slot_op(Opcode::StoreS, target);
                store.slot = Some(slot);
                store
                    .positions
                    .push(VarPosition::new(target, slot, VarPositionFlags::POST_INSTR));
                stores.push(store);
            }
            let code = blocks
                .get_mut(&join)
                .ok_or_else(|| invariant_error!("block {} was not lowered", join))?;
            code.instructions.splice(0..0, stores);
            code.loads = targets
                .iter()
                .map(|&value| PendingLoad { value, cause: None })
                .collect();

            // Operands of trivial phis keep living on in the phi result.
            let kept: HashSet<ValueId> = module
                .block(join)
                .phis()
                .iter()
                .filter(|phi| allocation.is_trivial_phi(phi.result()))
                .flat_map(|phi| phi.operands().iter().map(|op| op.value()))
                .collect();

            let predecessors = module.block(join).predecessors().to_vec();
            for pred in predecessors {
                let sources = targets
                    .iter()
                    .map(|&target| {
                        module
                            .block(join)
                            .phis()
                            .iter()
                            .find(|phi| phi.result() == target)
                            .and_then(|phi| phi.operand_from(pred))
                            .ok_or_else(|| {
                                invariant_error!("phi {} has no operand from {}", target, pred)
                            })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let loads = Self::edge_loads(module, liveness, join, &sources, &kept, allocation)?;

                if module.block(pred).successors().len() == 1 {
                    let code = blocks
                        .get_mut(&pred)
                        .ok_or_else(|| invariant_error!("block {} was not lowered", pred))?;
                    code.instructions.extend(loads);
                    code.stores = sources;
                } else {
                    let edge = module.split_edge(pred, join);
                    let mut live = liveness.entry_live(join).clone();
                    for &source in &sources {
                        if module.variable_of(source).is_stack() {
                            live.insert(source.index());
                        }
                    }
                    edge_positions.insert(
                        edge,
                        live.iter()
                            .map(ValueId::new)
                            .filter_map(|v| {
                                allocation
                                    .slot(v)
                                    .map(|s| VarPosition::new(v, s, VarPositionFlags::LOC_ONLY))
                            })
                            .collect(),
                    );
                    liveness.register_edge_block(edge, live);

                    let mut code = CodeBlock::new(edge);
                    code.instructions = loads;
                    code.stores = sources;
                    blocks.insert(edge, code);
                    log::trace!("split {pred} -> {join} with {edge}");
                    self.events
                        .record(EventKind::EdgeSplit)
                        .at(&name, edge.index())
                        .message(format!("{pred} -> {join}"));
                }
            }

            for &target in &targets {
                self.events
                    .record(EventKind::PhiEliminated)
                    .at(&name, join.index())
                    .message(format!(
                        "{target} via {} edges",
                        module.block(join).predecessors().len()
                    ));
            }
        }
        Ok(())
    }

    /// Loads pushing the phi sources of one edge, in declaration order.
    fn edge_loads(
        module: &Module,
        liveness: &Liveness,
        join: BlockId,
        sources: &[ValueId],
        kept: &HashSet<ValueId>,
        allocation: &StackAllocation,
    ) -> Result<Vec<Instruction>> {
        let mut loads = Vec::with_capacity(sources.len());
        for (index, &source) in sources.iter().enumerate() {
            let variable = module.variable_of(source);
            match variable.storage() {
                StorageType::Global => {
                    loads.push(Instruction::new(Opcode::LoadG).with_reference(Reference::Global {
                        variable: module.value(source).variable(),
                        name: variable.name().to_string(),
                    }));
                }
                StorageType::Stack => {
                    let slot = allocation
                        .slot(source)
                        .ok_or_else(|| invariant_error!("phi source {} has no slot", source))?;
                    let dies = !liveness.is_live_in(join, source)
                        && !sources[index + 1..].contains(&source)
                        && !kept.contains(&source);
                    let mut load = if dies {
                        let mut load = Instruction::slot_op(Opcode::LoadSD, source);
                        load.positions.push(VarPosition::new(
                            source,
                            slot,
                            VarPositionFlags::ERASE | VarPositionFlags::POST_INSTR,
                        ));
                        load
                    } else {
                        Instruction::slot_op(Opcode::LoadS, source)
                    };
                    load.slot = Some(slot);
                    loads.push(load);
                }
                StorageType::None => {
                    return Err(invariant_error!(
                        "phi source {} of '{}' has no storage",
                        source,
                        variable.name()
                    ))
                }
            }
        }
        Ok(loads)
    }

    /// Block order: depth first, true successor first, exception handlers last.
    fn layout(module: &Module, function: FunctionId) -> Vec<BlockId> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![module.function(function).entry()];
        while let Some(block_id) = stack.pop() {
            if !visited.insert(block_id) {
                continue;
            }
            order.push(block_id);
            let block = module.block(block_id);
            stack.extend(block.throw_successors().iter().rev());
            stack.extend(block.successors().iter().rev());
        }
        order
    }

    /// Completes the control transfer at the end of a block given the block laid out next.
    ///
    /// Returns the jumps of the block as `(index, target)` pairs.
    fn terminate(
        module: &Module,
        block_id: BlockId,
        next: Option<BlockId>,
        code: &mut CodeBlock,
    ) -> Result<Vec<(usize, BlockId)>> {
        let mut fixups = Vec::new();
        match *module.block(block_id).successors() {
            [] => {}
            [succ] => {
                if next != Some(succ) {
                    let position = code.instructions.last().and_then(|i| i.position);
                    let mut jump = Instruction::new(Opcode::Jump);
                    jump.position = position;
                    fixups.push((code.instructions.len(), succ));
                    code.instructions.push(jump);
                }
            }
            [when_true, when_false] => {
                let index = code
                    .instructions
                    .iter()
                    .rposition(|i| i.opcode.is_jump())
                    .ok_or_else(|| invariant_error!("branch block {} has no jump", block_id))?;
                let branch = &mut code.instructions[index];
                if next == Some(when_false) {
                    branch.opcode = Opcode::JumpIfTrue;
                    fixups.push((index, when_true));
                } else {
                    branch.opcode = Opcode::JumpIfFalse;
                    fixups.push((index, when_false));
                    if next != Some(when_true) {
                        let mut jump = Instruction::new(Opcode::Jump);
                        jump.position = branch.position;
                        fixups.push((code.instructions.len(), when_true));
                        code.instructions.push(jump);
                    }
                }
            }
            _ => {
                return Err(invariant_error!(
                    "block {} has {} successors",
                    block_id,
                    module.block(block_id).successors().len()
                ))
            }
        }
        for &(index, target) in &fixups {
            code.instructions[index].reference = Reference::Block(target);
        }
        Ok(fixups)
    }

    /// Fills in `lowstacksize` and returns the deepest stack reached in the block.
    fn simulate_stack(code: &mut CodeBlock) -> Result<u32> {
        let mut depth = u32::try_from(code.loads.len()).unwrap_or(u32::MAX);
        let mut max = depth;
        for instr in &mut code.instructions {
            let (pops, pushes) = instr.stack_effect();
            let low = depth.checked_sub(pops).ok_or_else(|| {
                invariant_error!(
                    "{} in {} pops {} values from a stack of {}",
                    instr.opcode,
                    code.block,
                    pops,
                    depth
                )
            })?;
            instr.lowstacksize = low;
            depth = low + pushes;
            max = max.max(depth);
        }
        if depth as usize != code.stores.len() {
            return Err(invariant_error!(
                "{} ends with {} values on the stack, expected {}",
                code.block,
                depth,
                code.stores.len()
            ));
        }
        Ok(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::LivenessAnalyzer,
        compiler::{ConservativeUsage, InstructionLowerer, StackAllocator},
        il::{BinaryOp, Constant, ModuleBuilder},
    };

    fn link_all(mb: ModuleBuilder) -> (Module, CompiledModule, EventLog) {
        let mut module = mb.finish();
        let mut liveness = LivenessAnalyzer::new().execute(&module);
        let config = CodegenConfig::default();
        let events = EventLog::new();
        let usage = ConservativeUsage;
        let mut output = CompiledModule::default();
        let functions: Vec<FunctionId> = module.functions().map(|(id, _)| id).collect();
        for function in functions {
            let mut blocks = InstructionLowerer::new(&module, &liveness, &config, &usage, &events)
                .lower_function(function)
                .unwrap();
            let allocation = StackAllocator::new(&module, &liveness, &config, &events)
                .allocate(function, &mut blocks)
                .unwrap();
            BlockLinker::new(&config, &events)
                .link(
                    &mut module,
                    &mut liveness,
                    function,
                    &mut blocks,
                    &allocation,
                    &mut output,
                )
                .unwrap();
        }
        (module, output, events)
    }

    fn opcodes(output: &CompiledModule) -> Vec<Opcode> {
        output.code().iter().map(|i| i.opcode).collect()
    }

    #[test]
    fn test_simulate_stack() {
        let mut code = CodeBlock::new(BlockId::new(0));
        code.instructions = vec![
            Instruction::load_constant(Constant::Integer(1)),
            Instruction::load_constant(Constant::Integer(2)),
            Instruction::new(Opcode::Add),
            Instruction::new(Opcode::Return).with_args(1, false),
        ];
        assert_eq!(BlockLinker::simulate_stack(&mut code).ok(), Some(2));
        let low: Vec<u32> = code.instructions.iter().map(|i| i.lowstacksize).collect();
        assert_eq!(low, vec![0, 1, 0, 0]);
    }

    #[test]
    fn test_simulate_stack_rejects_mismatch() {
        let mut code = CodeBlock::new(BlockId::new(0));
        code.instructions = vec![Instruction::new(Opcode::Pop)];
        assert!(BlockLinker::simulate_stack(&mut code).is_err());

        let mut code = CodeBlock::new(BlockId::new(1));
        code.instructions = vec![Instruction::load_constant(Constant::Null)];
        assert!(BlockLinker::simulate_stack(&mut code).is_err());
        code.stores = vec![ValueId::new(0)];
        assert!(BlockLinker::simulate_stack(&mut code).is_ok());
    }

    #[test]
    fn test_true_successor_falls_through() {
        let mut mb = ModuleBuilder::new();
        mb.function("PICK", &["c"], |f| {
            let c = f.arg(0);
            f.block(0, |b| b.branch(c, 1, 2));
            f.block(1, |b| {
                let one = b.constant(Constant::Integer(1));
                b.ret_val(one);
            });
            f.block(2, |b| {
                let two = b.constant(Constant::Integer(2));
                b.ret_val(two);
            });
        })
        .unwrap();
        let (_, output, _) = link_all(mb);

        assert_eq!(
            opcodes(&output),
            vec![
                Opcode::LoadSD,
                Opcode::JumpIfFalse,
                Opcode::LoadC,
                Opcode::Return,
                Opcode::LoadC,
                Opcode::Return
            ]
        );
        assert_eq!(output.code()[1].reference, Reference::Offset(4));
        assert_eq!(output.code()[1].lowstacksize, 0);
        assert_eq!(output.symbol("PICK"), Some(0));
        assert_eq!(output.function("PICK").map(|f| f.max_stack), Some(1));
    }

    #[test]
    fn test_branch_is_inverted_when_false_target_is_next() {
        let mut mb = ModuleBuilder::new();
        mb.function("SPIN", &[], |f| {
            f.block(0, |b| b.jump(1));
            f.block(1, |b| {
                let more = b.call("NEXT", &[]);
                b.branch(more, 1, 2);
            });
            f.block(2, |b| b.ret());
        })
        .unwrap();
        let (_, output, _) = link_all(mb);

        assert_eq!(
            opcodes(&output),
            vec![Opcode::Call, Opcode::JumpIfTrue, Opcode::Return]
        );
        assert_eq!(output.code()[1].reference, Reference::Offset(0));
    }

    #[test]
    fn test_branch_without_adjacent_target_gets_jump() {
        let mut mb = ModuleBuilder::new();
        mb.function("CYCLE", &[], |f| {
            f.block(0, |b| {
                b.call_void("INIT", &[]);
                b.jump(1);
            });
            f.block(1, |b| {
                let again = b.call("NEXT", &[]);
                b.branch(again, 1, 0);
            });
        })
        .unwrap();
        let (_, output, _) = link_all(mb);

        assert_eq!(
            opcodes(&output),
            vec![Opcode::Call, Opcode::Call, Opcode::JumpIfFalse, Opcode::Jump]
        );
        assert_eq!(output.code()[2].reference, Reference::Offset(0));
        assert_eq!(output.code()[3].reference, Reference::Offset(1));
    }

    #[test]
    fn test_critical_edge_is_split_for_phi() {
        let mut mb = ModuleBuilder::new();
        let function = mb
            .function("SELECT", &["c"], |f| {
                let c = f.arg(0);
                let (x0, x1, x2) = (f.var("x"), f.var("x"), f.var("x"));
                f.block(0, |b| {
                    b.constant_to(x0, Constant::Integer(1));
                    b.branch(c, 1, 2);
                });
                f.block(1, |b| {
                    let one = b.constant(Constant::Integer(1));
                    b.binary_to(x1, BinaryOp::Add, x0, one);
                    b.jump(2);
                });
                f.block(2, |b| {
                    b.phi(x2, &[(0, x0), (1, x1)]);
                    let sum = b.binary(BinaryOp::Add, x2, x0);
                    b.ret_val(sum);
                });
            })
            .unwrap();
        let (module, output, events) = link_all(mb);

        assert_eq!(events.count_kind(EventKind::EdgeSplit), 1);
        assert_eq!(events.count_kind(EventKind::PhiEliminated), 1);
        for block in module.function_blocks(function) {
            assert!(module.block(block).phis().is_empty());
        }

        let code = output.code();
        // B0 branches to the edge block laid out last.
        let branch = code
            .iter()
            .position(|i| i.opcode == Opcode::JumpIfFalse)
            .unwrap();
        let edge_start = code.len() - 2;
        assert_eq!(code[branch].reference, Reference::Offset(edge_start));
        assert_eq!(code[edge_start].opcode, Opcode::LoadS);
        assert_eq!(code[edge_start + 1].opcode, Opcode::Jump);

        // The join block starts with the phi store, reached by both edges.
        let join_start = match code[edge_start + 1].reference {
            Reference::Offset(offset) => offset,
            ref other => panic!("unexpected jump target {other}"),
        };
        assert_eq!(code[join_start].opcode, Opcode::StoreS);
        assert_eq!(code[join_start - 1].opcode, Opcode::LoadSD);
        assert_eq!(code[join_start - 1].slot, code[join_start].slot);
        assert_eq!(output.function("SELECT").map(|f| f.frame_size), Some(2));
    }
}
