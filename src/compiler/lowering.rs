//! Instruction lowering and local scheduling.
//!
//! Each IL instruction of a block is first translated on its own into a *fragment*: the
//! target instructions of the operation followed by the store of its result. Operand loads
//! are not emitted yet, only recorded as pending. The fragments are then merged back to
//! front into one sequence, starting from the block terminator:
//!
//! 1. If the value on top of the pending loads is defined by a fragment that may be placed
//!    now, that fragment goes right in front (load-driven merge). Its store and the load
//!    become adjacent and usually cancel out, so expression trees end up as pure stack code.
//! 2. Otherwise the top pending load is materialized as a slot or global load.
//! 3. With no pending loads left, the last fragment whose successors are all placed is
//!    merged (fallback merge).
//!
//! A fragment may be placed once every fragment that has to run after it is placed: users
//! of its values, later accesses to the same global, and calls that may touch an imported
//! global it reads or writes. If nothing can be placed the block has a dependency cycle.
//!
//! Afterwards `STORES v; LOADS v` pairs of values that are read exactly once and do not
//! outlive the block are removed.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{
    analysis::Liveness,
    assembly::{Instruction, Opcode, Reference, VarPosition, VarPositionFlags},
    compiler::{
        builtins, CodeBlock, CodegenConfig, EventKind, EventLog, PendingLoad, SymbolUsage,
    },
    il::{
        BinaryOp, BlockId, FunctionId, IlInstruction, IlOp, Module, PtrArg, SourcePosition,
        StorageType, UnaryOp, ValueId, VariableId,
    },
    Error, Result,
};

/// Code of one IL instruction before scheduling.
#[derive(Debug, Default)]
struct Fragment {
    instructions: Vec<Instruction>,
    loads: Vec<PendingLoad>,
    defs: Vec<ValueId>,
    world: bool,
    callee: Option<String>,
    globals: HashSet<VariableId>,
}

/// The sequence being assembled, back to front.
#[derive(Debug, Default)]
struct Schedule {
    instructions: Vec<Instruction>,
    loads: Vec<PendingLoad>,
}

impl Schedule {
    fn prepend(&mut self, fragment: Fragment) {
        self.instructions.splice(0..0, fragment.instructions);
        self.loads.extend(fragment.loads);
    }
}

/// Translates the IL blocks of a function into [`CodeBlock`]s.
pub struct InstructionLowerer<'a> {
    module: &'a Module,
    liveness: &'a Liveness,
    config: &'a CodegenConfig,
    usage: &'a dyn SymbolUsage,
    events: &'a EventLog,
}

impl<'a> InstructionLowerer<'a> {
    /// Creates a lowerer over an analyzed module.
    #[must_use]
    pub fn new(
        module: &'a Module,
        liveness: &'a Liveness,
        config: &'a CodegenConfig,
        usage: &'a dyn SymbolUsage,
        events: &'a EventLog,
    ) -> Self {
        Self {
            module,
            liveness,
            config,
            usage,
            events,
        }
    }

    /// Lowers every block of `function`.
    ///
    /// # Errors
    ///
    /// See [`Self::lower_block`].
    pub fn lower_function(&self, function: FunctionId) -> Result<BTreeMap<BlockId, CodeBlock>> {
        let name = self.module.function(function).name();
        let mut blocks = BTreeMap::new();
        for block in self.module.function_blocks(function) {
            blocks.insert(block, self.lower_block(name, block)?);
        }
        Ok(blocks)
    }

    /// Lowers and schedules one block.
    ///
    /// # Errors
    ///
    /// - [`Error::CircularDependency`] if the fragments cannot be ordered.
    /// - [`Error::StrictnessViolation`] if a value is read before its definition.
    /// - [`Error::NotSupported`] for call shapes without a translation.
    pub fn lower_block(&self, function: &str, block_id: BlockId) -> Result<CodeBlock> {
        let block = self.module.block(block_id);
        let il = block.instructions();

        let mut fragments = Vec::with_capacity(il.len());
        for (index, instr) in il.iter().enumerate() {
            fragments.push(Some(self.lower_instruction(index, instr)?));
        }
        let positions: Vec<SourcePosition> = il.iter().map(IlInstruction::position).collect();

        let mut def_site = HashMap::new();
        for (index, fragment) in fragments.iter().flatten().enumerate() {
            for &def in &fragment.defs {
                def_site.insert(def, index);
            }
        }
        let after = self.dependencies(il, &fragments, &def_site);

        let count = fragments.len();
        let mut merged = vec![false; count];
        let mut schedule = Schedule::default();
        if il.last().is_some_and(|i| i.op().is_terminator()) {
            if let Some(terminator) = fragments[count - 1].take() {
                schedule.prepend(terminator);
                merged[count - 1] = true;
            }
        }

        let mut merges = 0usize;
        loop {
            if let Some(top) = schedule.loads.last().copied() {
                let unique = schedule.loads.iter().filter(|l| l.value == top.value).count() == 1;
                let definer = def_site.get(&top.value).copied();
                // The definition is already placed behind this read.
                if definer.is_some_and(|d| merged[d]) {
                    return Err(Error::StrictnessViolation {
                        value: top.value,
                        block: block_id,
                    });
                }

                schedule.loads.pop();
                let load = self.load(top, &positions)?;
                schedule.instructions.insert(0, load);

                if let Some(d) = definer.filter(|&d| unique && !merged[d]) {
                    if self.can_merge(d, &fragments, &merged, &after, &schedule) {
                        if let Some(fragment) = fragments[d].take() {
                            schedule.prepend(fragment);
                            merged[d] = true;
                            merges += 1;
                        }
                    }
                }
                continue;
            }

            if merged.iter().all(|&m| m) {
                break;
            }
            let candidate = (0..count)
                .rev()
                .find(|&d| !merged[d] && self.can_merge(d, &fragments, &merged, &after, &schedule));
            match candidate.and_then(|d| fragments[d].take().map(|f| (d, f))) {
                Some((d, fragment)) => {
                    schedule.prepend(fragment);
                    merged[d] = true;
                    merges += 1;
                }
                None => return Err(Error::CircularDependency(block_id)),
            }
        }

        if merges > 0 {
            self.events
                .record(EventKind::FragmentsMerged)
                .at(function, block_id.index())
                .message(format!("{merges} fragments merged into {block_id}"));
        }

        let mut code = CodeBlock::new(block_id);
        code.instructions = schedule.instructions;
        code.uses = block.uses().collect();
        code.defs = block.defs().collect();
        for &handler in block.throw_successors() {
            code.throw_uses.extend(self.liveness.entry_values(handler));
        }
        code.throw_uses.sort();
        code.throw_uses.dedup();

        if self.config.eliminate_store_load_pairs {
            self.eliminate_store_load_pairs(function, &mut code);
        }

        log::trace!(
            "lowered {block_id} of '{function}' into {} instructions",
            code.instructions.len()
        );
        self.events
            .record(EventKind::BlockLowered)
            .at(function, block_id.index());
        Ok(code)
    }

    /// For each fragment, the fragments that must run after it.
    fn dependencies(
        &self,
        il: &[IlInstruction],
        fragments: &[Option<Fragment>],
        def_site: &HashMap<ValueId, usize>,
    ) -> Vec<HashSet<usize>> {
        let mut after = vec![HashSet::new(); fragments.len()];
        for (user, instr) in il.iter().enumerate() {
            for value in instr.usedefs().uses() {
                if let Some(&def) = def_site.get(value) {
                    if def != user {
                        after[def].insert(user);
                    }
                }
            }
        }

        let fragments: Vec<&Fragment> = fragments.iter().flatten().collect();
        for (i, first) in fragments.iter().enumerate() {
            for (j, second) in fragments.iter().enumerate().skip(i + 1) {
                let shared_global = !first.globals.is_disjoint(&second.globals);
                if shared_global
                    || self.world_touches(first, second)
                    || self.world_touches(second, first)
                {
                    after[i].insert(j);
                }
            }
        }
        after
    }

    /// Returns `true` if `caller` touches the outside world in a way that may reach an
    /// imported global accessed by `other`.
    fn world_touches(&self, caller: &Fragment, other: &Fragment) -> bool {
        caller.world
            && other.globals.iter().any(|&g| {
                let global = self.module.variable(g);
                global.is_imported() && self.usage.may_touch(caller.callee.as_deref(), global)
            })
    }

    fn can_merge(
        &self,
        candidate: usize,
        fragments: &[Option<Fragment>],
        merged: &[bool],
        after: &[HashSet<usize>],
        schedule: &Schedule,
    ) -> bool {
        let Some(fragment) = fragments[candidate].as_ref() else {
            return false;
        };
        if !after[candidate].iter().all(|&succ| merged[succ]) {
            return false;
        }
        // Deferred reads of imported globals would move in front of the call.
        if fragment.world {
            let blocked = schedule.loads.iter().any(|load| {
                let global = self.module.variable_of(load.value);
                global.is_global()
                    && global.is_imported()
                    && self.usage.may_touch(fragment.callee.as_deref(), global)
            });
            if blocked {
                return false;
            }
        }
        true
    }

    /// Materializes a pending load.
    fn load(&self, load: PendingLoad, positions: &[SourcePosition]) -> Result<Instruction> {
        let variable = self.module.variable_of(load.value);
        let instr = match variable.storage() {
            StorageType::Stack => Instruction::slot_op(Opcode::LoadS, load.value),
            StorageType::Global => {
                Instruction::new(Opcode::LoadG).with_reference(self.global_reference(load.value))
            }
            StorageType::None => {
                return Err(invariant_error!(
                    "value {} of '{}' has no storage and cannot be loaded",
                    load.value,
                    variable.name()
                ))
            }
        };
        Ok(match load.cause.and_then(|c| positions.get(c)) {
            Some(&position) => instr.at(position),
            None => instr,
        })
    }

    fn global_reference(&self, value: ValueId) -> Reference {
        let variable = self.module.value(value).variable();
        Reference::Global {
            variable,
            name: self.module.variable(variable).name().to_string(),
        }
    }

    /// Stores the top of stack into `target`.
    fn store(&self, target: ValueId) -> Instruction {
        match self.module.storage_of(target) {
            StorageType::Stack => Instruction::slot_op(Opcode::StoreS, target),
            StorageType::Global => {
                Instruction::new(Opcode::StoreG).with_reference(self.global_reference(target))
            }
            StorageType::None => Instruction::new(Opcode::Pop),
        }
    }

    fn lower_instruction(&self, index: usize, instr: &IlInstruction) -> Result<Fragment> {
        let op = instr.op();
        let mut fragment = Fragment {
            defs: instr.usedefs().defs().to_vec(),
            world: instr
                .usedefs()
                .uses()
                .iter()
                .any(|&v| self.module.is_outside_world(v)),
            ..Fragment::default()
        };

        for value in op.operands() {
            fragment.loads.push(PendingLoad {
                value,
                cause: Some(index),
            });
        }
        for value in op.operands().into_iter().chain(op.target()) {
            let variable = self.module.value(value).variable();
            if self.module.variable(variable).is_global() {
                fragment.globals.insert(variable);
            }
        }

        let mut code = Vec::new();
        let mut discard_result = false;
        match op {
            IlOp::Constant { value, .. } => code.push(Instruction::load_constant(value.clone())),
            IlOp::Copy { .. } => {}
            IlOp::Cast { to, .. } => {
                code.push(Instruction::new(Opcode::Cast).with_reference(Reference::Type(*to)));
            }
            IlOp::Unary { op, .. } => code.push(Instruction::new(unary_opcode(*op))),
            IlOp::Binary { op, .. } => code.push(Instruction::new(binary_opcode(*op))),
            IlOp::ColumnGet { column, .. } => code.push(
                Instruction::new(Opcode::CellGet).with_reference(Reference::Column(column.clone())),
            ),
            IlOp::ColumnSet { column, .. } => code.push(
                Instruction::new(Opcode::CellSet).with_reference(Reference::Column(column.clone())),
            ),
            IlOp::ColumnDelete { column, .. } => code.push(
                Instruction::new(Opcode::CellDelete)
                    .with_reference(Reference::Column(column.clone())),
            ),
            IlOp::FunctionCall {
                target,
                function,
                args,
            } => {
                fragment.callee = Some(function.clone());
                if let Some(builtin) = builtins::lookup(function) {
                    if target.is_some() && !builtin.has_result {
                        return Err(Error::NotSupported(format!(
                            "builtin {function} has no result to assign"
                        )));
                    }
                    discard_result = builtin.has_result && target.is_none();
                    code.push(
                        Instruction::new(builtin.opcode).with_args(args.len(), builtin.has_result),
                    );
                } else {
                    code.push(
                        Instruction::new(Opcode::Call)
                            .with_reference(Reference::Function(function.clone()))
                            .with_args(args.len(), target.is_some()),
                    );
                }
            }
            IlOp::MethodCall {
                target,
                member,
                args,
                ..
            } => code.push(
                Instruction::new(Opcode::CallMethod)
                    .with_reference(Reference::Member {
                        name: member.clone(),
                        private: false,
                    })
                    .with_args(args.len(), target.is_some()),
            ),
            IlOp::FunctionPtrCall { target, args, .. } => {
                if args.iter().any(|arg| matches!(arg, PtrArg::Passthrough)) {
                    return Err(Error::NotSupported(
                        "function pointer call forwarding the caller's arguments".to_string(),
                    ));
                }
                code.push(
                    Instruction::new(Opcode::CallPtr).with_args(args.len(), target.is_some()),
                );
            }
            IlOp::ConditionalJump { .. } => code.push(Instruction::new(Opcode::JumpIfFalse)),
            IlOp::Return { value } => code.push(
                Instruction::new(Opcode::Return).with_args(usize::from(value.is_some()), false),
            ),
            IlOp::MemberGet { member, .. } => code.push(member_op(Opcode::MemberGet, member, false)),
            IlOp::MemberSet { member, .. } => code.push(member_op(Opcode::MemberSet, member, false)),
            IlOp::MemberInsert {
                member, private, ..
            } => code.push(member_op(Opcode::MemberInsert, member, *private)),
            IlOp::MemberDelete { member, .. } => {
                code.push(member_op(Opcode::MemberDelete, member, false));
            }
        }

        if discard_result {
            code.push(Instruction::new(Opcode::Pop));
        }
        if let Some(target) = op.target() {
            code.push(self.store(target));
        }
        fragment.instructions = code
            .into_iter()
            .map(|i| i.at(instr.position()))
            .collect();
        Ok(fragment)
    }

    /// Removes adjacent `STORES v; LOADS v` pairs where the slot is never read again.
    ///
    /// If the slot is read again later in the block, the pair becomes `DUP; STORES v`.
    fn eliminate_store_load_pairs(&self, function: &str, code: &mut CodeBlock) {
        let exit_live = self.liveness.exit_live(code.block);
        let mut index = 0;
        while index + 1 < code.instructions.len() {
            let store = &code.instructions[index];
            let candidate = match store.value() {
                Some(value)
                    if store.opcode == Opcode::StoreS
                        && code.instructions[index + 1].is(Opcode::LoadS, value)
                        && self.module.variable_of(value).is_stack() =>
                {
                    Some(value)
                }
                _ => None,
            };
            let Some(value) = candidate else {
                index += 1;
                continue;
            };

            let variable = self.module.variable_of(value);
            let reads = code
                .instructions
                .iter()
                .filter(|i| {
                    i.value() == Some(value) && matches!(i.opcode, Opcode::LoadS | Opcode::LoadSD)
                })
                .count();
            let removable = (variable.is_internal() || !self.config.emit_debug_info)
                && !exit_live.contains(value.index())
                && !code.throw_uses.contains(&value)
                && reads == 1;

            if removable {
                code.instructions.drain(index..index + 2);
                self.events
                    .record(EventKind::StoreLoadEliminated)
                    .at(function, code.block.index())
                    .message(format!("{value} kept on the stack"));
            } else if reads > 1 {
                let mut dup = Instruction::new(Opcode::Dup);
                dup.position = code.instructions[index + 1].position;
                if !variable.is_internal() && self.config.emit_debug_info {
                    dup.positions.push(VarPosition::new(
                        value,
                        stack_depth(code, index),
                        VarPositionFlags::PUSH_POS | VarPositionFlags::POST_INSTR,
                    ));
                }
                code.instructions[index + 1] = dup;
                code.instructions.swap(index, index + 1);
                self.events
                    .record(EventKind::LoadDuplicated)
                    .at(function, code.block.index())
                    .message(format!("{value} duplicated before its store"));
                index += 1;
            } else {
                index += 1;
            }
        }
    }
}

/// Evaluation stack depth in front of `code.instructions[index]`.
fn stack_depth(code: &CodeBlock, index: usize) -> i32 {
    let entry = i64::try_from(code.loads.len()).unwrap_or(i64::MAX);
    let depth = code.instructions[..index]
        .iter()
        .map(Instruction::stack_effect)
        .fold(entry, |depth, (pops, pushes)| {
            depth - i64::from(pops) + i64::from(pushes)
        });
    i32::try_from(depth).unwrap_or(i32::MAX)
}

fn member_op(opcode: Opcode, member: &str, private: bool) -> Instruction {
    Instruction::new(opcode).with_reference(Reference::Member {
        name: member.to_string(),
        private,
    })
}

fn unary_opcode(op: UnaryOp) -> Opcode {
    match op {
        UnaryOp::Neg => Opcode::Neg,
        UnaryOp::Not => Opcode::Not,
        UnaryOp::BitNot => Opcode::BitNot,
    }
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::Concat => Opcode::Concat,
        BinaryOp::And => Opcode::And,
        BinaryOp::Or => Opcode::Or,
        BinaryOp::BitAnd => Opcode::BitAnd,
        BinaryOp::BitOr => Opcode::BitOr,
        BinaryOp::BitXor => Opcode::BitXor,
        BinaryOp::Shl => Opcode::Shl,
        BinaryOp::Shr => Opcode::Shr,
        BinaryOp::Eq => Opcode::CmpEq,
        BinaryOp::Ne => Opcode::CmpNe,
        BinaryOp::Lt => Opcode::CmpLt,
        BinaryOp::Le => Opcode::CmpLe,
        BinaryOp::Gt => Opcode::CmpGt,
        BinaryOp::Ge => Opcode::CmpGe,
    }
}
