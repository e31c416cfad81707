//! Closure-based construction of IL modules.
//!
//! Front-ends (and tests) describe each function as a set of numbered blocks; the builder
//! allocates SSA versions, threads the outside-world token through side-effecting
//! instructions, derives predecessor lists, orders phi operands by predecessor and annotates
//! the dominator tree.
//!
//! # Example
//!
//! ```rust,ignore
//! use stackgen::prelude::*;
//!
//! let mut mb = ModuleBuilder::new();
//! mb.function("ADDONE", &["x"], |f| {
//!     let x = f.arg(0);
//!     f.block(0, |b| {
//!         let one = b.constant(Constant::Integer(1));
//!         let sum = b.binary(BinaryOp::Add, x, one);
//!         b.ret_val(sum);
//!     });
//! })?;
//! let module = mb.finish();
//! ```
//!
//! # Outside world
//!
//! Every function gets an entry version of the outside-world variable. Each block starts
//! from that entry version and every call or object-member operation uses the current
//! version and defines the next one. The token is never materialized; it only orders side
//! effects inside a block.

use std::collections::{BTreeMap, HashMap};

use crate::{
    il::{
        BinaryOp, BlockId, CodedFunction, Constant, DominatorTree, FunctionId, IlInstruction,
        IlOp, Module, PhiNode, PhiOperand, PtrArg, SourcePosition, StorageType, UnaryOp, ValueId,
        ValueType, Variable, VariableId,
    },
    Result,
};

/// Builds a [`Module`] function by function.
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    /// Creates a builder for an empty module.
    #[must_use]
    pub fn new() -> Self {
        Self {
            module: Module::new(),
        }
    }

    /// Declares a global variable owned by this module.
    pub fn global(&mut self, name: &str) -> VariableId {
        self.module
            .add_variable(Variable::new(name, StorageType::Global))
    }

    /// Declares a global variable imported from another compilation unit.
    pub fn imported_global(&mut self, name: &str) -> VariableId {
        self.module
            .add_variable(Variable::new(name, StorageType::Global).imported())
    }

    /// Defines a function through a closure receiving a [`FunctionContext`].
    ///
    /// Block 0 is the entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvariantViolation`] if block 0 is missing, an edge targets
    /// an undefined block, or a phi node does not have exactly one operand per predecessor.
    pub fn function<F>(&mut self, name: &str, params: &[&str], f: F) -> Result<FunctionId>
    where
        F: FnOnce(&mut FunctionContext<'_>),
    {
        let mut ctx = FunctionContext::new(&mut self.module, params);
        f(&mut ctx);
        let state = ctx.state;
        state.build(&mut self.module, name)
    }

    /// Returns the module built so far.
    #[must_use]
    pub fn finish(self) -> Module {
        self.module
    }
}

#[derive(Debug, Default)]
struct BlockDraft {
    phis: Vec<(ValueId, Vec<(usize, ValueId)>)>,
    instructions: Vec<IlInstruction>,
    successors: Vec<usize>,
    throws: Vec<usize>,
}

#[derive(Debug)]
struct FunctionState {
    params: Vec<ValueId>,
    named: HashMap<String, VariableId>,
    temp_count: usize,
    blocks: BTreeMap<usize, BlockDraft>,
    globals_on_entry: Vec<ValueId>,
    global_entries: HashMap<VariableId, ValueId>,
    world_entry: ValueId,
}

impl FunctionState {
    /// Checks block references and phi arity before anything is added to the module.
    fn validate(&self, name: &str) -> Result<()> {
        if !self.blocks.contains_key(&0) {
            return Err(invariant_error!("function '{}' has no block 0", name));
        }

        let mut predecessors: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (&local, draft) in &self.blocks {
            for &target in draft.successors.iter().chain(&draft.throws) {
                if !self.blocks.contains_key(&target) {
                    return Err(invariant_error!(
                        "function '{}' references undefined block {}",
                        name,
                        target
                    ));
                }
            }
            for &succ in &draft.successors {
                predecessors.entry(succ).or_default().push(local);
            }
        }

        for (&local, draft) in &self.blocks {
            let preds = predecessors.get(&local).map_or(&[][..], Vec::as_slice);
            for (result, operands) in &draft.phis {
                let complete = operands.len() == preds.len()
                    && preds
                        .iter()
                        .all(|&p| operands.iter().any(|&(pred, _)| pred == p))
                    && operands
                        .iter()
                        .all(|&(pred, _)| self.blocks.contains_key(&pred));
                if !complete {
                    return Err(invariant_error!(
                        "phi {} in block {} of '{}' does not match predecessors {:?}",
                        result,
                        local,
                        name,
                        preds
                    ));
                }
            }
        }
        Ok(())
    }

    fn build(self, module: &mut Module, name: &str) -> Result<FunctionId> {
        self.validate(name)?;

        let ids: HashMap<usize, BlockId> = self
            .blocks
            .keys()
            .map(|&local| (local, module.add_block()))
            .collect();
        let resolve = |local: usize| {
            ids.get(&local).copied().ok_or_else(|| {
                invariant_error!("function '{}' references undefined block {}", name, local)
            })
        };

        let mut phi_drafts = Vec::new();
        for (&local, draft) in &self.blocks {
            let id = ids[&local];
            let successors = draft
                .successors
                .iter()
                .map(|&s| resolve(s))
                .collect::<Result<Vec<_>>>()?;
            let throws = draft
                .throws
                .iter()
                .map(|&s| resolve(s))
                .collect::<Result<Vec<_>>>()?;

            for &succ in &successors {
                module.block_mut(succ).predecessors.push(id);
            }
            let block = module.block_mut(id);
            block.successors = successors;
            block.throw_successors = throws;
            block.instructions.clone_from(&draft.instructions);
            phi_drafts.push((id, &draft.phis));
        }

        for (id, phis) in phi_drafts {
            let predecessors = module.block(id).predecessors.clone();
            for (result, operands) in phis {
                let mut phi = PhiNode::new(*result);
                for &(pred, value) in operands {
                    phi.add_operand(PhiOperand::new(value, resolve(pred)?));
                }
                phi.sort_by_predecessors(&predecessors);
                module.block_mut(id).phis.push(phi);
            }
        }

        let entry = ids[&0];
        let tree = DominatorTree::compute(entry, |b| {
            let block = module.block(b);
            block
                .successors
                .iter()
                .chain(&block.throw_successors)
                .copied()
                .collect()
        });
        for &id in ids.values() {
            if !tree.is_reachable(id) {
                log::warn!("block {id} of '{name}' is unreachable from the entry");
            }
            let mut dominees = tree.children(id);
            dominees.sort();
            let block = module.block_mut(id);
            block.dominator = tree.immediate_dominator(id);
            block.dominees = dominees;
        }

        Ok(module.add_function(CodedFunction::new(
            name,
            entry,
            self.params,
            self.globals_on_entry,
        )))
    }
}

/// Function-level view passed to the closure of [`ModuleBuilder::function`].
pub struct FunctionContext<'a> {
    module: &'a mut Module,
    state: FunctionState,
}

impl<'a> FunctionContext<'a> {
    fn new(module: &'a mut Module, params: &[&str]) -> Self {
        let mut named = HashMap::new();
        let mut values = Vec::with_capacity(params.len());
        for &param in params {
            let var = module.add_variable(Variable::new(param, StorageType::Stack));
            named.insert(param.to_string(), var);
            values.push(module.new_value(var));
        }
        let world_entry = module.new_value(module.outside_world());

        Self {
            module,
            state: FunctionState {
                params: values,
                named,
                temp_count: 0,
                blocks: BTreeMap::new(),
                globals_on_entry: vec![world_entry],
                global_entries: HashMap::new(),
                world_entry,
            },
        }
    }

    /// The value of parameter `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a parameter index.
    #[must_use]
    pub fn arg(&self, index: usize) -> ValueId {
        self.state.params[index]
    }

    /// Allocates the next version of the source variable `name`.
    ///
    /// Use this for user-visible variables and for values needed before their definition
    /// is added, such as phi results of loop headers.
    pub fn var(&mut self, name: &str) -> ValueId {
        let var = match self.state.named.get(name) {
            Some(&var) => var,
            None => {
                let var = self
                    .module
                    .add_variable(Variable::new(name, StorageType::Stack));
                self.state.named.insert(name.to_string(), var);
                var
            }
        };
        self.module.new_value(var)
    }

    /// Allocates a compiler-internal temporary.
    pub fn temp(&mut self) -> ValueId {
        new_temp(self.module, &mut self.state.temp_count)
    }

    /// The value `global` has when the function is entered.
    pub fn global(&mut self, global: VariableId) -> ValueId {
        if let Some(&value) = self.state.global_entries.get(&global) {
            return value;
        }
        let value = self.module.new_value(global);
        self.state.global_entries.insert(global, value);
        self.state.globals_on_entry.push(value);
        value
    }

    /// Allocates the next version of any variable, typically a global being assigned.
    pub fn version(&mut self, variable: VariableId) -> ValueId {
        self.module.new_value(variable)
    }

    /// Defines block `id` through a closure receiving a [`BlockBuilder`].
    pub fn block<F>(&mut self, id: usize, f: F)
    where
        F: FnOnce(&mut BlockBuilder<'_>),
    {
        let mut builder = BlockBuilder {
            module: &mut *self.module,
            temp_count: &mut self.state.temp_count,
            draft: BlockDraft::default(),
            world: self.state.world_entry,
            position: SourcePosition::default(),
        };
        f(&mut builder);
        let draft = builder.draft;
        self.state.blocks.insert(id, draft);
    }
}

fn new_temp(module: &mut Module, count: &mut usize) -> ValueId {
    let var = module.add_variable(Variable::new(
        format!(":t{}", *count),
        StorageType::Stack,
    ));
    *count += 1;
    module.new_value(var)
}

/// Appends phi nodes, instructions and edges to one block.
///
/// Methods returning a [`ValueId`] define a fresh internal temporary; the `*_to` variants
/// define a caller-provided value instead.
pub struct BlockBuilder<'a> {
    module: &'a mut Module,
    temp_count: &'a mut usize,
    draft: BlockDraft,
    world: ValueId,
    position: SourcePosition,
}

impl BlockBuilder<'_> {
    /// Sets the source position of subsequently added instructions.
    pub fn at(&mut self, line: u32, column: u32) -> &mut Self {
        self.position = SourcePosition::new(line, column);
        self
    }

    fn temp(&mut self) -> ValueId {
        new_temp(self.module, self.temp_count)
    }

    /// Adds a raw operation, threading the outside-world token when it needs it.
    pub fn op(&mut self, op: IlOp) {
        let mut instr = IlInstruction::new(op, self.position);
        if instr.op().touches_outside_world() {
            let next = self.module.new_value(self.module.outside_world());
            instr = instr.with_effects(&[self.world], &[next]);
            self.world = next;
        }
        self.draft.instructions.push(instr);
    }

    /// Adds a raw operation with extra implicit uses and defs.
    pub fn op_with_effects(&mut self, op: IlOp, uses: &[ValueId], defs: &[ValueId]) {
        self.op(op);
        if let Some(last) = self.draft.instructions.pop() {
            self.draft.instructions.push(last.with_effects(uses, defs));
        }
    }

    /// Adds `result = phi(...)` with `(predecessor block, value)` operands.
    pub fn phi(&mut self, result: ValueId, operands: &[(usize, ValueId)]) {
        self.draft.phis.push((result, operands.to_vec()));
    }

    /// Adds `target = value`.
    pub fn constant_to(&mut self, target: ValueId, value: Constant) {
        self.op(IlOp::Constant { target, value });
    }

    /// Adds a constant into a new temporary.
    pub fn constant(&mut self, value: Constant) -> ValueId {
        let target = self.temp();
        self.constant_to(target, value);
        target
    }

    /// Adds `target = source`.
    pub fn copy_to(&mut self, target: ValueId, source: ValueId) {
        self.op(IlOp::Copy { target, source });
    }

    /// Adds a cast into a new temporary.
    pub fn cast(&mut self, source: ValueId, to: ValueType) -> ValueId {
        let target = self.temp();
        self.op(IlOp::Cast { target, source, to });
        target
    }

    /// Adds a unary operation into a new temporary.
    pub fn unary(&mut self, op: UnaryOp, operand: ValueId) -> ValueId {
        let target = self.temp();
        self.op(IlOp::Unary {
            target,
            op,
            operand,
        });
        target
    }

    /// Adds `target = lhs op rhs`.
    pub fn binary_to(&mut self, target: ValueId, op: BinaryOp, lhs: ValueId, rhs: ValueId) {
        self.op(IlOp::Binary {
            target,
            op,
            lhs,
            rhs,
        });
    }

    /// Adds a binary operation into a new temporary.
    pub fn binary(&mut self, op: BinaryOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let target = self.temp();
        self.binary_to(target, op, lhs, rhs);
        target
    }

    /// Reads a record column into a new temporary.
    pub fn column_get(&mut self, record: ValueId, column: &str) -> ValueId {
        let target = self.temp();
        self.op(IlOp::ColumnGet {
            target,
            record,
            column: column.to_string(),
        });
        target
    }

    /// Produces an updated record in a new temporary.
    pub fn column_set(&mut self, record: ValueId, column: &str, value: ValueId) -> ValueId {
        let target = self.temp();
        self.op(IlOp::ColumnSet {
            target,
            record,
            column: column.to_string(),
            value,
        });
        target
    }

    /// Produces a record without `column` in a new temporary.
    pub fn column_delete(&mut self, record: ValueId, column: &str) -> ValueId {
        let target = self.temp();
        self.op(IlOp::ColumnDelete {
            target,
            record,
            column: column.to_string(),
        });
        target
    }

    /// Calls `function`, storing the result in `target`.
    pub fn call_to(&mut self, target: Option<ValueId>, function: &str, args: &[ValueId]) {
        self.op(IlOp::FunctionCall {
            target,
            function: function.to_string(),
            args: args.to_vec(),
        });
    }

    /// Calls `function`, returning its result in a new temporary.
    pub fn call(&mut self, function: &str, args: &[ValueId]) -> ValueId {
        let target = self.temp();
        self.call_to(Some(target), function, args);
        target
    }

    /// Calls `function`, discarding its result.
    pub fn call_void(&mut self, function: &str, args: &[ValueId]) {
        self.call_to(None, function, args);
    }

    /// Calls a method of `object`.
    pub fn method_call(&mut self, object: ValueId, member: &str, args: &[ValueId]) -> ValueId {
        let target = self.temp();
        self.op(IlOp::MethodCall {
            target: Some(target),
            object,
            member: member.to_string(),
            args: args.to_vec(),
        });
        target
    }

    /// Calls through a function pointer.
    pub fn ptr_call(&mut self, pointer: ValueId, args: &[PtrArg]) -> ValueId {
        let target = self.temp();
        self.op(IlOp::FunctionPtrCall {
            target: Some(target),
            pointer,
            args: args.to_vec(),
        });
        target
    }

    /// Reads an object member into a new temporary.
    pub fn member_get(&mut self, object: ValueId, member: &str) -> ValueId {
        let target = self.temp();
        self.op(IlOp::MemberGet {
            target,
            object,
            member: member.to_string(),
        });
        target
    }

    /// Writes an object member.
    pub fn member_set(&mut self, object: ValueId, member: &str, value: ValueId) {
        self.op(IlOp::MemberSet {
            object,
            member: member.to_string(),
            value,
        });
    }

    /// Adds a member to an object.
    pub fn member_insert(&mut self, object: ValueId, member: &str, value: ValueId, private: bool) {
        self.op(IlOp::MemberInsert {
            object,
            member: member.to_string(),
            value,
            private,
        });
    }

    /// Removes a member from an object.
    pub fn member_delete(&mut self, object: ValueId, member: &str) {
        self.op(IlOp::MemberDelete {
            object,
            member: member.to_string(),
        });
    }

    /// Ends the block with a two-way branch.
    pub fn branch(&mut self, condition: ValueId, true_target: usize, false_target: usize) {
        self.op(IlOp::ConditionalJump { condition });
        self.draft.successors = vec![true_target, false_target];
    }

    /// Ends the block by falling through to `target`.
    pub fn jump(&mut self, target: usize) {
        self.draft.successors = vec![target];
    }

    /// Ends the block with a return without value.
    pub fn ret(&mut self) {
        self.op(IlOp::Return { value: None });
        self.draft.successors.clear();
    }

    /// Ends the block returning `value`.
    pub fn ret_val(&mut self, value: ValueId) {
        self.op(IlOp::Return { value: Some(value) });
        self.draft.successors.clear();
    }

    /// Adds an exception edge to the handler block `target`.
    pub fn throws_to(&mut self, target: usize) {
        self.draft.throws.push(target);
    }
}
