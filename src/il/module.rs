//! The compilation unit: an arena of variables, values, blocks and functions.

use crate::il::{
    BasicBlock, BlockId, CodedFunction, FunctionId, SsaValue, StorageType, ValueId, Variable,
    VariableId,
};

/// Name of the variable threading side effects through calls and object operations.
pub const OUTSIDE_WORLD: &str = ":outsideworld";

/// A compilation unit in SSA form.
///
/// All IL entities live in flat arenas owned by the module and refer to each other through
/// index handles. Edge lists, dominator links and phi operands are therefore plain
/// `Vec<BlockId>`/`ValueId` data that can be rewritten in place.
#[derive(Debug, Clone)]
pub struct Module {
    variables: Vec<Variable>,
    values: Vec<SsaValue>,
    versions: Vec<u32>,
    blocks: Vec<BasicBlock>,
    functions: Vec<CodedFunction>,
    globals: Vec<VariableId>,
    outside_world: VariableId,
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

impl Module {
    /// Creates an empty module containing only the outside-world variable.
    #[must_use]
    pub fn new() -> Self {
        let mut module = Self {
            variables: Vec::new(),
            values: Vec::new(),
            versions: Vec::new(),
            blocks: Vec::new(),
            functions: Vec::new(),
            globals: Vec::new(),
            outside_world: VariableId::new(0),
        };
        module.outside_world = module.add_variable(Variable::new(OUTSIDE_WORLD, StorageType::None));
        module
    }

    /// Registers a variable. Globals are also added to the module's global set.
    pub fn add_variable(&mut self, variable: Variable) -> VariableId {
        let id = VariableId::new(self.variables.len());
        if variable.is_global() {
            self.globals.push(id);
        }
        self.variables.push(variable);
        self.versions.push(0);
        id
    }

    /// Creates the next SSA version of `variable`.
    pub fn new_value(&mut self, variable: VariableId) -> ValueId {
        let version = &mut self.versions[variable.index()];
        *version += 1;
        let id = ValueId::new(self.values.len());
        self.values.push(SsaValue::new(variable, *version));
        id
    }

    /// Creates a placeholder (version 0) value of `variable`.
    ///
    /// Placeholders stand in for forward references during IL construction and must all
    /// be replaced before the module is compiled.
    pub fn placeholder(&mut self, variable: VariableId) -> ValueId {
        let id = ValueId::new(self.values.len());
        self.values.push(SsaValue::new(variable, 0));
        id
    }

    pub(crate) fn add_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(BasicBlock::default());
        id
    }

    pub(crate) fn add_function(&mut self, function: CodedFunction) -> FunctionId {
        let id = FunctionId::new(self.functions.len());
        self.functions.push(function);
        id
    }

    /// Variable lookup.
    #[must_use]
    pub fn variable(&self, id: VariableId) -> &Variable {
        &self.variables[id.index()]
    }

    /// Value lookup.
    #[must_use]
    pub fn value(&self, id: ValueId) -> &SsaValue {
        &self.values[id.index()]
    }

    /// The variable `value` is a version of.
    #[must_use]
    pub fn variable_of(&self, value: ValueId) -> &Variable {
        self.variable(self.value(value).variable())
    }

    /// Storage class of the variable behind `value`.
    #[must_use]
    pub fn storage_of(&self, value: ValueId) -> StorageType {
        self.variable_of(value).storage()
    }

    /// Block lookup.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    /// Function lookup.
    #[must_use]
    pub fn function(&self, id: FunctionId) -> &CodedFunction {
        &self.functions[id.index()]
    }

    /// Iterates all functions with their handles.
    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &CodedFunction)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FunctionId::new(i), f))
    }

    /// Number of variables.
    #[must_use]
    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    /// Number of values; liveness sets are sized by this.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of functions.
    #[must_use]
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Global variables.
    #[must_use]
    pub fn globals(&self) -> &[VariableId] {
        &self.globals
    }

    /// The outside-world variable.
    #[must_use]
    pub const fn outside_world(&self) -> VariableId {
        self.outside_world
    }

    /// Returns `true` if `value` is a version of the outside-world variable.
    #[must_use]
    pub fn is_outside_world(&self, value: ValueId) -> bool {
        self.value(value).variable() == self.outside_world
    }

    /// Returns `true` if `a` dominates `b`. Every block dominates itself.
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = Some(b);
        while let Some(block) = current {
            if block == a {
                return true;
            }
            current = self.block(block).dominator;
        }
        false
    }

    /// Blocks of `function` in dominator-tree preorder, starting at the entry.
    #[must_use]
    pub fn function_blocks(&self, function: FunctionId) -> Vec<BlockId> {
        let mut order = Vec::new();
        let mut stack = vec![self.function(function).entry()];
        while let Some(block) = stack.pop() {
            order.push(block);
            stack.extend(self.block(block).dominees.iter().rev().copied());
        }
        order
    }

    /// Splices a new empty block onto the edge `pred -> succ` and returns it.
    ///
    /// The new block takes the position of `succ` in the successor list of `pred`, so a
    /// true edge stays a true edge. Phi operands of `succ` are redirected to it. The new
    /// block is dominated by `pred`; if `pred` was the immediate dominator of `succ` and
    /// every other way into `succ` already passes through `succ` itself, the new block
    /// becomes the immediate dominator of `succ`.
    pub fn split_edge(&mut self, pred: BlockId, succ: BlockId) -> BlockId {
        let edge = self.add_block();

        for s in &mut self.block_mut(pred).successors {
            if *s == succ {
                *s = edge;
            }
        }
        {
            let target = self.block_mut(succ);
            for p in &mut target.predecessors {
                if *p == pred {
                    *p = edge;
                }
            }
            for phi in &mut target.phis {
                phi.replace_predecessor(pred, edge);
            }
        }

        let reroute = self.block(succ).dominator == Some(pred)
            && self
                .block(succ)
                .predecessors
                .iter()
                .all(|&p| p == edge || self.dominates(succ, p));

        let block = self.block_mut(edge);
        block.successors.push(succ);
        block.predecessors.push(pred);
        block.dominator = Some(pred);
        if reroute {
            block.dominees.push(succ);
            self.block_mut(succ).dominator = Some(edge);
            self.block_mut(pred).dominees.retain(|&d| d != succ);
        }
        self.block_mut(pred).dominees.push(edge);
        edge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::{PhiNode, PhiOperand};

    fn diamond() -> (Module, [BlockId; 4]) {
        let mut module = Module::new();
        let blocks = [
            module.add_block(),
            module.add_block(),
            module.add_block(),
            module.add_block(),
        ];
        let [b0, b1, b2, b3] = blocks;
        module.block_mut(b0).successors = vec![b1, b3];
        module.block_mut(b1).successors = vec![b3];
        module.block_mut(b1).predecessors = vec![b0];
        module.block_mut(b3).predecessors = vec![b0, b1];
        module.block_mut(b0).dominees = vec![b1, b3];
        module.block_mut(b1).dominator = Some(b0);
        module.block_mut(b3).dominator = Some(b0);
        (module, blocks)
    }

    #[test]
    fn test_versions_are_per_variable() {
        let mut module = Module::new();
        let x = module.add_variable(Variable::new("x", StorageType::Stack));
        let g = module.add_variable(Variable::new("g", StorageType::Global));
        let x1 = module.new_value(x);
        let g1 = module.new_value(g);
        let x2 = module.new_value(x);

        assert_eq!(module.value(x1).version(), 1);
        assert_eq!(module.value(g1).version(), 1);
        assert_eq!(module.value(x2).version(), 2);
        assert_eq!(module.globals(), &[g]);
        assert_eq!(module.storage_of(x2), StorageType::Stack);
        let pending = module.placeholder(x);
        assert!(module.value(pending).is_placeholder());
    }

    #[test]
    fn test_split_edge_keeps_graph_consistent() {
        let (mut module, [b0, b1, _, b3]) = diamond();
        let x = module.add_variable(Variable::new("x", StorageType::Stack));
        let (x1, x2, x3) = (module.new_value(x), module.new_value(x), module.new_value(x));
        let mut phi = PhiNode::new(x3);
        phi.add_operand(PhiOperand::new(x1, b0));
        phi.add_operand(PhiOperand::new(x2, b1));
        module.block_mut(b3).phis.push(phi);

        let edge = module.split_edge(b0, b3);

        assert_eq!(module.block(b0).successors(), &[b1, edge]);
        assert_eq!(module.block(b3).predecessors(), &[edge, b1]);
        assert_eq!(module.block(b3).phis()[0].operand_from(edge), Some(x1));
        assert_eq!(module.block(edge).dominator(), Some(b0));
        // b1 also reaches b3, so b0 stays its immediate dominator.
        assert_eq!(module.block(b3).dominator(), Some(b0));
        assert!(module.block(b0).dominees().contains(&edge));
    }

    #[test]
    fn test_split_edge_reroutes_domination() {
        let mut module = Module::new();
        let (b0, b1) = (module.add_block(), module.add_block());
        module.block_mut(b0).successors = vec![b1];
        module.block_mut(b1).predecessors = vec![b0];
        module.block_mut(b0).dominees = vec![b1];
        module.block_mut(b1).dominator = Some(b0);

        let edge = module.split_edge(b0, b1);
        assert_eq!(module.block(b1).dominator(), Some(edge));
        assert_eq!(module.block(b0).dominees(), &[edge]);
        assert!(module.dominates(b0, b1));
        assert!(module.dominates(edge, b1));
        assert!(!module.dominates(b1, edge));
    }
}
