//! Live-variable analysis over the SSA control flow graph.
//!
//! Computes, for every block, the values live on entry and on exit. This is a backward
//! may-analysis solved with a worklist:
//!
//! ```text
//! exit(B)  = ⋃ succ S: entry(S) ∪ { phi operands of S flowing from B }
//!          ∪ ⋃ handler H: entry(H) − defs(B)
//! entry(B) = (exit(B) ∪ uses(B)) − defs(B)
//! ```
//!
//! # Seeding
//!
//! The worklist is seeded twice. The first round starts from the exit blocks only, which
//! settles all acyclic paths towards a return. The second round seeds every block in the
//! dominator tree, which gives blocks trapped in an exitless cycle (an unconditional
//! infinite loop) correct data as well.
//!
//! # Exception edges
//!
//! A throwing instruction may transfer control before later definitions of the block ran,
//! so handler entry sets are added to the exit set minus what the block itself defines.
//! The allocator needs the normal-flow part on its own; it is kept as `flow_exit_live`.

use std::collections::{HashMap, VecDeque};

use crate::{
    il::{BlockId, FunctionId, Module, ValueId},
    utils::BitSet,
};

/// Per-block liveness sets, indexed by [`BlockId`] and holding [`ValueId`] indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Liveness {
    entry: Vec<BitSet>,
    exit: Vec<BitSet>,
    flow_exit: Vec<BitSet>,
    empty: BitSet,
}

impl Liveness {
    fn new(block_count: usize, value_count: usize) -> Self {
        let empty = BitSet::new(value_count);
        Self {
            entry: vec![empty.clone(); block_count],
            exit: vec![empty.clone(); block_count],
            flow_exit: vec![empty.clone(); block_count],
            empty,
        }
    }

    /// Values live on entry to `block`.
    #[must_use]
    pub fn entry_live(&self, block: BlockId) -> &BitSet {
        self.entry.get(block.index()).unwrap_or(&self.empty)
    }

    /// Values live on exit from `block`, including those needed by exception handlers.
    #[must_use]
    pub fn exit_live(&self, block: BlockId) -> &BitSet {
        self.exit.get(block.index()).unwrap_or(&self.empty)
    }

    /// Values live on exit from `block` along its normal successor edges only.
    #[must_use]
    pub fn flow_exit_live(&self, block: BlockId) -> &BitSet {
        self.flow_exit.get(block.index()).unwrap_or(&self.empty)
    }

    /// Returns `true` if `value` is live on entry to `block`.
    #[must_use]
    pub fn is_live_in(&self, block: BlockId, value: ValueId) -> bool {
        self.entry_live(block).contains(value.index())
    }

    /// Returns `true` if `value` is live on exit from `block`.
    #[must_use]
    pub fn is_live_out(&self, block: BlockId, value: ValueId) -> bool {
        self.exit_live(block).contains(value.index())
    }

    /// Iterates the values live on entry to `block`.
    pub fn entry_values(&self, block: BlockId) -> impl Iterator<Item = ValueId> + '_ {
        self.entry_live(block).iter().map(ValueId::new)
    }

    /// Records liveness for a block spliced onto an edge after the analysis ran.
    ///
    /// An edge block has no definitions of its own, so its entry and exit sets coincide.
    pub(crate) fn register_edge_block(&mut self, block: BlockId, live: BitSet) {
        let index = block.index();
        if index >= self.entry.len() {
            let size = index + 1;
            self.entry.resize(size, self.empty.clone());
            self.exit.resize(size, self.empty.clone());
            self.flow_exit.resize(size, self.empty.clone());
        }
        self.entry[index] = live.clone();
        self.exit[index] = live.clone();
        self.flow_exit[index] = live;
    }
}

/// Local facts of one block.
struct BlockFacts {
    uses: BitSet,
    defs: BitSet,
}

/// Computes [`Liveness`] for a whole module.
#[derive(Debug, Default)]
pub struct LivenessAnalyzer {
    iterations: usize,
}

impl LivenessAnalyzer {
    /// Creates an analyzer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of block evaluations performed by the last [`Self::execute`].
    #[must_use]
    pub const fn iterations(&self) -> usize {
        self.iterations
    }

    /// Runs the analysis on every function of `module`.
    pub fn execute(&mut self, module: &Module) -> Liveness {
        self.iterations = 0;
        let mut liveness = Liveness::new(module.block_count(), module.value_count());
        for (function, _) in module.functions() {
            self.analyze_function(module, function, &mut liveness);
        }
        log::debug!(
            "liveness converged after {} block evaluations",
            self.iterations
        );
        liveness
    }

    fn analyze_function(&mut self, module: &Module, function: FunctionId, liveness: &mut Liveness) {
        let blocks = module.function_blocks(function);
        let capacity = module.value_count();

        let mut facts: HashMap<BlockId, BlockFacts> = HashMap::with_capacity(blocks.len());
        let mut throw_preds: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for &block_id in &blocks {
            let block = module.block(block_id);
            let mut uses = BitSet::new(capacity);
            let mut defs = BitSet::new(capacity);
            uses.extend(block.uses().map(ValueId::index));
            defs.extend(block.defs().map(ValueId::index));
            facts.insert(block_id, BlockFacts { uses, defs });
            for &handler in block.throw_successors() {
                throw_preds.entry(handler).or_default().push(block_id);
            }
        }

        let mut visited: HashMap<BlockId, bool> = blocks.iter().map(|&b| (b, false)).collect();
        let mut queued: HashMap<BlockId, bool> = visited.clone();
        let mut worklist = VecDeque::new();

        let exits = blocks
            .iter()
            .copied()
            .filter(|&b| module.block(b).is_exit());
        for block in exits {
            worklist.push_back(block);
            queued.insert(block, true);
        }

        for round in 0..2 {
            if round == 1 {
                for &block in blocks.iter().rev() {
                    if !queued[&block] {
                        worklist.push_back(block);
                        queued.insert(block, true);
                    }
                }
            }

            while let Some(block_id) = worklist.pop_front() {
                queued.insert(block_id, false);
                self.iterations += 1;

                let changed = Self::transfer(module, block_id, &facts[&block_id], liveness)
                    || !visited[&block_id];
                visited.insert(block_id, true);
                if !changed {
                    continue;
                }

                let block = module.block(block_id);
                let preds = block
                    .predecessors()
                    .iter()
                    .chain(throw_preds.get(&block_id).into_iter().flatten());
                for &pred in preds {
                    if queued.get(&pred) == Some(&false) {
                        worklist.push_back(pred);
                        queued.insert(pred, true);
                    }
                }
            }
        }
    }

    /// Recomputes the sets of one block. Returns `true` if its entry set changed.
    fn transfer(
        module: &Module,
        block_id: BlockId,
        facts: &BlockFacts,
        liveness: &mut Liveness,
    ) -> bool {
        let block = module.block(block_id);
        let index = block_id.index();

        let mut flow_exit = BitSet::new(facts.defs.capacity());
        for &succ in block.successors() {
            flow_exit.union_with(liveness.entry_live(succ));
            for phi in module.block(succ).phis() {
                if let Some(value) = phi.operand_from(block_id) {
                    flow_exit.insert(value.index());
                }
            }
        }

        let mut exit = flow_exit.clone();
        if !block.throw_successors().is_empty() {
            let mut throw_live = BitSet::new(facts.defs.capacity());
            for &handler in block.throw_successors() {
                throw_live.union_with(liveness.entry_live(handler));
            }
            throw_live.difference_with(&facts.defs);
            exit.union_with(&throw_live);
        }

        let mut entry = exit.clone();
        entry.union_with(&facts.uses);
        entry.difference_with(&facts.defs);

        let changed = liveness.entry[index] != entry;
        liveness.entry[index] = entry;
        liveness.exit[index] = exit;
        liveness.flow_exit[index] = flow_exit;
        changed
    }
}
