//! Dominator tree computation.
//!
//! Uses the iterative algorithm of Cooper, Harvey and Kennedy over reverse postorder. The
//! CFGs handled here are per-function and small, and the iterative form converges in two or
//! three sweeps for reducible graphs while staying correct for irreducible ones.
//!
//! Exception edges count as edges: a catch block is dominated by the block whose throwing
//! instruction can reach it.

use std::collections::{HashMap, HashSet};

use crate::il::BlockId;

const UNDEFINED: usize = usize::MAX;

/// Immediate-dominator relation of the blocks reachable from one entry.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// Reachable blocks in reverse postorder; index 0 is the entry.
    order: Vec<BlockId>,
    /// Position of each block in `order`.
    index: HashMap<BlockId, usize>,
    /// Immediate dominator as an index into `order`; the entry points at itself.
    idom: Vec<usize>,
}

impl DominatorTree {
    /// Computes dominators of every block reachable from `entry`.
    ///
    /// `successors` must return all outgoing edges of a block, including exception edges.
    pub fn compute<F>(entry: BlockId, successors: F) -> Self
    where
        F: Fn(BlockId) -> Vec<BlockId>,
    {
        let postorder = Self::postorder(entry, &successors);
        let order: Vec<BlockId> = postorder.iter().rev().copied().collect();
        let index: HashMap<BlockId, usize> =
            order.iter().enumerate().map(|(i, &b)| (b, i)).collect();

        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); order.len()];
        for (i, &block) in order.iter().enumerate() {
            for succ in successors(block) {
                if let Some(&s) = index.get(&succ) {
                    preds[s].push(i);
                }
            }
        }

        let mut idom = vec![UNDEFINED; order.len()];
        if !order.is_empty() {
            idom[0] = 0;
        }

        let mut changed = true;
        while changed {
            changed = false;
            for b in 1..order.len() {
                let mut new_idom = UNDEFINED;
                for &p in &preds[b] {
                    if idom[p] == UNDEFINED {
                        continue;
                    }
                    new_idom = if new_idom == UNDEFINED {
                        p
                    } else {
                        Self::intersect(&idom, p, new_idom)
                    };
                }
                if new_idom != UNDEFINED && idom[b] != new_idom {
                    idom[b] = new_idom;
                    changed = true;
                }
            }
        }

        Self { order, index, idom }
    }

    /// Walks both fingers up the tree until they meet. Indices are reverse-postorder
    /// positions, so a smaller index is closer to the entry.
    fn intersect(idom: &[usize], mut a: usize, mut b: usize) -> usize {
        while a != b {
            while a > b {
                a = idom[a];
            }
            while b > a {
                b = idom[b];
            }
        }
        a
    }

    fn postorder<F>(entry: BlockId, successors: &F) -> Vec<BlockId>
    where
        F: Fn(BlockId) -> Vec<BlockId>,
    {
        let mut visited = HashSet::new();
        let mut postorder = Vec::new();
        let mut stack = vec![(entry, successors(entry), 0usize)];
        visited.insert(entry);

        while let Some((block, succs, next)) = stack.last_mut() {
            if let Some(&succ) = succs.get(*next) {
                *next += 1;
                if visited.insert(succ) {
                    let succ_edges = successors(succ);
                    stack.push((succ, succ_edges, 0));
                }
            } else {
                postorder.push(*block);
                stack.pop();
            }
        }
        postorder
    }

    /// The entry block.
    #[must_use]
    pub fn entry(&self) -> Option<BlockId> {
        self.order.first().copied()
    }

    /// Reachable blocks in reverse postorder.
    #[must_use]
    pub fn reverse_postorder(&self) -> &[BlockId] {
        &self.order
    }

    /// Returns `true` if `block` is reachable from the entry.
    #[must_use]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.index.contains_key(&block)
    }

    /// Immediate dominator of `block`. `None` for the entry and unreachable blocks.
    #[must_use]
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        let &i = self.index.get(&block)?;
        if i == 0 || self.idom[i] == UNDEFINED {
            None
        } else {
            Some(self.order[self.idom[i]])
        }
    }

    /// Blocks immediately dominated by `block`, in reverse postorder.
    #[must_use]
    pub fn children(&self, block: BlockId) -> Vec<BlockId> {
        let Some(&i) = self.index.get(&block) else {
            return Vec::new();
        };
        (1..self.order.len())
            .filter(|&c| self.idom[c] == i)
            .map(|c| self.order[c])
            .collect()
    }

    /// Returns `true` if `a` dominates `b`.
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let (Some(&a), Some(&b)) = (self.index.get(&a), self.index.get(&b)) else {
            return false;
        };
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            if current == 0 || self.idom[current] == UNDEFINED {
                return false;
            }
            current = self.idom[current];
        }
    }
}
