//! Dense fixed-capacity bit set.
//!
//! Liveness sets are indexed by [`crate::il::ValueId`], so they are dense, bounded by the
//! number of values in the module and combined with union/difference in tight fixpoint
//! loops. A word vector covers that better than a hash set.

use std::fmt;

/// A fixed-capacity set of `usize` indices backed by 64-bit words.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct BitSet {
    words: Vec<u64>,
    capacity: usize,
}

impl BitSet {
    /// Creates an empty set able to hold indices `0..capacity`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
            capacity,
        }
    }

    /// Returns the capacity the set was created with.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` if no index is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Inserts `index`. Returns `true` if it was not present.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.capacity()`.
    pub fn insert(&mut self, index: usize) -> bool {
        assert!(index < self.capacity, "bit index {index} out of bounds");
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let absent = *word & mask == 0;
        *word |= mask;
        absent
    }

    /// Removes `index`. Returns `true` if it was present.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.capacity()`.
    pub fn remove(&mut self, index: usize) -> bool {
        assert!(index < self.capacity, "bit index {index} out of bounds");
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let present = *word & mask != 0;
        *word &= !mask;
        present
    }

    /// Returns `true` if `index` is set. Indices beyond the capacity are never set.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.capacity && self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Number of set indices.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Clears every index.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// In-place union. Returns `true` if `self` changed.
    pub fn union_with(&mut self, other: &Self) -> bool {
        assert_eq!(self.capacity, other.capacity, "bit sets must have same capacity");
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let old = *a;
            *a |= *b;
            changed |= old != *a;
        }
        changed
    }

    /// In-place intersection. Returns `true` if `self` changed.
    pub fn intersect_with(&mut self, other: &Self) -> bool {
        assert_eq!(self.capacity, other.capacity, "bit sets must have same capacity");
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let old = *a;
            *a &= *b;
            changed |= old != *a;
        }
        changed
    }

    /// Removes every index set in `other`. Returns `true` if `self` changed.
    pub fn difference_with(&mut self, other: &Self) -> bool {
        assert_eq!(self.capacity, other.capacity, "bit sets must have same capacity");
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let old = *a;
            *a &= !*b;
            changed |= old != *a;
        }
        changed
    }

    /// Iterates the set indices in ascending order.
    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter {
            words: &self.words,
            word_idx: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Extend<usize> for BitSet {
    fn extend<I: IntoIterator<Item = usize>>(&mut self, iter: I) {
        for index in iter {
            self.insert(index);
        }
    }
}

/// Ascending iterator over a [`BitSet`].
pub struct BitSetIter<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
}

impl Iterator for BitSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.word_idx * 64 + bit);
            }
            self.word_idx += 1;
            self.current = *self.words.get(self.word_idx)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove_contains() {
        let mut bs = BitSet::new(130);
        assert!(bs.is_empty());

        assert!(bs.insert(0));
        assert!(bs.insert(64));
        assert!(bs.insert(129));
        assert!(!bs.insert(64));

        assert_eq!(bs.count(), 3);
        assert!(bs.contains(129));
        assert!(!bs.contains(1));
        assert!(!bs.contains(500));

        assert!(bs.remove(64));
        assert!(!bs.remove(64));
        assert_eq!(bs.count(), 2);
    }

    #[test]
    fn test_set_operations() {
        let mut a = BitSet::new(100);
        let mut b = BitSet::new(100);
        a.extend([1, 2, 3]);
        b.extend([3, 4]);

        let mut union = a.clone();
        assert!(union.union_with(&b));
        assert!(!union.union_with(&b));
        assert_eq!(union.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);

        let mut inter = a.clone();
        assert!(inter.intersect_with(&b));
        assert_eq!(inter.iter().collect::<Vec<_>>(), vec![3]);

        let mut diff = a;
        assert!(diff.difference_with(&b));
        assert_eq!(diff.iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_iter_across_words() {
        let mut bs = BitSet::new(200);
        bs.extend([199, 5, 63, 64, 128]);
        assert_eq!(bs.iter().collect::<Vec<_>>(), vec![5, 63, 64, 128, 199]);

        bs.clear();
        assert_eq!(bs.iter().next(), None);
        assert_eq!(BitSet::new(0).iter().next(), None);
    }
}
