//! Shared data structures.

mod bitset;

pub use bitset::{BitSet, BitSetIter};
