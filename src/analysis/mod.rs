//! Analyses over the IL.
//!
//! # Key Components
//!
//! - [`LivenessAnalyzer`] - computes per-block [`Liveness`] sets used by every later stage

mod liveness;

pub use liveness::{Liveness, LivenessAnalyzer};
