//! Timestamp search over a grid of lanes and rounds.
//!
//! This module provides:
//! - `ComputeBackend`: anything that can run the kernel over `T` lanes
//! - `CpuBackend`: a rayon thread pool realization
//! - `SearchEngine`: the round loop, progress, cancellation and key regeneration

mod backend;
mod search;

pub use backend::{ComputeBackend, CpuBackend, RoundInput};
pub use search::{
    Candidate, Clock, FixedClock, MatchResult, NoopObserver, SearchEngine, SearchGrid,
    SearchObserver, SearchOptions, SearchOutcome, SystemClock, Target,
};
