//! Testing utilities for code built on the pipeline.
//!
//! This module provides instrumentation for worker functions, so tests can
//! check concurrency bounds and token conservation without timing tricks.
//!
//! # Example
//!
//! ```rust,ignore
//! use nutsandbolts_core::testing::{ConcurrencyProbe, DropCounter};
//!
//! let probe = ConcurrencyProbe::new();
//! let counter = DropCounter::new();
//! let tokens = counter.tokens(4);
//!
//! // Run a pipeline with `tokens`, wrapping the worker in `probe.observe(..)`
//!
//! assert!(probe.peak() <= 4);
//! assert_eq!(counter.dropped(), 4);
//! ```

mod probe;

pub use probe::{ConcurrencyProbe, CountedToken, DropCounter, ProbeGuard};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::queue::Queue;

    /// Error injected by test worker functions.
    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[error("injected failure on item {0}")]
    pub struct InjectedFailure(pub u64);

    /// A closed queue holding `1..=n`.
    pub fn numbered_items(n: u64) -> Queue<u64> {
        Queue::from_items(1..=n)
    }

    /// The reference worker function: `value * 10 + worker + 1`.
    pub fn scaled(worker: usize, value: u64) -> u64 {
        value * 10 + worker as u64 + 1
    }
}
