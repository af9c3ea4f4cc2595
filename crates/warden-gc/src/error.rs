//! Precondition-violation diagnostics.
//!
//! Every variant here names a usage error the public API documents as
//! undefined behavior if violated (reentrant `run`, scope underflow, a
//! pool overflow, ...). These are not recoverable `Result` errors returned
//! from the hot path — they exist so debug builds can fail loudly via
//! `debug_assert!`/`tracing::error!` with a descriptive message instead of
//! silently corrupting list links, matching how precondition violations are
//! surfaced elsewhere in this codebase's collector-adjacent crates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GcError {
    #[error("gc_run called reentrantly (current state: {state})")]
    ReentrantRun { state: &'static str },

    #[error("pop_scope called with no open scope")]
    EmptyScopeStack,

    #[error("protect called with no open scope")]
    ProtectWithNoScope,

    #[error("scope pool overflow: capacity {capacity} exceeded")]
    ScopeOverflow { capacity: usize },

    #[error("weak-reference fixed point did not converge within {rounds} rounds")]
    WeakFixpointRoundCapHit { rounds: u32 },
}
