//! Priority write lock with preemption
//!
//! Uses the same preemption matrix as task scheduling
//! ([`crate::priority::may_preempt`]).

pub mod arbiter;
pub mod state;

pub use arbiter::{LockArbiter, LockGrant, LockSpec, PreemptionOutcome};
pub use state::{LockEvent, LockEventKind, LockHolder, LockRequest, LockState, PendingPreemption};
