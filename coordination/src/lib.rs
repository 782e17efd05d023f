//! Priority Coordination Core
//!
//! Arbitrates three scarce things between a fixed set of agent workers:
//! - task assignment capacity (four-tier priority queue, weighted
//!   least-loaded scheduling, preemption, SLA monitoring)
//! - exclusive write access (priority lock queue with the same preemption
//!   policy and grace windows)
//! - decision authority (three-member council vote with quorum, tie-break
//!   and user escalation)
//!
//! Supporting pieces:
//! - quality-gate rollback with co-signature enforcement
//! - risk-tiered co-signature processing with sampled spot checks
//! - independent reviewer sampling from a seeded random source
//! - review collusion detection and second-factor lockout
//! - a periodic sweep that turns elapsed deadlines into transitions
//!
//! State goes through [`store::Repository`] (memory, JSON files, or RocksDB
//! with the `heavy-state` feature). Alerts go through [`notify::Notifier`].
//! Time comes from [`clock::Clock`].
//!
//! # Usage
//!
//! ```ignore
//! use priority_coordination::{Coordinator, CoordinationConfig, SystemClock, BroadcastNotifier};
//!
//! let config = CoordinationConfig::from_env()?;
//! let coordinator = Coordinator::open(&config, BroadcastNotifier::new().shared(), SystemClock::shared())?;
//! let grant = coordinator.lock.request(LockSpec::new("Dev-A", ["src/lib.rs"], PriorityLevel::High, 30))?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod cosign;
pub mod council;
pub mod error;
pub mod lock;
pub mod notify;
pub mod priority;
pub mod review;
pub mod rollback;
pub mod security;
pub mod store;
pub mod sweep;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ConfigError, CoordinationConfig, StateBackend};
pub use coordinator::{Coordinator, Stores, SweepReport};
pub use cosign::{
    CoSignatureDecision, CoSignatureDesk, CoSignatureRequest, CoSignatureStatus, ReviewReason,
    RiskTier,
};
pub use council::{
    CastVote, CouncilVote, Decision, Electorate, EscalationReason, EscalationRecord, Proposal,
    StatusReport, TieBreakOutcome, VoteRecord, VoteStatus,
};
pub use error::{CoordinationError, CoordinationResult, ErrorKind};
pub use lock::{LockArbiter, LockGrant, LockSpec, LockState, PreemptionOutcome};
pub use notify::{
    Audience, BroadcastNotifier, Envelope, LogNotifier, MemoryNotifier, Notification, Notifier,
    SharedNotifier,
};
pub use priority::{
    may_preempt, Agent, PreemptionDecision, PriorityLevel, PriorityQueue, TaskBoard, Urgency,
    WorkItem,
};
pub use review::{RandomSource, ReviewerPool, XorShiftRng};
pub use rollback::{Gate, RollbackManager, RollbackRequest, RollbackResult, RollbackType};
pub use security::{
    AttemptOutcome, CollusionCheck, CollusionDetector, CollusionSeverity, LockoutStatus,
    ReviewSample, TwoFactorLimiter,
};
pub use store::{Repository, SharedRepository, StoreError};
pub use sweep::{Sweeper, SweeperHandle};
