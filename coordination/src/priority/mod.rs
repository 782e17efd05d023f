//! Priority tiers, task queueing and least-loaded assignment
//!
//! - [`PriorityQueue`]: four FIFO tiers served CRITICAL first
//! - [`SchedulerState`]: agent table, weighted workload, assignment audit
//! - [`may_preempt`]: the preemption matrix shared with the write lock
//! - [`check_violation`]: SLA ages for CRITICAL (4h) and HIGH (24h)
//! - [`TaskBoard`]: the persisted service tying them together

pub mod board;
pub mod level;
pub mod preemption;
pub mod queue;
pub mod scheduler;
pub mod sla;
pub mod workload;

pub use board::{QueueSummary, SlaViolation, TaskBoard, TaskPreemption};
pub use level::{PriorityClassifier, PriorityLevel, Urgency};
pub use preemption::{may_preempt, PreemptionDecision, CRITICAL_GRACE_MINUTES, HIGH_GRACE_MINUTES};
pub use queue::{PriorityQueue, WorkItem};
pub use scheduler::{AssignmentRecord, SchedulerState};
pub use sla::{check_violation, SlaStatus};
pub use workload::{workload, Agent};
