//! Preemption policy shared by task scheduling and the write lock
//!
//! ```text
//! requesting \ current   CRITICAL  HIGH  MEDIUM  LOW
//! CRITICAL                  -       -     15m    15m
//! HIGH                      -       -      -     30m
//! MEDIUM / LOW              -       -      -      -
//! ```

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::level::PriorityLevel;

/// Grace period granted when CRITICAL work preempts MEDIUM/LOW
pub const CRITICAL_GRACE_MINUTES: u32 = 15;

/// Grace period granted when HIGH work preempts LOW
pub const HIGH_GRACE_MINUTES: u32 = 30;

/// Outcome of a preemption check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreemptionDecision {
    /// Whether the requesting priority may displace the current one
    pub allowed: bool,
    /// Minutes the displaced party keeps running before handoff
    pub grace_minutes: u32,
}

impl PreemptionDecision {
    /// Decision that refuses preemption
    pub const DENIED: Self = Self {
        allowed: false,
        grace_minutes: 0,
    };

    fn allow(grace_minutes: u32) -> Self {
        Self {
            allowed: true,
            grace_minutes,
        }
    }

    /// Grace window as a duration
    pub fn grace(&self) -> Duration {
        Duration::minutes(i64::from(self.grace_minutes))
    }
}

/// May `requesting` preempt work currently running at `current`?
pub fn may_preempt(requesting: PriorityLevel, current: PriorityLevel) -> PreemptionDecision {
    use PriorityLevel::*;

    match (requesting, current) {
        (Critical, Medium | Low) => PreemptionDecision::allow(CRITICAL_GRACE_MINUTES),
        (High, Low) => PreemptionDecision::allow(HIGH_GRACE_MINUTES),
        _ => PreemptionDecision::DENIED,
    }
}
