//! Persisted write-lock state

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::priority::PriorityLevel;

/// A request for exclusive write access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRequest {
    pub requester: String,
    /// Files or other resources the holder intends to write
    pub resources: BTreeSet<String>,
    pub priority: PriorityLevel,
    pub estimated_duration_minutes: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// The current owner of the lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub request: LockRequest,
    pub granted_at: DateTime<Utc>,
}

impl LockHolder {
    pub fn requester(&self) -> &str {
        &self.request.requester
    }

    pub fn priority(&self) -> PriorityLevel {
        self.request.priority
    }
}

/// A preemptor waiting out the holder's grace window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPreemption {
    pub request: LockRequest,
    /// Holder being displaced
    pub preempting: String,
    pub grace_minutes: u32,
    /// Earliest moment the handoff may happen
    pub handoff_at: DateTime<Utc>,
}

/// History entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockEventKind {
    Granted,
    Queued,
    Released,
    PreemptionScheduled,
    /// Holder pushed back into the queue by a preemptor
    Demoted,
    Withdrawn,
}

impl std::fmt::Display for LockEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Granted => write!(f, "GRANTED"),
            Self::Queued => write!(f, "QUEUED"),
            Self::Released => write!(f, "RELEASED"),
            Self::PreemptionScheduled => write!(f, "PREEMPTION_SCHEDULED"),
            Self::Demoted => write!(f, "DEMOTED"),
            Self::Withdrawn => write!(f, "WITHDRAWN"),
        }
    }
}

/// Append-only history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEvent {
    pub kind: LockEventKind,
    pub requester: String,
    pub priority: PriorityLevel,
    /// Queue position, for QUEUED and DEMOTED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

/// Holder, priority-ordered wait queue, pending preemption and history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    pub holder: Option<LockHolder>,
    pub queue: Vec<LockRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_preemption: Option<PendingPreemption>,
    #[serde(default)]
    pub history: Vec<LockEvent>,
}

impl LockState {
    /// Where a request of `priority` belongs: before the first queued entry of
    /// strictly lower priority, otherwise at the end
    pub fn insertion_index(&self, priority: PriorityLevel) -> usize {
        self.queue
            .iter()
            .position(|queued| priority.outranks(queued.priority))
            .unwrap_or(self.queue.len())
    }

    /// Priority-stable insert; returns the 0-based position
    pub fn enqueue(&mut self, request: LockRequest) -> usize {
        let position = self.insertion_index(request.priority);
        self.queue.insert(position, request);
        position
    }

    /// Whether `requester` holds, waits for, or is about to preempt the lock
    pub fn involves(&self, requester: &str) -> bool {
        self.holder
            .as_ref()
            .is_some_and(|h| h.requester() == requester)
            || self.queue.iter().any(|r| r.requester == requester)
            || self
                .pending_preemption
                .as_ref()
                .is_some_and(|p| p.request.requester == requester)
    }

    /// Make `request` the holder
    pub fn grant(&mut self, request: LockRequest, now: DateTime<Utc>) -> &LockHolder {
        self.record(LockEventKind::Granted, &request, None, now);
        self.holder.insert(LockHolder {
            request,
            granted_at: now,
        })
    }

    pub fn record(
        &mut self,
        kind: LockEventKind,
        request: &LockRequest,
        position: Option<usize>,
        now: DateTime<Utc>,
    ) {
        self.history.push(LockEvent {
            kind,
            requester: request.requester.clone(),
            priority: request.priority,
            position,
            timestamp: now,
        });
    }
}
