//! Notification collaborator
//!
//! The core raises urgent alerts (tie-break requests, lock preemption,
//! SLA violations, user escalations, rollbacks, co-signature reviews and
//! collusion flags) through a [`Notifier`]. How they are delivered is somebody else's problem:
//!
//! - [`BroadcastNotifier`]: Tokio broadcast channel for in-process subscribers
//! - [`MemoryNotifier`]: records everything, for tests and inspection
//! - [`LogNotifier`]: writes alerts to the tracing log
//!
//! Notification failures never fail the operation that raised them; callers
//! log and move on.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::cosign::{ReviewReason, RiskTier};
use crate::council::{CastVote, EscalationRecord};
use crate::priority::{PriorityLevel, Urgency};
use crate::security::CollusionSeverity;

/// Default channel capacity for broadcast delivery
pub const CHANNEL_CAPACITY: usize = 256;

/// Role that owns co-signatures and review integrity
pub const LIBRARIAN_ROLE: &str = "Librarian";

/// Who a notification is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Audience {
    /// A single agent or elector
    Agent(String),
    /// Everyone holding a role (e.g. "Librarian")
    Role(String),
    /// The orchestrating process
    Orchestrator,
    /// The human user
    User,
}

impl Audience {
    /// Everyone holding the Librarian role
    pub fn librarian() -> Self {
        Self::Role(LIBRARIAN_ROLE.to_string())
    }
}

impl std::fmt::Display for Audience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent(id) => write!(f, "agent:{}", id),
            Self::Role(role) => write!(f, "role:{}", role),
            Self::Orchestrator => write!(f, "orchestrator"),
            Self::User => write!(f, "user"),
        }
    }
}

/// Alert payloads raised by the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A tied council vote needs the remaining elector
    TieBreakRequest {
        vote_id: String,
        voter: String,
        votes: Vec<CastVote>,
        deadline: DateTime<Utc>,
        urgency: Urgency,
    },
    /// The lock holder will be preempted once the grace window closes
    LockPreemption {
        holder: String,
        preempted_by: String,
        priority: PriorityLevel,
        grace_minutes: u32,
        handoff_at: DateTime<Utc>,
    },
    /// An agent's assignment was displaced by more urgent work
    TaskPreemption {
        agent: String,
        displaced_item: String,
        incoming_item: String,
        grace_minutes: u32,
    },
    /// An assigned item is past its SLA
    SlaViolation {
        item_id: String,
        priority: PriorityLevel,
        assigned_agent: Option<String>,
        age_hours: f64,
        sla_hours: u32,
        urgency: Urgency,
    },
    /// A vote could not be settled by the council
    UserEscalation(EscalationRecord),
    /// A feature was rolled back to an earlier gate
    RollbackNotice {
        feature_id: String,
        owner: String,
        previous_gate: String,
        current_gate: String,
        reason: String,
        next_steps: Vec<String>,
    },
    /// A co-signature request needs a human decision
    CoSignatureReview {
        request_id: String,
        feature_id: String,
        requester: String,
        risk_tier: RiskTier,
        reason: ReviewReason,
        urgency: Urgency,
    },
    /// An author/reviewer pair approves each other suspiciously often
    CollusionAlert {
        author: String,
        reviewer: String,
        approval_rate: f64,
        severity: CollusionSeverity,
    },
}

impl Notification {
    /// Short type name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TieBreakRequest { .. } => "tie_break_request",
            Self::LockPreemption { .. } => "lock_preemption",
            Self::TaskPreemption { .. } => "task_preemption",
            Self::SlaViolation { .. } => "sla_violation",
            Self::UserEscalation(_) => "user_escalation",
            Self::RollbackNotice { .. } => "rollback_notice",
            Self::CoSignatureReview { .. } => "cosignature_review",
            Self::CollusionAlert { .. } => "collusion_alert",
        }
    }
}

/// A notification together with its routing metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique notification id
    pub id: String,
    /// Recipient
    pub audience: Audience,
    /// Payload
    pub notification: Notification,
    /// When it was raised
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Wrap a payload for `audience`, stamped with the raising service's clock
    pub fn new(audience: Audience, notification: Notification, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            audience,
            notification,
            timestamp,
        }
    }
}

/// Error type for notification delivery
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to deliver notification: {0}")]
    DeliveryFailed(String),

    #[error("Notifier lock poisoned")]
    LockPoisoned,
}

/// Result type for notification delivery
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Delivery contract for urgent alerts
pub trait Notifier: Send + Sync {
    /// Deliver one envelope
    fn notify(&self, envelope: &Envelope) -> NotifyResult<()>;
}

/// Shared reference to a notifier
pub type SharedNotifier = Arc<dyn Notifier>;

/// Deliver and log failures instead of propagating them
pub(crate) fn send(
    notifier: &dyn Notifier,
    at: DateTime<Utc>,
    audience: Audience,
    notification: Notification,
) {
    let envelope = Envelope::new(audience, notification, at);
    if let Err(e) = notifier.notify(&envelope) {
        warn!(
            audience = %envelope.audience,
            kind = envelope.notification.kind(),
            "Notification not delivered: {}",
            e
        );
    }
}

/// Notifier that fans envelopes out over a Tokio broadcast channel
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Envelope>,
}

impl BroadcastNotifier {
    /// Create a notifier with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// Create a notifier with an explicit channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a shared reference to this notifier
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Subscribe to receive envelopes
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, envelope: &Envelope) -> NotifyResult<()> {
        let kind = envelope.notification.kind();
        match self.sender.send(envelope.clone()) {
            Ok(count) => {
                debug!(kind, receivers = count, "Notification published");
            }
            Err(_) => {
                // No receivers is OK
                debug!(kind, "Notification published (no receivers)");
            }
        }
        Ok(())
    }
}

/// Notifier that keeps every envelope in memory
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Envelope>>,
}

impl MemoryNotifier {
    /// Empty outbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this notifier
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Everything sent so far
    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Envelopes addressed to `audience`
    pub fn sent_to(&self, audience: &Audience) -> Vec<Envelope> {
        self.sent()
            .into_iter()
            .filter(|e| &e.audience == audience)
            .collect()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, envelope: &Envelope) -> NotifyResult<()> {
        let mut sent = self.sent.lock().map_err(|_| NotifyError::LockPoisoned)?;
        sent.push(envelope.clone());
        Ok(())
    }
}

/// Notifier that writes alerts to the log as structured JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, envelope: &Envelope) -> NotifyResult<()> {
        let payload = serde_json::to_string(&envelope.notification)
            .map_err(|e| NotifyError::DeliveryFailed(e.to_string()))?;
        warn!(
            audience = %envelope.audience,
            kind = envelope.notification.kind(),
            raised_at = %envelope.timestamp,
            payload = %payload,
            "Alert"
        );
        Ok(())
    }
}
