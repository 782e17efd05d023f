//! Quality-gate rollback
//!
//! Features advance through five gates. When a later gate rejects a feature
//! it is sent back to an earlier one; anything but the low-risk GREEN → RED
//! step needs a Librarian co-signature.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::error::{CoordinationError, CoordinationResult};
use crate::notify::{self, Audience, Notification, SharedNotifier};
use crate::store::schema::scopes;
use crate::store::SharedRepository;

/// Fixes larger than this (in lines of code) go back past peer review
pub const PARTIAL_ROLLBACK_LOC_THRESHOLD: u32 = 50;

/// Quality gates in progression order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gate {
    /// 1: failing tests written
    Red,
    /// 2: implementation passes
    Green,
    /// 3: peer reviewed
    Peer,
    /// 4: QA verified
    Qa,
    /// 5: shipped
    Deploy,
}

impl Gate {
    pub const ALL: [Gate; 5] = [Self::Red, Self::Green, Self::Peer, Self::Qa, Self::Deploy];

    /// 1-based gate number
    pub fn number(self) -> u8 {
        match self {
            Self::Red => 1,
            Self::Green => 2,
            Self::Peer => 3,
            Self::Qa => 4,
            Self::Deploy => 5,
        }
    }
}

impl std::fmt::Display for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Red => "RED",
            Self::Green => "GREEN",
            Self::Peer => "PEER",
            Self::Qa => "QA",
            Self::Deploy => "DEPLOY",
        };
        write!(f, "Gate {} ({})", self.number(), name)
    }
}

impl std::str::FromStr for Gate {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "1" | "RED" => Ok(Self::Red),
            "2" | "GREEN" => Ok(Self::Green),
            "3" | "PEER" => Ok(Self::Peer),
            "4" | "QA" => Ok(Self::Qa),
            "5" | "DEPLOY" => Ok(Self::Deploy),
            other => Err(CoordinationError::validation(format!("unknown gate {:?}", other))),
        }
    }
}

/// How much of the pipeline has to be repeated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollbackType {
    /// QA → PEER: peer sign-off survives
    Partial,
    Full,
}

/// Where a rejected feature goes back to
pub fn rollback_target(current: Gate, fix_loc: u32) -> Gate {
    match current {
        Gate::Qa if fix_loc > PARTIAL_ROLLBACK_LOC_THRESHOLD => Gate::Green,
        Gate::Qa => Gate::Peer,
        Gate::Peer => Gate::Green,
        Gate::Green | Gate::Red | Gate::Deploy => Gate::Red,
    }
}

/// Every rollback except GREEN → RED needs a co-signature
pub fn requires_cosignature(current: Gate, target: Gate) -> bool {
    !(current == Gate::Green && target == Gate::Red)
}

fn classify(current: Gate, target: Gate) -> RollbackType {
    if current == Gate::Qa && target == Gate::Peer {
        RollbackType::Partial
    } else {
        RollbackType::Full
    }
}

/// Sign-offs invalidated by landing on `target`: every gate above it up to QA
pub fn signoffs_cleared(target: Gate) -> Vec<Gate> {
    Gate::ALL
        .into_iter()
        .filter(|g| *g > target && *g <= Gate::Qa)
        .collect()
}

fn next_steps(target: Gate) -> Vec<String> {
    let steps: &[&str] = match target {
        Gate::Red => &[
            "Review the failing tests",
            "Fix the implementation",
            "Get the full suite passing",
            "Request advancement to GREEN",
        ],
        Gate::Green => &[
            "Fix the implementation issues",
            "Re-run the full suite",
            "Request advancement to PEER",
            "Expect a fresh peer review",
        ],
        Gate::Peer => &[
            "Apply the minor fix",
            "Re-run the tests",
            "Fast-track to QA re-test",
        ],
        Gate::Qa | Gate::Deploy => &["Coordinate next steps with the orchestrator"],
    };
    steps.iter().map(|s| s.to_string()).collect()
}

/// A rollback to perform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub feature_id: String,
    pub current: Gate,
    pub target: Gate,
    pub reason: String,
    /// Whether the Librarian co-signed
    pub cosigned: bool,
    pub owner: String,
}

/// Outcome of a rollback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackResult {
    pub feature_id: String,
    pub rollback_type: RollbackType,
    pub target: Gate,
    pub signoffs_cleared: Vec<Gate>,
    pub next_steps: Vec<String>,
}

/// Audit trail entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub feature_id: String,
    pub from: Gate,
    pub to: Gate,
    pub reason: String,
    pub cosigned: bool,
    pub timestamp: DateTime<Utc>,
}

/// Persisted rollback audit trail
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackLog {
    pub entries: Vec<RollbackEntry>,
}

/// Performs authorized rollbacks and keeps their audit trail
pub struct RollbackManager {
    repo: SharedRepository<RollbackLog>,
    notifier: SharedNotifier,
    clock: SharedClock,
}

impl RollbackManager {
    pub fn new(repo: SharedRepository<RollbackLog>, notifier: SharedNotifier, clock: SharedClock) -> Self {
        Self {
            repo,
            notifier,
            clock,
        }
    }

    /// Roll a feature back.
    ///
    /// The target must be strictly earlier than the current gate. A missing
    /// co-signature where one is required is an authorization error and
    /// leaves the audit trail untouched.
    pub fn execute(&self, request: RollbackRequest) -> CoordinationResult<RollbackResult> {
        if request.feature_id.trim().is_empty() {
            return Err(CoordinationError::validation("feature id must not be empty"));
        }
        if request.target >= request.current {
            return Err(CoordinationError::validation(format!(
                "cannot roll back from {} to {}",
                request.current, request.target
            )));
        }
        if requires_cosignature(request.current, request.target) && !request.cosigned {
            warn!(
                feature_id = %request.feature_id,
                from = %request.current,
                to = %request.target,
                "Rollback refused without co-signature"
            );
            return Err(CoordinationError::Authorization {
                message: "Librarian co-signature required".to_string(),
            });
        }

        let now = self.clock.now();
        let result = RollbackResult {
            feature_id: request.feature_id.clone(),
            rollback_type: classify(request.current, request.target),
            target: request.target,
            signoffs_cleared: signoffs_cleared(request.target),
            next_steps: next_steps(request.target),
        };

        self.repo
            .modify_or_default(scopes::ROLLBACK_LOG, |log| -> CoordinationResult<()> {
                log.entries.push(RollbackEntry {
                    feature_id: request.feature_id.clone(),
                    from: request.current,
                    to: request.target,
                    reason: request.reason.clone(),
                    cosigned: request.cosigned,
                    timestamp: now,
                });
                Ok(())
            })?;

        info!(
            feature_id = %request.feature_id,
            from = %request.current,
            to = %request.target,
            kind = ?result.rollback_type,
            "Feature rolled back"
        );
        notify::send(
            self.notifier.as_ref(),
            now,
            Audience::Agent(request.owner.clone()),
            Notification::RollbackNotice {
                feature_id: request.feature_id,
                owner: request.owner,
                previous_gate: request.current.to_string(),
                current_gate: request.target.to_string(),
                reason: request.reason,
                next_steps: result.next_steps.clone(),
            },
        );

        Ok(result)
    }

    /// Audit trail, oldest first
    pub fn history(&self) -> CoordinationResult<Vec<RollbackEntry>> {
        Ok(self
            .repo
            .load(scopes::ROLLBACK_LOG)?
            .unwrap_or_default()
            .entries)
    }
}
