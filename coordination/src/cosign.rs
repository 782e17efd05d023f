//! Risk-tiered co-signature processing
//!
//! Every co-signature request is sorted into a risk tier. LOW and MEDIUM
//! requests that pass the automatic checks are granted without a human and
//! occasionally sampled for a later spot check; everything else waits for
//! the Librarian, and emergency bypasses also reach the user.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::error::{CoordinationError, CoordinationResult};
use crate::notify::{self, Audience, Notification, SharedNotifier};
use crate::priority::Urgency;
use crate::review::RandomSource;
use crate::rollback::Gate;
use crate::store::schema::scopes;
use crate::store::{SharedRepository, StoreError};

/// Path fragments that always need a human
pub const HIGH_RISK_AREAS: [&str; 6] = [
    "auth",
    "payment",
    "security",
    "encryption",
    "admin",
    "credential",
];

/// Changes larger than this are HIGH risk
pub const LOC_HIGH_THRESHOLD: u32 = 200;

/// RED → GREEN changes smaller than this are LOW risk
pub const LOC_LOW_THRESHOLD: u32 = 50;

pub const COVERAGE_THRESHOLD: f64 = 0.80;

pub const LOW_SPOT_CHECK_RATE: f64 = 0.05;
pub const MEDIUM_SPOT_CHECK_RATE: f64 = 0.10;

/// Who signs for automatic grants
pub const AUTO_APPROVER: &str = "AUTO_APPROVAL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn auto_approvable(self) -> bool {
        matches!(self, Self::Low | Self::Medium)
    }

    /// Chance that an automatic grant is queued for a spot check
    pub fn spot_check_rate(self) -> f64 {
        match self {
            Self::Low => LOW_SPOT_CHECK_RATE,
            Self::Medium => MEDIUM_SPOT_CHECK_RATE,
            Self::High | Self::Critical => 0.0,
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestKind {
    GateTransition,
    EmergencyBypass,
}

/// A request for a Librarian co-signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoSignatureRequest {
    pub feature_id: String,
    pub requester: String,
    pub kind: RequestKind,
    /// Gate the feature is leaving
    pub from: Gate,
    /// Gate the feature is entering
    pub to: Gate,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub total_loc: u32,
    #[serde(default)]
    pub signoffs_present: bool,
    #[serde(default = "default_true")]
    pub requires_tests: bool,
    #[serde(default)]
    pub tests_passing: bool,
    #[serde(default)]
    pub requires_coverage: bool,
    /// Line coverage in `[0, 1]`
    #[serde(default)]
    pub coverage: f64,
    #[serde(default)]
    pub security_clean: bool,
}

fn default_true() -> bool {
    true
}

impl CoSignatureRequest {
    /// A gate transition with every check still unmet
    pub fn transition(
        feature_id: impl Into<String>,
        requester: impl Into<String>,
        from: Gate,
        to: Gate,
    ) -> Self {
        Self {
            feature_id: feature_id.into(),
            requester: requester.into(),
            kind: RequestKind::GateTransition,
            from,
            to,
            files: Vec::new(),
            total_loc: 0,
            signoffs_present: false,
            requires_tests: true,
            tests_passing: false,
            requires_coverage: false,
            coverage: 0.0,
            security_clean: false,
        }
    }

    pub fn emergency_bypass(mut self) -> Self {
        self.kind = RequestKind::EmergencyBypass;
        self
    }

    pub fn touching<I, S>(mut self, files: I, total_loc: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self.total_loc = total_loc;
        self
    }

    /// Sign-offs present, tests passing, security scan clean
    pub fn checks_passed(mut self) -> Self {
        self.signoffs_present = true;
        self.tests_passing = true;
        self.security_clean = true;
        self
    }

    pub fn with_coverage(mut self, coverage: f64) -> Self {
        self.requires_coverage = true;
        self.coverage = coverage;
        self
    }
}

/// Risk tier of a request
pub fn classify_risk(request: &CoSignatureRequest) -> RiskTier {
    if request.kind == RequestKind::EmergencyBypass {
        return RiskTier::Critical;
    }
    let sensitive = request.files.iter().any(|file| {
        let file = file.to_ascii_lowercase();
        HIGH_RISK_AREAS.iter().any(|area| file.contains(area))
    });
    if sensitive || request.total_loc > LOC_HIGH_THRESHOLD {
        return RiskTier::High;
    }
    match (request.from, request.to) {
        (Gate::Red, Gate::Green) if request.total_loc < LOC_LOW_THRESHOLD => RiskTier::Low,
        (Gate::Green, Gate::Peer) if request.total_loc < LOC_HIGH_THRESHOLD => RiskTier::Medium,
        _ => RiskTier::High,
    }
}

/// Whether a request in `tier` may be granted without a human
pub fn auto_approve_eligible(request: &CoSignatureRequest, tier: RiskTier) -> bool {
    tier.auto_approvable()
        && request.signoffs_present
        && (!request.requires_tests || request.tests_passing)
        && (!request.requires_coverage || request.coverage >= COVERAGE_THRESHOLD)
        && request.security_clean
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoSignatureStatus {
    AutoApproved,
    PendingManualReview,
}

/// Why a request ended where it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewReason {
    CriticalTier,
    HighTier,
    AutoApprovalChecksPassed,
    AutoApprovalFailed,
}

/// Outcome of processing one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoSignatureDecision {
    pub request_id: String,
    pub status: CoSignatureStatus,
    pub risk_tier: RiskTier,
    pub reason: ReviewReason,
    pub user_notified: bool,
    pub spot_check_scheduled: bool,
}

/// A granted co-signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoSignatureGrant {
    pub request_id: String,
    pub request: CoSignatureRequest,
    pub approved_by: String,
    pub risk_tier: RiskTier,
    pub timestamp: DateTime<Utc>,
}

/// An automatic grant sampled for a human audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotCheck {
    pub request_id: String,
    pub feature_id: String,
    pub risk_tier: RiskTier,
    pub queued_at: DateTime<Utc>,
}

/// A request waiting for the Librarian
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReview {
    pub request_id: String,
    pub request: CoSignatureRequest,
    pub risk_tier: RiskTier,
    pub reason: ReviewReason,
    pub queued_at: DateTime<Utc>,
}

/// Persisted grants, pending reviews and the spot-check queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoSignatureLedger {
    pub grants: Vec<CoSignatureGrant>,
    pub pending: Vec<PendingReview>,
    pub spot_checks: Vec<SpotCheck>,
}

fn generate_request_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("COSIGN-{}", hex[..8].to_ascii_uppercase())
}

/// Sorts co-signature requests and keeps the ledger
pub struct CoSignatureDesk {
    repo: SharedRepository<CoSignatureLedger>,
    rng: Mutex<Box<dyn RandomSource>>,
    notifier: SharedNotifier,
    clock: SharedClock,
}

impl CoSignatureDesk {
    pub fn new(
        repo: SharedRepository<CoSignatureLedger>,
        rng: Box<dyn RandomSource>,
        notifier: SharedNotifier,
        clock: SharedClock,
    ) -> Self {
        Self {
            repo,
            rng: Mutex::new(rng),
            notifier,
            clock,
        }
    }

    /// Classify a request and either grant it or queue it for review
    pub fn process(&self, request: CoSignatureRequest) -> CoordinationResult<CoSignatureDecision> {
        if request.feature_id.trim().is_empty() || request.requester.trim().is_empty() {
            return Err(CoordinationError::validation(
                "feature id and requester must not be empty",
            ));
        }
        if !(0.0..=1.0).contains(&request.coverage) {
            return Err(CoordinationError::validation(format!(
                "coverage {} outside [0, 1]",
                request.coverage
            )));
        }

        let now = self.clock.now();
        let request_id = generate_request_id();
        let tier = classify_risk(&request);
        let reason = match tier {
            RiskTier::Critical => ReviewReason::CriticalTier,
            RiskTier::High => ReviewReason::HighTier,
            _ if auto_approve_eligible(&request, tier) => ReviewReason::AutoApprovalChecksPassed,
            _ => ReviewReason::AutoApprovalFailed,
        };

        if reason == ReviewReason::AutoApprovalChecksPassed {
            let spot_check = self
                .rng
                .lock()
                .map_err(|_| CoordinationError::Store(StoreError::LockPoisoned))?
                .unit()
                < tier.spot_check_rate();
            self.repo
                .modify_or_default(scopes::COSIGN_LEDGER, |ledger| -> CoordinationResult<()> {
                    ledger.grants.push(CoSignatureGrant {
                        request_id: request_id.clone(),
                        request: request.clone(),
                        approved_by: AUTO_APPROVER.to_string(),
                        risk_tier: tier,
                        timestamp: now,
                    });
                    if spot_check {
                        ledger.spot_checks.push(SpotCheck {
                            request_id: request_id.clone(),
                            feature_id: request.feature_id.clone(),
                            risk_tier: tier,
                            queued_at: now,
                        });
                    }
                    Ok(())
                })?;
            info!(
                request_id = %request_id,
                feature_id = %request.feature_id,
                tier = %tier,
                spot_check,
                "Co-signature granted automatically"
            );
            return Ok(CoSignatureDecision {
                request_id,
                status: CoSignatureStatus::AutoApproved,
                risk_tier: tier,
                reason,
                user_notified: false,
                spot_check_scheduled: spot_check,
            });
        }

        self.repo
            .modify_or_default(scopes::COSIGN_LEDGER, |ledger| -> CoordinationResult<()> {
                ledger.pending.push(PendingReview {
                    request_id: request_id.clone(),
                    request: request.clone(),
                    risk_tier: tier,
                    reason,
                    queued_at: now,
                });
                Ok(())
            })?;

        let critical = tier == RiskTier::Critical;
        if critical {
            warn!(request_id = %request_id, feature_id = %request.feature_id, "Emergency bypass needs manual co-signature");
        } else {
            debug!(request_id = %request_id, tier = %tier, ?reason, "Co-signature queued for review");
        }
        let review = Notification::CoSignatureReview {
            request_id: request_id.clone(),
            feature_id: request.feature_id.clone(),
            requester: request.requester.clone(),
            risk_tier: tier,
            reason,
            urgency: if critical { Urgency::High } else { Urgency::Medium },
        };
        if critical {
            notify::send(self.notifier.as_ref(), now, Audience::User, review.clone());
        }
        notify::send(self.notifier.as_ref(), now, Audience::librarian(), review);

        Ok(CoSignatureDecision {
            request_id,
            status: CoSignatureStatus::PendingManualReview,
            risk_tier: tier,
            reason,
            user_notified: critical,
            spot_check_scheduled: false,
        })
    }

    /// Librarian signs a pending request; it moves from pending to granted
    pub fn approve(&self, request_id: &str, librarian: &str) -> CoordinationResult<CoSignatureGrant> {
        if librarian.trim().is_empty() {
            return Err(CoordinationError::validation("approver must not be empty"));
        }
        let now = self.clock.now();
        let grant = self
            .repo
            .modify_or_default(scopes::COSIGN_LEDGER, |ledger| -> CoordinationResult<CoSignatureGrant> {
                let index = ledger
                    .pending
                    .iter()
                    .position(|p| p.request_id == request_id)
                    .ok_or_else(|| CoordinationError::CoSignatureRequestNotFound {
                        request_id: request_id.to_string(),
                    })?;
                let pending = ledger.pending.remove(index);
                let grant = CoSignatureGrant {
                    request_id: pending.request_id,
                    request: pending.request,
                    approved_by: librarian.to_string(),
                    risk_tier: pending.risk_tier,
                    timestamp: now,
                };
                ledger.grants.push(grant.clone());
                Ok(grant)
            })?;
        info!(request_id, approved_by = librarian, "Co-signature granted");
        Ok(grant)
    }

    pub fn ledger(&self) -> CoordinationResult<CoSignatureLedger> {
        Ok(self.repo.load(scopes::COSIGN_LEDGER)?.unwrap_or_default())
    }
}
