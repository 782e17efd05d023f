//! Progressive lockout for second-factor attempts
//!
//! Failures accumulate per user; three put the user in a cooldown, five in
//! an extended lockout, ten require an administrator. A success clears the
//! count unless an administrator is already required.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::error::{CoordinationError, CoordinationResult};
use crate::store::{SharedRepository, StoreError};

pub const COOLDOWN_THRESHOLD: u32 = 3;
pub const EXTENDED_LOCKOUT_THRESHOLD: u32 = 5;
pub const ADMIN_REQUIRED_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockoutStatus {
    Ok,
    Cooldown,
    ExtendedLockout,
    AdminRequired,
}

impl LockoutStatus {
    /// Status reached after `failures` consecutive failures
    pub fn for_failures(failures: u32) -> Self {
        match failures {
            n if n >= ADMIN_REQUIRED_THRESHOLD => Self::AdminRequired,
            n if n >= EXTENDED_LOCKOUT_THRESHOLD => Self::ExtendedLockout,
            n if n >= COOLDOWN_THRESHOLD => Self::Cooldown,
            _ => Self::Ok,
        }
    }
}

impl std::fmt::Display for LockoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Cooldown => write!(f, "COOLDOWN"),
            Self::ExtendedLockout => write!(f, "EXTENDED_LOCKOUT"),
            Self::AdminRequired => write!(f, "ADMIN_REQUIRED"),
        }
    }
}

/// Persisted per-user counter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub failures: u32,
    pub last_attempt: Option<DateTime<Utc>>,
}

/// What an attempt left behind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub lockout_status: LockoutStatus,
    pub failure_count: u32,
}

impl From<&AttemptRecord> for AttemptOutcome {
    fn from(record: &AttemptRecord) -> Self {
        Self {
            lockout_status: LockoutStatus::for_failures(record.failures),
            failure_count: record.failures,
        }
    }
}

fn invalid_user(e: StoreError) -> CoordinationError {
    match e {
        StoreError::InvalidScope(user) => {
            CoordinationError::validation(format!("invalid user id {:?}", user))
        }
        other => other.into(),
    }
}

/// Second-factor attempt counters, one scope per user
pub struct TwoFactorLimiter {
    repo: SharedRepository<AttemptRecord>,
    clock: SharedClock,
}

impl TwoFactorLimiter {
    pub fn new(repo: SharedRepository<AttemptRecord>, clock: SharedClock) -> Self {
        Self { repo, clock }
    }

    /// Record one attempt and report the resulting lockout status
    pub fn record_attempt(&self, user: &str, success: bool) -> CoordinationResult<AttemptOutcome> {
        let now = self.clock.now();
        let outcome = self
            .repo
            .modify_or_default(user, |record| -> Result<AttemptOutcome, StoreError> {
                let admin_required =
                    LockoutStatus::for_failures(record.failures) == LockoutStatus::AdminRequired;
                if !success {
                    record.failures = record.failures.saturating_add(1);
                } else if !admin_required {
                    record.failures = 0;
                }
                record.last_attempt = Some(now);
                Ok(AttemptOutcome::from(&*record))
            })
            .map_err(invalid_user)?;

        match outcome.lockout_status {
            LockoutStatus::Ok => {}
            LockoutStatus::AdminRequired => warn!(
                user,
                failures = outcome.failure_count,
                "Second factor locked until an administrator resets it"
            ),
            status => info!(user, failures = outcome.failure_count, %status, "Second factor throttled"),
        }
        Ok(outcome)
    }

    /// Administrator reset; unknown users are left alone
    pub fn reset_failures(&self, user: &str) -> CoordinationResult<()> {
        self.repo
            .modify(user, |slot| -> Result<(), StoreError> {
                if let Some(record) = slot {
                    record.failures = 0;
                }
                Ok(())
            })
            .map_err(invalid_user)?;
        info!(user, "Second-factor failures reset");
        Ok(())
    }

    /// Current status without recording an attempt
    pub fn status(&self, user: &str) -> CoordinationResult<AttemptOutcome> {
        let record = self.repo.load(user).map_err(invalid_user)?.unwrap_or_default();
        Ok(AttemptOutcome::from(&record))
    }
}
