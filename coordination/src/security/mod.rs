//! Review integrity and second-factor protection
//!
//! - [`CollusionDetector`]: flags author/reviewer pairs that approve each
//!   other too often and keeps an audit trail of every flag
//! - [`TwoFactorLimiter`]: progressive lockout after repeated second-factor
//!   failures, persisted per user

pub mod collusion;
pub mod two_factor;

pub use collusion::{
    CollusionCheck, CollusionDetection, CollusionDetector, CollusionLog, CollusionSeverity,
    ReviewSample, COLLUSION_THRESHOLD, REVIEW_WINDOW,
};
pub use two_factor::{AttemptOutcome, AttemptRecord, LockoutStatus, TwoFactorLimiter};
