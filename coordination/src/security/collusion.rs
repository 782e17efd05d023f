//! Reviewer collusion detection
//!
//! A pair whose approval rate over the review window is strictly above
//! [`COLLUSION_THRESHOLD`] is flagged: CRITICAL when the approvals were back
//! to back, WARNING otherwise. Flags land in a persisted audit trail and go
//! to the Librarian.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::error::{CoordinationError, CoordinationResult};
use crate::notify::{self, Audience, Notification, SharedNotifier};
use crate::store::schema::scopes;
use crate::store::SharedRepository;

/// Approval rate a pair has to exceed to be flagged
pub const COLLUSION_THRESHOLD: f64 = 0.90;

/// Most recent reviews per pair that make up the window
pub const REVIEW_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollusionSeverity {
    Warning,
    Critical,
}

impl std::fmt::Display for CollusionSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => write!(f, "WARNING"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Review statistics for one author/reviewer pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSample {
    pub author: String,
    pub reviewer: String,
    /// Approvals inside the window
    pub approvals: u32,
    /// Reviews inside the window
    pub window_reviews: u32,
    /// The approvals came back to back
    #[serde(default)]
    pub consecutive: bool,
}

impl ReviewSample {
    pub fn new(
        author: impl Into<String>,
        reviewer: impl Into<String>,
        approvals: u32,
        window_reviews: u32,
    ) -> Self {
        Self {
            author: author.into(),
            reviewer: reviewer.into(),
            approvals,
            window_reviews,
            consecutive: false,
        }
    }

    pub fn consecutive(mut self) -> Self {
        self.consecutive = true;
        self
    }

    /// Sample the last [`REVIEW_WINDOW`] outcomes (`true` = approved), oldest
    /// first. The run counts as consecutive when nothing in the window was
    /// rejected.
    pub fn from_outcomes(
        author: impl Into<String>,
        reviewer: impl Into<String>,
        outcomes: &[bool],
    ) -> Self {
        let window = &outcomes[outcomes.len().saturating_sub(REVIEW_WINDOW)..];
        let approvals = window.iter().filter(|approved| **approved).count() as u32;
        let mut sample = Self::new(author, reviewer, approvals, window.len() as u32);
        sample.consecutive = !window.is_empty() && approvals as usize == window.len();
        sample
    }
}

/// Verdict for one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollusionCheck {
    pub detected: bool,
    pub rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<CollusionSeverity>,
}

/// Evaluate a sample without recording anything. An empty window is never
/// collusion.
pub fn evaluate(approvals: u32, window_reviews: u32, consecutive: bool) -> CollusionCheck {
    if window_reviews == 0 {
        return CollusionCheck {
            detected: false,
            rate: 0.0,
            severity: None,
        };
    }
    let rate = f64::from(approvals) / f64::from(window_reviews);
    let detected = rate > COLLUSION_THRESHOLD;
    let severity = detected.then_some(if consecutive {
        CollusionSeverity::Critical
    } else {
        CollusionSeverity::Warning
    });
    CollusionCheck {
        detected,
        rate,
        severity,
    }
}

/// Audit trail entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollusionDetection {
    pub author: String,
    pub reviewer: String,
    pub approval_rate: f64,
    pub severity: CollusionSeverity,
    pub timestamp: DateTime<Utc>,
}

/// Persisted detections, oldest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollusionLog {
    pub detections: Vec<CollusionDetection>,
}

/// Checks review samples and keeps the detection audit trail
pub struct CollusionDetector {
    repo: SharedRepository<CollusionLog>,
    notifier: SharedNotifier,
    clock: SharedClock,
}

impl CollusionDetector {
    pub fn new(repo: SharedRepository<CollusionLog>, notifier: SharedNotifier, clock: SharedClock) -> Self {
        Self {
            repo,
            notifier,
            clock,
        }
    }

    /// Evaluate a sample; a detection is recorded and the Librarian alerted
    pub fn check(&self, sample: &ReviewSample) -> CoordinationResult<CollusionCheck> {
        if sample.author.trim().is_empty() || sample.reviewer.trim().is_empty() {
            return Err(CoordinationError::validation(
                "author and reviewer must not be empty",
            ));
        }
        if sample.approvals > sample.window_reviews {
            return Err(CoordinationError::validation(format!(
                "{} approvals out of {} reviews",
                sample.approvals, sample.window_reviews
            )));
        }

        let verdict = evaluate(sample.approvals, sample.window_reviews, sample.consecutive);
        let Some(severity) = verdict.severity else {
            debug!(author = %sample.author, reviewer = %sample.reviewer, rate = verdict.rate, "No collusion");
            return Ok(verdict);
        };

        let now = self.clock.now();
        self.repo
            .modify_or_default(scopes::COLLUSION_LOG, |log| -> CoordinationResult<()> {
                log.detections.push(CollusionDetection {
                    author: sample.author.clone(),
                    reviewer: sample.reviewer.clone(),
                    approval_rate: verdict.rate,
                    severity,
                    timestamp: now,
                });
                Ok(())
            })?;

        warn!(
            author = %sample.author,
            reviewer = %sample.reviewer,
            rate = verdict.rate,
            %severity,
            "Possible review collusion"
        );
        notify::send(
            self.notifier.as_ref(),
            now,
            Audience::librarian(),
            Notification::CollusionAlert {
                author: sample.author.clone(),
                reviewer: sample.reviewer.clone(),
                approval_rate: verdict.rate,
                severity,
            },
        );
        Ok(verdict)
    }

    /// Every recorded detection
    pub fn detections(&self) -> CoordinationResult<Vec<CollusionDetection>> {
        Ok(self
            .repo
            .load(scopes::COLLUSION_LOG)?
            .unwrap_or_default()
            .detections)
    }
}
