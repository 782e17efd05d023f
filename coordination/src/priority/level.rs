//! Priority tiers and their fixed weights, SLAs and ordering

use serde::{Deserialize, Serialize};

use crate::error::CoordinationError;

/// Priority tier of a work item or lock request.
///
/// Declaration order is precedence order: `Critical` sorts first, so
/// `Critical < High` under `Ord`. Use [`PriorityLevel::outranks`] when the
/// question is "is this more urgent than that".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriorityLevel {
    /// Production incidents, security breaches, data loss
    Critical,
    /// User-facing bugs, broken features
    High,
    /// Standard features and enhancements
    Medium,
    /// Tech debt, refactoring, nice-to-haves
    Low,
}

impl PriorityLevel {
    /// All tiers in service order
    pub const ALL: [PriorityLevel; 4] = [Self::Critical, Self::High, Self::Medium, Self::Low];

    /// Weight used for workload balancing
    pub fn weight(self) -> u32 {
        match self {
            Self::Critical => 10,
            Self::High => 5,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }

    /// Maximum age in hours before an assigned item is overdue
    pub fn sla_hours(self) -> Option<u32> {
        match self {
            Self::Critical => Some(4),
            Self::High => Some(24),
            Self::Medium | Self::Low => None,
        }
    }

    /// Position in service order (0 = served first)
    pub fn rank(self) -> usize {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    /// Whether `self` is strictly more urgent than `other`
    pub fn outranks(self, other: PriorityLevel) -> bool {
        self.rank() < other.rank()
    }
}

impl std::fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "CRITICAL"),
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

impl std::str::FromStr for PriorityLevel {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(Self::Critical),
            "HIGH" => Ok(Self::High),
            "MEDIUM" => Ok(Self::Medium),
            "LOW" => Ok(Self::Low),
            _ => Err(CoordinationError::MalformedPriority {
                value: s.to_string(),
            }),
        }
    }
}

/// How quickly a human or role should react to an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    High,
    Medium,
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
        }
    }
}

/// A classifier turns free-form input into a priority tier.
///
/// Classifiers live outside the core; the core only consumes their output.
pub trait PriorityClassifier: Send + Sync {
    /// Classify a title/description pair
    fn classify(&self, title: &str, description: &str) -> PriorityLevel;
}

impl<F> PriorityClassifier for F
where
    F: Fn(&str, &str) -> PriorityLevel + Send + Sync,
{
    fn classify(&self, title: &str, description: &str) -> PriorityLevel {
        self(title, description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_and_slas() {
        assert_eq!(PriorityLevel::Critical.weight(), 10);
        assert_eq!(PriorityLevel::High.weight(), 5);
        assert_eq!(PriorityLevel::Medium.weight(), 2);
        assert_eq!(PriorityLevel::Low.weight(), 1);

        assert_eq!(PriorityLevel::Critical.sla_hours(), Some(4));
        assert_eq!(PriorityLevel::High.sla_hours(), Some(24));
        assert_eq!(PriorityLevel::Medium.sla_hours(), None);
        assert_eq!(PriorityLevel::Low.sla_hours(), None);
    }

    #[test]
    fn test_total_order() {
        let mut tiers = vec![
            PriorityLevel::Low,
            PriorityLevel::Critical,
            PriorityLevel::Medium,
            PriorityLevel::High,
        ];
        tiers.sort();
        assert_eq!(tiers, PriorityLevel::ALL.to_vec());
        assert!(PriorityLevel::Critical.outranks(PriorityLevel::High));
        assert!(!PriorityLevel::Low.outranks(PriorityLevel::Low));
    }

    #[test]
    fn test_parse() {
        assert_eq!("critical".parse::<PriorityLevel>().unwrap(), PriorityLevel::Critical);
        assert_eq!(" LOW ".parse::<PriorityLevel>().unwrap(), PriorityLevel::Low);
        let err = "urgent".parse::<PriorityLevel>().unwrap_err();
        assert_eq!(err.code(), "MALFORMED_PRIORITY");
    }

    #[test]
    fn test_closure_classifier() {
        let classifier = |title: &str, _: &str| {
            if title.contains("outage") {
                PriorityLevel::Critical
            } else {
                PriorityLevel::Medium
            }
        };
        assert_eq!(
            classifier.classify("production outage", ""),
            PriorityLevel::Critical
        );
    }
}
