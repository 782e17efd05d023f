//! SLA evaluation for assigned work items

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::level::{PriorityLevel, Urgency};
use super::queue::WorkItem;

/// Result of an SLA check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaStatus {
    /// Whether the item is past its SLA
    pub violated: bool,
    /// SLA for the item's tier, if any
    pub sla_hours: Option<u32>,
    /// Hours since assignment, when the item is assigned and has an SLA
    pub age_hours: Option<f64>,
    /// Alert urgency, present only for tiers that carry an SLA
    pub urgency: Option<Urgency>,
}

fn sla_urgency(priority: PriorityLevel) -> Option<Urgency> {
    match priority {
        PriorityLevel::Critical => Some(Urgency::High),
        PriorityLevel::High => Some(Urgency::Medium),
        PriorityLevel::Medium | PriorityLevel::Low => None,
    }
}

/// Evaluate whether `item` has outlived its tier's SLA at `now`.
///
/// MEDIUM and LOW never violate. Unassigned items have no age and never
/// violate either.
pub fn check_violation(item: &WorkItem, now: DateTime<Utc>) -> SlaStatus {
    let Some(sla_hours) = item.priority.sla_hours() else {
        return SlaStatus {
            violated: false,
            sla_hours: None,
            age_hours: None,
            urgency: None,
        };
    };

    let urgency = sla_urgency(item.priority);
    let Some(assigned_at) = item.assigned_at else {
        return SlaStatus {
            violated: false,
            sla_hours: Some(sla_hours),
            age_hours: None,
            urgency,
        };
    };

    let age_hours = (now - assigned_at).num_milliseconds() as f64 / 3_600_000.0;

    SlaStatus {
        violated: age_hours > f64::from(sla_hours),
        sla_hours: Some(sla_hours),
        age_hours: Some(age_hours),
        urgency,
    }
}
