//! Four-tier FIFO priority queue for work items
//!
//! Queue ordering:
//! 1. CRITICAL (immediate)
//! 2. HIGH (same day)
//! 3. MEDIUM (next sprint)
//! 4. LOW (backlog)
//!
//! Within a tier items are served in insertion order, except that an item
//! re-queued after preemption goes to the head of its own tier.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::level::PriorityLevel;

/// A unit of work awaiting or undergoing assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique identifier
    pub id: String,
    /// Priority tier assigned by a classifier
    pub priority: PriorityLevel,
    /// Free-form description
    pub description: String,
    /// Role an agent must advertise to take this item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_capability: Option<String>,
    /// Agent currently responsible, once assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
    /// When the current assignment was made
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<DateTime<Utc>>,
    /// When the orchestrator was told this assignment is past its SLA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_alerted_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    /// Unassigned item with a generated id
    pub fn new(description: impl Into<String>, priority: PriorityLevel) -> Self {
        let id = format!("item-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        Self::with_id(id, description, priority)
    }

    /// Unassigned item with an explicit id
    pub fn with_id(
        id: impl Into<String>,
        description: impl Into<String>,
        priority: PriorityLevel,
    ) -> Self {
        Self {
            id: id.into(),
            priority,
            description: description.into(),
            required_capability: None,
            assigned_agent: None,
            assigned_at: None,
            sla_alerted_at: None,
        }
    }

    /// Restrict assignment to agents with `capability`
    pub fn requiring(mut self, capability: impl Into<String>) -> Self {
        self.required_capability = Some(capability.into());
        self
    }

    /// Whether an agent currently owns this item
    pub fn is_assigned(&self) -> bool {
        self.assigned_agent.is_some()
    }

    /// Drop assignment state so the item can be queued again
    pub fn unassign(&mut self) {
        self.assigned_agent = None;
        self.assigned_at = None;
        self.sla_alerted_at = None;
    }
}

/// Priority queue made of one FIFO per tier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityQueue {
    tiers: [VecDeque<WorkItem>; 4],
}

impl PriorityQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item to the tail of its tier
    pub fn add_item(&mut self, item: WorkItem) {
        self.tiers[item.priority.rank()].push_back(item);
    }

    /// Pop the head of the most urgent non-empty tier
    pub fn next_item(&mut self) -> Option<WorkItem> {
        self.tiers.iter_mut().find_map(VecDeque::pop_front)
    }

    /// Look at the item `next_item` would return
    pub fn peek(&self) -> Option<&WorkItem> {
        self.tiers.iter().find_map(VecDeque::front)
    }

    /// Re-insert a preempted or preempting item at the head of its own tier
    pub fn requeue_on_preemption(&mut self, item: WorkItem) {
        self.tiers[item.priority.rank()].push_front(item);
    }

    /// Remove an item by id from whichever tier holds it
    pub fn remove(&mut self, item_id: &str) -> Option<WorkItem> {
        for tier in self.tiers.iter_mut() {
            if let Some(pos) = tier.iter().position(|item| item.id == item_id) {
                return tier.remove(pos);
            }
        }
        None
    }

    /// Total pending items
    pub fn depth(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    /// Whether every tier is empty
    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// Pending count per tier
    pub fn breakdown(&self) -> BTreeMap<PriorityLevel, usize> {
        PriorityLevel::ALL
            .iter()
            .map(|level| (*level, self.tiers[level.rank()].len()))
            .collect()
    }

    /// Items in service order
    pub fn iter(&self) -> impl Iterator<Item = &WorkItem> {
        self.tiers.iter().flat_map(|tier| tier.iter())
    }
}
