//! Priority-weighted workload for agents

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::level::PriorityLevel;
use super::queue::WorkItem;

/// Weighted workload of a list of pending priorities
pub fn workload<I>(pending: I) -> u32
where
    I: IntoIterator<Item = PriorityLevel>,
{
    pending.into_iter().map(PriorityLevel::weight).sum()
}

/// A worker that can receive assignments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Agent identifier (also the deterministic tie-break key)
    pub id: String,
    /// Capabilities/roles this agent can serve
    pub capabilities: BTreeSet<String>,
    /// Items assigned and not yet completed
    pub pending: Vec<WorkItem>,
}

impl Agent {
    /// Idle agent with the given capabilities
    pub fn new<I, S>(id: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            pending: Vec::new(),
        }
    }

    /// Weighted workload of this agent's pending items
    pub fn workload(&self) -> u32 {
        workload(self.pending.iter().map(|item| item.priority))
    }

    /// Whether the agent advertises `capability`
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}
