//! Least-loaded assignment with a deterministic tie-break
//!
//! Each candidate's workload is the priority-weighted sum of its pending
//! items. The minimum wins; equal workloads are broken by ascending agent id,
//! so the same inputs always produce the same assignment.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::level::PriorityLevel;
use super::queue::WorkItem;
use super::workload::Agent;
use crate::error::{CoordinationError, CoordinationResult};

/// Audit entry written for every assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    /// Assigned item
    pub item_id: String,
    /// Item tier at assignment time
    pub priority: PriorityLevel,
    /// Chosen agent
    pub assigned_agent: String,
    /// Chosen agent's workload just before this assignment
    pub workload_before: u32,
    /// When the assignment happened
    pub timestamp: DateTime<Utc>,
}

/// Agent table and assignment audit trail
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerState {
    /// Registered agents keyed (and therefore ordered) by id
    pub agents: BTreeMap<String, Agent>,
    /// Append-only assignment log
    pub audit: Vec<AssignmentRecord>,
}

impl SchedulerState {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an agent's capabilities, keeping its pending items
    pub fn register_agent(&mut self, agent: Agent) -> CoordinationResult<()> {
        if agent.id.trim().is_empty() {
            return Err(CoordinationError::validation("agent id must not be empty"));
        }
        match self.agents.get_mut(&agent.id) {
            Some(existing) => existing.capabilities = agent.capabilities,
            None => {
                self.agents.insert(agent.id.clone(), agent);
            }
        }
        Ok(())
    }

    /// Look up an agent
    pub fn agent(&self, agent_id: &str) -> CoordinationResult<&Agent> {
        self.agents
            .get(agent_id)
            .ok_or_else(|| CoordinationError::AgentNotFound {
                agent_id: agent_id.to_string(),
            })
    }

    /// Current workload of an agent
    pub fn workload(&self, agent_id: &str) -> CoordinationResult<u32> {
        Ok(self.agent(agent_id)?.workload())
    }

    /// Ids of agents advertising `capability`, or every agent when `None`
    pub fn eligible_agents(&self, capability: Option<&str>) -> Vec<String> {
        self.agents
            .values()
            .filter(|agent| capability.map_or(true, |c| agent.has_capability(c)))
            .map(|agent| agent.id.clone())
            .collect()
    }

    /// Pick the least-loaded agent among `eligible`.
    ///
    /// Unknown ids are a validation error; an empty candidate list is
    /// `NoEligibleAgents`.
    pub fn least_loaded(&self, item_id: &str, eligible: &[String]) -> CoordinationResult<(String, u32)> {
        let mut best: Option<(&str, u32)> = None;
        for agent_id in eligible {
            let agent = self.agents.get(agent_id).ok_or_else(|| {
                CoordinationError::validation(format!("unknown agent {}", agent_id))
            })?;
            let load = agent.workload();
            let better = match best {
                None => true,
                Some((best_id, best_load)) => {
                    load < best_load || (load == best_load && agent.id.as_str() < best_id)
                }
            };
            if better {
                best = Some((agent.id.as_str(), load));
            }
        }

        best.map(|(id, load)| (id.to_string(), load))
            .ok_or_else(|| CoordinationError::NoEligibleAgents {
                item_id: item_id.to_string(),
            })
    }

    /// Assign `item` to the least-loaded of `eligible` and record the audit entry
    pub fn assign(
        &mut self,
        mut item: WorkItem,
        eligible: &[String],
        now: DateTime<Utc>,
    ) -> CoordinationResult<AssignmentRecord> {
        let (agent_id, workload_before) = self.least_loaded(&item.id, eligible)?;

        debug!(
            item_id = %item.id,
            candidates = eligible.len(),
            "Selecting least-loaded agent"
        );

        item.assigned_agent = Some(agent_id.clone());
        item.assigned_at = Some(now);
        item.sla_alerted_at = None;

        let record = AssignmentRecord {
            item_id: item.id.clone(),
            priority: item.priority,
            assigned_agent: agent_id.clone(),
            workload_before,
            timestamp: now,
        };

        if let Some(agent) = self.agents.get_mut(&agent_id) {
            agent.pending.push(item);
        }
        self.audit.push(record.clone());

        info!(
            item_id = %record.item_id,
            priority = %record.priority,
            agent = %record.assigned_agent,
            workload_before,
            "Work item assigned"
        );

        Ok(record)
    }

    /// Remove a finished (or displaced) item from an agent's pending list
    pub fn take_item(&mut self, agent_id: &str, item_id: &str) -> CoordinationResult<WorkItem> {
        let agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| CoordinationError::AgentNotFound {
                agent_id: agent_id.to_string(),
            })?;

        let pos = agent
            .pending
            .iter()
            .position(|item| item.id == item_id)
            .ok_or_else(|| CoordinationError::ItemNotFound {
                item_id: item_id.to_string(),
            })?;

        Ok(agent.pending.remove(pos))
    }
}
