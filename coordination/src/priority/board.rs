//! Task board: the persisted priority queue plus the assignment scheduler
//!
//! Every operation is one atomic update of its resource. The queue and the
//! scheduler table are separate scopes; operations that need both update
//! the queue first and the scheduler inside it, always in that order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::level::PriorityLevel;
use super::preemption::{may_preempt, PreemptionDecision};
use super::queue::{PriorityQueue, WorkItem};
use super::scheduler::{AssignmentRecord, SchedulerState};
use super::sla::{check_violation, SlaStatus};
use super::workload::Agent;
use crate::clock::SharedClock;
use crate::error::{CoordinationError, CoordinationResult};
use crate::notify::{self, Audience, Notification, SharedNotifier};
use crate::store::schema::scopes;
use crate::store::SharedRepository;

/// Snapshot of queue depth per tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    /// Total pending items
    pub depth: usize,
    /// Pending items per tier
    pub breakdown: std::collections::BTreeMap<PriorityLevel, usize>,
}

/// Result of a task preemption attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPreemption {
    /// Policy decision
    pub decision: PreemptionDecision,
    /// Assignment of the incoming item, when preemption happened
    pub assignment: Option<AssignmentRecord>,
    /// Item pushed back to the head of its tier, when preemption happened
    pub displaced: Option<WorkItem>,
}

/// An assigned item that is past its SLA
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaViolation {
    /// The overdue item
    pub item: WorkItem,
    /// Evaluation details
    pub status: SlaStatus,
    /// Whether this check raised the alert (later checks stay quiet)
    pub newly_alerted: bool,
}

/// Persisted queue + scheduler with atomic operations
pub struct TaskBoard {
    queue_repo: SharedRepository<PriorityQueue>,
    scheduler_repo: SharedRepository<SchedulerState>,
    notifier: SharedNotifier,
    clock: SharedClock,
}

impl TaskBoard {
    /// Create a board over the given repositories
    pub fn new(
        queue_repo: SharedRepository<PriorityQueue>,
        scheduler_repo: SharedRepository<SchedulerState>,
        notifier: SharedNotifier,
        clock: SharedClock,
    ) -> Self {
        Self {
            queue_repo,
            scheduler_repo,
            notifier,
            clock,
        }
    }

    fn with_queue<R>(
        &self,
        f: impl FnOnce(&mut PriorityQueue) -> CoordinationResult<R>,
    ) -> CoordinationResult<R> {
        self.queue_repo.modify_or_default(scopes::DEFAULT_QUEUE, f)
    }

    fn with_scheduler<R>(
        &self,
        f: impl FnOnce(&mut SchedulerState) -> CoordinationResult<R>,
    ) -> CoordinationResult<R> {
        self.scheduler_repo.modify_or_default(scopes::DEFAULT_SCHEDULER, f)
    }

    fn load_queue(&self) -> CoordinationResult<PriorityQueue> {
        Ok(self
            .queue_repo
            .load(scopes::DEFAULT_QUEUE)?
            .unwrap_or_default())
    }

    fn load_scheduler(&self) -> CoordinationResult<SchedulerState> {
        Ok(self
            .scheduler_repo
            .load(scopes::DEFAULT_SCHEDULER)?
            .unwrap_or_default())
    }

    // =========================================================================
    // Queue operations
    // =========================================================================

    /// Append an item to the tail of its tier; returns the new queue depth
    pub fn add_item(&self, item: WorkItem) -> CoordinationResult<usize> {
        self.with_queue(|queue| {
            debug!(item_id = %item.id, priority = %item.priority, "Queueing work item");
            queue.add_item(item);
            Ok(queue.depth())
        })
    }

    /// Insert an item at the head of its own tier (preemptive admission)
    pub fn requeue_on_preemption(&self, item: WorkItem) -> CoordinationResult<usize> {
        self.with_queue(|queue| {
            info!(item_id = %item.id, priority = %item.priority, "Requeueing at head of tier");
            queue.requeue_on_preemption(item);
            Ok(queue.depth())
        })
    }

    /// Pop the next item in service order
    pub fn next_item(&self) -> CoordinationResult<Option<WorkItem>> {
        self.with_queue(|queue| Ok(queue.next_item()))
    }

    /// Remove a queued item by id
    pub fn cancel_item(&self, item_id: &str) -> CoordinationResult<WorkItem> {
        self.with_queue(|queue| {
            queue
                .remove(item_id)
                .ok_or_else(|| CoordinationError::ItemNotFound {
                    item_id: item_id.to_string(),
                })
        })
    }

    /// Queue depth and per-tier breakdown
    pub fn summary(&self) -> CoordinationResult<QueueSummary> {
        let queue = self.load_queue()?;
        Ok(QueueSummary {
            depth: queue.depth(),
            breakdown: queue.breakdown(),
        })
    }

    /// Queued items in service order
    pub fn queued_items(&self) -> CoordinationResult<Vec<WorkItem>> {
        Ok(self.load_queue()?.iter().cloned().collect())
    }

    // =========================================================================
    // Scheduler operations
    // =========================================================================

    /// Register (or update capabilities of) an agent
    pub fn register_agent(&self, agent: Agent) -> CoordinationResult<()> {
        self.with_scheduler(|state| {
            info!(agent = %agent.id, capabilities = ?agent.capabilities, "Registering agent");
            state.register_agent(agent)
        })
    }

    /// Snapshot of one agent
    pub fn agent(&self, agent_id: &str) -> CoordinationResult<Agent> {
        Ok(self.load_scheduler()?.agent(agent_id)?.clone())
    }

    /// Every registered agent in id order
    pub fn agents(&self) -> CoordinationResult<Vec<Agent>> {
        Ok(self.load_scheduler()?.agents.into_values().collect())
    }

    /// Weighted workload of an agent
    pub fn workload(&self, agent_id: &str) -> CoordinationResult<u32> {
        self.load_scheduler()?.workload(agent_id)
    }

    /// Assign `item` to the least-loaded of `eligible`
    pub fn assign(&self, item: WorkItem, eligible: &[String]) -> CoordinationResult<AssignmentRecord> {
        let now = self.clock.now();
        self.with_scheduler(|state| state.assign(item, eligible, now))
    }

    /// Pop the next queued item and assign it to the least-loaded capable agent.
    ///
    /// When nobody can take it the queue is left as it was and
    /// `NoEligibleAgents` is returned. An empty queue yields `Ok(None)`.
    pub fn dispatch_next(&self) -> CoordinationResult<Option<AssignmentRecord>> {
        let now = self.clock.now();
        self.with_queue(|queue| {
            let Some(item) = queue.next_item() else {
                return Ok(None);
            };

            self.with_scheduler(|state| {
                let eligible = state.eligible_agents(item.required_capability.as_deref());
                if eligible.is_empty() {
                    warn!(item_id = %item.id, capability = ?item.required_capability, "No eligible agent");
                    return Err(CoordinationError::NoEligibleAgents { item_id: item.id });
                }
                state.assign(item, &eligible, now).map(Some)
            })
        })
    }

    /// Mark an item finished and drop it from the agent's workload
    pub fn complete(&self, agent_id: &str, item_id: &str) -> CoordinationResult<WorkItem> {
        let item = self.with_scheduler(|state| state.take_item(agent_id, item_id))?;
        info!(agent = agent_id, item_id, "Work item completed");
        Ok(item)
    }

    /// Try to displace `current_item_id` on `agent_id` with `incoming`.
    ///
    /// When the policy allows it, the incoming item is assigned to the agent,
    /// the displaced item is cleared of its assignment and put at the head of
    /// its own tier, and the agent is told how long it has to wrap up. When the
    /// policy refuses, nothing changes and the caller should queue `incoming`.
    pub fn preempt(
        &self,
        agent_id: &str,
        current_item_id: &str,
        incoming: WorkItem,
    ) -> CoordinationResult<TaskPreemption> {
        let now = self.clock.now();
        let incoming_id = incoming.id.clone();

        let outcome = self.with_queue(|queue| {
            self.with_scheduler(|state| {
                let current = state
                    .agent(agent_id)?
                    .pending
                    .iter()
                    .find(|item| item.id == current_item_id)
                    .cloned()
                    .ok_or_else(|| CoordinationError::ItemNotFound {
                        item_id: current_item_id.to_string(),
                    })?;

                let decision = may_preempt(incoming.priority, current.priority);
                if !decision.allowed {
                    debug!(
                        incoming = %incoming.priority,
                        current = %current.priority,
                        "Preemption not allowed"
                    );
                    return Ok(TaskPreemption {
                        decision,
                        assignment: None,
                        displaced: None,
                    });
                }

                let mut displaced = state.take_item(agent_id, current_item_id)?;
                displaced.unassign();
                let assignment = state.assign(incoming, &[agent_id.to_string()], now)?;
                queue.requeue_on_preemption(displaced.clone());

                Ok(TaskPreemption {
                    decision,
                    assignment: Some(assignment),
                    displaced: Some(displaced),
                })
            })
        })?;

        if let Some(displaced) = &outcome.displaced {
            info!(
                agent = agent_id,
                displaced = %displaced.id,
                incoming = %incoming_id,
                grace_minutes = outcome.decision.grace_minutes,
                "Task preempted"
            );
            notify::send(
                self.notifier.as_ref(),
                now,
                Audience::Agent(agent_id.to_string()),
                Notification::TaskPreemption {
                    agent: agent_id.to_string(),
                    displaced_item: displaced.id.clone(),
                    incoming_item: incoming_id,
                    grace_minutes: outcome.decision.grace_minutes,
                },
            );
        }
        Ok(outcome)
    }

    /// Assignment audit trail
    pub fn audit(&self) -> CoordinationResult<Vec<AssignmentRecord>> {
        Ok(self.load_scheduler()?.audit)
    }

    // =========================================================================
    // SLA
    // =========================================================================

    /// Every assigned item past its SLA at `now`.
    ///
    /// The orchestrator is alerted once per assignment: the first check that
    /// finds an item overdue marks it, and later checks report it without a
    /// new alert.
    pub fn sla_violations(&self, now: DateTime<Utc>) -> CoordinationResult<Vec<SlaViolation>> {
        let violations = self.with_scheduler(|state| {
            let mut violations = Vec::new();
            for agent in state.agents.values_mut() {
                for item in agent.pending.iter_mut() {
                    let status = check_violation(item, now);
                    if !status.violated {
                        continue;
                    }
                    let newly_alerted = item.sla_alerted_at.is_none();
                    if newly_alerted {
                        item.sla_alerted_at = Some(now);
                    }
                    violations.push(SlaViolation {
                        item: item.clone(),
                        status,
                        newly_alerted,
                    });
                }
            }
            Ok(violations)
        })?;

        for violation in violations.iter().filter(|v| v.newly_alerted) {
            let (Some(sla_hours), Some(age_hours), Some(urgency)) = (
                violation.status.sla_hours,
                violation.status.age_hours,
                violation.status.urgency,
            ) else {
                continue;
            };
            warn!(
                item_id = %violation.item.id,
                priority = %violation.item.priority,
                age_hours,
                sla_hours,
                "SLA violated"
            );
            notify::send(
                self.notifier.as_ref(),
                now,
                Audience::Orchestrator,
                Notification::SlaViolation {
                    item_id: violation.item.id.clone(),
                    priority: violation.item.priority,
                    assigned_agent: violation.item.assigned_agent.clone(),
                    age_hours,
                    sla_hours,
                    urgency,
                },
            );
        }

        Ok(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::notify::MemoryNotifier;
    use crate::store::MemoryRepository;
    use chrono::Duration;
    use std::sync::Arc;

    fn board() -> (TaskBoard, Arc<MemoryNotifier>, Arc<ManualClock>) {
        let notifier = MemoryNotifier::new().shared();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let board = TaskBoard::new(
            MemoryRepository::shared(),
            MemoryRepository::shared(),
            notifier.clone(),
            clock.clone(),
        );
        (board, notifier, clock)
    }

    #[test]
    fn test_dispatch_respects_priority_and_capability() {
        let (board, _, _) = board();
        board.register_agent(Agent::new("dev-a", ["Developer"])).unwrap();
        board.register_agent(Agent::new("qa-a", ["QA"])).unwrap();

        board
            .add_item(WorkItem::with_id("low", "docs", PriorityLevel::Low).requiring("Developer"))
            .unwrap();
        board
            .add_item(WorkItem::with_id("crit", "outage", PriorityLevel::Critical).requiring("QA"))
            .unwrap();

        let first = board.dispatch_next().unwrap().unwrap();
        assert_eq!(first.item_id, "crit");
        assert_eq!(first.assigned_agent, "qa-a");

        let second = board.dispatch_next().unwrap().unwrap();
        assert_eq!(second.assigned_agent, "dev-a");
        assert!(board.dispatch_next().unwrap().is_none());
    }

    #[test]
    fn test_dispatch_without_agent_keeps_item_queued() {
        let (board, _, _) = board();
        board
            .add_item(WorkItem::with_id("x", "feature", PriorityLevel::High).requiring("Architect"))
            .unwrap();
        let err = board.dispatch_next().unwrap_err();
        assert_eq!(err.code(), "NO_ELIGIBLE_AGENTS");
        assert_eq!(board.summary().unwrap().depth, 1);
    }

    #[test]
    fn test_preempt_requeues_displaced_item_at_head() {
        let (board, notifier, _) = board();
        board.register_agent(Agent::new("dev-a", ["Developer"])).unwrap();
        board
            .assign(
                WorkItem::with_id("refactor", "cleanup", PriorityLevel::Low),
                &["dev-a".to_string()],
            )
            .unwrap();
        board
            .add_item(WorkItem::with_id("other-low", "docs", PriorityLevel::Low))
            .unwrap();

        let outcome = board
            .preempt(
                "dev-a",
                "refactor",
                WorkItem::with_id("incident", "prod down", PriorityLevel::Critical),
            )
            .unwrap();

        assert!(outcome.decision.allowed);
        assert_eq!(outcome.decision.grace_minutes, 15);
        assert_eq!(board.workload("dev-a").unwrap(), 10);

        let queued: Vec<String> = board
            .queued_items()
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(queued, vec!["refactor", "other-low"]);
        assert!(board.queued_items().unwrap()[0].assigned_agent.is_none());
        assert_eq!(
            notifier
                .sent_to(&Audience::Agent("dev-a".into()))
                .len(),
            1
        );
    }

    #[test]
    fn test_preempt_denied_changes_nothing() {
        let (board, notifier, _) = board();
        board.register_agent(Agent::new("dev-a", ["Developer"])).unwrap();
        board
            .assign(
                WorkItem::with_id("feature", "feature", PriorityLevel::Medium),
                &["dev-a".to_string()],
            )
            .unwrap();

        let outcome = board
            .preempt(
                "dev-a",
                "feature",
                WorkItem::with_id("bug", "broken", PriorityLevel::High),
            )
            .unwrap();
        assert!(!outcome.decision.allowed);
        assert!(outcome.assignment.is_none());
        assert_eq!(board.workload("dev-a").unwrap(), 2);
        assert!(notifier.sent().is_empty());
    }

    #[test]
    fn test_sla_violations_alert_orchestrator() {
        let (board, notifier, clock) = board();
        board.register_agent(Agent::new("dev-a", ["Developer"])).unwrap();
        board
            .assign(
                WorkItem::with_id("incident", "prod down", PriorityLevel::Critical),
                &["dev-a".to_string()],
            )
            .unwrap();
        board
            .assign(
                WorkItem::with_id("feature", "feature", PriorityLevel::Medium),
                &["dev-a".to_string()],
            )
            .unwrap();

        clock.advance(Duration::hours(3));
        assert!(board.sla_violations(clock.now()).unwrap().is_empty());

        clock.advance(Duration::hours(2));
        let violations = board.sla_violations(clock.now()).unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].item.id, "incident");
        assert!(violations[0].newly_alerted);
        assert_eq!(notifier.sent_to(&Audience::Orchestrator).len(), 1);
    }

    #[test]
    fn test_sla_alert_raised_once_per_assignment() {
        let (board, notifier, clock) = board();
        board.register_agent(Agent::new("dev-a", ["Developer"])).unwrap();
        board
            .assign(
                WorkItem::with_id("incident", "prod down", PriorityLevel::Critical),
                &["dev-a".to_string()],
            )
            .unwrap();

        clock.advance(Duration::hours(5));
        let alerted_at = clock.now();
        board.sla_violations(alerted_at).unwrap();

        for _ in 0..3 {
            clock.advance(Duration::minutes(1));
            let again = board.sla_violations(clock.now()).unwrap();
            assert_eq!(again.len(), 1);
            assert!(!again[0].newly_alerted);
            assert_eq!(again[0].item.sla_alerted_at, Some(alerted_at));
        }

        let alerts = notifier.sent_to(&Audience::Orchestrator);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].timestamp, alerted_at);
    }

    #[test]
    fn test_complete_and_cancel() {
        let (board, _, _) = board();
        board.register_agent(Agent::new("dev-a", ["Developer"])).unwrap();
        board
            .assign(
                WorkItem::with_id("bug", "broken", PriorityLevel::High),
                &["dev-a".to_string()],
            )
            .unwrap();
        board.complete("dev-a", "bug").unwrap();
        assert_eq!(board.workload("dev-a").unwrap(), 0);
        assert_eq!(board.audit().unwrap().len(), 1);

        board
            .add_item(WorkItem::with_id("q", "queued", PriorityLevel::Low))
            .unwrap();
        board.cancel_item("q").unwrap();
        assert_eq!(board.cancel_item("q").unwrap_err().code(), "ITEM_NOT_FOUND");
    }
}
