//! Exclusive write-lock arbiter
//!
//! One holder at a time. Waiters queue by priority (FIFO within a tier). A
//! sufficiently urgent requester may preempt the holder: the holder is told
//! and given a grace window, after which it is pushed back into the queue at
//! its own priority and the preemptor takes over. If the holder releases
//! during the window, the preemptor takes over immediately.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::state::{LockEventKind, LockHolder, LockRequest, LockState, PendingPreemption};
use crate::clock::SharedClock;
use crate::error::{CoordinationError, CoordinationResult};
use crate::notify::{self, Audience, Notification, SharedNotifier};
use crate::priority::{may_preempt, PriorityLevel};
use crate::store::schema::scopes;
use crate::store::SharedRepository;

/// Answer to a lock request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockGrant {
    Granted,
    Queued { position: usize },
}

/// Answer to a preemption request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreemptionOutcome {
    /// Handoff will happen at `handoff_at` (or on release, if sooner)
    Scheduled {
        holder: String,
        grace_minutes: u32,
        handoff_at: DateTime<Utc>,
    },
    /// Not preempting; the caller should queue normally
    Denied { reason: String },
}

/// What a caller wants from the lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSpec {
    pub requester: String,
    pub resources: BTreeSet<String>,
    pub priority: PriorityLevel,
    pub estimated_duration_minutes: u32,
}

impl LockSpec {
    pub fn new<I, S>(
        requester: impl Into<String>,
        resources: I,
        priority: PriorityLevel,
        estimated_duration_minutes: u32,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            requester: requester.into(),
            resources: resources.into_iter().map(Into::into).collect(),
            priority,
            estimated_duration_minutes,
        }
    }

    fn into_request(self, now: DateTime<Utc>) -> LockRequest {
        LockRequest {
            requester: self.requester,
            resources: self.resources,
            priority: self.priority,
            estimated_duration_minutes: self.estimated_duration_minutes,
            enqueued_at: now,
        }
    }
}

/// Persisted lock arbiter
pub struct LockArbiter {
    repo: SharedRepository<LockState>,
    notifier: SharedNotifier,
    clock: SharedClock,
}

impl LockArbiter {
    pub fn new(repo: SharedRepository<LockState>, notifier: SharedNotifier, clock: SharedClock) -> Self {
        Self {
            repo,
            notifier,
            clock,
        }
    }

    /// One atomic load-modify-save of the lock state
    fn with_state<R>(&self, f: impl FnOnce(&mut LockState) -> CoordinationResult<R>) -> CoordinationResult<R> {
        self.repo.modify_or_default(scopes::WRITE_LOCK, f)
    }

    fn validate(spec: &LockSpec, state: &LockState) -> CoordinationResult<()> {
        if spec.requester.trim().is_empty() {
            return Err(CoordinationError::validation("requester must not be empty"));
        }
        if spec.resources.is_empty() {
            return Err(CoordinationError::EmptyResourceSet {
                requester: spec.requester.clone(),
            });
        }
        if state.involves(&spec.requester) {
            return Err(CoordinationError::conflict(format!(
                "{} already holds or awaits the lock",
                spec.requester
            )));
        }
        Ok(())
    }

    /// Grant the lock if it is free, otherwise queue by priority
    pub fn request(&self, spec: LockSpec) -> CoordinationResult<LockGrant> {
        let now = self.clock.now();
        self.with_state(|state| {
            Self::validate(&spec, state)?;
            let request = spec.into_request(now);

            if state.holder.is_none() {
                info!(
                    requester = %request.requester,
                    priority = %request.priority,
                    resources = request.resources.len(),
                    "Write lock granted"
                );
                state.grant(request, now);
                return Ok(LockGrant::Granted);
            }

            let position = state.enqueue(request.clone());
            state.record(LockEventKind::Queued, &request, Some(position), now);
            info!(
                requester = %request.requester,
                priority = %request.priority,
                position,
                "Write lock busy, request queued"
            );
            Ok(LockGrant::Queued { position })
        })
    }

    /// Release the lock held by `requester`; returns the next holder, if any
    pub fn release(&self, requester: &str) -> CoordinationResult<Option<LockHolder>> {
        let now = self.clock.now();
        self.with_state(|state| {
            let holder = match &state.holder {
                Some(h) if h.requester() == requester => h.request.clone(),
                other => {
                    return Err(CoordinationError::NotLockHolder {
                        requester: requester.to_string(),
                        holder: other.as_ref().map(|h| h.requester().to_string()),
                    })
                }
            };

            state.holder = None;
            state.record(LockEventKind::Released, &holder, None, now);
            info!(requester, "Write lock released");

            let next = match state.pending_preemption.take() {
                Some(pending) => {
                    debug!(preemptor = %pending.request.requester, "Release inside grace window");
                    Some(pending.request)
                }
                None if state.queue.is_empty() => None,
                None => Some(state.queue.remove(0)),
            };

            Ok(next.map(|request| {
                info!(
                    requester = %request.requester,
                    priority = %request.priority,
                    "Write lock handed over"
                );
                state.grant(request, now).clone()
            }))
        })
    }

    /// Ask to displace the current holder.
    ///
    /// Refusals are not errors: a free lock, an already pending preemption or
    /// a priority pair outside the preemption matrix all come back as
    /// [`PreemptionOutcome::Denied`] and the caller should use [`request`].
    ///
    /// [`request`]: LockArbiter::request
    pub fn request_preemption(&self, spec: LockSpec) -> CoordinationResult<PreemptionOutcome> {
        let now = self.clock.now();
        let mut notice = None;

        let outcome = self.with_state(|state| {
            Self::validate(&spec, state)?;

            let Some(holder) = &state.holder else {
                return Ok(PreemptionOutcome::Denied {
                    reason: "lock is free".to_string(),
                });
            };
            if let Some(pending) = &state.pending_preemption {
                return Ok(PreemptionOutcome::Denied {
                    reason: format!(
                        "preemption by {} already pending",
                        pending.request.requester
                    ),
                });
            }

            let decision = may_preempt(spec.priority, holder.priority());
            if !decision.allowed {
                debug!(
                    requester = %spec.requester,
                    requesting = %spec.priority,
                    current = %holder.priority(),
                    "Lock preemption not allowed"
                );
                return Ok(PreemptionOutcome::Denied {
                    reason: format!(
                        "{} may not preempt {}",
                        spec.priority,
                        holder.priority()
                    ),
                });
            }

            let holder_id = holder.requester().to_string();
            let handoff_at = now + decision.grace();
            let request = spec.into_request(now);
            state.record(LockEventKind::PreemptionScheduled, &request, None, now);

            warn!(
                holder = %holder_id,
                preemptor = %request.requester,
                priority = %request.priority,
                grace_minutes = decision.grace_minutes,
                "Write lock preemption scheduled"
            );
            notice = Some(Notification::LockPreemption {
                holder: holder_id.clone(),
                preempted_by: request.requester.clone(),
                priority: request.priority,
                grace_minutes: decision.grace_minutes,
                handoff_at,
            });
            state.pending_preemption = Some(PendingPreemption {
                request,
                preempting: holder_id.clone(),
                grace_minutes: decision.grace_minutes,
                handoff_at,
            });

            Ok(PreemptionOutcome::Scheduled {
                holder: holder_id,
                grace_minutes: decision.grace_minutes,
                handoff_at,
            })
        })?;

        if let (Some(notification), PreemptionOutcome::Scheduled { holder, .. }) = (notice, &outcome) {
            notify::send(
                self.notifier.as_ref(),
                now,
                Audience::Agent(holder.clone()),
                notification,
            );
        }
        Ok(outcome)
    }

    /// Hand the lock to a pending preemptor once its grace window has passed.
    ///
    /// The displaced holder goes back into the queue at its own priority.
    /// Returns the new holder, or `None` if nothing was due.
    pub fn complete_preemption(&self, now: DateTime<Utc>) -> CoordinationResult<Option<LockHolder>> {
        self.with_state(|state| {
            let due = state
                .pending_preemption
                .as_ref()
                .is_some_and(|p| p.handoff_at <= now);
            if !due {
                return Ok(None);
            }
            let Some(pending) = state.pending_preemption.take() else {
                return Ok(None);
            };

            if let Some(displaced) = state.holder.take() {
                let mut request = displaced.request;
                request.enqueued_at = now;
                let position = state.enqueue(request.clone());
                state.record(LockEventKind::Demoted, &request, Some(position), now);
                warn!(
                    holder = %request.requester,
                    position,
                    "Write lock holder preempted and requeued"
                );
            }

            info!(
                requester = %pending.request.requester,
                priority = %pending.request.priority,
                "Write lock granted to preemptor"
            );
            Ok(Some(state.grant(pending.request, now).clone()))
        })
    }

    /// Cancel a queued (or pending preemption) request
    pub fn withdraw(&self, requester: &str) -> CoordinationResult<LockRequest> {
        let now = self.clock.now();
        self.with_state(|state| {
            let withdrawn = if let Some(pos) = state.queue.iter().position(|r| r.requester == requester) {
                state.queue.remove(pos)
            } else {
                match state.pending_preemption.take() {
                    Some(pending) if pending.request.requester == requester => pending.request,
                    other => {
                        state.pending_preemption = other;
                        return Err(CoordinationError::LockRequestNotFound {
                            requester: requester.to_string(),
                        });
                    }
                }
            };

            state.record(LockEventKind::Withdrawn, &withdrawn, None, now);
            info!(requester, "Write lock request withdrawn");
            Ok(withdrawn)
        })
    }

    /// Snapshot of holder, queue, pending preemption and history
    pub fn status(&self) -> CoordinationResult<LockState> {
        Ok(self.repo.load(scopes::WRITE_LOCK)?.unwrap_or_default())
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

    fn arbiter() -> (LockArbiter, Arc<MemoryNotifier>, Arc<ManualClock>) {
        let notifier = MemoryNotifier::new().shared();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let arbiter = LockArbiter::new(MemoryRepository::shared(), notifier.clone(), clock.clone());
        (arbiter, notifier, clock)
    }

    fn spec(name: &str, priority: PriorityLevel) -> LockSpec {
        LockSpec::new(name, ["src/main.rs"], priority, 20)
    }

    #[test]
    fn test_idle_lock_granted_immediately() {
        let (arbiter, _, _) = arbiter();
        assert_eq!(
            arbiter.request(spec("dev-a", PriorityLevel::Low)).unwrap(),
            LockGrant::Granted
        );
        let status = arbiter.status().unwrap();
        assert_eq!(status.holder.unwrap().requester(), "dev-a");
        assert_eq!(status.history[0].kind, LockEventKind::Granted);
    }

    #[test]
    fn test_queue_orders_by_priority_then_release_order() {
        let (arbiter, _, _) = arbiter();
        arbiter.request(spec("holder", PriorityLevel::Medium)).unwrap();
        assert_eq!(
            arbiter.request(spec("low", PriorityLevel::Low)).unwrap(),
            LockGrant::Queued { position: 0 }
        );
        assert_eq!(
            arbiter.request(spec("med", PriorityLevel::Medium)).unwrap(),
            LockGrant::Queued { position: 0 }
        );
        assert_eq!(
            arbiter.request(spec("high", PriorityLevel::High)).unwrap(),
            LockGrant::Queued { position: 0 }
        );

        let mut order = Vec::new();
        let mut current = "holder".to_string();
        while let Some(next) = arbiter.release(&current).unwrap() {
            current = next.requester().to_string();
            order.push(current.clone());
        }
        assert_eq!(order, vec!["high", "med", "low"]);
        assert!(arbiter.status().unwrap().holder.is_none());
    }

    #[test]
    fn test_empty_resources_rejected() {
        let (arbiter, _, _) = arbiter();
        let err = arbiter
            .request(LockSpec::new("dev-a", Vec::<String>::new(), PriorityLevel::High, 5))
            .unwrap_err();
        assert_eq!(err.code(), "EMPTY_RESOURCE_SET");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_release_by_non_holder_is_conflict() {
        let (arbiter, _, _) = arbiter();
        arbiter.request(spec("dev-a", PriorityLevel::Low)).unwrap();
        let err = arbiter.release("dev-b").unwrap_err();
        assert_eq!(err.code(), "NOT_LOCK_HOLDER");
        assert_eq!(
            arbiter.status().unwrap().holder.unwrap().requester(),
            "dev-a"
        );
    }

    #[test]
    fn test_duplicate_request_is_conflict() {
        let (arbiter, _, _) = arbiter();
        arbiter.request(spec("dev-a", PriorityLevel::Low)).unwrap();
        assert_eq!(
            arbiter
                .request(spec("dev-a", PriorityLevel::High))
                .unwrap_err()
                .code(),
            "STATE_CONFLICT"
        );
    }

    #[test]
    fn test_preemption_hands_off_after_grace() {
        let (arbiter, notifier, clock) = arbiter();
        arbiter.request(spec("refactorer", PriorityLevel::Low)).unwrap();
        arbiter.request(spec("waiter", PriorityLevel::Low)).unwrap();

        let outcome = arbiter
            .request_preemption(spec("oncall", PriorityLevel::Critical))
            .unwrap();
        let PreemptionOutcome::Scheduled { holder, grace_minutes, .. } = outcome else {
            panic!("expected scheduled preemption");
        };
        assert_eq!(holder, "refactorer");
        assert_eq!(grace_minutes, 15);
        assert_eq!(
            notifier
                .sent_to(&Audience::Agent("refactorer".into()))
                .len(),
            1
        );

        clock.advance(Duration::minutes(10));
        assert!(arbiter.complete_preemption(clock.now()).unwrap().is_none());

        clock.advance(Duration::minutes(5));
        let new_holder = arbiter.complete_preemption(clock.now()).unwrap().unwrap();
        assert_eq!(new_holder.requester(), "oncall");

        let status = arbiter.status().unwrap();
        let queued: Vec<&str> = status.queue.iter().map(|r| r.requester.as_str()).collect();
        assert_eq!(queued, vec!["waiter", "refactorer"]);
        assert!(status.pending_preemption.is_none());
    }

    #[test]
    fn test_release_during_grace_goes_to_preemptor() {
        let (arbiter, _, _) = arbiter();
        arbiter.request(spec("holder", PriorityLevel::Low)).unwrap();
        arbiter.request(spec("waiter", PriorityLevel::High)).unwrap();
        arbiter
            .request_preemption(spec("urgent", PriorityLevel::High))
            .unwrap();

        let next = arbiter.release("holder").unwrap().unwrap();
        assert_eq!(next.requester(), "urgent");
        assert_eq!(arbiter.status().unwrap().queue.len(), 1);
    }

    #[test]
    fn test_disallowed_and_second_preemption_denied() {
        let (arbiter, _, _) = arbiter();
        arbiter.request(spec("holder", PriorityLevel::Medium)).unwrap();

        let denied = arbiter
            .request_preemption(spec("high", PriorityLevel::High))
            .unwrap();
        assert!(matches!(denied, PreemptionOutcome::Denied { .. }));

        arbiter
            .request_preemption(spec("crit-1", PriorityLevel::Critical))
            .unwrap();
        let second = arbiter
            .request_preemption(spec("crit-2", PriorityLevel::Critical))
            .unwrap();
        assert!(matches!(second, PreemptionOutcome::Denied { .. }));
    }

    #[test]
    fn test_withdraw() {
        let (arbiter, _, _) = arbiter();
        arbiter.request(spec("holder", PriorityLevel::Low)).unwrap();
        arbiter.request(spec("waiter", PriorityLevel::Low)).unwrap();
        arbiter
            .request_preemption(spec("oncall", PriorityLevel::Critical))
            .unwrap();

        assert_eq!(arbiter.withdraw("waiter").unwrap().requester, "waiter");
        assert_eq!(arbiter.withdraw("oncall").unwrap().requester, "oncall");
        assert_eq!(
            arbiter.withdraw("nobody").unwrap_err().code(),
            "LOCK_REQUEST_NOT_FOUND"
        );
        let status = arbiter.status().unwrap();
        assert!(status.queue.is_empty());
        assert!(status.pending_preemption.is_none());
    }

    #[test]
    fn test_request_burst_queues_each_requester_once() {
        let (arbiter, _, _) = arbiter();
        let arbiter = Arc::new(arbiter);
        let barrier = Arc::new(std::sync::Barrier::new(12));
        let priorities = [PriorityLevel::Low, PriorityLevel::Medium, PriorityLevel::High];

        let handles: Vec<_> = (0..12)
            .map(|n| {
                let arbiter = Arc::clone(&arbiter);
                let barrier = Arc::clone(&barrier);
                let priority = priorities[n % priorities.len()];
                std::thread::spawn(move || {
                    barrier.wait();
                    // Every requester asks twice; the second ask must conflict
                    let first = arbiter.request(spec(&format!("dev-{}", n), priority));
                    let second = arbiter.request(spec(&format!("dev-{}", n), priority));
                    (first, second)
                })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            let (first, second) = handle.join().unwrap();
            if first.unwrap() == LockGrant::Granted {
                granted += 1;
            }
            assert_eq!(second.unwrap_err().code(), "STATE_CONFLICT");
        }
        assert_eq!(granted, 1);

        let status = arbiter.status().unwrap();
        let holder = status.holder.as_ref().unwrap().requester().to_string();
        let mut queued: Vec<String> = status.queue.iter().map(|r| r.requester.clone()).collect();
        assert_eq!(queued.len(), 11);
        assert!(!queued.contains(&holder));
        queued.sort();
        queued.dedup();
        assert_eq!(queued.len(), 11);
        assert!(status
            .queue
            .windows(2)
            .all(|pair| pair[0].priority <= pair[1].priority));
    }
}
