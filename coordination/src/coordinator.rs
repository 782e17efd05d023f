//! Wiring of the coordination services over one set of repositories
//!
//! The services are independent; the coordinator owns them, shares a
//! notifier and a clock between them, and drives the periodic sweep that
//! turns elapsed deadlines into state transitions.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::{CoordinationConfig, StateBackend};
use crate::cosign::{CoSignatureDesk, CoSignatureLedger};
use crate::council::{CouncilVote, TieBreakOutcome, VoteRecord, VoteStatus};
use crate::error::{CoordinationError, CoordinationResult};
use crate::lock::{LockArbiter, LockState};
use crate::notify::SharedNotifier;
use crate::priority::{PriorityQueue, SchedulerState, TaskBoard};
use crate::review::{FeatureParticipants, RandomSource, ReviewerPool, XorShiftRng};
use crate::rollback::{RollbackLog, RollbackManager};
use crate::security::{AttemptRecord, CollusionDetector, CollusionLog, TwoFactorLimiter};
use crate::store::schema::{
    CF_COLLUSION, CF_COSIGN, CF_LOCKS, CF_PARTICIPANTS, CF_QUEUE, CF_ROLLBACKS, CF_SCHEDULER,
    CF_TWO_FACTOR, CF_VOTES,
};
use crate::store::{JsonFileRepository, MemoryRepository, SharedRepository, StoreResult};

/// One repository per resource kind
pub struct Stores {
    pub queue: SharedRepository<PriorityQueue>,
    pub scheduler: SharedRepository<SchedulerState>,
    pub locks: SharedRepository<LockState>,
    pub votes: SharedRepository<VoteRecord>,
    pub rollbacks: SharedRepository<RollbackLog>,
    pub participants: SharedRepository<FeatureParticipants>,
    pub collusion: SharedRepository<CollusionLog>,
    pub two_factor: SharedRepository<AttemptRecord>,
    pub cosign: SharedRepository<CoSignatureLedger>,
}

impl Stores {
    /// Process-local stores
    pub fn memory() -> Self {
        Self {
            queue: MemoryRepository::shared(),
            scheduler: MemoryRepository::shared(),
            locks: MemoryRepository::shared(),
            votes: MemoryRepository::shared(),
            rollbacks: MemoryRepository::shared(),
            participants: MemoryRepository::shared(),
            collusion: MemoryRepository::shared(),
            two_factor: MemoryRepository::shared(),
            cosign: MemoryRepository::shared(),
        }
    }

    /// JSON documents under `root/<namespace>/`
    pub fn json(root: &Path) -> StoreResult<Self> {
        Ok(Self {
            queue: JsonFileRepository::open(root.join(CF_QUEUE))?.shared(),
            scheduler: JsonFileRepository::open(root.join(CF_SCHEDULER))?.shared(),
            locks: JsonFileRepository::open(root.join(CF_LOCKS))?.shared(),
            votes: JsonFileRepository::open(root.join(CF_VOTES))?.shared(),
            rollbacks: JsonFileRepository::open(root.join(CF_ROLLBACKS))?.shared(),
            participants: JsonFileRepository::open(root.join(CF_PARTICIPANTS))?.shared(),
            collusion: JsonFileRepository::open(root.join(CF_COLLUSION))?.shared(),
            two_factor: JsonFileRepository::open(root.join(CF_TWO_FACTOR))?.shared(),
            cosign: JsonFileRepository::open(root.join(CF_COSIGN))?.shared(),
        })
    }

    /// Column families of one RocksDB instance under `root/rocks`
    #[cfg(feature = "heavy-state")]
    pub fn rocks(root: &Path) -> StoreResult<Self> {
        let store = crate::store::RocksStateStore::open(root.join("rocks"))?;
        Ok(Self {
            queue: store.shared_repository(CF_QUEUE),
            scheduler: store.shared_repository(CF_SCHEDULER),
            locks: store.shared_repository(CF_LOCKS),
            votes: store.shared_repository(CF_VOTES),
            rollbacks: store.shared_repository(CF_ROLLBACKS),
            participants: store.shared_repository(CF_PARTICIPANTS),
            collusion: store.shared_repository(CF_COLLUSION),
            two_factor: store.shared_repository(CF_TWO_FACTOR),
            cosign: store.shared_repository(CF_COSIGN),
        })
    }

    /// Stores for the configured backend
    pub fn for_config(config: &CoordinationConfig) -> CoordinationResult<Self> {
        match config.backend {
            StateBackend::Memory => Ok(Self::memory()),
            StateBackend::Json => Ok(Self::json(&config.state_dir)?),
            #[cfg(feature = "heavy-state")]
            StateBackend::Rocks => Ok(Self::rocks(&config.state_dir)?),
            #[cfg(not(feature = "heavy-state"))]
            StateBackend::Rocks => Err(CoordinationError::validation(
                "rocks backend requires the heavy-state feature",
            )),
        }
    }
}

/// What one sweep changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Overdue votes and the status the timeout check left them in
    pub votes_checked: Vec<(String, VoteStatus)>,
    /// Votes escalated because the tie-breaker missed the expedited deadline
    pub tie_breaks_escalated: Vec<String>,
    /// New lock holder after an expired grace window
    pub lock_handoff: Option<String>,
    /// Assigned items past their SLA
    pub sla_violations: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.votes_checked.is_empty()
            && self.tie_breaks_escalated.is_empty()
            && self.lock_handoff.is_none()
            && self.sla_violations.is_empty()
    }
}

/// The coordination core
pub struct Coordinator {
    pub board: TaskBoard,
    pub lock: LockArbiter,
    pub council: CouncilVote,
    pub rollbacks: RollbackManager,
    pub reviewers: ReviewerPool,
    pub cosign: CoSignatureDesk,
    pub collusion: CollusionDetector,
    pub two_factor: TwoFactorLimiter,
    clock: SharedClock,
}

impl Coordinator {
    /// Build every service over `stores`
    pub fn new(
        config: &CoordinationConfig,
        stores: Stores,
        notifier: SharedNotifier,
        clock: SharedClock,
    ) -> CoordinationResult<Self> {
        config
            .validate()
            .map_err(|e| CoordinationError::validation(e.to_string()))?;
        let settings = config
            .council_settings()
            .map_err(|e| CoordinationError::validation(e.to_string()))?;

        // Reviewer selection and spot checks draw from separate streams
        let rng = |stream: u64| -> Box<dyn RandomSource> {
            match config.rng_seed {
                Some(seed) => Box::new(XorShiftRng::new(seed.wrapping_add(stream))),
                None => Box::new(XorShiftRng::from_entropy()),
            }
        };

        Ok(Self {
            board: TaskBoard::new(stores.queue, stores.scheduler, notifier.clone(), clock.clone()),
            lock: LockArbiter::new(stores.locks, notifier.clone(), clock.clone()),
            council: CouncilVote::new(stores.votes, settings, notifier.clone(), clock.clone()),
            rollbacks: RollbackManager::new(stores.rollbacks, notifier.clone(), clock.clone()),
            reviewers: ReviewerPool::new(
                config.reviewers.clone(),
                stores.participants,
                rng(0),
                clock.clone(),
            ),
            cosign: CoSignatureDesk::new(stores.cosign, rng(1), notifier.clone(), clock.clone()),
            collusion: CollusionDetector::new(stores.collusion, notifier, clock.clone()),
            two_factor: TwoFactorLimiter::new(stores.two_factor, clock.clone()),
            clock,
        })
    }

    /// Open the configured backend
    pub fn open(
        config: &CoordinationConfig,
        notifier: SharedNotifier,
        clock: SharedClock,
    ) -> CoordinationResult<Self> {
        let stores = Stores::for_config(config)?;
        info!(backend = ?config.backend, state_dir = %config.state_dir.display(), "Coordination state opened");
        Self::new(config, stores, notifier, clock)
    }

    /// Everything in memory
    pub fn in_memory(
        config: &CoordinationConfig,
        notifier: SharedNotifier,
        clock: SharedClock,
    ) -> CoordinationResult<Self> {
        Self::new(config, Stores::memory(), notifier, clock)
    }

    /// Current time according to the injected clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Apply every deadline that has passed at `now`.
    ///
    /// A failure on one vote is logged and does not stop the rest of the
    /// sweep; store failures while listing are returned.
    pub fn sweep(&self, now: DateTime<Utc>) -> CoordinationResult<SweepReport> {
        let mut report = SweepReport::default();

        for vote_id in self.council.overdue(now)? {
            let status = match self.council.check_status(&vote_id, true) {
                Ok(report) => report.status,
                Err(e) => {
                    warn!(vote_id = %vote_id, error = %e, "Sweep could not time out vote");
                    continue;
                }
            };
            // A tie nobody acted on gets its tie-break request now
            let status = if status == VoteStatus::Tie {
                match self.council.handle_tie(&vote_id, false) {
                    Ok(_) => VoteStatus::PendingTieBreaker,
                    Err(e) => {
                        warn!(vote_id = %vote_id, error = %e, "Sweep could not request tie-break");
                        status
                    }
                }
            } else {
                status
            };
            report.votes_checked.push((vote_id, status));
        }

        for vote_id in self.council.tie_breaks_expired(now)? {
            match self.council.handle_tie(&vote_id, true) {
                Ok(TieBreakOutcome::Escalated(_)) => report.tie_breaks_escalated.push(vote_id),
                Ok(TieBreakOutcome::Requested { .. }) => {}
                Err(e) => warn!(vote_id = %vote_id, error = %e, "Sweep could not escalate tie"),
            }
        }

        report.lock_handoff = self
            .lock
            .complete_preemption(now)?
            .map(|holder| holder.requester().to_string());

        report.sla_violations = self
            .board
            .sla_violations(now)?
            .into_iter()
            .map(|v| v.item.id)
            .collect();

        if report.is_empty() {
            debug!("Sweep found nothing due");
        } else {
            info!(
                votes = report.votes_checked.len(),
                ties = report.tie_breaks_escalated.len(),
                lock_handoff = ?report.lock_handoff,
                sla_violations = report.sla_violations.len(),
                "Sweep applied deadlines"
            );
        }
        Ok(report)
    }
}
