//! Council vote service
//!
//! Each vote record is its own persisted scope and every mutation is one
//! [`Repository::update`](crate::store::Repository::update) of that scope, so
//! operations on different votes never contend and two ballots racing on the
//! same vote (even from separate processes) are applied one after the other.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::rules::{missing_voters, resolve, validate_quorum};
use super::types::{
    CastVote, Decision, Electorate, EscalationReason, EscalationRecord, Proposal, StatusReport,
    TieBreakOutcome, VoteRecord, VoteStatus,
};
use crate::clock::SharedClock;
use crate::error::{CoordinationError, CoordinationResult};
use crate::notify::{self, Audience, Notification, SharedNotifier};
use crate::priority::Urgency;
use crate::store::{SharedRepository, StoreError};

/// Default voting window
pub const VOTING_TIMEOUT_HOURS: i64 = 48;

/// Default expedited window for the tie-breaking elector
pub const TIE_BREAKER_DEADLINE_HOURS: i64 = 12;

/// Timing knobs for council votes
#[derive(Debug, Clone)]
pub struct CouncilSettings {
    pub electorate: Electorate,
    pub voting_timeout: Duration,
    pub tie_break_window: Duration,
}

impl Default for CouncilSettings {
    fn default() -> Self {
        Self {
            electorate: Electorate::default(),
            voting_timeout: Duration::hours(VOTING_TIMEOUT_HOURS),
            tie_break_window: Duration::hours(TIE_BREAKER_DEADLINE_HOURS),
        }
    }
}

/// Quorum voting with tie-breaking and user escalation
pub struct CouncilVote {
    repo: SharedRepository<VoteRecord>,
    settings: CouncilSettings,
    notifier: SharedNotifier,
    clock: SharedClock,
}

fn generate_vote_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("VOTE-{}", hex[..8].to_ascii_uppercase())
}

impl CouncilVote {
    pub fn new(
        repo: SharedRepository<VoteRecord>,
        settings: CouncilSettings,
        notifier: SharedNotifier,
        clock: SharedClock,
    ) -> Self {
        Self {
            repo,
            settings,
            notifier,
            clock,
        }
    }

    /// Configured electorate
    pub fn electorate(&self) -> &Electorate {
        &self.settings.electorate
    }

    /// Run `f` against the stored record inside its critical section; the
    /// record is written back only when `f` succeeds and changed it
    fn with_record<R>(
        &self,
        vote_id: &str,
        f: impl FnOnce(&mut VoteRecord) -> CoordinationResult<R>,
    ) -> CoordinationResult<R> {
        // Unknown ids fail here, before the backend sets up any lock for them.
        // Records are never deleted, so the check cannot go stale.
        self.load(vote_id)?;

        let mut settled = false;
        let out = self.repo.modify(vote_id, |slot| -> CoordinationResult<R> {
            let record = slot.as_mut().ok_or_else(|| CoordinationError::VoteNotFound {
                vote_id: vote_id.to_string(),
            })?;
            let out = f(record)?;
            settled = record.status.is_terminal();
            Ok(out)
        })?;

        if settled {
            // Nothing writes a settled vote again
            if let Err(e) = self.repo.retire(vote_id) {
                debug!(vote_id, error = %e, "Could not retire vote scope");
            }
        }
        Ok(out)
    }

    fn load(&self, vote_id: &str) -> CoordinationResult<VoteRecord> {
        let not_found = || CoordinationError::VoteNotFound {
            vote_id: vote_id.to_string(),
        };
        // Ids outside the scope alphabet can never have been issued
        match self.repo.load(vote_id) {
            Ok(Some(record)) => Ok(record),
            Ok(None) | Err(StoreError::InvalidScope(_)) => Err(not_found()),
            Err(e) => Err(e.into()),
        }
    }

    /// Snapshot of one vote
    pub fn get(&self, vote_id: &str) -> CoordinationResult<VoteRecord> {
        self.load(vote_id)
    }

    /// Every stored vote, by id
    pub fn list(&self) -> CoordinationResult<Vec<VoteRecord>> {
        let mut records = Vec::new();
        for scope in self.repo.scopes()? {
            if let Some(record) = self.repo.load(&scope)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Open a new vote; returns its id
    pub fn initiate(&self, proposal: Proposal) -> CoordinationResult<String> {
        if proposal.title.trim().is_empty() {
            return Err(CoordinationError::validation("proposal title must not be empty"));
        }
        let now = self.clock.now();
        let vote_id = generate_vote_id();
        let record = VoteRecord::new(
            vote_id.clone(),
            proposal,
            self.settings.electorate.clone(),
            now,
            now + self.settings.voting_timeout,
        );
        self.repo.save(&vote_id, &record)?;
        info!(
            vote_id = %vote_id,
            title = %record.proposal.title,
            deadline = %record.deadline,
            "Council vote initiated"
        );
        Ok(vote_id)
    }

    /// Record one elector's ballot
    pub fn cast_vote(
        &self,
        vote_id: &str,
        voter: &str,
        decision: Decision,
        reasoning: &str,
    ) -> CoordinationResult<CastVote> {
        let now = self.clock.now();
        self.with_record(vote_id, |record| {
            if record.status.is_terminal() {
                return Err(CoordinationError::conflict(format!(
                    "vote {} is already {}",
                    vote_id, record.status
                )));
            }
            if !record.electorate.contains(voter) {
                return Err(CoordinationError::UnknownVoter {
                    voter: voter.to_string(),
                });
            }
            if record.has_voted(voter) {
                return Err(CoordinationError::DuplicateVote {
                    vote_id: vote_id.to_string(),
                    voter: voter.to_string(),
                });
            }

            let ballot = CastVote {
                voter: voter.to_string(),
                decision,
                reasoning: reasoning.to_string(),
                timestamp: now,
            };
            record.votes.push(ballot.clone());
            info!(vote_id, voter, decision = %decision, cast = record.votes.len(), "Vote cast");
            Ok(ballot)
        })
    }

    /// Evaluate a vote. Quorum is checked before the timeout flag: once two
    /// ballots are in, the vote resolves whether or not time has run out.
    pub fn check_status(&self, vote_id: &str, timeout_reached: bool) -> CoordinationResult<StatusReport> {
        let now = self.clock.now();
        let mut escalated = None;

        let report = self.with_record(vote_id, |record| {
            let resolution = resolve(&record.votes);
            let quorum = validate_quorum(record.votes.len());

            if !record.status.is_terminal() {
                if quorum.quorum_met {
                    match resolution.outcome {
                        VoteStatus::Tie => {
                            if record.status == VoteStatus::Pending {
                                record.transition(VoteStatus::Tie, "tie requires breaking", now)?;
                            }
                        }
                        outcome => {
                            record.transition(outcome, "majority reached", now)?;
                            info!(
                                vote_id,
                                outcome = %outcome,
                                approve = resolution.approve_count,
                                reject = resolution.reject_count,
                                "Council vote resolved"
                            );
                        }
                    }
                } else if timeout_reached {
                    let reason = if record.votes.is_empty() {
                        EscalationReason::TimeoutNoVotes
                    } else {
                        EscalationReason::QuorumNotMet
                    };
                    escalated = Some(Self::escalate_record(record, reason, now)?);
                } else {
                    debug!(vote_id, cast = record.votes.len(), "Vote still pending");
                }
            }

            Ok(StatusReport {
                vote_id: record.vote_id.clone(),
                status: record.status,
                quorum_met: quorum.quorum_met,
                votes_cast: record.votes.len(),
                approve_count: resolution.approve_count,
                reject_count: resolution.reject_count,
                escalation: record.escalation.clone(),
            })
        })?;

        if let Some(escalation) = escalated {
            self.notify_user(escalation);
        }
        Ok(report)
    }

    /// Break a 1-1 tie.
    ///
    /// With exactly two ballots the remaining elector gets an urgent request
    /// and an expedited deadline. If that deadline has passed
    /// (`tie_breaker_timed_out`), or the ballot count is not two, the tie goes
    /// to the user.
    pub fn handle_tie(&self, vote_id: &str, tie_breaker_timed_out: bool) -> CoordinationResult<TieBreakOutcome> {
        let now = self.clock.now();
        let window = self.settings.tie_break_window;
        let mut request: Option<(String, Vec<CastVote>, DateTime<Utc>)> = None;
        let mut escalated = None;

        let outcome = self.with_record(vote_id, |record| {
            if record.status.is_terminal() {
                return Err(CoordinationError::conflict(format!(
                    "vote {} is already {}",
                    vote_id, record.status
                )));
            }

            if record.votes.len() != 2 {
                let escalation =
                    Self::escalate_record(record, EscalationReason::TieUnresolved, now)?;
                escalated = Some(escalation.clone());
                return Ok(TieBreakOutcome::Escalated(escalation));
            }

            if resolve(&record.votes).outcome != VoteStatus::Tie {
                return Err(CoordinationError::conflict(format!(
                    "vote {} is not tied",
                    vote_id
                )));
            }

            let missing = missing_voters(&record.electorate, &record.votes);
            let [voter] = missing.as_slice() else {
                return Err(CoordinationError::validation(format!(
                    "expected exactly one remaining elector, found {}",
                    missing.len()
                )));
            };

            if tie_breaker_timed_out {
                warn!(vote_id, voter = %voter, "Tie-breaker did not vote in time");
                let escalation =
                    Self::escalate_record(record, EscalationReason::TieUnresolved, now)?;
                escalated = Some(escalation.clone());
                return Ok(TieBreakOutcome::Escalated(escalation));
            }

            if record.status == VoteStatus::PendingTieBreaker {
                if let Some(deadline) = record.tie_break_deadline {
                    return Ok(TieBreakOutcome::Requested {
                        voter: voter.clone(),
                        deadline,
                    });
                }
            }

            if record.status == VoteStatus::Pending {
                record.transition(VoteStatus::Tie, "tie requires breaking", now)?;
            }
            let deadline = now + window;
            record.transition(
                VoteStatus::PendingTieBreaker,
                &format!("tie-break requested from {}", voter),
                now,
            )?;
            record.tie_break_deadline = Some(deadline);
            request = Some((voter.clone(), record.votes.clone(), deadline));

            Ok(TieBreakOutcome::Requested {
                voter: voter.clone(),
                deadline,
            })
        })?;

        if let Some((voter, votes, deadline)) = request {
            info!(vote_id, voter = %voter, deadline = %deadline, "Tie-break requested");
            notify::send(
                self.notifier.as_ref(),
                now,
                Audience::Agent(voter.clone()),
                Notification::TieBreakRequest {
                    vote_id: vote_id.to_string(),
                    voter,
                    votes,
                    deadline,
                    urgency: Urgency::High,
                },
            );
        }
        if let Some(escalation) = escalated {
            self.notify_user(escalation);
        }
        Ok(outcome)
    }

    /// Hand a vote to the user with every elector's position
    pub fn escalate(&self, vote_id: &str, reason: EscalationReason) -> CoordinationResult<EscalationRecord> {
        let now = self.clock.now();
        let escalation = self.with_record(vote_id, |record| {
            if record.status.is_terminal() {
                return Err(CoordinationError::conflict(format!(
                    "vote {} is already {}",
                    vote_id, record.status
                )));
            }
            Self::escalate_record(record, reason, now)
        })?;
        self.notify_user(escalation.clone());
        Ok(escalation)
    }

    fn escalate_record(
        record: &mut VoteRecord,
        reason: EscalationReason,
        now: DateTime<Utc>,
    ) -> CoordinationResult<EscalationRecord> {
        let escalation = EscalationRecord {
            vote_id: record.vote_id.clone(),
            reason,
            positions: record.positions(),
            escalated_at: now,
            urgency: reason.urgency(),
        };
        record.transition(VoteStatus::EscalatedToUser, &reason.to_string(), now)?;
        record.escalation = Some(escalation.clone());
        warn!(
            vote_id = %record.vote_id,
            reason = %reason,
            urgency = %escalation.urgency,
            "Council vote escalated to user"
        );
        Ok(escalation)
    }

    fn notify_user(&self, escalation: EscalationRecord) {
        notify::send(
            self.notifier.as_ref(),
            escalation.escalated_at,
            Audience::User,
            Notification::UserEscalation(escalation),
        );
    }

    /// Open votes past their voting deadline (tie-break waits excluded)
    pub fn overdue(&self, now: DateTime<Utc>) -> CoordinationResult<Vec<String>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| matches!(r.status, VoteStatus::Pending | VoteStatus::Tie))
            .filter(|r| r.deadline < now)
            .map(|r| r.vote_id)
            .collect())
    }

    /// Votes whose tie-breaking elector missed the expedited deadline
    pub fn tie_breaks_expired(&self, now: DateTime<Utc>) -> CoordinationResult<Vec<String>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.status == VoteStatus::PendingTieBreaker)
            .filter(|r| r.tie_break_deadline.is_some_and(|d| d < now))
            .map(|r| r.vote_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::notify::MemoryNotifier;
    use crate::store::MemoryRepository;
    use std::sync::Arc;

    fn council() -> (CouncilVote, Arc<MemoryNotifier>, Arc<ManualClock>) {
        let notifier = MemoryNotifier::new().shared();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let council = CouncilVote::new(
            MemoryRepository::shared(),
            CouncilSettings::default(),
            notifier.clone(),
            clock.clone(),
        );
        (council, notifier, clock)
    }

    fn open(council: &CouncilVote) -> String {
        council
            .initiate(Proposal::new("Adopt event sourcing", "for the audit log"))
            .unwrap()
    }

    #[test]
    fn test_initiate_sets_id_and_deadline() {
        let (council, _, clock) = council();
        let id = open(&council);
        assert!(id.starts_with("VOTE-"));
        assert_eq!(id.len(), 13);
        assert!(id[5..].chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));

        let record = council.get(&id).unwrap();
        assert_eq!(record.status, VoteStatus::Pending);
        assert_eq!(record.deadline - clock.now(), Duration::hours(48));
        assert!(record.votes.is_empty());
    }

    #[test]
    fn test_duplicate_vote_rejected_without_mutation() {
        let (council, _, _) = council();
        let id = open(&council);
        council
            .cast_vote(&id, "Architect-A", Decision::Approve, "good")
            .unwrap();
        let err = council
            .cast_vote(&id, "Architect-A", Decision::Reject, "changed mind")
            .unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_VOTE");

        let record = council.get(&id).unwrap();
        assert_eq!(record.votes.len(), 1);
        assert_eq!(record.votes[0].decision, Decision::Approve);
    }

    #[test]
    fn test_outsider_vote_rejected() {
        let (council, _, _) = council();
        let id = open(&council);
        let err = council
            .cast_vote(&id, "Dev-A", Decision::Approve, "")
            .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_VOTER");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_unknown_vote_is_not_found() {
        let (council, _, _) = council();
        assert_eq!(
            council.check_status("VOTE-DEADBEEF", false).unwrap_err().code(),
            "VOTE_NOT_FOUND"
        );
        assert_eq!(
            council.get("../etc/passwd").unwrap_err().code(),
            "VOTE_NOT_FOUND"
        );
    }

    #[test]
    fn test_majority_resolves_before_timeout() {
        let (council, _, _) = council();
        let id = open(&council);
        council.cast_vote(&id, "Architect-A", Decision::Approve, "").unwrap();
        council.cast_vote(&id, "Architect-B", Decision::Approve, "").unwrap();

        let report = council.check_status(&id, true).unwrap();
        assert_eq!(report.status, VoteStatus::Approved);
        assert!(report.quorum_met);
        assert_eq!(report.approve_count, 2);
        assert!(report.escalation.is_none());
    }

    #[test]
    fn test_pending_without_timeout() {
        let (council, notifier, _) = council();
        let id = open(&council);
        council.cast_vote(&id, "Architect-A", Decision::Reject, "").unwrap();
        let report = council.check_status(&id, false).unwrap();
        assert_eq!(report.status, VoteStatus::Pending);
        assert!(!report.quorum_met);
        assert!(notifier.sent().is_empty());
    }

    #[test]
    fn test_timeout_escalation_reasons() {
        let (council, notifier, _) = council();

        let silent = open(&council);
        let report = council.check_status(&silent, true).unwrap();
        assert_eq!(report.status, VoteStatus::EscalatedToUser);
        let escalation = report.escalation.unwrap();
        assert_eq!(escalation.reason, EscalationReason::TimeoutNoVotes);
        assert_eq!(escalation.urgency, Urgency::High);

        let lonely = open(&council);
        council
            .cast_vote(&lonely, "Architect-C", Decision::Approve, "ship it")
            .unwrap();
        let escalation = council.check_status(&lonely, true).unwrap().escalation.unwrap();
        assert_eq!(escalation.reason, EscalationReason::QuorumNotMet);
        assert_eq!(escalation.urgency, Urgency::Medium);
        assert_eq!(escalation.positions.len(), 1);
        assert_eq!(escalation.positions[0].reasoning, "ship it");

        assert_eq!(notifier.sent_to(&Audience::User).len(), 2);
    }

    #[test]
    fn test_tie_requests_missing_elector() {
        let (council, notifier, clock) = council();
        let id = open(&council);
        council.cast_vote(&id, "Architect-A", Decision::Approve, "").unwrap();
        council.cast_vote(&id, "Architect-B", Decision::Reject, "").unwrap();
        assert_eq!(council.check_status(&id, false).unwrap().status, VoteStatus::Tie);

        let outcome = council.handle_tie(&id, false).unwrap();
        let TieBreakOutcome::Requested { voter, deadline } = outcome else {
            panic!("expected a tie-break request");
        };
        assert_eq!(voter, "Architect-C");
        assert_eq!(deadline - clock.now(), Duration::hours(12));
        assert_eq!(council.get(&id).unwrap().status, VoteStatus::PendingTieBreaker);

        let sent = notifier.sent_to(&Audience::Agent("Architect-C".into()));
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].notification.kind(), "tie_break_request");

        // The tie-breaker's ballot settles it
        council.cast_vote(&id, "Architect-C", Decision::Reject, "").unwrap();
        let report = council.check_status(&id, false).unwrap();
        assert_eq!(report.status, VoteStatus::Rejected);
        assert_eq!(report.reject_count, 2);
    }

    #[test]
    fn test_tie_breaker_timeout_escalates() {
        let (council, notifier, _) = council();
        let id = open(&council);
        council.cast_vote(&id, "Architect-A", Decision::Approve, "").unwrap();
        council.cast_vote(&id, "Architect-C", Decision::Reject, "").unwrap();
        council.handle_tie(&id, false).unwrap();

        let outcome = council.handle_tie(&id, true).unwrap();
        let TieBreakOutcome::Escalated(escalation) = outcome else {
            panic!("expected escalation");
        };
        assert_eq!(escalation.reason, EscalationReason::TieUnresolved);
        assert_eq!(escalation.positions.len(), 2);
        assert_eq!(council.get(&id).unwrap().status, VoteStatus::EscalatedToUser);
        assert_eq!(notifier.sent_to(&Audience::User).len(), 1);
    }

    #[test]
    fn test_handle_tie_with_wrong_count_escalates() {
        let (council, _, _) = council();
        let id = open(&council);
        council.cast_vote(&id, "Architect-A", Decision::Approve, "").unwrap();
        let outcome = council.handle_tie(&id, false).unwrap();
        assert!(matches!(outcome, TieBreakOutcome::Escalated(ref e) if e.reason == EscalationReason::TieUnresolved));
    }

    #[test]
    fn test_handle_tie_on_majority_is_conflict() {
        let (council, _, _) = council();
        let id = open(&council);
        council.cast_vote(&id, "Architect-A", Decision::Approve, "").unwrap();
        council.cast_vote(&id, "Architect-B", Decision::Approve, "").unwrap();
        assert_eq!(
            council.handle_tie(&id, false).unwrap_err().code(),
            "STATE_CONFLICT"
        );
    }

    #[test]
    fn test_cast_after_resolution_is_conflict() {
        let (council, _, _) = council();
        let id = open(&council);
        council.cast_vote(&id, "Architect-A", Decision::Approve, "").unwrap();
        council.cast_vote(&id, "Architect-B", Decision::Approve, "").unwrap();
        council.check_status(&id, false).unwrap();
        assert_eq!(
            council
                .cast_vote(&id, "Architect-C", Decision::Reject, "")
                .unwrap_err()
                .code(),
            "STATE_CONFLICT"
        );
    }

    #[test]
    fn test_overdue_and_expired_tie_breaks() {
        let (council, _, clock) = council();
        let stale = open(&council);
        let tied = open(&council);
        council.cast_vote(&tied, "Architect-A", Decision::Approve, "").unwrap();
        council.cast_vote(&tied, "Architect-B", Decision::Reject, "").unwrap();
        council.handle_tie(&tied, false).unwrap();

        clock.advance(Duration::hours(13));
        assert!(council.overdue(clock.now()).unwrap().is_empty());
        assert_eq!(council.tie_breaks_expired(clock.now()).unwrap(), vec![tied]);

        clock.advance(Duration::hours(36));
        assert_eq!(council.overdue(clock.now()).unwrap(), vec![stale]);
    }

    #[test]
    fn test_racing_duplicate_ballots_admit_exactly_one() {
        let (council, _, _) = council();
        let council = Arc::new(council);
        let id = open(&council);
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let council = Arc::clone(&council);
                let barrier = Arc::clone(&barrier);
                let id = id.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    council.cast_vote(&id, "Architect-A", Decision::Approve, &format!("attempt {}", n))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.code() == "DUPLICATE_VOTE"));
        assert_eq!(council.get(&id).unwrap().votes.len(), 1);
    }

    #[test]
    fn test_json_scope_locks_only_for_live_votes() {
        let dir = tempfile::tempdir().unwrap();
        let council = CouncilVote::new(
            crate::store::JsonFileRepository::open(dir.path()).unwrap().shared(),
            CouncilSettings::default(),
            MemoryNotifier::new().shared(),
            Arc::new(ManualClock::new(Utc::now())),
        );
        let lock_files = || -> Vec<String> {
            std::fs::read_dir(dir.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .filter(|name| name.ends_with(".lock"))
                .collect()
        };

        assert_eq!(
            council
                .cast_vote("VOTE-DEADBEEF", "Architect-A", Decision::Approve, "")
                .unwrap_err()
                .code(),
            "VOTE_NOT_FOUND"
        );
        assert!(lock_files().is_empty());

        let id = open(&council);
        council.cast_vote(&id, "Architect-A", Decision::Approve, "").unwrap();
        assert_eq!(lock_files(), vec![format!(".{}.lock", id)]);

        council.cast_vote(&id, "Architect-B", Decision::Approve, "").unwrap();
        assert_eq!(council.check_status(&id, false).unwrap().status, VoteStatus::Approved);
        assert!(lock_files().is_empty());
    }
}
