//! Integration tests for council voting
//!
//! Drives full vote lifecycles through the public API against the JSON file
//! backend, checking quorum precedence, tie-breaking and user escalation.

use std::sync::Arc;

use chrono::{Duration, Utc};
use priority_coordination::council::{Proposal, TieBreakOutcome};
use priority_coordination::{
    Audience, Clock, CoordinationConfig, Coordinator, Decision, EscalationReason, ManualClock,
    MemoryNotifier, StateBackend, Urgency, VoteStatus,
};

fn setup() -> (tempfile::TempDir, Coordinator, Arc<MemoryNotifier>, Arc<ManualClock>) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let config = CoordinationConfig {
        state_dir: dir.path().to_path_buf(),
        backend: StateBackend::Json,
        rng_seed: Some(11),
        ..Default::default()
    };
    let notifier = MemoryNotifier::new().shared();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let coordinator = Coordinator::open(&config, notifier.clone(), clock.clone()).unwrap();
    (dir, coordinator, notifier, clock)
}

/// Test: Quorum is evaluated before the timeout flag
#[test]
fn test_quorum_takes_precedence_over_timeout() {
    let (_dir, c, notifier, clock) = setup();
    let id = c
        .council
        .initiate(Proposal::new("Split the scheduler crate", ""))
        .unwrap();

    c.council.cast_vote(&id, "Architect-B", Decision::Reject, "too early").unwrap();
    c.council.cast_vote(&id, "Architect-C", Decision::Reject, "churn").unwrap();

    clock.advance(Duration::hours(72));
    let report = c.council.check_status(&id, true).unwrap();

    assert_eq!(report.status, VoteStatus::Rejected);
    assert!(report.quorum_met);
    assert!(notifier.sent_to(&Audience::User).is_empty());
}

/// Test: 2-1 with the full council approves
#[test]
fn test_full_council_majority() {
    let (_dir, c, _, _) = setup();
    let id = c.council.initiate(Proposal::new("Adopt RocksDB", "")).unwrap();
    c.council.cast_vote(&id, "Architect-A", Decision::Approve, "").unwrap();
    c.council.cast_vote(&id, "Architect-B", Decision::Approve, "").unwrap();
    c.council.cast_vote(&id, "Architect-C", Decision::Reject, "").unwrap();

    let report = c.council.check_status(&id, false).unwrap();
    assert_eq!(report.status, VoteStatus::Approved);
    assert_eq!((report.approve_count, report.reject_count), (2, 1));
}

/// Test: Tie → tie-break request → timeout → user escalation, all persisted
#[test]
fn test_tie_lifecycle_to_user() {
    let (_dir, c, notifier, clock) = setup();
    let id = c.council.initiate(Proposal::new("Rewrite the lock", "")).unwrap();
    c.council.cast_vote(&id, "Architect-A", Decision::Approve, "faster").unwrap();
    c.council.cast_vote(&id, "Architect-C", Decision::Reject, "riskier").unwrap();

    assert_eq!(c.council.check_status(&id, false).unwrap().status, VoteStatus::Tie);

    match c.council.handle_tie(&id, false).unwrap() {
        TieBreakOutcome::Requested { voter, deadline } => {
            assert_eq!(voter, "Architect-B");
            assert_eq!(deadline - clock.now(), Duration::hours(12));
        }
        other => panic!("expected tie-break request, got {:?}", other),
    }

    clock.advance(Duration::hours(13));
    let report = c.sweep(clock.now()).unwrap();
    assert_eq!(report.tie_breaks_escalated, vec![id.clone()]);

    let record = c.council.get(&id).unwrap();
    assert_eq!(record.status, VoteStatus::EscalatedToUser);
    let escalation = record.escalation.unwrap();
    assert_eq!(escalation.reason, EscalationReason::TieUnresolved);
    assert_eq!(escalation.urgency, Urgency::Medium);
    assert_eq!(escalation.positions.len(), 2);

    let statuses: Vec<VoteStatus> = record.transitions.iter().map(|t| t.to).collect();
    assert_eq!(
        statuses,
        vec![
            VoteStatus::Tie,
            VoteStatus::PendingTieBreaker,
            VoteStatus::EscalatedToUser
        ]
    );

    assert_eq!(
        notifier
            .sent_to(&Audience::Agent("Architect-B".into()))
            .len(),
        1
    );
    assert_eq!(notifier.sent_to(&Audience::User).len(), 1);
}

/// Test: Explicit escalation carries every position
#[test]
fn test_manual_escalation() {
    let (_dir, c, _, _) = setup();
    let id = c.council.initiate(Proposal::new("Drop JSON backend", "")).unwrap();
    c.council.cast_vote(&id, "Architect-A", Decision::Reject, "still useful").unwrap();

    let escalation = c
        .council
        .escalate(&id, EscalationReason::QuorumNotMet)
        .unwrap();
    assert_eq!(escalation.positions[0].voter, "Architect-A");
    assert_eq!(escalation.positions[0].reasoning, "still useful");

    let err = c
        .council
        .escalate(&id, EscalationReason::QuorumNotMet)
        .unwrap_err();
    assert_eq!(err.code(), "STATE_CONFLICT");
}
