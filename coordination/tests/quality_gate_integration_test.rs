//! Integration tests for quality-gate rollback and independent review
//!
//! Both services persist through the JSON backend here so the tests also
//! cover reopening the state directory.

use std::sync::Arc;

use priority_coordination::{
    Audience, CoordinationConfig, Coordinator, Gate, MemoryNotifier, RollbackRequest,
    RollbackType, StateBackend, SystemClock,
};

fn config(dir: &tempfile::TempDir, seed: u64) -> CoordinationConfig {
    CoordinationConfig {
        state_dir: dir.path().to_path_buf(),
        backend: StateBackend::Json,
        rng_seed: Some(seed),
        ..Default::default()
    }
}

fn rollback(feature: &str, current: Gate, target: Gate, cosigned: bool) -> RollbackRequest {
    RollbackRequest {
        feature_id: feature.to_string(),
        current,
        target,
        reason: "QA found a regression".to_string(),
        cosigned,
        owner: "Dev-A".to_string(),
    }
}

/// Test: QA → PEER partial rollback survives a reopen of the state dir
#[test]
fn test_rollback_audit_persists() {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let notifier = MemoryNotifier::new().shared();
    {
        let c = Coordinator::open(&config(&dir, 1), notifier.clone(), SystemClock::shared())
            .unwrap();
        let result = c
            .rollbacks
            .execute(rollback("feature-auth", Gate::Qa, Gate::Peer, true))
            .unwrap();
        assert_eq!(result.rollback_type, RollbackType::Partial);
        assert_eq!(result.signoffs_cleared, vec![Gate::Qa]);
    }

    let reopened =
        Coordinator::open(&config(&dir, 1), notifier.clone(), SystemClock::shared()).unwrap();
    let history = reopened.rollbacks.history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!((history[0].from, history[0].to), (Gate::Qa, Gate::Peer));
    assert_eq!(notifier.sent_to(&Audience::Agent("Dev-A".into())).len(), 1);
}

/// Test: Missing co-signature is refused and not audited
#[test]
fn test_rollback_requires_cosignature() {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let c = Coordinator::open(
        &config(&dir, 1),
        MemoryNotifier::new().shared(),
        SystemClock::shared(),
    )
    .unwrap();

    let err = c
        .rollbacks
        .execute(rollback("feature-auth", Gate::Peer, Gate::Green, false))
        .unwrap_err();
    assert_eq!(err.code(), "AUTHORIZATION_DENIED");
    assert!(c.rollbacks.history().unwrap().is_empty());

    // GREEN → RED is the one rollback that needs no co-signer
    let result = c
        .rollbacks
        .execute(rollback("feature-auth", Gate::Green, Gate::Red, false))
        .unwrap();
    assert_eq!(result.rollback_type, RollbackType::Full);
}

/// Test: Tertiary reviewer never overlaps with tracked participants
#[test]
fn test_independent_reviewer_excludes_participants() {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let c = Coordinator::open(
        &config(&dir, 42),
        MemoryNotifier::new().shared(),
        SystemClock::shared(),
    )
    .unwrap();

    c.reviewers
        .track_participation("feature-auth", "Architect-A", "design")
        .unwrap();
    c.reviewers
        .track_participation("feature-auth", "QA-A", "test plan")
        .unwrap();

    let candidates = c
        .reviewers
        .independent_candidates("Dev-A", "Dev-B", "feature-auth")
        .unwrap();
    assert_eq!(candidates, vec!["QA-B", "Architect-B", "Architect-C"]);

    for _ in 0..20 {
        let chosen = c
            .reviewers
            .select_independent("Dev-A", "Dev-B", "feature-auth")
            .unwrap();
        assert!(candidates.contains(&chosen));
    }
}

/// Test: Same seed picks the same reviewer sequence
#[test]
fn test_reviewer_selection_is_reproducible() {
    let picks = |seed: u64| -> Vec<String> {
        let c = Coordinator::in_memory(
            &CoordinationConfig {
                rng_seed: Some(seed),
                ..Default::default()
            },
            Arc::new(MemoryNotifier::new()),
            SystemClock::shared(),
        )
        .unwrap();
        (0..5)
            .map(|_| c.reviewers.select_independent("Dev-A", "Dev-B", "feature-x").unwrap())
            .collect()
    };
    assert_eq!(picks(7), picks(7));
}
