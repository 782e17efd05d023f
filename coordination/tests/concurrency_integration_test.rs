//! Integration tests for concurrent writers
//!
//! Separate coordinators opened over one JSON state directory stand in for
//! separate processes: each has its own file handles, so only the on-disk
//! advisory locks keep their read-modify-write steps apart.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::Utc;
use priority_coordination::council::Proposal;
use priority_coordination::{
    CoordinationConfig, Coordinator, Decision, LockGrant, LockSpec, ManualClock, MemoryNotifier,
    PriorityLevel, SharedClock, SharedNotifier, StateBackend, WorkItem,
};

fn open_pair() -> (tempfile::TempDir, Coordinator, Coordinator) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let config = CoordinationConfig {
        state_dir: dir.path().to_path_buf(),
        backend: StateBackend::Json,
        rng_seed: Some(5),
        ..Default::default()
    };
    let notifier: SharedNotifier = MemoryNotifier::new().shared();
    let clock: SharedClock = Arc::new(ManualClock::new(Utc::now()));
    let a = Coordinator::open(&config, notifier.clone(), clock.clone()).unwrap();
    let b = Coordinator::open(&config, notifier, clock).unwrap();
    (dir, a, b)
}

/// Test: Ballots cast at the same moment through two instances both persist
#[test]
fn test_simultaneous_ballots_across_instances() {
    let (_dir, a, b) = open_pair();

    for round in 0..50 {
        let id = a
            .council
            .initiate(Proposal::new(format!("round {}", round), ""))
            .unwrap();
        let barrier = Barrier::new(2);

        thread::scope(|s| {
            let first = s.spawn(|| {
                barrier.wait();
                a.council.cast_vote(&id, "Architect-A", Decision::Approve, "")
            });
            let second = s.spawn(|| {
                barrier.wait();
                b.council.cast_vote(&id, "Architect-B", Decision::Reject, "")
            });
            first.join().unwrap().unwrap();
            second.join().unwrap().unwrap();
        });

        let record = b.council.get(&id).unwrap();
        assert_eq!(record.votes.len(), 2, "round {} lost a ballot", round);
    }
}

/// Test: The same elector racing through two instances is counted once
#[test]
fn test_duplicate_ballot_across_instances() {
    let (_dir, a, b) = open_pair();
    let id = a.council.initiate(Proposal::new("dedupe", "")).unwrap();
    let barrier = Barrier::new(2);

    let results = thread::scope(|s| {
        let handles = [&a, &b].map(|c| {
            let (id, barrier) = (&id, &barrier);
            s.spawn(move || {
                barrier.wait();
                c.council.cast_vote(id, "Architect-C", Decision::Approve, "")
            })
        });
        handles.map(|h| h.join().unwrap())
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let rejected = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(rejected.code(), "DUPLICATE_VOTE");
    assert_eq!(a.council.get(&id).unwrap().votes.len(), 1);
}

/// Test: A lock burst split across instances yields one holder and a queue
/// with every other requester exactly once
#[test]
fn test_lock_burst_across_instances() {
    let (_dir, a, b) = open_pair();
    let barrier = Barrier::new(12);

    let granted = thread::scope(|s| {
        let handles: Vec<_> = (0..12)
            .map(|n| {
                let c = if n % 2 == 0 { &a } else { &b };
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    c.lock
                        .request(LockSpec::new(
                            format!("dev-{}", n),
                            ["src/lib.rs"],
                            PriorityLevel::Medium,
                            15,
                        ))
                        .unwrap()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|grant| *grant == LockGrant::Granted)
            .count()
    });
    assert_eq!(granted, 1);

    let status = b.lock.status().unwrap();
    let mut queued: Vec<_> = status.queue.iter().map(|r| r.requester.clone()).collect();
    queued.sort();
    queued.dedup();
    assert_eq!(queued.len(), 11);
    assert!(!queued.contains(&status.holder.unwrap().requester().to_string()));
}

/// Test: Concurrent enqueues through two instances lose no items
#[test]
fn test_concurrent_enqueue_across_instances() {
    let (_dir, a, b) = open_pair();
    let barrier = Barrier::new(2);

    thread::scope(|s| {
        for (name, c) in [("a", &a), ("b", &b)] {
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                for n in 0..20 {
                    c.board
                        .add_item(WorkItem::with_id(
                            format!("{}-{}", name, n),
                            "burst",
                            PriorityLevel::High,
                        ))
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(a.board.summary().unwrap().depth, 40);
}
