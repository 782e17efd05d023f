//! Independent (tertiary) reviewer selection
//!
//! A tertiary reviewer must have had no hand in the feature: not its author,
//! not its peer reviewer, and nobody recorded as a participant. Selection is
//! uniform over whoever is left, drawn from an injected [`RandomSource`] so
//! runs can be replayed from a seed.

use std::collections::BTreeSet;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::error::{CoordinationError, CoordinationResult};
use crate::store::{SharedRepository, StoreError};

/// Default reviewer roster
pub const DEFAULT_REVIEWERS: [&str; 7] = [
    "Dev-A",
    "Dev-B",
    "QA-A",
    "QA-B",
    "Architect-A",
    "Architect-B",
    "Architect-C",
];

/// Source of uniformly distributed integers
pub trait RandomSource: Send {
    fn next_u64(&mut self) -> u64;

    /// Uniform index in `0..len`; `len` must be non-zero
    fn index(&mut self, len: usize) -> usize {
        (self.next_u64() % len as u64) as usize
    }

    /// Uniform float in `[0, 1)`
    fn unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// xorshift64* generator; deterministic for a given seed
#[derive(Debug, Clone)]
pub struct XorShiftRng {
    state: u64,
}

impl XorShiftRng {
    /// Seeded generator. A zero seed would lock the generator at zero, so it
    /// is replaced by a fixed non-zero constant.
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    /// Seed from the current time
    pub fn from_entropy() -> Self {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        Self::new(nanos as u64)
    }
}

impl RandomSource for XorShiftRng {
    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}

/// Someone's involvement in a feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participation {
    pub role: String,
    pub contribution: String,
    pub timestamp: DateTime<Utc>,
}

/// Everyone who touched a feature
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureParticipants {
    pub participants: Vec<Participation>,
}

impl FeatureParticipants {
    pub fn roles(&self) -> BTreeSet<&str> {
        self.participants.iter().map(|p| p.role.as_str()).collect()
    }
}

fn invalid_feature(e: StoreError) -> CoordinationError {
    match e {
        StoreError::InvalidScope(scope) => {
            CoordinationError::validation(format!("invalid feature id {:?}", scope))
        }
        e => e.into(),
    }
}

/// Reviewer roster plus per-feature participation records
pub struct ReviewerPool {
    reviewers: Vec<String>,
    repo: SharedRepository<FeatureParticipants>,
    rng: Mutex<Box<dyn RandomSource>>,
    clock: SharedClock,
}

impl ReviewerPool {
    pub fn new(
        reviewers: Vec<String>,
        repo: SharedRepository<FeatureParticipants>,
        rng: Box<dyn RandomSource>,
        clock: SharedClock,
    ) -> Self {
        Self {
            reviewers,
            repo,
            rng: Mutex::new(rng),
            clock,
        }
    }

    pub fn reviewers(&self) -> &[String] {
        &self.reviewers
    }

    fn load(&self, feature_id: &str) -> CoordinationResult<FeatureParticipants> {
        self.repo
            .load(feature_id)
            .map(Option::unwrap_or_default)
            .map_err(invalid_feature)
    }

    /// Record that `role` contributed to `feature_id`
    pub fn track_participation(
        &self,
        feature_id: &str,
        role: &str,
        contribution: &str,
    ) -> CoordinationResult<()> {
        if role.trim().is_empty() {
            return Err(CoordinationError::validation("role must not be empty"));
        }
        let timestamp = self.clock.now();
        self.repo
            .modify_or_default(feature_id, |record| -> Result<(), StoreError> {
                record.participants.push(Participation {
                    role: role.to_string(),
                    contribution: contribution.to_string(),
                    timestamp,
                });
                Ok(())
            })
            .map_err(invalid_feature)?;
        debug!(feature_id, role, "Participation recorded");
        Ok(())
    }

    /// Participants recorded for a feature
    pub fn participants(&self, feature_id: &str) -> CoordinationResult<FeatureParticipants> {
        self.load(feature_id)
    }

    /// Reviewers with no involvement in the feature, in roster order
    pub fn independent_candidates(
        &self,
        author: &str,
        peer: &str,
        feature_id: &str,
    ) -> CoordinationResult<Vec<String>> {
        let record = self.load(feature_id)?;
        let mut excluded = record.roles();
        excluded.insert(author);
        excluded.insert(peer);

        Ok(self
            .reviewers
            .iter()
            .filter(|r| !excluded.contains(r.as_str()))
            .cloned()
            .collect())
    }

    /// Pick one independent reviewer uniformly at random
    pub fn select_independent(
        &self,
        author: &str,
        peer: &str,
        feature_id: &str,
    ) -> CoordinationResult<String> {
        let candidates = self.independent_candidates(author, peer, feature_id)?;
        if candidates.is_empty() {
            return Err(CoordinationError::validation(format!(
                "no independent reviewer available for {}",
                feature_id
            )));
        }

        let index = self
            .rng
            .lock()
            .map_err(|_| CoordinationError::Store(StoreError::LockPoisoned))?
            .index(candidates.len());
        let chosen = candidates[index].clone();
        info!(feature_id, reviewer = %chosen, pool = candidates.len(), "Tertiary reviewer selected");
        Ok(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::MemoryRepository;

    fn pool(seed: u64) -> ReviewerPool {
        ReviewerPool::new(
            DEFAULT_REVIEWERS.iter().map(|s| s.to_string()).collect(),
            MemoryRepository::shared(),
            Box::new(XorShiftRng::new(seed)),
            SystemClock::shared(),
        )
    }

    #[test]
    fn test_xorshift_is_deterministic() {
        let mut a = XorShiftRng::new(42);
        let mut b = XorShiftRng::new(42);
        let xs: Vec<u64> = (0..5).map(|_| a.next_u64()).collect();
        let ys: Vec<u64> = (0..5).map(|_| b.next_u64()).collect();
        assert_eq!(xs, ys);
        assert_ne!(XorShiftRng::new(0).next_u64(), 0);
    }

    #[test]
    fn test_unit_draws_stay_in_range() {
        let mut rng = XorShiftRng::new(11);
        assert!((0..1000).map(|_| rng.unit()).all(|x| (0.0..1.0).contains(&x)));
    }

    #[test]
    fn test_excludes_author_peer_and_participants() {
        let pool = pool(7);
        pool.track_participation("FEAT-1", "QA-A", "test plan").unwrap();
        pool.track_participation("FEAT-1", "Architect-B", "design").unwrap();

        let candidates = pool
            .independent_candidates("Dev-A", "Dev-B", "FEAT-1")
            .unwrap();
        assert_eq!(candidates, vec!["QA-B", "Architect-A", "Architect-C"]);

        for _ in 0..20 {
            let chosen = pool.select_independent("Dev-A", "Dev-B", "FEAT-1").unwrap();
            assert!(candidates.contains(&chosen));
        }
    }

    #[test]
    fn test_same_seed_same_choice() {
        let first = pool(99).select_independent("Dev-A", "QA-A", "FEAT-2").unwrap();
        let second = pool(99).select_independent("Dev-A", "QA-A", "FEAT-2").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_exhausted_pool_is_validation_error() {
        let pool = pool(1);
        for role in ["QA-A", "QA-B", "Architect-A", "Architect-B", "Architect-C"] {
            pool.track_participation("FEAT-3", role, "involved").unwrap();
        }
        let err = pool
            .select_independent("Dev-A", "Dev-B", "FEAT-3")
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");
    }
}
