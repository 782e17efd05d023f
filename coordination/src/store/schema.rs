//! Storage namespaces for coordination state
//!
//! Each namespace is a directory for the JSON backend and a column family for
//! the RocksDB backend.

/// Namespace for the priority task queue
pub const CF_QUEUE: &str = "queue";

/// Namespace for the assignment scheduler (agents, audit trail)
pub const CF_SCHEDULER: &str = "scheduler";

/// Namespace for write-lock state
pub const CF_LOCKS: &str = "locks";

/// Namespace for council vote records
pub const CF_VOTES: &str = "votes";

/// Namespace for gate rollback audit entries
pub const CF_ROLLBACKS: &str = "rollbacks";

/// Namespace for reviewer participation tracking
pub const CF_PARTICIPANTS: &str = "participants";

/// Namespace for reviewer collusion detections
pub const CF_COLLUSION: &str = "collusion";

/// Namespace for per-user second-factor attempt counters
pub const CF_TWO_FACTOR: &str = "two_factor";

/// Namespace for co-signature grants and the spot-check queue
pub const CF_COSIGN: &str = "cosign";

/// All namespaces
pub const ALL_CFS: &[&str] = &[
    CF_QUEUE,
    CF_SCHEDULER,
    CF_LOCKS,
    CF_VOTES,
    CF_ROLLBACKS,
    CF_PARTICIPANTS,
    CF_COLLUSION,
    CF_TWO_FACTOR,
    CF_COSIGN,
];

/// Well-known scope names for singleton resources
pub mod scopes {
    /// The default task queue
    pub const DEFAULT_QUEUE: &str = "default";

    /// The default scheduler table
    pub const DEFAULT_SCHEDULER: &str = "default";

    /// The shared write lock
    pub const WRITE_LOCK: &str = "write-lock";

    /// Rollback audit trail
    pub const ROLLBACK_LOG: &str = "audit";

    /// Collusion detection audit trail
    pub const COLLUSION_LOG: &str = "detections";

    /// Co-signature decisions and spot-check queue
    pub const COSIGN_LEDGER: &str = "ledger";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaces_unique() {
        let mut names = ALL_CFS.to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ALL_CFS.len());
    }
}
