//! Pure quorum and majority rules

use std::collections::BTreeSet;

use super::types::{
    CastVote, Decision, Electorate, QuorumCheck, QuorumScenario, Resolution, VoteStatus,
    COUNCIL_SIZE,
};

/// Minimum ballots for a binding decision
pub const MINIMUM_QUORUM: usize = 2;

/// Classify a ballot count.
///
/// | ballots | valid | quorum | scenario            |
/// |---------|-------|--------|---------------------|
/// | 3       | yes   | yes    | FULL_COUNCIL        |
/// | 2       | yes   | yes    | MINIMUM_QUORUM      |
/// | 1       | no    | no     | INSUFFICIENT_QUORUM |
/// | 0       | no    | no     | TIMEOUT_NO_VOTES    |
pub fn validate_quorum(votes_cast: usize) -> QuorumCheck {
    let (met, scenario) = match votes_cast {
        n if n >= COUNCIL_SIZE => (true, QuorumScenario::FullCouncil),
        n if n >= MINIMUM_QUORUM => (true, QuorumScenario::MinimumQuorum),
        1 => (false, QuorumScenario::InsufficientQuorum),
        _ => (false, QuorumScenario::TimeoutNoVotes),
    };
    QuorumCheck {
        valid: met,
        quorum_met: met,
        scenario,
    }
}

/// Strict majority; equal counts are a TIE
pub fn resolve(votes: &[CastVote]) -> Resolution {
    let approve_count = votes
        .iter()
        .filter(|v| v.decision == Decision::Approve)
        .count();
    let reject_count = votes.len() - approve_count;

    let outcome = match approve_count.cmp(&reject_count) {
        std::cmp::Ordering::Greater => VoteStatus::Approved,
        std::cmp::Ordering::Less => VoteStatus::Rejected,
        std::cmp::Ordering::Equal => VoteStatus::Tie,
    };

    Resolution {
        outcome,
        approve_count,
        reject_count,
    }
}

/// Electors who have not voted, in electorate order
pub fn missing_voters(electorate: &Electorate, votes: &[CastVote]) -> Vec<String> {
    let voted: BTreeSet<&str> = votes.iter().map(|v| v.voter.as_str()).collect();
    electorate
        .members()
        .iter()
        .filter(|m| !voted.contains(m.as_str()))
        .cloned()
        .collect()
}
