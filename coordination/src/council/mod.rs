//! Architecture council voting
//!
//! A fixed electorate of three votes APPROVE/REJECT on a proposal:
//!
//! - two ballots form a quorum; strict majority decides
//! - a 1-1 split asks the remaining elector for an expedited ballot
//! - a missed deadline or an unbroken tie escalates to the user
//!
//! [`rules`] holds the pure quorum/majority functions; [`CouncilVote`] is the
//! persisted service built on them.

pub mod rules;
pub mod types;
pub mod vote;

pub use rules::{missing_voters, resolve, validate_quorum, MINIMUM_QUORUM};
pub use types::{
    CastVote, Decision, Electorate, EscalationReason, EscalationRecord, Position, Proposal,
    QuorumCheck, QuorumScenario, Resolution, StatusReport, TieBreakOutcome, VoteRecord,
    VoteStatus, VoteTransition, COUNCIL_SIZE,
};
pub use vote::{CouncilSettings, CouncilVote, TIE_BREAKER_DEADLINE_HOURS, VOTING_TIMEOUT_HOURS};
