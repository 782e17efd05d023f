//! Council vote records, statuses and outcomes

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoordinationError, CoordinationResult};
use crate::priority::Urgency;

/// Number of electors on the council
pub const COUNCIL_SIZE: usize = 3;

/// Lifecycle of a council vote.
///
/// ```text
/// PENDING ──► APPROVED | REJECTED | ESCALATED_TO_USER
///    │
///    └──► TIE ──► PENDING_TIE_BREAKER ──► APPROVED | REJECTED | ESCALATED_TO_USER
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteStatus {
    /// Collecting votes
    Pending,
    /// Majority approved
    Approved,
    /// Majority rejected
    Rejected,
    /// Quorum met with equal counts
    Tie,
    /// Waiting on the remaining elector's expedited vote
    PendingTieBreaker,
    /// Handed to the human user
    EscalatedToUser,
}

impl VoteStatus {
    /// Whether the vote is settled
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Rejected | Self::EscalatedToUser
        )
    }

    /// Statuses reachable from this one
    pub fn valid_transitions(self) -> &'static [VoteStatus] {
        match self {
            Self::Pending => &[
                Self::Approved,
                Self::Rejected,
                Self::Tie,
                Self::EscalatedToUser,
            ],
            Self::Tie => &[
                Self::PendingTieBreaker,
                Self::Approved,
                Self::Rejected,
                Self::EscalatedToUser,
            ],
            Self::PendingTieBreaker => &[Self::Approved, Self::Rejected, Self::EscalatedToUser],
            Self::Approved | Self::Rejected | Self::EscalatedToUser => &[],
        }
    }
}

impl std::fmt::Display for VoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Tie => write!(f, "TIE"),
            Self::PendingTieBreaker => write!(f, "PENDING_TIE_BREAKER"),
            Self::EscalatedToUser => write!(f, "ESCALATED_TO_USER"),
        }
    }
}

/// An elector's ballot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Reject,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "APPROVE"),
            Self::Reject => write!(f, "REJECT"),
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "APPROVE" => Ok(Self::Approve),
            "REJECT" => Ok(Self::Reject),
            other => Err(CoordinationError::validation(format!(
                "decision must be APPROVE or REJECT, got {:?}",
                other
            ))),
        }
    }
}

/// A recorded ballot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastVote {
    pub voter: String,
    pub decision: Decision,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

/// The fixed set of three distinct electors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Electorate {
    members: Vec<String>,
}

impl Electorate {
    /// Build an electorate; requires exactly three distinct, non-blank identities
    pub fn new<I, S>(members: I) -> CoordinationResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members: Vec<String> = members
            .into_iter()
            .map(|m| m.into().trim().to_string())
            .collect();

        if members.iter().any(String::is_empty) {
            return Err(CoordinationError::validation(
                "electorate members must not be blank",
            ));
        }
        let distinct: BTreeSet<&str> = members.iter().map(String::as_str).collect();
        if members.len() != COUNCIL_SIZE || distinct.len() != COUNCIL_SIZE {
            return Err(CoordinationError::validation(format!(
                "electorate needs exactly {} distinct members, got {:?}",
                COUNCIL_SIZE, members
            )));
        }
        Ok(Self { members })
    }

    /// Whether `voter` may vote
    pub fn contains(&self, voter: &str) -> bool {
        self.members.iter().any(|m| m == voter)
    }

    /// Members in configured order
    pub fn members(&self) -> &[String] {
        &self.members
    }
}

impl Default for Electorate {
    fn default() -> Self {
        Self {
            members: vec![
                "Architect-A".to_string(),
                "Architect-B".to_string(),
                "Architect-C".to_string(),
            ],
        }
    }
}

impl TryFrom<Vec<String>> for Electorate {
    type Error = CoordinationError;

    fn try_from(members: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(members)
    }
}

impl From<Electorate> for Vec<String> {
    fn from(electorate: Electorate) -> Self {
        electorate.members
    }
}

/// What is being voted on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl Proposal {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }
}

/// A status change in a vote's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTransition {
    pub from: VoteStatus,
    pub to: VoteStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Why a vote was handed to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationReason {
    /// Deadline passed without a single ballot
    TimeoutNoVotes,
    /// Deadline passed with a single ballot
    QuorumNotMet,
    /// The tie could not be broken
    TieUnresolved,
}

impl EscalationReason {
    /// HIGH only when nobody voted at all
    pub fn urgency(self) -> Urgency {
        match self {
            Self::TimeoutNoVotes => Urgency::High,
            Self::QuorumNotMet | Self::TieUnresolved => Urgency::Medium,
        }
    }
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimeoutNoVotes => write!(f, "TIMEOUT_NO_VOTES"),
            Self::QuorumNotMet => write!(f, "QUORUM_NOT_MET"),
            Self::TieUnresolved => write!(f, "TIE_UNRESOLVED"),
        }
    }
}

/// One elector's stated position, as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub voter: String,
    pub decision: Decision,
    pub reasoning: String,
}

/// Everything the user needs to settle a vote the council could not
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub vote_id: String,
    pub reason: EscalationReason,
    pub positions: Vec<Position>,
    pub escalated_at: DateTime<Utc>,
    pub urgency: Urgency,
}

/// Persisted state of one council vote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    /// `VOTE-` followed by eight uppercase hex digits
    pub vote_id: String,
    pub proposal: Proposal,
    pub electorate: Electorate,
    /// Ballots in cast order; at most one per elector
    pub votes: Vec<CastVote>,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    /// Set when the tie-break request goes out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie_break_deadline: Option<DateTime<Utc>>,
    pub status: VoteStatus,
    #[serde(default)]
    pub transitions: Vec<VoteTransition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationRecord>,
}

impl VoteRecord {
    /// Fresh PENDING record
    pub fn new(
        vote_id: String,
        proposal: Proposal,
        electorate: Electorate,
        created_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            vote_id,
            proposal,
            electorate,
            votes: Vec::new(),
            created_at,
            deadline,
            tie_break_deadline: None,
            status: VoteStatus::Pending,
            transitions: Vec::new(),
            escalation: None,
        }
    }

    /// Whether `voter` has already cast a ballot
    pub fn has_voted(&self, voter: &str) -> bool {
        self.votes.iter().any(|v| v.voter == voter)
    }

    /// Move to `to`, recording why
    pub fn transition(
        &mut self,
        to: VoteStatus,
        reason: &str,
        at: DateTime<Utc>,
    ) -> CoordinationResult<()> {
        if !self.status.valid_transitions().contains(&to) {
            return Err(CoordinationError::conflict(format!(
                "vote {} cannot move from {} to {}",
                self.vote_id, self.status, to
            )));
        }
        self.transitions.push(VoteTransition {
            from: self.status,
            to,
            timestamp: at,
            reason: reason.to_string(),
        });
        self.status = to;
        Ok(())
    }

    /// Ballots as user-facing positions
    pub fn positions(&self) -> Vec<Position> {
        self.votes
            .iter()
            .map(|v| Position {
                voter: v.voter.clone(),
                decision: v.decision,
                reasoning: v.reasoning.clone(),
            })
            .collect()
    }
}

/// Named quorum outcomes by ballot count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuorumScenario {
    FullCouncil,
    MinimumQuorum,
    InsufficientQuorum,
    TimeoutNoVotes,
}

/// Result of a quorum check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCheck {
    pub valid: bool,
    pub quorum_met: bool,
    pub scenario: QuorumScenario,
}

/// Majority count over a set of ballots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// APPROVED, REJECTED or TIE
    pub outcome: VoteStatus,
    pub approve_count: usize,
    pub reject_count: usize,
}

/// What `handle_tie` did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TieBreakOutcome {
    /// Expedited request sent to the remaining elector
    Requested {
        voter: String,
        deadline: DateTime<Utc>,
    },
    /// The tie went to the user
    Escalated(EscalationRecord),
}

/// Answer from `check_status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub vote_id: String,
    pub status: VoteStatus,
    pub quorum_met: bool,
    pub votes_cast: usize,
    pub approve_count: usize,
    pub reject_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationRecord>,
}
