//! Coordination error types
//!
//! Every failure the core can report is a value of [`CoordinationError`].
//! Nothing here panics across the library boundary: callers match on
//! [`ErrorKind`] (or the machine-readable [`CoordinationError::code`]) and
//! decide how to recover.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Result type alias for coordination operations
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Coarse error classification, stable across releases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Malformed input: unknown voter/agent, empty resource set, bad priority
    Validation,
    /// Operation conflicts with current state: duplicate vote, non-holder release
    StateConflict,
    /// Unknown vote, lock request, agent, or item
    NotFound,
    /// A dependent workflow lacks a required co-signature
    Authorization,
    /// Persistence collaborator failed
    Store,
}

impl ErrorKind {
    /// Whether the caller can fix the request and try again
    pub fn is_recoverable(self) -> bool {
        !matches!(self, Self::Store)
    }

    /// Process exit code for thin command wrappers (1 recoverable, 2 hard)
    pub fn exit_code(self) -> i32 {
        if self.is_recoverable() {
            1
        } else {
            2
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::StateConflict => write!(f, "state_conflict"),
            Self::NotFound => write!(f, "not_found"),
            Self::Authorization => write!(f, "authorization"),
            Self::Store => write!(f, "store"),
        }
    }
}

/// Errors returned by the coordination core
#[derive(Error, Debug)]
pub enum CoordinationError {
    /// Generic input validation failure
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// Voter is not part of the fixed electorate
    #[error("Voter {voter} is not a member of the electorate")]
    UnknownVoter { voter: String },

    /// Lock request without any resources
    #[error("Lock request from {requester} names no resources")]
    EmptyResourceSet { requester: String },

    /// Priority label could not be parsed
    #[error("Malformed priority: {value}")]
    MalformedPriority { value: String },

    /// Voter already cast a ballot for this vote
    #[error("{voter} already voted on {vote_id}")]
    DuplicateVote { vote_id: String, voter: String },

    /// Release attempted by someone who does not hold the lock
    #[error("{requester} does not hold the lock (holder: {holder:?})")]
    NotLockHolder {
        requester: String,
        holder: Option<String>,
    },

    /// Generic state conflict
    #[error("State conflict: {message}")]
    StateConflict { message: String },

    /// Vote identifier unknown
    #[error("Vote not found: {vote_id}")]
    VoteNotFound { vote_id: String },

    /// Lock request unknown
    #[error("Lock request not found: {requester}")]
    LockRequestNotFound { requester: String },

    /// Agent identifier unknown
    #[error("Agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    /// Work item unknown
    #[error("Work item not found: {item_id}")]
    ItemNotFound { item_id: String },

    /// No pending co-signature request with this id
    #[error("Co-signature request not found: {request_id}")]
    CoSignatureRequestNotFound { request_id: String },

    /// Assignment had nobody to go to
    #[error("No eligible agents for item {item_id}")]
    NoEligibleAgents { item_id: String },

    /// Missing co-signature on an authorized workflow
    #[error("Authorization denied: {message}")]
    Authorization { message: String },

    /// Persistence collaborator failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl CoordinationError {
    /// Convenience constructor for validation failures
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Convenience constructor for state conflicts
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::StateConflict {
            message: message.into(),
        }
    }

    /// Error classification
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. }
            | Self::UnknownVoter { .. }
            | Self::EmptyResourceSet { .. }
            | Self::MalformedPriority { .. } => ErrorKind::Validation,
            Self::DuplicateVote { .. }
            | Self::NotLockHolder { .. }
            | Self::StateConflict { .. } => ErrorKind::StateConflict,
            Self::VoteNotFound { .. }
            | Self::LockRequestNotFound { .. }
            | Self::AgentNotFound { .. }
            | Self::ItemNotFound { .. }
            | Self::CoSignatureRequestNotFound { .. }
            | Self::NoEligibleAgents { .. } => ErrorKind::NotFound,
            Self::Authorization { .. } => ErrorKind::Authorization,
            Self::Store(_) => ErrorKind::Store,
        }
    }

    /// Machine-readable reason code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_FAILED",
            Self::UnknownVoter { .. } => "UNKNOWN_VOTER",
            Self::EmptyResourceSet { .. } => "EMPTY_RESOURCE_SET",
            Self::MalformedPriority { .. } => "MALFORMED_PRIORITY",
            Self::DuplicateVote { .. } => "DUPLICATE_VOTE",
            Self::NotLockHolder { .. } => "NOT_LOCK_HOLDER",
            Self::StateConflict { .. } => "STATE_CONFLICT",
            Self::VoteNotFound { .. } => "VOTE_NOT_FOUND",
            Self::LockRequestNotFound { .. } => "LOCK_REQUEST_NOT_FOUND",
            Self::AgentNotFound { .. } => "AGENT_NOT_FOUND",
            Self::ItemNotFound { .. } => "ITEM_NOT_FOUND",
            Self::CoSignatureRequestNotFound { .. } => "COSIGN_REQUEST_NOT_FOUND",
            Self::NoEligibleAgents { .. } => "NO_ELIGIBLE_AGENTS",
            Self::Authorization { .. } => "AUTHORIZATION_DENIED",
            Self::Store(_) => "STORE_FAILURE",
        }
    }

    /// Process exit code for command wrappers
    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }
}
