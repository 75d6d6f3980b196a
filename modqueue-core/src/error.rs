//! Error taxonomy for moderation operations.
//!
//! Expected business failures (a missing row, an action that is not valid
//! for the row's current state) are typed values returned to the caller,
//! which owns user-facing presentation. Only genuinely unexpected
//! conditions (storage unavailable, the save pipeline failing outside its
//! documented outcomes) surface as the fatal variants.

use std::fmt;

use crate::change::ChangeId;

/// Storage-level failure from a repository backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// The backend failed while performing `operation`.
    Storage { operation: String, message: String },

    /// A uniqueness constraint was violated (race on the preloadable row).
    ///
    /// Recovered by the builder, which retries the insert as an amend of
    /// the row that won the race. Never surfaced to API callers.
    UniqueViolation { key: String },
}

impl RepositoryError {
    pub fn storage(operation: &str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn unique_violation(key: impl Into<String>) -> Self {
        Self::UniqueViolation { key: key.into() }
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage { operation, message } => {
                write!(f, "storage failure during {}: {}", operation, message)
            }
            Self::UniqueViolation { key } => {
                write!(f, "uniqueness constraint violated for {}", key)
            }
        }
    }
}

impl std::error::Error for RepositoryError {}

/// Why an operation is not valid for the row's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidStateReason {
    /// The row has `merged_into` set and is terminal.
    AlreadyMerged,
    /// Reject was requested for a row that is already rejected.
    AlreadyRejected,
    /// The row was rejected longer ago than the re-approval window allows.
    RejectedTooLongAgo,
    /// Approve was requested for a conflicted row; merge is the only way out.
    ConflictPendingMerge,
    /// Merge was requested for a row that has no conflict to resolve.
    NoConflict,
    /// The merge save reported no change, so there is no revision to record.
    MergeProducedNoChange,
}

impl fmt::Display for InvalidStateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyMerged => write!(f, "change has already been merged"),
            Self::AlreadyRejected => write!(f, "change is already rejected"),
            Self::RejectedTooLongAgo => write!(f, "change was rejected too long ago"),
            Self::ConflictPendingMerge => {
                write!(f, "change has a conflict and must be merged first")
            }
            Self::NoConflict => write!(f, "change has no conflict to merge"),
            Self::MergeProducedNoChange => write!(f, "merge produced no change"),
        }
    }
}

/// Top-level error type for moderation operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationError {
    /// The row does not exist (already approved, purged, or fabricated id).
    NotFound { id: ChangeId },

    /// The operation is not valid for the row's current state.
    InvalidState(InvalidStateReason),

    /// The reviewer lacks the trust level the action requires.
    PermissionDenied { action: &'static str },

    /// The replayed save failed for reasons unrelated to moderation.
    /// Carries the upstream message verbatim.
    UpstreamSave { message: String },

    /// Storage-level failure.
    Storage(RepositoryError),

    /// A collaborator returned something outside its documented contract.
    Internal(String),
}

impl ModerationError {
    pub fn not_found(id: ChangeId) -> Self {
        Self::NotFound { id }
    }

    pub fn invalid_state(reason: InvalidStateReason) -> Self {
        Self::InvalidState(reason)
    }
}

impl fmt::Display for ModerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "change {} not found", id),
            Self::InvalidState(reason) => write!(f, "{}", reason),
            Self::PermissionDenied { action } => {
                write!(f, "reviewer is not allowed to {}", action)
            }
            Self::UpstreamSave { message } => write!(f, "save pipeline failed: {}", message),
            Self::Storage(err) => write!(f, "{}", err),
            Self::Internal(message) => write!(f, "internal error: {}", message),
        }
    }
}

impl std::error::Error for ModerationError {}

impl From<RepositoryError> for ModerationError {
    fn from(err: RepositoryError) -> Self {
        Self::Storage(err)
    }
}
