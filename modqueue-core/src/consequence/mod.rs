//! Consequences (side effects as data).
//!
//! A consequence describes exactly one externally visible effect: a queue
//! row write, an audit entry, a notification, a block, a replayed save.
//! Decision code (the builder, the approval engine) never touches storage
//! or the save path directly; it requests consequences from a manager and
//! inspects the typed outcomes. Swapping the live manager for the
//! recording one makes every decision path assertable without real
//! storage.

mod manager;
mod recording;

pub use manager::{ConsequenceManager, LiveConsequenceManager};
pub use recording::RecordingConsequenceManager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::AuditEntry;
use crate::change::{ChangeId, PendingChange, RevisionId, UserRef};
use crate::repository::PendingAmend;
use crate::save::{PublishRequest, RenameRequest, SaveOutcome, SaveRequest};

/// All side effects the moderation core can request.
///
/// Each variant is a value object: its constructor arguments are its whole
/// state, and applying it performs exactly one effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Consequence {
    // =========================================================================
    // Queue row effects
    // =========================================================================
    /// Insert a fully-built pending change.
    InsertPending { change: PendingChange },

    /// Fold a newer submission into an existing preloadable row.
    AmendPending { id: ChangeId, amend: PendingAmend },

    /// Delete a row (successful approval, administrative purge).
    DeletePending { id: ChangeId },

    /// Mark a row rejected. `automatic` records a standing-block
    /// short-circuit rather than a reviewer decision.
    MarkRejected {
        id: ChangeId,
        by: UserRef,
        automatic: bool,
        at: DateTime<Utc>,
    },

    /// Reject every currently-pending row by an author, marking them
    /// batch-rejected for UI attribution.
    MarkRejectedBatch {
        author_name: String,
        by: UserRef,
        at: DateTime<Utc>,
    },

    /// Record that the row's base content was superseded.
    MarkConflict { id: ChangeId },

    /// Record the revision a manual merge landed as. Terminal.
    MarkMerged { id: ChangeId, revision: RevisionId },

    // =========================================================================
    // Bookkeeping effects
    // =========================================================================
    /// Append an audit-log entry.
    AppendAudit { entry: AuditEntry },

    /// Send a reviewer notification. Fire-and-forget.
    SendNotification {
        to: String,
        subject: String,
        body: String,
    },

    /// Put an author under a standing moderation block.
    SetBlock {
        author_name: String,
        by: UserRef,
        at: DateTime<Utc>,
    },

    /// Lift a standing moderation block.
    ClearBlock { author_name: String, by: UserRef },

    /// Record a fresh pending-change timestamp in the small cache behind
    /// the "new pending changes" indicator.
    RefreshPendingStamp { at: DateTime<Utc> },

    /// Drop the cached timestamp; the next reader recomputes it.
    InvalidatePendingStamp,

    // =========================================================================
    // Replay effects
    // =========================================================================
    /// Apply a queued edit through the normal save path.
    ApplySave(SaveRequest),

    /// Replay a queued rename.
    ApplyRename(RenameRequest),

    /// Publish a staged upload together with its description page.
    PublishUpload(PublishRequest),
}

impl Consequence {
    /// Short name for logging; never includes content.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InsertPending { .. } => "insert-pending",
            Self::AmendPending { .. } => "amend-pending",
            Self::DeletePending { .. } => "delete-pending",
            Self::MarkRejected { .. } => "mark-rejected",
            Self::MarkRejectedBatch { .. } => "mark-rejected-batch",
            Self::MarkConflict { .. } => "mark-conflict",
            Self::MarkMerged { .. } => "mark-merged",
            Self::AppendAudit { .. } => "append-audit",
            Self::SendNotification { .. } => "send-notification",
            Self::SetBlock { .. } => "set-block",
            Self::ClearBlock { .. } => "clear-block",
            Self::RefreshPendingStamp { .. } => "refresh-pending-stamp",
            Self::InvalidatePendingStamp => "invalidate-pending-stamp",
            Self::ApplySave(_) => "apply-save",
            Self::ApplyRename(_) => "apply-rename",
            Self::PublishUpload(_) => "publish-upload",
        }
    }
}

/// Result of a (un)block consequence: reaching the desired end state is
/// success whether or not anything changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockOutcome {
    /// True when the author was already in the requested state.
    pub noop: bool,
}

/// Typed result of applying a consequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsequenceOutcome {
    /// Row id assigned by an insert.
    Inserted(ChangeId),
    /// Whether a single-row mutation actually changed anything.
    Changed(bool),
    /// Affected-row count of a batch mutation.
    BatchChanged(u64),
    /// Outcome of a replayed save/rename/publish.
    Saved(SaveOutcome),
    /// Outcome of a block/unblock.
    Block(BlockOutcome),
    /// Effects with nothing to report (audit, notification, cache).
    Done,
}

impl ConsequenceOutcome {
    pub fn inserted_id(&self) -> Option<ChangeId> {
        match self {
            Self::Inserted(id) => Some(*id),
            _ => None,
        }
    }

    pub fn did_change(&self) -> Option<bool> {
        match self {
            Self::Changed(changed) => Some(*changed),
            _ => None,
        }
    }

    pub fn batch_count(&self) -> Option<u64> {
        match self {
            Self::BatchChanged(count) => Some(*count),
            _ => None,
        }
    }

    pub fn saved(&self) -> Option<&SaveOutcome> {
        match self {
            Self::Saved(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn block(&self) -> Option<BlockOutcome> {
        match self {
            Self::Block(outcome) => Some(*outcome),
            _ => None,
        }
    }
}
