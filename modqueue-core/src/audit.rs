//! Audit-log entries for moderation actions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::change::{ChangeId, PageRef, RevisionId, UserRef};

/// What a reviewer (or the system) did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    Approve,
    ApproveAll,
    Reject,
    /// An approve that found the queued text byte-identical to the current
    /// content and was therefore converted into a rejection.
    RejectNoChange,
    RejectAll,
    Merge,
    Block,
    Unblock,
}

impl AuditAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::ApproveAll => "approve-all",
            Self::Reject => "reject",
            Self::RejectNoChange => "reject-no-change",
            Self::RejectAll => "reject-all",
            Self::Merge => "merge",
            Self::Block => "block",
            Self::Unblock => "unblock",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "approve" => Some(Self::Approve),
            "approve-all" => Some(Self::ApproveAll),
            "reject" => Some(Self::Reject),
            "reject-no-change" => Some(Self::RejectNoChange),
            "reject-all" => Some(Self::RejectAll),
            "merge" => Some(Self::Merge),
            "block" => Some(Self::Block),
            "unblock" => Some(Self::Unblock),
            _ => None,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One audit-log entry.
///
/// Fields are optional where the action has no value for them: a block has
/// no target page, a batch rejection has no single change id, only an
/// approve records a revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub performed_by: UserRef,
    pub target: Option<PageRef>,
    /// The author whose change (or account) was acted on.
    pub subject: Option<UserRef>,
    pub change: Option<ChangeId>,
    /// Revision created by the replayed save, for approve and merge.
    pub revision: Option<RevisionId>,
    /// Affected row count, for batch actions.
    pub count: Option<u64>,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    /// Entry with every optional field empty; callers fill in what the
    /// action actually has.
    pub fn new(action: AuditAction, performed_by: UserRef, at: DateTime<Utc>) -> Self {
        Self {
            action,
            performed_by,
            target: None,
            subject: None,
            change: None,
            revision: None,
            count: None,
            at,
        }
    }

    pub fn with_target(mut self, target: PageRef) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_subject(mut self, subject: UserRef) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn with_change(mut self, change: ChangeId) -> Self {
        self.change = Some(change);
        self
    }

    pub fn with_revision(mut self, revision: RevisionId) -> Self {
        self.revision = Some(revision);
        self
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }
}
