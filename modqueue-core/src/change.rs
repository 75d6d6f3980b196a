//! Queue row types for pending changes.
//!
//! This module defines the `PendingChange` row and the value types that
//! make it up. Following the principle of "make illegal states
//! unrepresentable", the change kind is a closed enum: a move carries a
//! destination and nothing else, an upload carries a stash key and nothing
//! else.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Newtype for a queue row id. Monotonically assigned by the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeId(pub i64);

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype for a content revision id in the platform's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionId(pub i64);

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype for a key into the staged-file store (uploads only).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StashKey(pub String);

impl fmt::Display for StashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque per-author/session token used to find "my own still-pending edit
/// on this page" without requiring login.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityToken(pub String);

impl IdentityToken {
    /// Generate a fresh token for a new anonymous session.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Namespace + title of a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRef {
    pub namespace: i32,
    pub title: String,
}

impl PageRef {
    pub fn new(namespace: i32, title: impl Into<String>) -> Self {
        Self {
            namespace,
            title: title.into(),
        }
    }

    pub fn same_page(&self, other: &PageRef) -> bool {
        self.namespace == other.namespace && self.title == other.title
    }
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.title)
    }
}

/// User identifier + display name. `id: None` means anonymous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: Option<u64>,
    pub name: String,
}

impl UserRef {
    pub fn registered(id: u64, name: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: name.into(),
        }
    }

    pub fn anonymous(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// The identity under which the preloadable-row uniqueness invariant is
/// enforced: a registered account, or an anonymous session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthorIdentity {
    Registered(u64),
    Anonymous(IdentityToken),
}

impl AuthorIdentity {
    /// Stable key for repository lookups and uniqueness enforcement.
    pub fn key(&self) -> String {
        match self {
            Self::Registered(id) => format!("user:{}", id),
            Self::Anonymous(token) => format!("anon:{}", token.0),
        }
    }

    /// Reconstruct an identity from its `key()` form.
    pub fn from_key(key: &str) -> Option<Self> {
        if let Some(id) = key.strip_prefix("user:") {
            return id.parse().ok().map(Self::Registered);
        }
        key.strip_prefix("anon:")
            .map(|token| Self::Anonymous(IdentityToken(token.to_string())))
    }
}

/// What kind of operation this row holds. Closed set: the approval engine
/// dispatches replay on exactly these three variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// An ordinary content edit. Uploads are the edit variant that carries
    /// a stash reference; moves carry a destination instead of text.
    Edit,
    Move { destination: PageRef },
    Upload { stash_key: StashKey },
}

impl ChangeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::Move { .. } => "move",
            Self::Upload { .. } => "upload",
        }
    }
}

/// Minor/bot/new-page booleans carried through to the replayed save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFlags {
    pub minor: bool,
    pub bot: bool,
    pub new_page: bool,
}

/// Request provenance captured at interception time and reproduced by the
/// replay overrides at approval time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub origin_ip: String,
    pub forwarded_for: Option<String>,
    pub user_agent: String,
    pub tags: Vec<String>,
}

/// Whether the re-approval window boundary itself still admits a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowBoundary {
    /// A row rejected exactly `window` ago is still re-approvable.
    Inclusive,
    /// A row rejected exactly `window` ago is terminal.
    Exclusive,
}

/// Composite moderation state of a queue row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationState {
    pub rejected: bool,
    pub rejected_by: Option<UserRef>,
    pub rejected_automatically: bool,
    pub rejected_in_batch: bool,
    pub rejected_at: Option<DateTime<Utc>>,
    pub conflict: bool,
    pub merged_into: Option<RevisionId>,
}

impl ModerationState {
    /// State of a freshly intercepted change.
    pub fn pending() -> Self {
        Self::default()
    }

    /// State of a change short-circuited because its author is blocked.
    /// No reviewer identity: nobody pressed a button.
    pub fn auto_rejected(at: DateTime<Utc>) -> Self {
        Self {
            rejected: true,
            rejected_by: None,
            rejected_automatically: true,
            rejected_in_batch: false,
            rejected_at: Some(at),
            conflict: false,
            merged_into: None,
        }
    }

    pub fn is_merged(&self) -> bool {
        self.merged_into.is_some()
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected
    }

    /// Whether a rejected row is still inside the re-approval window.
    ///
    /// Rows that were never rejected are always inside the window.
    pub fn within_reapproval_window(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        boundary: WindowBoundary,
    ) -> bool {
        let Some(rejected_at) = self.rejected_at else {
            return true;
        };
        let age = now - rejected_at;
        match boundary {
            WindowBoundary::Inclusive => age <= window,
            WindowBoundary::Exclusive => age < window,
        }
    }
}

/// One row of the pending-change queue.
///
/// Construction computes every derived field before the single insert; no
/// row is ever durably stored half-built. The queue holds pending or
/// rejected state only: approval deletes the row, and approved changes
/// live on in the platform's normal history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: ChangeId,
    pub kind: ChangeKind,
    pub author: UserRef,
    pub identity: AuthorIdentity,
    pub target: PageRef,
    /// Revision the change was computed against. `None` for new pages.
    pub base_revision: Option<RevisionId>,
    /// Full resulting text after the change, not a delta.
    pub content: String,
    pub old_len: u64,
    pub new_len: u64,
    pub summary: String,
    pub flags: ChangeFlags,
    pub provenance: Provenance,
    pub state: ModerationState,
    /// Whether a subsequent edit by the same author to the same page may
    /// silently update this row in place.
    pub preloadable: bool,
    /// Original submission time; reproduced in history by the replay
    /// overrides so the approved change appears when it was written.
    pub received_at: DateTime<Utc>,
}

impl PendingChange {
    /// Repository key under which the preloadable invariant is enforced.
    pub fn author_key(&self) -> String {
        self.identity.key()
    }

    /// Validate that this row may be approved right now.
    ///
    /// Ordering matters: "already merged" wins over every other complaint,
    /// since merged rows are terminal and immutable.
    pub fn approvable(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        boundary: WindowBoundary,
    ) -> Result<(), crate::error::InvalidStateReason> {
        use crate::error::InvalidStateReason;

        if self.state.is_merged() {
            return Err(InvalidStateReason::AlreadyMerged);
        }
        if self.state.conflict {
            return Err(InvalidStateReason::ConflictPendingMerge);
        }
        if self.state.is_rejected()
            && !self.state.within_reapproval_window(now, window, boundary)
        {
            return Err(InvalidStateReason::RejectedTooLongAgo);
        }
        Ok(())
    }
}
