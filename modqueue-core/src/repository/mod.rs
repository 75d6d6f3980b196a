//! Repository abstraction for the moderation table.
//!
//! This module defines the `ModerationRepository` trait that abstracts
//! storage of pending changes, the audit log, and the author block list.
//! Implementations provide different backends (in-memory for tests,
//! SQLite for deployments).
//!
//! Mutating operations are conditional: they report whether a row was
//! actually changed, so callers can close read-then-write races at the
//! storage layer instead of trusting an earlier read.

mod memory;
pub mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::AuditEntry;
use crate::change::{ChangeId, PageRef, PendingChange, RevisionId, UserRef};
use crate::error::RepositoryError;

/// Fields a preload fold may update on an existing row.
///
/// Everything else (base revision, old length, provenance of the first
/// submission) keeps the original row's values: conflict detection still
/// runs against the revision the first edit was computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAmend {
    pub content: String,
    pub new_len: u64,
    pub summary: String,
    pub received_at: DateTime<Utc>,
}

/// Storage seam for the moderation table.
///
/// `insert` must enforce the preloadable uniqueness invariant: at most one
/// preloadable row per (author identity, target) pair, reported as
/// `RepositoryError::UniqueViolation` when violated. All single-row
/// mutations return `Ok(false)` when the row was missing or its state
/// precondition no longer held, so the caller sees lost races explicitly.
#[async_trait]
pub trait ModerationRepository: Send + Sync {
    /// Insert a fully-built row and return its assigned id.
    async fn insert(&self, change: &PendingChange) -> Result<ChangeId, RepositoryError>;

    /// Fold a newer submission into an existing preloadable row.
    async fn amend(&self, id: ChangeId, amend: &PendingAmend) -> Result<bool, RepositoryError>;

    async fn get(&self, id: ChangeId) -> Result<Option<PendingChange>, RepositoryError>;

    /// Conditional delete; `false` means some other caller got there first.
    async fn delete(&self, id: ChangeId) -> Result<bool, RepositoryError>;

    /// The author's still-preloadable row for this page, if any.
    async fn find_preloadable(
        &self,
        author_key: &str,
        target: &PageRef,
    ) -> Result<Option<PendingChange>, RepositoryError>;

    /// Currently-pending rows (not rejected, not conflicted, not merged)
    /// by the named author, in submission order.
    async fn list_pending_by_author(
        &self,
        author_name: &str,
    ) -> Result<Vec<PendingChange>, RepositoryError>;

    /// Every row in the queue, in submission order. Listing surface for
    /// the operator CLI and tests.
    async fn list_all(&self) -> Result<Vec<PendingChange>, RepositoryError>;

    /// Mark a row rejected. A manual rejection also clears preloadability
    /// so the author's next edit opens a fresh row; an automatic one keeps
    /// it, so a blocked author cannot tell they were short-circuited.
    /// Conditional on the row being neither rejected nor merged.
    async fn mark_rejected(
        &self,
        id: ChangeId,
        by: &UserRef,
        automatic: bool,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Reject every currently-pending row by the author in one statement,
    /// marking them as batch-rejected. Returns the affected count.
    async fn reject_all_by_author(
        &self,
        author_name: &str,
        by: &UserRef,
        at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// Conditional on the row existing and not being merged.
    async fn mark_conflict(&self, id: ChangeId) -> Result<bool, RepositoryError>;

    /// Conditional on the row not already being merged; merged rows are
    /// immutable and terminal.
    async fn mark_merged(
        &self,
        id: ChangeId,
        revision: RevisionId,
    ) -> Result<bool, RepositoryError>;

    // =========================================================================
    // Author block list
    // =========================================================================

    async fn is_blocked(&self, author_name: &str) -> Result<bool, RepositoryError>;

    /// `false` if the author was already blocked (idempotent no-op).
    async fn set_block(
        &self,
        author_name: &str,
        by: &UserRef,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// `false` if the author was not blocked (idempotent no-op).
    async fn clear_block(&self, author_name: &str) -> Result<bool, RepositoryError>;

    // =========================================================================
    // Audit log
    // =========================================================================

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), RepositoryError>;

    async fn list_audit(&self) -> Result<Vec<AuditEntry>, RepositoryError>;
}
