//! Approval engine.
//!
//! State machine over queue rows: `Pending -> {Approved (row deleted),
//! Rejected, Conflict, Merged}`. Every operation re-loads its row fresh
//! immediately before mutating it, and every mutation is conditional at
//! the storage layer, so two reviewers racing on the same row resolve to
//! one winner and one "not found" instead of a double apply.

pub mod entry;
pub mod orderer;

use std::sync::Arc;

use chrono::Utc;

use crate::audit::{AuditAction, AuditEntry};
use crate::change::{ChangeId, PendingChange, RevisionId, UserRef};
use crate::config::ModerationConfig;
use crate::consequence::{BlockOutcome, Consequence, ConsequenceManager, ConsequenceOutcome};
use crate::error::{InvalidStateReason, ModerationError};
use crate::identity::IdentityResolver;
use crate::repository::ModerationRepository;
use crate::save::{SaveOutcome, SaveRequest};

/// A reviewer performing moderation actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reviewer {
    pub user: UserRef,
    /// Whether this reviewer's own edits would bypass moderation. Merging
    /// other people's conflicts requires the same trust level.
    pub can_bypass_moderation: bool,
}

impl Reviewer {
    pub fn new(user: UserRef, can_bypass_moderation: bool) -> Self {
        Self {
            user,
            can_bypass_moderation,
        }
    }
}

/// How an approve resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApproveOutcome {
    /// The replay succeeded; the row is gone.
    Approved { revision: RevisionId },
    /// The target changed since the base revision; the row survives for a
    /// manual merge.
    Conflicted,
    /// The replay reported no actual change, so the approve was converted
    /// into a rejection: there was nothing to approve.
    RejectedNoChange,
}

/// How a merge resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The resolved content landed; the row is terminally merged.
    Merged { revision: RevisionId },
    /// The target moved again while the reviewer was resolving.
    Conflicted,
}

/// Result of approving one author's whole queue. Per-row failures are
/// data, not errors: each row is attempted independently.
#[derive(Debug, Default)]
pub struct BatchApproveOutcome {
    pub approved: Vec<(ChangeId, RevisionId)>,
    pub conflicted: Vec<ChangeId>,
    pub rejected_no_change: Vec<ChangeId>,
    pub failed: Vec<(ChangeId, ModerationError)>,
}

pub struct ApprovalEngine {
    repository: Arc<dyn ModerationRepository>,
    manager: Arc<dyn ConsequenceManager>,
    identity: Arc<dyn IdentityResolver>,
    config: ModerationConfig,
}

impl ApprovalEngine {
    pub fn new(
        repository: Arc<dyn ModerationRepository>,
        manager: Arc<dyn ConsequenceManager>,
        identity: Arc<dyn IdentityResolver>,
        config: ModerationConfig,
    ) -> Self {
        Self {
            repository,
            manager,
            identity,
            config,
        }
    }

    /// Fresh row load immediately before mutation. Rows loaded earlier are
    /// never reused.
    async fn load(&self, id: ChangeId) -> Result<PendingChange, ModerationError> {
        self.repository
            .get(id)
            .await?
            .ok_or(ModerationError::NotFound { id })
    }

    fn expect_saved(outcome: ConsequenceOutcome) -> Result<SaveOutcome, ModerationError> {
        outcome
            .saved()
            .cloned()
            .ok_or_else(|| ModerationError::Internal("replay returned a non-save outcome".into()))
    }

    /// A conditional mutation that changed nothing means someone else got
    /// to the row first: surface it as not-found, never double-apply.
    fn expect_changed(
        outcome: ConsequenceOutcome,
        id: ChangeId,
    ) -> Result<(), ModerationError> {
        match outcome.did_change() {
            Some(true) => Ok(()),
            Some(false) => Err(ModerationError::NotFound { id }),
            None => Err(ModerationError::Internal(
                "row mutation returned a non-row outcome".into(),
            )),
        }
    }

    fn expect_block(outcome: ConsequenceOutcome) -> Result<BlockOutcome, ModerationError> {
        outcome
            .block()
            .ok_or_else(|| ModerationError::Internal("block returned a non-block outcome".into()))
    }

    /// Approve a single change: replay it through the normal save path and
    /// finalize according to the replay outcome.
    pub async fn approve(
        &self,
        id: ChangeId,
        reviewer: &Reviewer,
    ) -> Result<ApproveOutcome, ModerationError> {
        let change = self.load(id).await?;
        let now = Utc::now();
        change
            .approvable(now, self.config.reapproval_window, self.config.window_boundary)
            .map_err(ModerationError::InvalidState)?;

        // Re-resolved at approval time: the account may have been renamed
        // or deleted while the change sat in the queue.
        let author = self.identity.resolve(&change.author).await;

        let replay = entry::replay_consequence(&change, author);
        let saved = Self::expect_saved(self.manager.add(replay).await?)?;

        match saved {
            SaveOutcome::Success { revision } => {
                Self::expect_changed(
                    self.manager.add(Consequence::DeletePending { id }).await?,
                    id,
                )?;
                self.manager
                    .add(Consequence::AppendAudit {
                        entry: AuditEntry::new(AuditAction::Approve, reviewer.user.clone(), now)
                            .with_target(change.target.clone())
                            .with_subject(change.author.clone())
                            .with_change(id)
                            .with_revision(revision),
                    })
                    .await?;
                self.manager.add(Consequence::InvalidatePendingStamp).await?;
                Ok(ApproveOutcome::Approved { revision })
            }

            SaveOutcome::Conflict => {
                // First-class transition, not a failure. The row survives
                // for manual merge; no audit entry.
                Self::expect_changed(
                    self.manager.add(Consequence::MarkConflict { id }).await?,
                    id,
                )?;
                Ok(ApproveOutcome::Conflicted)
            }

            SaveOutcome::NoChange => {
                // The queued text is byte-identical to the current
                // content: nothing to approve, so this becomes a
                // rejection with its own audit action.
                Self::expect_changed(
                    self.manager
                        .add(Consequence::MarkRejected {
                            id,
                            by: reviewer.user.clone(),
                            automatic: false,
                            at: now,
                        })
                        .await?,
                    id,
                )?;
                self.manager
                    .add(Consequence::AppendAudit {
                        entry: AuditEntry::new(
                            AuditAction::RejectNoChange,
                            reviewer.user.clone(),
                            now,
                        )
                        .with_target(change.target.clone())
                        .with_subject(change.author.clone())
                        .with_change(id),
                    })
                    .await?;
                self.manager.add(Consequence::InvalidatePendingStamp).await?;
                Ok(ApproveOutcome::RejectedNoChange)
            }
        }
    }

    /// Reject a single change.
    pub async fn reject(
        &self,
        id: ChangeId,
        reviewer: &Reviewer,
    ) -> Result<(), ModerationError> {
        let change = self.load(id).await?;
        if change.state.is_merged() {
            return Err(ModerationError::InvalidState(InvalidStateReason::AlreadyMerged));
        }
        if change.state.is_rejected() {
            return Err(ModerationError::InvalidState(
                InvalidStateReason::AlreadyRejected,
            ));
        }

        let now = Utc::now();
        Self::expect_changed(
            self.manager
                .add(Consequence::MarkRejected {
                    id,
                    by: reviewer.user.clone(),
                    automatic: false,
                    at: now,
                })
                .await?,
            id,
        )?;
        self.manager
            .add(Consequence::AppendAudit {
                entry: AuditEntry::new(AuditAction::Reject, reviewer.user.clone(), now)
                    .with_target(change.target.clone())
                    .with_subject(change.author.clone())
                    .with_change(id),
            })
            .await?;
        self.manager.add(Consequence::InvalidatePendingStamp).await?;
        Ok(())
    }

    /// Approve every currently-pending change by one author, in the safe
    /// order, attempting each row independently.
    ///
    /// The row set is snapshotted once at batch start; rows arriving
    /// afterwards are not included.
    pub async fn approve_all(
        &self,
        author_name: &str,
        reviewer: &Reviewer,
    ) -> Result<BatchApproveOutcome, ModerationError> {
        let snapshot = self.repository.list_pending_by_author(author_name).await?;
        let subject = snapshot.first().map(|change| change.author.clone());
        let order = orderer::batch_order(&snapshot);

        let mut outcome = BatchApproveOutcome::default();
        for id in order {
            match self.approve(id, reviewer).await {
                Ok(ApproveOutcome::Approved { revision }) => {
                    outcome.approved.push((id, revision));
                }
                Ok(ApproveOutcome::Conflicted) => outcome.conflicted.push(id),
                Ok(ApproveOutcome::RejectedNoChange) => outcome.rejected_no_change.push(id),
                Err(err) => outcome.failed.push((id, err)),
            }
        }

        if let Some(subject) = subject {
            self.manager
                .add(Consequence::AppendAudit {
                    entry: AuditEntry::new(AuditAction::ApproveAll, reviewer.user.clone(), Utc::now())
                        .with_subject(subject)
                        .with_count(outcome.approved.len() as u64),
                })
                .await?;
        }

        Ok(outcome)
    }

    /// Reject every currently-pending change by one author in one
    /// statement, marking them batch-rejected. Returns the affected count.
    pub async fn reject_all(
        &self,
        author_name: &str,
        reviewer: &Reviewer,
    ) -> Result<u64, ModerationError> {
        let now = Utc::now();
        let outcome = self
            .manager
            .add(Consequence::MarkRejectedBatch {
                author_name: author_name.to_string(),
                by: reviewer.user.clone(),
                at: now,
            })
            .await?;
        let count = outcome.batch_count().ok_or_else(|| {
            ModerationError::Internal("batch rejection returned a non-batch outcome".into())
        })?;

        if count > 0 {
            self.manager
                .add(Consequence::AppendAudit {
                    entry: AuditEntry::new(AuditAction::RejectAll, reviewer.user.clone(), now)
                        .with_subject(UserRef::anonymous(author_name))
                        .with_count(count),
                })
                .await?;
            self.manager.add(Consequence::InvalidatePendingStamp).await?;
        }

        Ok(count)
    }

    /// Land reviewer-resolved content for a conflicted row and mark the
    /// row terminally merged.
    ///
    /// Requires the trust level that bypasses moderation outright: a
    /// moderator whose own edits are intercepted cannot merge others'.
    pub async fn merge(
        &self,
        id: ChangeId,
        reviewer: &Reviewer,
        resolved_content: String,
    ) -> Result<MergeOutcome, ModerationError> {
        if !reviewer.can_bypass_moderation {
            return Err(ModerationError::PermissionDenied { action: "merge" });
        }

        let change = self.load(id).await?;
        if change.state.is_merged() {
            return Err(ModerationError::InvalidState(InvalidStateReason::AlreadyMerged));
        }
        if !change.state.conflict {
            return Err(ModerationError::InvalidState(InvalidStateReason::NoConflict));
        }

        // The merge save is the reviewer's own edit of the resolved text
        // against the current content; no replay overrides apply.
        let saved = Self::expect_saved(
            self.manager
                .add(Consequence::ApplySave(SaveRequest {
                    target: change.target.clone(),
                    content: resolved_content,
                    summary: change.summary.clone(),
                    flags: change.flags,
                    base_revision: None,
                    overrides: None,
                }))
                .await?,
        )?;

        match saved {
            SaveOutcome::Success { revision } => {
                Self::expect_changed(
                    self.manager
                        .add(Consequence::MarkMerged { id, revision })
                        .await?,
                    id,
                )?;
                self.manager
                    .add(Consequence::AppendAudit {
                        entry: AuditEntry::new(AuditAction::Merge, reviewer.user.clone(), Utc::now())
                            .with_target(change.target.clone())
                            .with_subject(change.author.clone())
                            .with_change(id)
                            .with_revision(revision),
                    })
                    .await?;
                self.manager.add(Consequence::InvalidatePendingStamp).await?;
                Ok(MergeOutcome::Merged { revision })
            }
            SaveOutcome::Conflict => Ok(MergeOutcome::Conflicted),
            SaveOutcome::NoChange => Err(ModerationError::InvalidState(
                InvalidStateReason::MergeProducedNoChange,
            )),
        }
    }

    /// Put an author under a standing moderation block. Idempotent:
    /// blocking an already-blocked author is a no-op success, and only a
    /// state change produces an audit entry.
    pub async fn block(
        &self,
        author: &UserRef,
        reviewer: &Reviewer,
    ) -> Result<BlockOutcome, ModerationError> {
        let now = Utc::now();
        let outcome = Self::expect_block(
            self.manager
                .add(Consequence::SetBlock {
                    author_name: author.name.clone(),
                    by: reviewer.user.clone(),
                    at: now,
                })
                .await?,
        )?;

        if !outcome.noop {
            self.manager
                .add(Consequence::AppendAudit {
                    entry: AuditEntry::new(AuditAction::Block, reviewer.user.clone(), now)
                        .with_subject(author.clone()),
                })
                .await?;
        }
        Ok(outcome)
    }

    /// Lift a standing moderation block. Idempotent like [`block`].
    ///
    /// [`block`]: Self::block
    pub async fn unblock(
        &self,
        author: &UserRef,
        reviewer: &Reviewer,
    ) -> Result<BlockOutcome, ModerationError> {
        let now = Utc::now();
        let outcome = Self::expect_block(
            self.manager
                .add(Consequence::ClearBlock {
                    author_name: author.name.clone(),
                    by: reviewer.user.clone(),
                })
                .await?,
        )?;

        if !outcome.noop {
            self.manager
                .add(Consequence::AppendAudit {
                    entry: AuditEntry::new(AuditAction::Unblock, reviewer.user.clone(), now)
                        .with_subject(author.clone()),
                })
                .await?;
        }
        Ok(outcome)
    }
}
