//! Consequence managers.
//!
//! The manager is the boundary between decision logic and effects. The
//! live manager executes each consequence immediately against the real
//! collaborators and returns the real outcome; the recording manager (in
//! the sibling module) stores consequences unexecuted.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{BlockOutcome, Consequence, ConsequenceOutcome};
use crate::error::ModerationError;
use crate::notify::{NewestPendingStamp, NotificationSender};
use crate::repository::ModerationRepository;
use crate::save::SavePipeline;

/// Contract: `add(consequence) -> outcome`.
///
/// Passed explicitly to the builder and the approval engine; there is no
/// process-wide current manager.
#[async_trait]
pub trait ConsequenceManager: Send + Sync {
    async fn add(&self, consequence: Consequence) -> Result<ConsequenceOutcome, ModerationError>;
}

/// Manager that executes consequences against live collaborators.
pub struct LiveConsequenceManager {
    repository: Arc<dyn ModerationRepository>,
    save: Arc<dyn SavePipeline>,
    notifier: Arc<dyn NotificationSender>,
    pending_stamp: Arc<NewestPendingStamp>,
}

impl LiveConsequenceManager {
    pub fn new(
        repository: Arc<dyn ModerationRepository>,
        save: Arc<dyn SavePipeline>,
        notifier: Arc<dyn NotificationSender>,
        pending_stamp: Arc<NewestPendingStamp>,
    ) -> Self {
        Self {
            repository,
            save,
            notifier,
            pending_stamp,
        }
    }
}

#[async_trait]
impl ConsequenceManager for LiveConsequenceManager {
    async fn add(&self, consequence: Consequence) -> Result<ConsequenceOutcome, ModerationError> {
        info!(consequence = consequence.name(), "applying consequence");

        match consequence {
            Consequence::InsertPending { change } => {
                let id = self.repository.insert(&change).await?;
                Ok(ConsequenceOutcome::Inserted(id))
            }

            Consequence::AmendPending { id, amend } => {
                let changed = self.repository.amend(id, &amend).await?;
                Ok(ConsequenceOutcome::Changed(changed))
            }

            Consequence::DeletePending { id } => {
                let changed = self.repository.delete(id).await?;
                Ok(ConsequenceOutcome::Changed(changed))
            }

            Consequence::MarkRejected {
                id,
                by,
                automatic,
                at,
            } => {
                let changed = self.repository.mark_rejected(id, &by, automatic, at).await?;
                Ok(ConsequenceOutcome::Changed(changed))
            }

            Consequence::MarkRejectedBatch {
                author_name,
                by,
                at,
            } => {
                let count = self
                    .repository
                    .reject_all_by_author(&author_name, &by, at)
                    .await?;
                Ok(ConsequenceOutcome::BatchChanged(count))
            }

            Consequence::MarkConflict { id } => {
                let changed = self.repository.mark_conflict(id).await?;
                Ok(ConsequenceOutcome::Changed(changed))
            }

            Consequence::MarkMerged { id, revision } => {
                let changed = self.repository.mark_merged(id, revision).await?;
                Ok(ConsequenceOutcome::Changed(changed))
            }

            Consequence::AppendAudit { entry } => {
                self.repository.append_audit(&entry).await?;
                Ok(ConsequenceOutcome::Done)
            }

            Consequence::SendNotification { to, subject, body } => {
                self.notifier.send(&to, &subject, &body).await;
                Ok(ConsequenceOutcome::Done)
            }

            Consequence::SetBlock {
                author_name,
                by,
                at,
            } => {
                let changed = self.repository.set_block(&author_name, &by, at).await?;
                Ok(ConsequenceOutcome::Block(BlockOutcome { noop: !changed }))
            }

            Consequence::ClearBlock { author_name, .. } => {
                let changed = self.repository.clear_block(&author_name).await?;
                Ok(ConsequenceOutcome::Block(BlockOutcome { noop: !changed }))
            }

            Consequence::RefreshPendingStamp { at } => {
                self.pending_stamp.refresh(at).await;
                Ok(ConsequenceOutcome::Done)
            }

            Consequence::InvalidatePendingStamp => {
                self.pending_stamp.invalidate().await;
                Ok(ConsequenceOutcome::Done)
            }

            Consequence::ApplySave(request) => {
                let outcome = self
                    .save
                    .save(&request)
                    .await
                    .map_err(|e| ModerationError::UpstreamSave { message: e.message })?;
                Ok(ConsequenceOutcome::Saved(outcome))
            }

            Consequence::ApplyRename(request) => {
                let outcome = self
                    .save
                    .rename(&request)
                    .await
                    .map_err(|e| ModerationError::UpstreamSave { message: e.message })?;
                Ok(ConsequenceOutcome::Saved(outcome))
            }

            Consequence::PublishUpload(request) => {
                let outcome = self
                    .save
                    .publish(&request)
                    .await
                    .map_err(|e| ModerationError::UpstreamSave { message: e.message })?;
                Ok(ConsequenceOutcome::Saved(outcome))
            }
        }
    }
}
