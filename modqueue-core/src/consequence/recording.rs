//! Recording manager for tests.
//!
//! Stores every consequence unexecuted and answers from a pre-seeded
//! queue, so tests can assert "exactly these effects were requested, in
//! this order, with these parameters" without touching real storage. When
//! the seed queue runs dry, each consequence gets a benign default
//! outcome.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{BlockOutcome, Consequence, ConsequenceManager, ConsequenceOutcome};
use crate::change::{ChangeId, RevisionId};
use crate::error::ModerationError;
use crate::save::SaveOutcome;

#[derive(Default)]
pub struct RecordingConsequenceManager {
    recorded: Mutex<Vec<Consequence>>,
    seeded: Mutex<VecDeque<Result<ConsequenceOutcome, ModerationError>>>,
}

impl RecordingConsequenceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome returned for the next `add` call.
    pub fn seed(&self, outcome: Result<ConsequenceOutcome, ModerationError>) {
        self.seeded.lock().expect("mutex poisoned").push_back(outcome);
    }

    /// Every consequence requested so far, in order.
    pub fn recorded(&self) -> Vec<Consequence> {
        self.recorded.lock().expect("mutex poisoned").clone()
    }

    /// Consequence names in request order, for terse assertions.
    pub fn recorded_names(&self) -> Vec<&'static str> {
        self.recorded
            .lock()
            .expect("mutex poisoned")
            .iter()
            .map(Consequence::name)
            .collect()
    }

    fn default_outcome(consequence: &Consequence) -> ConsequenceOutcome {
        match consequence {
            Consequence::InsertPending { .. } => ConsequenceOutcome::Inserted(ChangeId(1)),
            Consequence::AmendPending { .. }
            | Consequence::DeletePending { .. }
            | Consequence::MarkRejected { .. }
            | Consequence::MarkConflict { .. }
            | Consequence::MarkMerged { .. } => ConsequenceOutcome::Changed(true),
            Consequence::MarkRejectedBatch { .. } => ConsequenceOutcome::BatchChanged(0),
            Consequence::SetBlock { .. } | Consequence::ClearBlock { .. } => {
                ConsequenceOutcome::Block(BlockOutcome { noop: false })
            }
            Consequence::ApplySave(_)
            | Consequence::ApplyRename(_)
            | Consequence::PublishUpload(_) => ConsequenceOutcome::Saved(SaveOutcome::Success {
                revision: RevisionId(1),
            }),
            Consequence::AppendAudit { .. }
            | Consequence::SendNotification { .. }
            | Consequence::RefreshPendingStamp { .. }
            | Consequence::InvalidatePendingStamp => ConsequenceOutcome::Done,
        }
    }
}

#[async_trait]
impl ConsequenceManager for RecordingConsequenceManager {
    async fn add(&self, consequence: Consequence) -> Result<ConsequenceOutcome, ModerationError> {
        let seeded = self.seeded.lock().expect("mutex poisoned").pop_front();
        let outcome = seeded.unwrap_or_else(|| Ok(Self::default_outcome(&consequence)));
        self.recorded.lock().expect("mutex poisoned").push(consequence);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_without_executing() {
        let manager = RecordingConsequenceManager::new();

        manager
            .add(Consequence::DeletePending { id: ChangeId(5) })
            .await
            .unwrap();
        manager.add(Consequence::InvalidatePendingStamp).await.unwrap();

        assert_eq!(
            manager.recorded_names(),
            vec!["delete-pending", "invalidate-pending-stamp"]
        );
    }

    #[tokio::test]
    async fn test_seeded_outcomes_returned_in_order() {
        let manager = RecordingConsequenceManager::new();
        manager.seed(Ok(ConsequenceOutcome::Changed(false)));
        manager.seed(Ok(ConsequenceOutcome::Saved(SaveOutcome::NoChange)));

        let first = manager
            .add(Consequence::DeletePending { id: ChangeId(5) })
            .await
            .unwrap();
        assert_eq!(first.did_change(), Some(false));

        let second = manager
            .add(Consequence::InvalidatePendingStamp)
            .await
            .unwrap();
        assert_eq!(second.saved(), Some(&SaveOutcome::NoChange));
    }

    #[tokio::test]
    async fn test_dry_queue_yields_defaults() {
        let manager = RecordingConsequenceManager::new();
        let outcome = manager
            .add(Consequence::DeletePending { id: ChangeId(5) })
            .await
            .unwrap();
        assert_eq!(outcome.did_change(), Some(true));
    }
}
