//! Pending-change builder.
//!
//! Assembles a queue row from an intercepted submission, computing every
//! derived field before the single insert: resulting content, byte
//! lengths, preloadability, the auto-rejection short-circuit for blocked
//! authors, and whether the submission folds into an already-queued edit
//! by the same author instead of opening a new row.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::change::{
    AuthorIdentity, ChangeFlags, ChangeId, ChangeKind, ModerationState, PageRef, PendingChange,
    Provenance, RevisionId, StashKey, UserRef,
};
use crate::error::ModerationError;
use crate::repository::{ModerationRepository, PendingAmend};
use crate::sections::{SectionEditor, SectionId};

/// Text of a submitted edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditBody {
    /// Full resulting page text.
    Full(String),
    /// A section-scoped edit. `full` is the resulting text the platform
    /// computed against the live page; `text` is the raw section text,
    /// kept so a fold can recompute against the queued content instead.
    Section {
        section: SectionId,
        text: String,
        full: String,
    },
}

impl EditBody {
    /// Resulting text when there is no queued row to fold onto.
    fn full_text(&self) -> &str {
        match self {
            Self::Full(text) => text,
            Self::Section { full, .. } => full,
        }
    }
}

/// The operation being intercepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmittedOperation {
    Edit {
        body: EditBody,
        /// Live revision the edit was computed against; `None` for a new page.
        base_revision: Option<RevisionId>,
        old_len: u64,
    },
    Move {
        destination: PageRef,
    },
    Upload {
        stash_key: StashKey,
        description: String,
    },
}

/// An intercepted content-modification request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSubmission {
    pub author: UserRef,
    pub identity: AuthorIdentity,
    pub target: PageRef,
    pub operation: SubmittedOperation,
    pub summary: String,
    pub flags: ChangeFlags,
    pub provenance: Provenance,
    pub received_at: DateTime<Utc>,
}

/// What the builder decided to do with a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltChange {
    /// Open a new queue row. `notify` is false for auto-rejected rows:
    /// reviewers are not told about changes that are already dead.
    Fresh { change: PendingChange, notify: bool },
    /// Fold into the author's existing preloadable row on this page.
    Fold { id: ChangeId, amend: PendingAmend },
}

pub struct PendingChangeBuilder {
    repository: Arc<dyn ModerationRepository>,
    sections: Arc<dyn SectionEditor>,
}

impl PendingChangeBuilder {
    pub fn new(
        repository: Arc<dyn ModerationRepository>,
        sections: Arc<dyn SectionEditor>,
    ) -> Self {
        Self {
            repository,
            sections,
        }
    }

    /// Decide between a fresh row and a fold, and compute all derived
    /// fields. Performs repository reads only; all writes happen through
    /// the consequences the caller enqueues.
    pub async fn build(
        &self,
        submission: &ChangeSubmission,
    ) -> Result<BuiltChange, ModerationError> {
        if let SubmittedOperation::Edit { .. } = submission.operation {
            let existing = self
                .repository
                .find_preloadable(&submission.identity.key(), &submission.target)
                .await?;
            if let Some(existing) = existing {
                return Ok(BuiltChange::Fold {
                    id: existing.id,
                    amend: self.fold_onto(&existing, submission),
                });
            }
        }

        let blocked = self.repository.is_blocked(&submission.author.name).await?;
        Ok(BuiltChange::Fresh {
            change: self.fresh_change(submission, blocked),
            notify: !blocked,
        })
    }

    /// Recompute the full resulting content of a fold.
    ///
    /// Section edits apply onto the previously *queued* content, not the
    /// live page, so two sequential section edits by the same unreviewed
    /// author both survive in the single row.
    pub fn fold_onto(
        &self,
        existing: &PendingChange,
        submission: &ChangeSubmission,
    ) -> PendingAmend {
        let content = match &submission.operation {
            SubmittedOperation::Edit {
                body: EditBody::Section { section, text, .. },
                ..
            } => self
                .sections
                .replace_section(&existing.content, *section, text),
            SubmittedOperation::Edit {
                body: EditBody::Full(text),
                ..
            } => text.clone(),
            // Folds only happen for edits; `build` never routes moves or
            // uploads here.
            SubmittedOperation::Move { .. } | SubmittedOperation::Upload { .. } => {
                existing.content.clone()
            }
        };

        PendingAmend {
            new_len: content.len() as u64,
            content,
            summary: submission.summary.clone(),
            received_at: submission.received_at,
        }
    }

    fn fresh_change(&self, submission: &ChangeSubmission, blocked: bool) -> PendingChange {
        let (kind, content, base_revision, old_len, preloadable) = match &submission.operation {
            SubmittedOperation::Edit {
                body,
                base_revision,
                old_len,
            } => (
                ChangeKind::Edit,
                body.full_text().to_string(),
                *base_revision,
                *old_len,
                true,
            ),
            SubmittedOperation::Move { destination } => (
                ChangeKind::Move {
                    destination: destination.clone(),
                },
                String::new(),
                None,
                0,
                false,
            ),
            SubmittedOperation::Upload {
                stash_key,
                description,
            } => (
                ChangeKind::Upload {
                    stash_key: stash_key.clone(),
                },
                description.clone(),
                None,
                0,
                false,
            ),
        };

        let state = if blocked {
            // Short-circuited; the row stays preloadable so the author
            // cannot tell their edits are going nowhere.
            ModerationState::auto_rejected(submission.received_at)
        } else {
            ModerationState::pending()
        };

        PendingChange {
            id: ChangeId(0),
            kind,
            author: submission.author.clone(),
            identity: submission.identity.clone(),
            target: submission.target.clone(),
            base_revision,
            new_len: content.len() as u64,
            content,
            old_len,
            summary: submission.summary.clone(),
            flags: submission.flags,
            provenance: submission.provenance.clone(),
            state,
            preloadable,
            received_at: submission.received_at,
        }
    }
}
