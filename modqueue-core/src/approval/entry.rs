//! Replay dispatch per change kind.
//!
//! Edits, moves, and uploads share the approval contract but differ in
//! how they replay through the save pipeline. The kind set is closed, so
//! dispatch is a match, not subclassing.

use crate::change::{ChangeKind, PendingChange, UserRef};
use crate::consequence::Consequence;
use crate::replay;
use crate::save::{PublishRequest, RenameRequest, SaveRequest};

/// Build the consequence that replays `change` through the normal save
/// path, attributed to the freshly re-resolved author.
pub fn replay_consequence(change: &PendingChange, resolved_author: UserRef) -> Consequence {
    let overrides = Some(replay::overrides_for(change, resolved_author));

    match &change.kind {
        ChangeKind::Edit => Consequence::ApplySave(SaveRequest {
            target: change.target.clone(),
            content: change.content.clone(),
            summary: change.summary.clone(),
            flags: change.flags,
            base_revision: change.base_revision,
            overrides,
        }),

        ChangeKind::Move { destination } => Consequence::ApplyRename(RenameRequest {
            from: change.target.clone(),
            to: destination.clone(),
            summary: change.summary.clone(),
            overrides,
        }),

        ChangeKind::Upload { stash_key } => Consequence::PublishUpload(PublishRequest {
            target: change.target.clone(),
            stash_key: stash_key.clone(),
            text: change.content.clone(),
            summary: change.summary.clone(),
            flags: change.flags,
            overrides,
        }),
    }
}
