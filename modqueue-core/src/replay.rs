//! Replay overrides.
//!
//! Approving a row must reproduce, in the normal save path, metadata the
//! pipeline would otherwise stamp with current values. The override set is
//! an explicit value handed to exactly one pipeline call, so nothing can
//! leak into unrelated saves: there is no global hook to install or tear
//! down.
//!
//! Change-feed timestamps are deliberately absent here. The feed uses the
//! approval time, so contributors watching live activity see changes as
//! they are approved rather than retroactively inserted into the past.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::change::{PendingChange, UserRef};

/// Metadata reproduced by a replayed save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOverrides {
    /// The original author, re-resolved at approval time (accounts may
    /// have been renamed or deleted since submission).
    pub author: UserRef,
    /// Original submission time; the revision appears in history at the
    /// time it was written, not the time it was approved.
    pub timestamp: DateTime<Utc>,
    pub origin_ip: String,
    pub forwarded_for: Option<String>,
    pub user_agent: String,
    pub tags: Vec<String>,
}

/// Build the override set for replaying `change` as `resolved_author`.
pub fn overrides_for(change: &PendingChange, resolved_author: UserRef) -> SaveOverrides {
    SaveOverrides {
        author: resolved_author,
        timestamp: change.received_at,
        origin_ip: change.provenance.origin_ip.clone(),
        forwarded_for: change.provenance.forwarded_for.clone(),
        user_agent: change.provenance.user_agent.clone(),
        tags: change.provenance.tags.clone(),
    }
}
