//! In-memory implementation of `ModerationRepository`.
//!
//! Backs fast tests. Behaves like the SQLite backend, including the
//! preloadable uniqueness constraint and the conditional-mutation
//! semantics; all state is lost on drop.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{ModerationRepository, PendingAmend};
use crate::audit::AuditEntry;
use crate::change::{ChangeId, PageRef, PendingChange, RevisionId, UserRef};
use crate::error::RepositoryError;

#[derive(Debug, Clone)]
struct BlockRecord {
    #[allow(dead_code)]
    by: UserRef,
    #[allow(dead_code)]
    at: DateTime<Utc>,
}

/// In-memory moderation store.
pub struct InMemoryRepository {
    /// BTreeMap keeps iteration in id (= submission) order.
    changes: RwLock<BTreeMap<i64, PendingChange>>,
    next_id: RwLock<i64>,
    blocks: RwLock<HashMap<String, BlockRecord>>,
    audit: RwLock<Vec<AuditEntry>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            changes: RwLock::new(BTreeMap::new()),
            next_id: RwLock::new(1),
            blocks: RwLock::new(HashMap::new()),
            audit: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn is_pending(change: &PendingChange) -> bool {
    !change.state.rejected && !change.state.conflict && !change.state.is_merged()
}

#[async_trait]
impl ModerationRepository for InMemoryRepository {
    async fn insert(&self, change: &PendingChange) -> Result<ChangeId, RepositoryError> {
        let mut changes = self.changes.write().await;

        if change.preloadable {
            let clash = changes.values().any(|existing| {
                existing.preloadable
                    && existing.author_key() == change.author_key()
                    && existing.target.same_page(&change.target)
            });
            if clash {
                return Err(RepositoryError::unique_violation(format!(
                    "{} on {}",
                    change.author_key(),
                    change.target
                )));
            }
        }

        let mut next_id = self.next_id.write().await;
        let id = ChangeId(*next_id);
        *next_id += 1;

        let mut stored = change.clone();
        stored.id = id;
        changes.insert(id.0, stored);
        Ok(id)
    }

    async fn amend(&self, id: ChangeId, amend: &PendingAmend) -> Result<bool, RepositoryError> {
        let mut changes = self.changes.write().await;
        let Some(change) = changes.get_mut(&id.0) else {
            return Ok(false);
        };
        if !change.preloadable || change.state.is_merged() {
            return Ok(false);
        }
        change.content = amend.content.clone();
        change.new_len = amend.new_len;
        change.summary = amend.summary.clone();
        change.received_at = amend.received_at;
        Ok(true)
    }

    async fn get(&self, id: ChangeId) -> Result<Option<PendingChange>, RepositoryError> {
        let changes = self.changes.read().await;
        Ok(changes.get(&id.0).cloned())
    }

    async fn delete(&self, id: ChangeId) -> Result<bool, RepositoryError> {
        let mut changes = self.changes.write().await;
        Ok(changes.remove(&id.0).is_some())
    }

    async fn find_preloadable(
        &self,
        author_key: &str,
        target: &PageRef,
    ) -> Result<Option<PendingChange>, RepositoryError> {
        let changes = self.changes.read().await;
        Ok(changes
            .values()
            .find(|change| {
                change.preloadable
                    && change.author_key() == author_key
                    && change.target.same_page(target)
            })
            .cloned())
    }

    async fn list_pending_by_author(
        &self,
        author_name: &str,
    ) -> Result<Vec<PendingChange>, RepositoryError> {
        let changes = self.changes.read().await;
        Ok(changes
            .values()
            .filter(|change| change.author.name == author_name && is_pending(change))
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<PendingChange>, RepositoryError> {
        let changes = self.changes.read().await;
        Ok(changes.values().cloned().collect())
    }

    async fn mark_rejected(
        &self,
        id: ChangeId,
        by: &UserRef,
        automatic: bool,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut changes = self.changes.write().await;
        let Some(change) = changes.get_mut(&id.0) else {
            return Ok(false);
        };
        if change.state.rejected || change.state.is_merged() {
            return Ok(false);
        }
        change.state.rejected = true;
        change.state.rejected_by = if automatic { None } else { Some(by.clone()) };
        change.state.rejected_automatically = automatic;
        change.state.rejected_at = Some(at);
        if !automatic {
            change.preloadable = false;
        }
        Ok(true)
    }

    async fn reject_all_by_author(
        &self,
        author_name: &str,
        by: &UserRef,
        at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut changes = self.changes.write().await;
        let mut count = 0;
        for change in changes.values_mut() {
            if change.author.name == author_name && is_pending(change) {
                change.state.rejected = true;
                change.state.rejected_by = Some(by.clone());
                change.state.rejected_in_batch = true;
                change.state.rejected_at = Some(at);
                change.preloadable = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn mark_conflict(&self, id: ChangeId) -> Result<bool, RepositoryError> {
        let mut changes = self.changes.write().await;
        let Some(change) = changes.get_mut(&id.0) else {
            return Ok(false);
        };
        if change.state.is_merged() {
            return Ok(false);
        }
        change.state.conflict = true;
        Ok(true)
    }

    async fn mark_merged(
        &self,
        id: ChangeId,
        revision: RevisionId,
    ) -> Result<bool, RepositoryError> {
        let mut changes = self.changes.write().await;
        let Some(change) = changes.get_mut(&id.0) else {
            return Ok(false);
        };
        if change.state.is_merged() {
            return Ok(false);
        }
        change.state.merged_into = Some(revision);
        change.preloadable = false;
        Ok(true)
    }

    async fn is_blocked(&self, author_name: &str) -> Result<bool, RepositoryError> {
        let blocks = self.blocks.read().await;
        Ok(blocks.contains_key(author_name))
    }

    async fn set_block(
        &self,
        author_name: &str,
        by: &UserRef,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        use std::collections::hash_map::Entry;

        let mut blocks = self.blocks.write().await;
        match blocks.entry(author_name.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(BlockRecord {
                    by: by.clone(),
                    at,
                });
                Ok(true)
            }
        }
    }

    async fn clear_block(&self, author_name: &str) -> Result<bool, RepositoryError> {
        let mut blocks = self.blocks.write().await;
        Ok(blocks.remove(author_name).is_some())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), RepositoryError> {
        let mut audit = self.audit.write().await;
        audit.push(entry.clone());
        Ok(())
    }

    async fn list_audit(&self) -> Result<Vec<AuditEntry>, RepositoryError> {
        let audit = self.audit.read().await;
        Ok(audit.clone())
    }
}
