//! The moderation queue facade.
//!
//! Composes the builder and the approval engine behind the surface the
//! platform glue calls: intercept-and-enqueue on the way in, the
//! moderation actions on the way out. All writes flow through the
//! consequence manager handed in at construction.

use std::sync::Arc;

use tracing::info;

use crate::approval::{
    ApprovalEngine, ApproveOutcome, BatchApproveOutcome, MergeOutcome, Reviewer,
};
use crate::builder::{BuiltChange, ChangeSubmission, PendingChangeBuilder, SubmittedOperation};
use crate::change::{ChangeId, ChangeKind, PendingChange, UserRef};
use crate::config::ModerationConfig;
use crate::consequence::{BlockOutcome, Consequence, ConsequenceManager};
use crate::error::{ModerationError, RepositoryError};
use crate::identity::IdentityResolver;
use crate::policy::InterceptionPolicy;
use crate::repository::ModerationRepository;
use crate::sections::SectionEditor;

/// Result of enqueueing an intercepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub id: ChangeId,
    /// The submission was folded into an existing preloadable row.
    pub folded: bool,
    /// The row was created already rejected because the author is under a
    /// standing block.
    pub auto_rejected: bool,
}

/// Result of offering a submission to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The interception policy passed on this request; the caller proceeds
    /// with a normal save.
    NotIntercepted,
    Enqueued(EnqueueOutcome),
}

pub struct ModerationQueue {
    repository: Arc<dyn ModerationRepository>,
    manager: Arc<dyn ConsequenceManager>,
    builder: PendingChangeBuilder,
    engine: ApprovalEngine,
    policy: Arc<dyn InterceptionPolicy>,
    config: ModerationConfig,
}

impl ModerationQueue {
    pub fn new(
        repository: Arc<dyn ModerationRepository>,
        manager: Arc<dyn ConsequenceManager>,
        identity: Arc<dyn IdentityResolver>,
        sections: Arc<dyn SectionEditor>,
        policy: Arc<dyn InterceptionPolicy>,
        config: ModerationConfig,
    ) -> Self {
        let builder = PendingChangeBuilder::new(repository.clone(), sections);
        let engine = ApprovalEngine::new(
            repository.clone(),
            manager.clone(),
            identity,
            config.clone(),
        );
        Self {
            repository,
            manager,
            builder,
            engine,
            policy,
            config,
        }
    }

    fn kind_of(operation: &SubmittedOperation) -> ChangeKind {
        match operation {
            SubmittedOperation::Edit { .. } => ChangeKind::Edit,
            SubmittedOperation::Move { destination } => ChangeKind::Move {
                destination: destination.clone(),
            },
            SubmittedOperation::Upload { stash_key, .. } => ChangeKind::Upload {
                stash_key: stash_key.clone(),
            },
        }
    }

    /// Offer a submission: consult the interception policy, enqueue if it
    /// says so.
    pub async fn submit(
        &self,
        submission: ChangeSubmission,
    ) -> Result<SubmitOutcome, ModerationError> {
        let kind = Self::kind_of(&submission.operation);
        if !self
            .policy
            .should_intercept(&submission.author, &submission.target, &kind)
        {
            return Ok(SubmitOutcome::NotIntercepted);
        }
        Ok(SubmitOutcome::Enqueued(self.enqueue(submission).await?))
    }

    /// Build and durably enqueue a submission.
    ///
    /// A uniqueness violation on insert means another submission by the
    /// same author won the race for the preloadable row; it is recovered
    /// here by re-reading that row and folding onto it instead.
    pub async fn enqueue(
        &self,
        submission: ChangeSubmission,
    ) -> Result<EnqueueOutcome, ModerationError> {
        // Two attempts suffice: an insert can lose the race at most once,
        // because the retry folds instead of inserting.
        for _ in 0..2 {
            match self.builder.build(&submission).await? {
                BuiltChange::Fold { id, amend } => {
                    let outcome = self
                        .manager
                        .add(Consequence::AmendPending { id, amend })
                        .await?;
                    if outcome.did_change() == Some(true) {
                        info!(change = %id, "folded submission into queued row");
                        return Ok(EnqueueOutcome {
                            id,
                            folded: true,
                            auto_rejected: false,
                        });
                    }
                    // The row vanished between lookup and amend (approved
                    // or purged meanwhile); rebuild from scratch.
                    continue;
                }

                BuiltChange::Fresh { change, notify } => {
                    let auto_rejected = change.state.rejected_automatically;
                    let received_at = change.received_at;
                    let insert = Consequence::InsertPending {
                        change: change.clone(),
                    };
                    match self.manager.add(insert).await {
                        Ok(outcome) => {
                            let id = outcome.inserted_id().ok_or_else(|| {
                                ModerationError::Internal(
                                    "insert returned a non-insert outcome".into(),
                                )
                            })?;
                            info!(change = %id, kind = change.kind.name(), "queued change");

                            if !auto_rejected {
                                self.manager
                                    .add(Consequence::RefreshPendingStamp { at: received_at })
                                    .await?;
                            }
                            if notify {
                                if let Some(address) = &self.config.notify_address {
                                    self.manager
                                        .add(Consequence::SendNotification {
                                            to: address.clone(),
                                            subject: format!(
                                                "New pending change on {}",
                                                change.target.title
                                            ),
                                            body: format!(
                                                "{} submitted a change to {} ({}).",
                                                change.author.name,
                                                change.target,
                                                change.summary
                                            ),
                                        })
                                        .await?;
                                }
                            }
                            return Ok(EnqueueOutcome {
                                id,
                                folded: false,
                                auto_rejected,
                            });
                        }
                        Err(ModerationError::Storage(RepositoryError::UniqueViolation {
                            ..
                        })) => {
                            // Lost the race for the preloadable row;
                            // re-read and fold.
                            continue;
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }
        Err(ModerationError::Internal(
            "could not place submission after uniqueness retry".into(),
        ))
    }

    // =========================================================================
    // Moderation actions (delegated to the approval engine)
    // =========================================================================

    pub async fn approve(
        &self,
        id: ChangeId,
        reviewer: &Reviewer,
    ) -> Result<ApproveOutcome, ModerationError> {
        self.engine.approve(id, reviewer).await
    }

    pub async fn reject(&self, id: ChangeId, reviewer: &Reviewer) -> Result<(), ModerationError> {
        self.engine.reject(id, reviewer).await
    }

    pub async fn approve_all(
        &self,
        author_name: &str,
        reviewer: &Reviewer,
    ) -> Result<BatchApproveOutcome, ModerationError> {
        self.engine.approve_all(author_name, reviewer).await
    }

    pub async fn reject_all(
        &self,
        author_name: &str,
        reviewer: &Reviewer,
    ) -> Result<u64, ModerationError> {
        self.engine.reject_all(author_name, reviewer).await
    }

    pub async fn merge(
        &self,
        id: ChangeId,
        reviewer: &Reviewer,
        resolved_content: String,
    ) -> Result<MergeOutcome, ModerationError> {
        self.engine.merge(id, reviewer, resolved_content).await
    }

    pub async fn block(
        &self,
        author: &UserRef,
        reviewer: &Reviewer,
    ) -> Result<BlockOutcome, ModerationError> {
        self.engine.block(author, reviewer).await
    }

    pub async fn unblock(
        &self,
        author: &UserRef,
        reviewer: &Reviewer,
    ) -> Result<BlockOutcome, ModerationError> {
        self.engine.unblock(author, reviewer).await
    }

    // =========================================================================
    // Read surface
    // =========================================================================

    pub async fn get(&self, id: ChangeId) -> Result<Option<PendingChange>, ModerationError> {
        Ok(self.repository.get(id).await?)
    }

    pub async fn list_all(&self) -> Result<Vec<PendingChange>, ModerationError> {
        Ok(self.repository.list_all().await?)
    }

    pub async fn list_audit(&self) -> Result<Vec<crate::audit::AuditEntry>, ModerationError> {
        Ok(self.repository.list_audit().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::audit::AuditEntry;
    use crate::builder::EditBody;
    use crate::change::{
        AuthorIdentity, ChangeFlags, IdentityToken, PageRef, Provenance, RevisionId,
    };
    use crate::consequence::LiveConsequenceManager;
    use crate::identity::PassthroughResolver;
    use crate::notify::{NewestPendingStamp, NotificationSender};
    use crate::policy::{InterceptEveryone, InterceptionPolicy};
    use crate::repository::{InMemoryRepository, PendingAmend};
    use crate::save::{RecordedSave, ScriptedSavePipeline};
    use crate::sections::HeadingSections;

    #[derive(Default)]
    struct CapturingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl NotificationSender for CapturingNotifier {
        async fn send(&self, to: &str, subject: &str, _body: &str) {
            self.sent
                .lock()
                .expect("mutex poisoned")
                .push((to.to_string(), subject.to_string()));
        }
    }

    struct TestEnv {
        repository: Arc<InMemoryRepository>,
        pipeline: Arc<ScriptedSavePipeline>,
        notifier: Arc<CapturingNotifier>,
        stamp: Arc<NewestPendingStamp>,
        queue: ModerationQueue,
    }

    fn env() -> TestEnv {
        env_with(
            Arc::new(InMemoryRepository::new()),
            ModerationConfig::default(),
            Arc::new(InterceptEveryone),
        )
    }

    fn env_with(
        repository: Arc<InMemoryRepository>,
        config: ModerationConfig,
        policy: Arc<dyn InterceptionPolicy>,
    ) -> TestEnv {
        let pipeline = Arc::new(ScriptedSavePipeline::new());
        let notifier = Arc::new(CapturingNotifier::default());
        let stamp = Arc::new(NewestPendingStamp::new());
        let manager = Arc::new(LiveConsequenceManager::new(
            repository.clone(),
            pipeline.clone(),
            notifier.clone(),
            stamp.clone(),
        ));
        let queue = ModerationQueue::new(
            repository.clone(),
            manager,
            Arc::new(PassthroughResolver),
            Arc::new(HeadingSections),
            policy,
            config,
        );
        TestEnv {
            repository,
            pipeline,
            notifier,
            stamp,
            queue,
        }
    }

    fn anon_edit(token: &IdentityToken, title: &str, text: &str) -> ChangeSubmission {
        ChangeSubmission {
            author: UserRef::anonymous("198.51.100.7"),
            identity: AuthorIdentity::Anonymous(token.clone()),
            target: PageRef::new(0, title),
            operation: SubmittedOperation::Edit {
                body: EditBody::Full(text.to_string()),
                base_revision: Some(RevisionId(100)),
                old_len: 0,
            },
            summary: "change".to_string(),
            flags: ChangeFlags::default(),
            provenance: Provenance::default(),
            received_at: Utc::now(),
        }
    }

    fn reviewer() -> Reviewer {
        Reviewer::new(UserRef::registered(99, "Mod"), false)
    }

    /// Two edits by the same unauthenticated author to "Cat" collapse to
    /// one row holding the second text; approve then deletes the row and
    /// invokes exactly one save with that text.
    #[tokio::test]
    async fn test_round_trip_fold_then_approve() {
        let env = env();
        let token = IdentityToken::generate();

        let first = env.queue.enqueue(anon_edit(&token, "Cat", "v1")).await.unwrap();
        assert!(!first.folded);

        let second = env.queue.enqueue(anon_edit(&token, "Cat", "v2")).await.unwrap();
        assert!(second.folded);
        assert_eq!(second.id, first.id);

        let rows = env.repository.list_all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "v2");

        let outcome = env.queue.approve(first.id, &reviewer()).await.unwrap();
        assert!(matches!(outcome, ApproveOutcome::Approved { .. }));
        assert!(env.repository.list_all().await.unwrap().is_empty());

        let recorded = env.pipeline.recorded();
        assert_eq!(recorded.len(), 1);
        let RecordedSave::Save(request) = &recorded[0] else {
            panic!("expected a save");
        };
        assert_eq!(request.target, PageRef::new(0, "Cat"));
        assert_eq!(request.content, "v2");
        assert_eq!(request.summary, "change");
        assert_eq!(request.flags, ChangeFlags::default());
    }

    /// The replayed timestamp is the (folded) submission time, not the
    /// approval time.
    #[tokio::test]
    async fn test_replay_timestamp_is_submission_time() {
        let env = env();
        let token = IdentityToken::generate();
        let mut submission = anon_edit(&token, "Cat", "v1");
        let submitted_at = Utc::now() - chrono::Duration::hours(3);
        submission.received_at = submitted_at;

        let outcome = env.queue.enqueue(submission).await.unwrap();
        env.queue.approve(outcome.id, &reviewer()).await.unwrap();

        let recorded = env.pipeline.recorded();
        let RecordedSave::Save(request) = &recorded[0] else {
            panic!("expected a save");
        };
        assert_eq!(request.overrides.as_ref().unwrap().timestamp, submitted_at);
    }

    #[tokio::test]
    async fn test_enqueue_refreshes_stamp_and_notifies() {
        let repository = Arc::new(InMemoryRepository::new());
        let config = ModerationConfig {
            notify_address: Some("mods@example.org".to_string()),
            ..ModerationConfig::default()
        };
        let env = env_with(repository, config, Arc::new(InterceptEveryone));
        let token = IdentityToken::generate();

        env.queue.enqueue(anon_edit(&token, "Cat", "v1")).await.unwrap();

        assert!(env.stamp.get().await.is_some());
        let sent = env.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "mods@example.org");
        assert!(sent[0].1.contains("Cat"));
    }

    #[tokio::test]
    async fn test_auto_rejected_enqueue_is_silent() {
        let repository = Arc::new(InMemoryRepository::new());
        repository
            .set_block("198.51.100.7", &UserRef::registered(99, "Mod"), Utc::now())
            .await
            .unwrap();
        let config = ModerationConfig {
            notify_address: Some("mods@example.org".to_string()),
            ..ModerationConfig::default()
        };
        let env = env_with(repository, config, Arc::new(InterceptEveryone));
        let token = IdentityToken::generate();

        let outcome = env.queue.enqueue(anon_edit(&token, "Cat", "spam")).await.unwrap();
        assert!(outcome.auto_rejected);

        // No reviewer mail, no pending stamp: the change is already dead.
        assert!(env.notifier.sent.lock().unwrap().is_empty());
        assert!(env.stamp.get().await.is_none());

        // The author still sees their row as preloadable.
        let row = env.repository.get(outcome.id).await.unwrap().unwrap();
        assert!(row.preloadable);
        assert!(row.state.rejected_automatically);
    }

    #[tokio::test]
    async fn test_submit_respects_interception_policy() {
        struct InterceptNobody;
        impl InterceptionPolicy for InterceptNobody {
            fn should_intercept(
                &self,
                _author: &UserRef,
                _target: &PageRef,
                _kind: &ChangeKind,
            ) -> bool {
                false
            }
        }

        let env = env_with(
            Arc::new(InMemoryRepository::new()),
            ModerationConfig::default(),
            Arc::new(InterceptNobody),
        );
        let token = IdentityToken::generate();

        let outcome = env.queue.submit(anon_edit(&token, "Cat", "v1")).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::NotIntercepted);
        assert!(env.repository.list_all().await.unwrap().is_empty());
    }

    /// Repository wrapper that pretends the preloadable row is absent for
    /// the first lookup, forcing the enqueue path to lose the insert race
    /// and recover through the uniqueness retry.
    struct RacingRepository {
        inner: InMemoryRepository,
        blind_lookups: AtomicUsize,
    }

    #[async_trait]
    impl crate::repository::ModerationRepository for RacingRepository {
        async fn insert(&self, change: &PendingChange) -> Result<ChangeId, RepositoryError> {
            self.inner.insert(change).await
        }
        async fn amend(
            &self,
            id: ChangeId,
            amend: &PendingAmend,
        ) -> Result<bool, RepositoryError> {
            self.inner.amend(id, amend).await
        }
        async fn get(&self, id: ChangeId) -> Result<Option<PendingChange>, RepositoryError> {
            self.inner.get(id).await
        }
        async fn delete(&self, id: ChangeId) -> Result<bool, RepositoryError> {
            self.inner.delete(id).await
        }
        async fn find_preloadable(
            &self,
            author_key: &str,
            target: &PageRef,
        ) -> Result<Option<PendingChange>, RepositoryError> {
            if self.blind_lookups.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n > 0).then(|| n - 1)
            }).is_ok()
            {
                return Ok(None);
            }
            self.inner.find_preloadable(author_key, target).await
        }
        async fn list_pending_by_author(
            &self,
            author_name: &str,
        ) -> Result<Vec<PendingChange>, RepositoryError> {
            self.inner.list_pending_by_author(author_name).await
        }
        async fn list_all(&self) -> Result<Vec<PendingChange>, RepositoryError> {
            self.inner.list_all().await
        }
        async fn mark_rejected(
            &self,
            id: ChangeId,
            by: &UserRef,
            automatic: bool,
            at: DateTime<Utc>,
        ) -> Result<bool, RepositoryError> {
            self.inner.mark_rejected(id, by, automatic, at).await
        }
        async fn reject_all_by_author(
            &self,
            author_name: &str,
            by: &UserRef,
            at: DateTime<Utc>,
        ) -> Result<u64, RepositoryError> {
            self.inner.reject_all_by_author(author_name, by, at).await
        }
        async fn mark_conflict(&self, id: ChangeId) -> Result<bool, RepositoryError> {
            self.inner.mark_conflict(id).await
        }
        async fn mark_merged(
            &self,
            id: ChangeId,
            revision: RevisionId,
        ) -> Result<bool, RepositoryError> {
            self.inner.mark_merged(id, revision).await
        }
        async fn is_blocked(&self, author_name: &str) -> Result<bool, RepositoryError> {
            self.inner.is_blocked(author_name).await
        }
        async fn set_block(
            &self,
            author_name: &str,
            by: &UserRef,
            at: DateTime<Utc>,
        ) -> Result<bool, RepositoryError> {
            self.inner.set_block(author_name, by, at).await
        }
        async fn clear_block(&self, author_name: &str) -> Result<bool, RepositoryError> {
            self.inner.clear_block(author_name).await
        }
        async fn append_audit(&self, entry: &AuditEntry) -> Result<(), RepositoryError> {
            self.inner.append_audit(entry).await
        }
        async fn list_audit(&self) -> Result<Vec<AuditEntry>, RepositoryError> {
            self.inner.list_audit().await
        }
    }

    /// A constraint violation under a submission race is recovered as an
    /// amend, never surfaced to the caller, and never yields two rows.
    #[tokio::test]
    async fn test_lost_insert_race_retries_as_fold() {
        let repository = Arc::new(RacingRepository {
            inner: InMemoryRepository::new(),
            blind_lookups: AtomicUsize::new(0),
        });
        let pipeline = Arc::new(ScriptedSavePipeline::new());
        let manager = Arc::new(LiveConsequenceManager::new(
            repository.clone(),
            pipeline,
            Arc::new(CapturingNotifier::default()),
            Arc::new(NewestPendingStamp::new()),
        ));
        let queue = ModerationQueue::new(
            repository.clone(),
            manager,
            Arc::new(PassthroughResolver),
            Arc::new(HeadingSections),
            Arc::new(InterceptEveryone),
            ModerationConfig::default(),
        );

        let token = IdentityToken::generate();
        let first = queue.enqueue(anon_edit(&token, "Cat", "v1")).await.unwrap();
        assert!(!first.folded);

        // Blind the next lookup: the builder believes there is no queued
        // row, inserts, and trips the unique index.
        repository.blind_lookups.store(1, Ordering::SeqCst);

        let second = queue.enqueue(anon_edit(&token, "Cat", "v2")).await.unwrap();
        assert!(second.folded);
        assert_eq!(second.id, first.id);

        let rows = repository.list_all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "v2");
    }

    /// N successive submissions by one author to one page collapse to a
    /// single row holding the Nth content.
    #[tokio::test]
    async fn test_many_submissions_collapse_to_one_row() {
        let env = env();
        let token = IdentityToken::generate();

        for i in 1..=8 {
            env.queue
                .enqueue(anon_edit(&token, "Cat", &format!("v{}", i)))
                .await
                .unwrap();
        }

        let rows = env.repository.list_all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "v8");
    }
}
