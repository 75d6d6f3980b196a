//! Pending-change moderation queue.
//!
//! Intercepts content-modification requests (edits, renames, uploads) from
//! untrusted contributors, holds them in a durable queue, and lets trusted
//! reviewers later apply, reject, or merge them, replaying approved
//! changes through the platform's normal save path with their original
//! authorship metadata intact.
//!
//! The design separates:
//! - **Rows**: what is queued ([`change::PendingChange`])
//! - **Consequences**: side effects as data ([`consequence::Consequence`])
//! - **Managers**: where effects execute ([`consequence::ConsequenceManager`])
//! - **Decisions**: the builder and approval engine, which only request
//!   consequences and are therefore testable without real storage.

pub mod approval;
pub mod audit;
pub mod builder;
pub mod change;
pub mod config;
pub mod consequence;
pub mod error;
pub mod identity;
pub mod notify;
pub mod policy;
pub mod queue;
pub mod replay;
pub mod repository;
pub mod save;
pub mod sections;

pub use approval::{ApprovalEngine, ApproveOutcome, BatchApproveOutcome, MergeOutcome, Reviewer};
pub use audit::{AuditAction, AuditEntry};
pub use builder::{ChangeSubmission, EditBody, PendingChangeBuilder, SubmittedOperation};
pub use change::{
    AuthorIdentity, ChangeFlags, ChangeId, ChangeKind, IdentityToken, PageRef, PendingChange,
    Provenance, RevisionId, StashKey, UserRef, WindowBoundary,
};
pub use config::ModerationConfig;
pub use consequence::{
    BlockOutcome, Consequence, ConsequenceManager, ConsequenceOutcome, LiveConsequenceManager,
    RecordingConsequenceManager,
};
pub use error::{InvalidStateReason, ModerationError, RepositoryError};
pub use identity::{IdentityResolver, PassthroughResolver};
pub use notify::{LoggingNotifier, NewestPendingStamp, NotificationSender};
pub use policy::{InterceptEveryone, InterceptionPolicy};
pub use queue::{EnqueueOutcome, ModerationQueue, SubmitOutcome};
pub use repository::{InMemoryRepository, ModerationRepository, PendingAmend, SqliteRepository};
pub use save::{SaveOutcome, SavePipeline, UnavailableSavePipeline};
pub use sections::{HeadingSections, SectionEditor, SectionId};
