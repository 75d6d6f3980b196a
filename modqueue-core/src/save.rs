//! The save-pipeline seam.
//!
//! Approving a queued change replays it through the platform's normal save
//! path. The core never talks to that path directly; it emits consequences
//! whose execution calls the `SavePipeline` trait. The pipeline reports
//! one of three documented outcomes; anything else is an upstream failure
//! carried back verbatim.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::change::{ChangeFlags, PageRef, RevisionId, StashKey};
use crate::replay::SaveOverrides;

/// Outcome of driving a change through the normal save path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveOutcome {
    /// The change was applied; a new revision exists.
    Success { revision: RevisionId },
    /// The target content changed since the base revision the request
    /// named. Detected by the pipeline's conditional apply, not by a
    /// read-then-write in the core.
    Conflict,
    /// The requested text is byte-identical to the current content.
    NoChange,
}

/// The save pipeline failed outside its documented outcomes (permissions,
/// filter rejection, internal error). The message is the upstream one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveError {
    pub message: String,
}

impl SaveError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SaveError {}

/// An ordinary content save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveRequest {
    pub target: PageRef,
    pub content: String,
    pub summary: String,
    pub flags: ChangeFlags,
    /// Revision the content was computed against; the pipeline applies
    /// conditionally and reports `Conflict` on mismatch. `None` skips the
    /// check (new pages, merge saves against current content).
    pub base_revision: Option<RevisionId>,
    /// Metadata the pipeline would otherwise stamp with current values.
    /// `None` means an ordinary save with no replay involved.
    pub overrides: Option<SaveOverrides>,
}

/// A page rename replayed at approval time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRequest {
    pub from: PageRef,
    pub to: PageRef,
    pub summary: String,
    pub overrides: Option<SaveOverrides>,
}

/// Publication of a staged file together with its description page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub target: PageRef,
    pub stash_key: StashKey,
    pub text: String,
    pub summary: String,
    pub flags: ChangeFlags,
    pub overrides: Option<SaveOverrides>,
}

/// The normal content-save operations the replay drives.
#[async_trait]
pub trait SavePipeline: Send + Sync {
    async fn save(&self, request: &SaveRequest) -> Result<SaveOutcome, SaveError>;
    async fn rename(&self, request: &RenameRequest) -> Result<SaveOutcome, SaveError>;
    async fn publish(&self, request: &PublishRequest) -> Result<SaveOutcome, SaveError>;
}

/// A request observed by [`ScriptedSavePipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedSave {
    Save(SaveRequest),
    Rename(RenameRequest),
    Publish(PublishRequest),
}

/// Test double: records every request and answers from a scripted queue.
///
/// An empty script answers `Success` with revision ids counting up from
/// 1000, which is what most tests want.
#[derive(Default)]
pub struct ScriptedSavePipeline {
    recorded: Mutex<Vec<RecordedSave>>,
    script: Mutex<VecDeque<Result<SaveOutcome, SaveError>>>,
    next_revision: Mutex<i64>,
}

impl ScriptedSavePipeline {
    pub fn new() -> Self {
        Self {
            recorded: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            next_revision: Mutex::new(1000),
        }
    }

    /// Queue the outcome for the next request.
    pub fn script(&self, outcome: Result<SaveOutcome, SaveError>) {
        self.script.lock().expect("mutex poisoned").push_back(outcome);
    }

    /// Every request observed so far, in order.
    pub fn recorded(&self) -> Vec<RecordedSave> {
        self.recorded.lock().expect("mutex poisoned").clone()
    }

    fn answer(&self, request: RecordedSave) -> Result<SaveOutcome, SaveError> {
        self.recorded.lock().expect("mutex poisoned").push(request);
        if let Some(outcome) = self.script.lock().expect("mutex poisoned").pop_front() {
            return outcome;
        }
        let mut next = self.next_revision.lock().expect("mutex poisoned");
        *next += 1;
        Ok(SaveOutcome::Success {
            revision: RevisionId(*next),
        })
    }
}

#[async_trait]
impl SavePipeline for ScriptedSavePipeline {
    async fn save(&self, request: &SaveRequest) -> Result<SaveOutcome, SaveError> {
        self.answer(RecordedSave::Save(request.clone()))
    }

    async fn rename(&self, request: &RenameRequest) -> Result<SaveOutcome, SaveError> {
        self.answer(RecordedSave::Rename(request.clone()))
    }

    async fn publish(&self, request: &PublishRequest) -> Result<SaveOutcome, SaveError> {
        self.answer(RecordedSave::Publish(request.clone()))
    }
}

/// Save pipeline for processes that have no save path at all (the operator
/// CLI). Every call reports an upstream failure; actions that need the
/// pipeline are simply unavailable there.
pub struct UnavailableSavePipeline;

impl UnavailableSavePipeline {
    fn unavailable() -> SaveError {
        SaveError::new("save pipeline is not available in this process")
    }
}

#[async_trait]
impl SavePipeline for UnavailableSavePipeline {
    async fn save(&self, _request: &SaveRequest) -> Result<SaveOutcome, SaveError> {
        Err(Self::unavailable())
    }

    async fn rename(&self, _request: &RenameRequest) -> Result<SaveOutcome, SaveError> {
        Err(Self::unavailable())
    }

    async fn publish(&self, _request: &PublishRequest) -> Result<SaveOutcome, SaveError> {
        Err(Self::unavailable())
    }
}
