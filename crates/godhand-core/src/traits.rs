//! Contracts of the collaborators around the orchestration core.

use async_trait::async_trait;

use crate::action::{Action, ActionSpec};
use crate::errors::{BackendError, CompileError, HistoryStoreError};
use crate::events::ExecEvent;
use crate::snapshot::SessionSnapshot;

/// Turns one clause of an instruction into zero or more actions.
#[async_trait]
pub trait IntentResolver: Send + Sync {
    async fn resolve(&self, clause: &str) -> Result<Vec<ActionSpec>, CompileError>;
}

/// What a backend reports for a successful action.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackendOutput {
    pub output: String,
    /// Visual evidence (URL or path) attached by the driver, if any.
    pub screenshot: Option<String>,
}

impl BackendOutput {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            screenshot: None,
        }
    }
}

/// Drives the GUI / browser / OS on behalf of the executor.
#[async_trait]
pub trait ActionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, action: &Action) -> Result<BackendOutput, BackendError>;
}

/// Accepts exported session history.
pub trait HistoryStore: Send + Sync {
    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), HistoryStoreError>;
}

/// Receives lifecycle events as the executor emits them.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ExecEvent);
}

/// Asks the user to approve an action before it runs.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    /// Resolves to `true` to run the action, `false` to cancel the batch.
    async fn confirm(&self, action: &Action) -> bool;
}

/// Gate used where no second round-trip exists (the fallback channel).
pub struct AutoApprove;

#[async_trait]
impl ConfirmationGate for AutoApprove {
    async fn confirm(&self, _action: &Action) -> bool {
        true
    }
}

impl<F> EventSink for F
where
    F: Fn(ExecEvent) + Send + Sync,
{
    fn emit(&self, event: ExecEvent) {
        self(event)
    }
}
