use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionResult};
use crate::ids::SessionId;

/// Lifecycle events streamed to observing clients.
///
/// Serialized as `{ "type": "...", ... }`; every variant carries the
/// human-readable `content` the client renders.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecEvent {
    System {
        content: String,
    },

    Thinking {
        content: String,
    },

    Parsed {
        content: String,
        actions: Vec<Action>,
    },

    Progress {
        content: String,
        current: usize,
        total: usize,
    },

    Executing {
        content: String,
        sequence_index: usize,
    },

    Result {
        content: String,
        sequence_index: usize,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        attempt_count: u32,
    },

    Screenshot {
        content: String,
        sequence_index: usize,
        url: String,
    },

    /// Terminal event of a batch. Exactly one per processed instruction.
    Done {
        content: String,
    },

    Error {
        content: String,
    },
}

impl ExecEvent {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        Self::Thinking {
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
        }
    }

    pub fn done(content: impl Into<String>) -> Self {
        Self::Done {
            content: content.into(),
        }
    }

    pub fn parsed(actions: &[Action]) -> Self {
        Self::Parsed {
            content: format!("解析为 {} 个动作", actions.len()),
            actions: actions.to_vec(),
        }
    }

    pub fn result(action: &Action, result: &ActionResult) -> Self {
        Self::Result {
            content: action.description().to_string(),
            sequence_index: result.sequence_index,
            success: result.success,
            output: result.output.clone(),
            error: result.error.clone(),
            attempt_count: result.attempt_count,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::Thinking { .. } => "thinking",
            Self::Parsed { .. } => "parsed",
            Self::Progress { .. } => "progress",
            Self::Executing { .. } => "executing",
            Self::Result { .. } => "result",
            Self::Screenshot { .. } => "screenshot",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::System { content }
            | Self::Thinking { content }
            | Self::Parsed { content, .. }
            | Self::Progress { content, .. }
            | Self::Executing { content, .. }
            | Self::Result { content, .. }
            | Self::Screenshot { content, .. }
            | Self::Done { content }
            | Self::Error { content } => content,
        }
    }

    /// After a terminal event the client may submit a new instruction.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// An event routed to the observers of one session.
#[derive(Clone, Debug)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub event: ExecEvent,
}

/// Entry of a session's event log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event: ExecEvent,
}
