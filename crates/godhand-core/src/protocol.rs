//! Wire payloads shared by the server and the client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionResult};
use crate::ids::SessionId;
use crate::mode::ExecutionMode;

/// Frame sent by a client over the streaming channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Confirm {
        confirm: bool,
    },
    Submit {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<ExecutionMode>,
    },
}

impl ClientMessage {
    pub fn submit(message: impl Into<String>, mode: Option<ExecutionMode>) -> Self {
        Self::Submit {
            message: message.into(),
            mode,
        }
    }
}

/// Body of the request/response fallback call (and the parse preview).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FallbackRequest {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub mode: ExecutionMode,
}

/// Everything one fallback call produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FallbackResponse {
    pub session_id: SessionId,
    pub actions: Vec<Action>,
    pub results: Vec<ActionResult>,
    /// Set when the batch hit the server's time bound; `results` is partial.
    #[serde(default)]
    pub timed_out: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParseResponse {
    pub actions: Vec<Action>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub ready: bool,
    #[serde(default)]
    pub sessions: usize,
    pub timestamp: DateTime<Utc>,
}

/// Returned once a snapshot has been handed to the history store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportReceipt {
    pub session_id: SessionId,
    pub exported_at: DateTime<Utc>,
    pub command_count: usize,
    pub event_count: usize,
}

/// Error body returned by the HTTP endpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
