use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::EventRecord;
use crate::ids::SessionId;
use crate::mode::ExecutionMode;

/// Read-only copy of a session's history, used for download and audit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub execution_mode: ExecutionMode,
    pub created_at: DateTime<Utc>,
    pub exported_at: DateTime<Utc>,
    pub command_history: Vec<String>,
    pub event_log: Vec<EventRecord>,
}

impl SessionSnapshot {
    pub fn event_count(&self, event_type: &str) -> usize {
        self.event_log
            .iter()
            .filter(|r| r.event.event_type() == event_type)
            .count()
    }
}
