use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use godhand_core::traits::HistoryStore;
use godhand_core::{HistoryStoreError, SessionId, SessionSnapshot};

use crate::database::Database;
use crate::error::StoreError;

/// One stored export, without the snapshot body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    pub id: String,
    pub session_id: SessionId,
    pub execution_mode: String,
    pub created_at: DateTime<Utc>,
    pub exported_at: DateTime<Utc>,
    pub command_count: usize,
    pub event_count: usize,
}

pub struct HistoryRepo {
    db: Database,
}

impl HistoryRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a snapshot and return the id of the new export row.
    #[instrument(skip(self, snapshot), fields(session_id = %snapshot.session_id))]
    pub fn insert(&self, snapshot: &SessionSnapshot) -> Result<String, StoreError> {
        let id = format!("exp_{}", uuid::Uuid::now_v7());
        let body = serde_json::to_string(snapshot)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO history_exports
                    (id, session_id, execution_mode, created_at, exported_at, command_count, event_count, snapshot)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    id,
                    snapshot.session_id.as_str(),
                    snapshot.execution_mode.as_str(),
                    snapshot.created_at.to_rfc3339(),
                    snapshot.exported_at.to_rfc3339(),
                    snapshot.command_history.len() as i64,
                    snapshot.event_log.len() as i64,
                    body,
                ],
            )?;
            Ok(())
        })?;

        debug!(export_id = %id, commands = snapshot.command_history.len(), "history exported");
        Ok(id)
    }

    /// Load the full snapshot of one export.
    pub fn get(&self, id: &str) -> Result<SessionSnapshot, StoreError> {
        let body: Option<String> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT snapshot FROM history_exports WHERE id = ?1")?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })?;
        let body = body.ok_or_else(|| StoreError::NotFound(format!("export {id}")))?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Exports of one session, newest first.
    pub fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<ExportRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, execution_mode, created_at, exported_at, command_count, event_count
                 FROM history_exports WHERE session_id = ?1
                 ORDER BY exported_at DESC, id DESC",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_export(row)?);
            }
            Ok(out)
        })
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM history_exports", [], |row| row.get(0))?;
            Ok(n as usize)
        })
    }
}

fn row_to_export(row: &Row<'_>) -> Result<ExportRow, StoreError> {
    let session_id: String = row.get(1)?;
    let created_at: String = row.get(3)?;
    let exported_at: String = row.get(4)?;
    let command_count: i64 = row.get(5)?;
    let event_count: i64 = row.get(6)?;
    Ok(ExportRow {
        id: row.get(0)?,
        session_id: SessionId::from_raw(session_id),
        execution_mode: row.get(2)?,
        created_at: parse_ts(&created_at)?,
        exported_at: parse_ts(&exported_at)?,
        command_count: command_count as usize,
        event_count: event_count as usize,
    })
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("timestamp {raw}: {e}")))
}

/// [`HistoryStore`] backed by the `history_exports` table.
pub struct SqliteHistoryStore {
    repo: HistoryRepo,
}

impl SqliteHistoryStore {
    pub fn new(db: Database) -> Self {
        Self {
            repo: HistoryRepo::new(db),
        }
    }

    pub fn repo(&self) -> &HistoryRepo {
        &self.repo
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), HistoryStoreError> {
        self.repo.insert(snapshot)?;
        Ok(())
    }
}
