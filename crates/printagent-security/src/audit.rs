// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit trail: append-only SQLite log of agent lifecycle and job events.
//
// Schema:
//   audit_log(
//     id        INTEGER PRIMARY KEY AUTOINCREMENT,
//     timestamp TEXT    NOT NULL,   -- RFC 3339
//     agent_id  TEXT    NOT NULL,
//     event     TEXT    NOT NULL,   -- e.g. "job_queued", "job_failed"
//     payload   TEXT    NOT NULL    -- JSON object, usually carries "job_id"
//   )

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use printagent_core::error::AgentError;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, instrument};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS audit_log (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT    NOT NULL,
    agent_id  TEXT    NOT NULL,
    event     TEXT    NOT NULL,
    payload   TEXT    NOT NULL
);";

fn db_err(e: rusqlite::Error) -> AgentError {
    AgentError::Database(e.to_string())
}

/// A single row of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: String,
    pub agent_id: String,
    pub event: String,
    pub payload: Value,
}

/// Append-only audit log.
///
/// Shared between the HTTP handlers and the dispatcher, so the connection
/// sits behind a mutex.  Every row is stamped with the agent id the log was
/// opened for.
pub struct AuditLog {
    conn: Mutex<Connection>,
    agent_id: String,
}

impl AuditLog {
    /// Open (or create) the audit database at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, agent_id: impl Into<String>) -> Result<Self, AgentError> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = FULL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!("audit log opened");
        Ok(Self {
            conn: Mutex::new(conn),
            agent_id: agent_id.into(),
        })
    }

    /// In-memory audit log for tests.
    pub fn open_in_memory(agent_id: impl Into<String>) -> Result<Self, AgentError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            agent_id: agent_id.into(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AgentError> {
        self.conn
            .lock()
            .map_err(|_| AgentError::Database("audit connection poisoned".into()))
    }

    /// Append one event.
    #[instrument(skip(self, payload), fields(%event))]
    pub fn record(&self, event: &str, payload: &Value) -> Result<(), AgentError> {
        let timestamp = Utc::now().to_rfc3339();
        let payload = serde_json::to_string(payload)?;

        self.lock()?
            .execute(
                "INSERT INTO audit_log (timestamp, agent_id, event, payload)
                 VALUES (?1, ?2, ?3, ?4)",
                params![timestamp, self.agent_id, event, payload],
            )
            .map_err(db_err)?;

        debug!("audit entry recorded");
        Ok(())
    }

    /// Best-effort variant of [`record`](Self::record): a failing audit write
    /// is logged and otherwise ignored so it never blocks printing.
    pub fn append(&self, event: &str, payload: Value) {
        if let Err(e) = self.record(event, &payload) {
            error!(%event, "audit log write failed: {e}");
        }
    }

    /// Every entry whose payload references `job_id`, oldest first.
    pub fn entries_for_job(&self, job_id: &str) -> Result<Vec<AuditEntry>, AgentError> {
        self.query(
            "SELECT id, timestamp, agent_id, event, payload
             FROM audit_log
             WHERE json_extract(payload, '$.job_id') = ?1
             ORDER BY id ASC",
            params![job_id],
        )
    }

    /// The most recent `limit` entries, newest first.
    pub fn recent_entries(&self, limit: u32) -> Result<Vec<AuditEntry>, AgentError> {
        self.query(
            "SELECT id, timestamp, agent_id, event, payload
             FROM audit_log
             ORDER BY id DESC
             LIMIT ?1",
            params![limit],
        )
    }

    pub fn count(&self) -> Result<u64, AgentError> {
        self.lock()?
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
            .map_err(db_err)
    }

    fn query(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<AuditEntry>, AgentError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt.query_map(params, row_to_entry).map_err(db_err)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(db_err)?);
        }
        Ok(entries)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let raw: String = row.get(4)?;
    // Rows inserted by hand (sqlite3 shell) may not be JSON.
    let payload = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
    Ok(AuditEntry {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        agent_id: row.get(2)?,
        event: row.get(3)?,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn make_log() -> AuditLog {
        AuditLog::open_in_memory("agent-test").expect("open in-memory audit log")
    }

    #[test]
    fn record_and_count() {
        let log = make_log();
        assert_eq!(log.count().unwrap(), 0);

        log.record("agent_startup", &json!({"printers": 2})).unwrap();
        log.append("job_queued", json!({"job_id": "j1", "printer": "ZT411"}));

        assert_eq!(log.count().unwrap(), 2);
    }

    #[test]
    fn entries_for_job_follow_lifecycle() {
        let log = make_log();
        log.append("job_queued", json!({"job_id": "j1"}));
        log.append("job_queued", json!({"job_id": "j2"}));
        log.append("job_processing", json!({"job_id": "j1", "attempt": 1}));
        log.append("job_done", json!({"job_id": "j1"}));

        let entries = log.entries_for_job("j1").unwrap();
        let events: Vec<_> = entries.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(events, ["job_queued", "job_processing", "job_done"]);
        assert_eq!(entries[1].payload["attempt"], 1);
        assert!(entries.iter().all(|e| e.agent_id == "agent-test"));
    }

    #[test]
    fn recent_entries_newest_first() {
        let log = make_log();
        for i in 0..5 {
            log.append("job_queued", json!({"job_id": format!("j{i}")}));
        }

        let recent = log.recent_entries(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].id > recent[1].id);
        assert_eq!(recent[0].payload["job_id"], "j4");
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("audit.db");
        {
            let log = AuditLog::open(&path, "agent-a").unwrap();
            log.append("agent_startup", json!({}));
        }
        let log = AuditLog::open(&path, "agent-a").unwrap();
        assert_eq!(log.count().unwrap(), 1);
    }
}
