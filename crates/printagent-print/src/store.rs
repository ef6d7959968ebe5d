// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Durable print job store backed by SQLite.
//
// Jobs (payload bytes included) live in a single `jobs` table.  The
// monotonically increasing `seq` column gives FIFO order independent of clock
// resolution.  Every state transition is a single conditional UPDATE so a job
// can never be claimed twice or leave a terminal state.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use tracing::{debug, info, instrument, warn};

use printagent_core::error::{AgentError, Result};
use printagent_core::types::{Job, JobId, JobStatus, MAX_ERROR_LEN, truncate_message};

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        seq          INTEGER PRIMARY KEY AUTOINCREMENT,
        id           TEXT    NOT NULL UNIQUE,
        printer_name TEXT    NOT NULL,
        payload      BLOB    NOT NULL,
        payload_hash TEXT    NOT NULL,
        copies       INTEGER NOT NULL,
        status       TEXT    NOT NULL,
        attempts     INTEGER NOT NULL DEFAULT 0,
        last_error   TEXT,
        created_at   TEXT    NOT NULL,
        updated_at   TEXT    NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_jobs_status_seq ON jobs(status, seq);
"#;

const JOB_COLUMNS: &str = "id, printer_name, payload, payload_hash, copies, status, \
                           attempts, last_error, created_at, updated_at";

/// Message recorded on jobs that were mid-flight when the agent stopped.
const INTERRUPTED: &str = "interrupted while processing (agent restarted)";

/// Persistent job queue.
///
/// Methods are synchronous; each is a handful of indexed statements on a
/// local file, so async callers use them directly.  The connection is behind
/// a mutex so the store can be shared through an `Arc` by the HTTP handlers
/// and the dispatcher.
pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    /// Open (or create) the store at `path`.
    ///
    /// WAL journaling with `synchronous = FULL`: a transition that returned
    /// `Ok` survives power loss.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| AgentError::Database(format!("open: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| AgentError::Database(format!("WAL pragma: {e}")))?;
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(|e| AgentError::Database(format!("synchronous pragma: {e}")))?;

        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| AgentError::Database(format!("create table: {e}")))?;

        info!("job store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (tests, benches).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AgentError::Database(format!("open in-memory: {e}")))?;

        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| AgentError::Database(format!("create table: {e}")))?;

        debug!("in-memory job store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AgentError::Database("job store connection poisoned".into()))
    }

    /// Persist a new job.
    ///
    /// Fails with [`AgentError::AlreadyExists`] if a job with the same id is
    /// already stored; the existing job is left untouched.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub fn insert(&self, job: &Job) -> Result<()> {
        let conn = self.lock()?;
        insert_row(&conn, job)?;
        info!(printer = %job.printer_name, copies = job.copies, "job stored");
        Ok(())
    }

    /// Like [`insert`](Self::insert), but refuses with
    /// [`AgentError::QueueFull`] once `capacity` jobs are waiting.  The count
    /// and the insert happen under one lock.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub fn insert_bounded(&self, job: &Job, capacity: usize) -> Result<()> {
        let conn = self.lock()?;
        let waiting = queued_count(&conn)?;
        if waiting >= capacity {
            warn!(waiting, capacity, "queue full, job refused");
            return Err(AgentError::QueueFull(waiting));
        }
        insert_row(&conn, job)?;
        info!(printer = %job.printer_name, copies = job.copies, "job stored");
        Ok(())
    }

    /// Atomically move the oldest `queued` job to `processing`, bumping its
    /// attempt counter.  `None` when nothing is waiting.
    #[instrument(skip(self))]
    pub fn claim_next_queued(&self) -> Result<Option<Job>> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            "UPDATE jobs
             SET status = 'processing', attempts = attempts + 1, updated_at = ?1
             WHERE seq = (SELECT seq FROM jobs WHERE status = 'queued' ORDER BY seq LIMIT 1)
               AND status = 'queued'
             RETURNING {JOB_COLUMNS}"
        );
        let job = conn
            .query_row(&sql, params![now], row_to_job)
            .optional()
            .map_err(|e| AgentError::Database(format!("claim: {e}")))?;

        if let Some(job) = &job {
            debug!(job_id = %job.id, attempts = job.attempts, "job claimed");
        }
        Ok(job)
    }

    /// `processing → done`.  Clears `last_error`.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn mark_done(&self, id: &JobId) -> Result<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        let rows = conn
            .execute(
                "UPDATE jobs SET status = 'done', last_error = NULL, updated_at = ?1
                 WHERE id = ?2 AND status = 'processing'",
                params![now, id.as_str()],
            )
            .map_err(|e| AgentError::Database(format!("mark done: {e}")))?;
        ensure_transitioned(&conn, id, rows)?;

        info!("job done");
        Ok(())
    }

    /// `processing → failed`, recording `error`.
    #[instrument(skip(self, error), fields(job_id = %id))]
    pub fn mark_failed(&self, id: &JobId, error: &str) -> Result<()> {
        let conn = self.lock()?;
        fail_processing(&conn, id, error)?;
        warn!(%error, "job failed");
        Ok(())
    }

    /// After a transient failure: back to `queued` while attempts remain,
    /// otherwise `failed` with `"max retries reached: {error}"`.  Returns the
    /// status the job ended up in.
    #[instrument(skip(self, error), fields(job_id = %id))]
    pub fn requeue_with_backoff(
        &self,
        id: &JobId,
        error: &str,
        max_retries: u32,
    ) -> Result<JobStatus> {
        let conn = self.lock()?;
        let (status, attempts) = status_and_attempts(&conn, id)?;
        if status != JobStatus::Processing {
            return Err(AgentError::InvalidTransition {
                id: id.to_string(),
                status,
            });
        }

        if attempts >= max_retries {
            let message = format!("max retries reached: {error}");
            fail_processing(&conn, id, &message)?;
            warn!(attempts, %error, "retries exhausted, job failed");
            return Ok(JobStatus::Failed);
        }

        let now = Utc::now().to_rfc3339();
        let rows = conn
            .execute(
                "UPDATE jobs SET status = 'queued', last_error = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = 'processing'",
                params![truncate_message(error, MAX_ERROR_LEN), now, id.as_str()],
            )
            .map_err(|e| AgentError::Database(format!("requeue: {e}")))?;
        ensure_transitioned(&conn, id, rows)?;

        info!(attempts, max_retries, "job requeued for retry");
        Ok(JobStatus::Queued)
    }

    /// Snapshot of one job.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn get(&self, id: &JobId) -> Result<Job> {
        let conn = self.lock()?;
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        conn.query_row(&sql, params![id.as_str()], row_to_job)
            .optional()
            .map_err(|e| AgentError::Database(format!("get job: {e}")))?
            .ok_or_else(|| AgentError::NotFound(id.to_string()))
    }

    /// Number of jobs waiting in `queued`.
    pub fn queued_count(&self) -> Result<usize> {
        queued_count(&*self.lock()?)
    }

    /// Total number of stored jobs, any status.
    pub fn count(&self) -> Result<usize> {
        self.lock()?
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(|e| AgentError::Database(format!("count: {e}")))
    }

    /// Startup recovery: jobs a previous process left in `processing` go
    /// back to `queued`, or to `failed` if they have no attempts left.
    /// Returns the affected ids with their new status.
    #[instrument(skip(self))]
    pub fn recover_interrupted(&self, max_retries: u32) -> Result<Vec<(JobId, JobStatus)>> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        let exhausted = format!("max retries reached: {INTERRUPTED}");

        let mut stmt = conn
            .prepare(
                "UPDATE jobs
                 SET status = CASE WHEN attempts >= ?1 THEN 'failed' ELSE 'queued' END,
                     last_error = CASE WHEN attempts >= ?1 THEN ?2 ELSE ?3 END,
                     updated_at = ?4
                 WHERE status = 'processing'
                 RETURNING id, status",
            )
            .map_err(|e| AgentError::Database(format!("prepare recover: {e}")))?;

        let recovered = stmt
            .query_map(params![max_retries, exhausted, INTERRUPTED, now], |row| {
                let id: String = row.get(0)?;
                let status: String = row.get(1)?;
                Ok((id, status))
            })
            .map_err(|e| AgentError::Database(format!("recover: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AgentError::Database(format!("collect rows: {e}")))?;

        let recovered = recovered
            .into_iter()
            .map(|(id, status)| Ok((JobId::parse(&id)?, status.parse()?)))
            .collect::<Result<Vec<_>>>()?;

        if !recovered.is_empty() {
            warn!(count = recovered.len(), "recovered interrupted jobs");
        }
        Ok(recovered)
    }
}

// ---------------------------------------------------------------------------
// Statement helpers (caller holds the lock)
// ---------------------------------------------------------------------------

fn insert_row(conn: &Connection, job: &Job) -> Result<()> {
    conn.execute(
        "INSERT INTO jobs (id, printer_name, payload, payload_hash, copies, status,
                           attempts, last_error, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            job.id.as_str(),
            job.printer_name,
            job.payload,
            job.payload_hash,
            job.copies,
            job.status.as_str(),
            job.attempts,
            job.last_error,
            job.created_at.to_rfc3339(),
            job.updated_at.to_rfc3339(),
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            AgentError::AlreadyExists(job.id.to_string())
        }
        other => AgentError::Database(format!("insert job: {other}")),
    })?;
    Ok(())
}

fn queued_count(conn: &Connection) -> Result<usize> {
    conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE status = 'queued'",
        [],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n as usize)
    .map_err(|e| AgentError::Database(format!("queued count: {e}")))
}

fn fail_processing(conn: &Connection, id: &JobId, error: &str) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let rows = conn
        .execute(
            "UPDATE jobs SET status = 'failed', last_error = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'processing'",
            params![truncate_message(error, MAX_ERROR_LEN), now, id.as_str()],
        )
        .map_err(|e| AgentError::Database(format!("mark failed: {e}")))?;
    ensure_transitioned(conn, id, rows)
}

fn status_and_attempts(conn: &Connection, id: &JobId) -> Result<(JobStatus, u32)> {
    let row = conn
        .query_row(
            "SELECT status, attempts FROM jobs WHERE id = ?1",
            params![id.as_str()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)),
        )
        .optional()
        .map_err(|e| AgentError::Database(format!("read status: {e}")))?;

    match row {
        Some((status, attempts)) => Ok((status.parse()?, attempts)),
        None => Err(AgentError::NotFound(id.to_string())),
    }
}

/// Turn a zero-row conditional UPDATE into `NotFound` or `InvalidTransition`.
fn ensure_transitioned(conn: &Connection, id: &JobId, rows: usize) -> Result<()> {
    if rows > 0 {
        return Ok(());
    }
    let (status, _) = status_and_attempts(conn, id)?;
    Err(AgentError::InvalidTransition {
        id: id.to_string(),
        status,
    })
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Map a row selected with [`JOB_COLUMNS`] to a `Job`.
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let id: String = row.get(0)?;
    let status: String = row.get(5)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;

    let id = JobId::parse(&id).map_err(|e| conversion_error(0, e))?;
    let status: JobStatus = status.parse().map_err(|e| conversion_error(5, e))?;

    Ok(Job {
        id,
        printer_name: row.get(1)?,
        payload: row.get(2)?,
        payload_hash: row.get(3)?,
        copies: row.get(4)?,
        status,
        attempts: row.get(6)?,
        last_error: row.get(7)?,
        created_at: parse_timestamp(8, &created_at)?,
        updated_at: parse_timestamp(9, &updated_at)?,
    })
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job(id: &str) -> Job {
        Job::new(
            JobId::parse(id).expect("valid id"),
            "ZT411".into(),
            b"^XA^FDhello^FS^XZ".to_vec(),
            "hash".into(),
            1,
        )
    }

    fn store_with(ids: &[&str]) -> JobStore {
        let store = JobStore::open_in_memory().expect("open in-memory db");
        for id in ids {
            store.insert(&test_job(id)).expect("insert");
        }
        store
    }

    #[test]
    fn insert_and_retrieve_job() {
        let store = store_with(&["j1"]);
        let job = store.get(&JobId::parse("j1").unwrap()).expect("get");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.payload, b"^XA^FDhello^FS^XZ");
        assert!(job.last_error.is_none());
    }

    #[test]
    fn duplicate_id_is_rejected_and_original_kept() {
        let store = store_with(&["j1"]);
        let mut dup = test_job("j1");
        dup.printer_name = "other".into();

        let err = store.insert(&dup).unwrap_err();
        assert!(matches!(err, AgentError::AlreadyExists(id) if id == "j1"));
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get(&dup.id).unwrap().printer_name, "ZT411");
    }

    #[test]
    fn get_unknown_job_is_not_found() {
        let store = store_with(&[]);
        let err = store.get(&JobId::parse("nope").unwrap()).unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[test]
    fn claim_is_fifo_and_counts_attempts() {
        let store = store_with(&["first", "second"]);

        let a = store.claim_next_queued().unwrap().expect("first claim");
        assert_eq!(a.id.as_str(), "first");
        assert_eq!(a.status, JobStatus::Processing);
        assert_eq!(a.attempts, 1);

        let b = store.claim_next_queued().unwrap().expect("second claim");
        assert_eq!(b.id.as_str(), "second");
        assert!(store.claim_next_queued().unwrap().is_none());
    }

    #[test]
    fn requeued_job_goes_behind_nothing_older() {
        let store = store_with(&["a", "b"]);
        let a = store.claim_next_queued().unwrap().unwrap();
        store.requeue_with_backoff(&a.id, "timeout", 5).unwrap();

        // FIFO by creation order: "a" was created first.
        let next = store.claim_next_queued().unwrap().unwrap();
        assert_eq!(next.id.as_str(), "a");
        assert_eq!(next.attempts, 2);
    }

    #[test]
    fn done_clears_error_and_is_terminal() {
        let store = store_with(&["j1"]);
        let job = store.claim_next_queued().unwrap().unwrap();
        store.requeue_with_backoff(&job.id, "refused", 5).unwrap();
        store.claim_next_queued().unwrap().unwrap();
        store.mark_done(&job.id).unwrap();

        let done = store.get(&job.id).unwrap();
        assert_eq!(done.status, JobStatus::Done);
        assert!(done.last_error.is_none());

        let err = store.mark_failed(&job.id, "late").unwrap_err();
        assert!(matches!(
            err,
            AgentError::InvalidTransition {
                status: JobStatus::Done,
                ..
            }
        ));
    }

    #[test]
    fn transitions_require_processing() {
        let store = store_with(&["j1"]);
        let id = JobId::parse("j1").unwrap();
        assert!(matches!(
            store.mark_done(&id).unwrap_err(),
            AgentError::InvalidTransition {
                status: JobStatus::Queued,
                ..
            }
        ));
        assert!(matches!(
            store.mark_done(&JobId::parse("ghost").unwrap()).unwrap_err(),
            AgentError::NotFound(_)
        ));
    }

    #[test]
    fn requeue_exhausts_into_failed() {
        let store = store_with(&["j1"]);
        let max_retries = 2;

        let job = store.claim_next_queued().unwrap().unwrap();
        let status = store
            .requeue_with_backoff(&job.id, "connection refused", max_retries)
            .unwrap();
        assert_eq!(status, JobStatus::Queued);

        store.claim_next_queued().unwrap().unwrap();
        let status = store
            .requeue_with_backoff(&job.id, "connection refused", max_retries)
            .unwrap();
        assert_eq!(status, JobStatus::Failed);

        let failed = store.get(&job.id).unwrap();
        assert_eq!(failed.attempts, 2);
        assert_eq!(
            failed.last_error.as_deref(),
            Some("max retries reached: connection refused")
        );
    }

    #[test]
    fn last_error_is_truncated() {
        let store = store_with(&["j1"]);
        let job = store.claim_next_queued().unwrap().unwrap();
        store.mark_failed(&job.id, &"e".repeat(5000)).unwrap();
        let failed = store.get(&job.id).unwrap();
        assert_eq!(failed.last_error.unwrap().len(), MAX_ERROR_LEN);
    }

    #[test]
    fn bounded_insert_refuses_when_full() {
        let store = store_with(&["a", "b"]);
        let err = store.insert_bounded(&test_job("c"), 2).unwrap_err();
        assert!(matches!(err, AgentError::QueueFull(2)));

        // Claimed jobs no longer count against the bound.
        store.claim_next_queued().unwrap();
        store.insert_bounded(&test_job("c"), 2).unwrap();
        assert_eq!(store.queued_count().unwrap(), 2);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn jobs_survive_reopen_and_interrupted_work_is_recovered() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("jobs.db");
        {
            let store = JobStore::open(&path).unwrap();
            store.insert(&test_job("fresh")).unwrap();
            store.insert(&test_job("tired")).unwrap();
            store.insert(&test_job("waiting")).unwrap();
            store.claim_next_queued().unwrap();
            let tired = store.claim_next_queued().unwrap().unwrap();
            store.requeue_with_backoff(&tired.id, "timeout", 3).unwrap();
            // Crash with all three in flight; "tired" is on its second attempt.
            store.claim_next_queued().unwrap();
            store.claim_next_queued().unwrap();
        }

        let store = JobStore::open(&path).unwrap();
        let mut recovered = store.recover_interrupted(2).unwrap();
        recovered.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        let summary: Vec<_> = recovered
            .iter()
            .map(|(id, status)| (id.as_str(), *status))
            .collect();
        assert_eq!(
            summary,
            [
                ("fresh", JobStatus::Queued),
                ("tired", JobStatus::Failed),
                ("waiting", JobStatus::Queued),
            ]
        );

        let fresh = store.get(&JobId::parse("fresh").unwrap()).unwrap();
        assert_eq!(fresh.last_error.as_deref(), Some(INTERRUPTED));
        assert_eq!(fresh.attempts, 1);
        assert!(store.recover_interrupted(2).unwrap().is_empty());
    }
}
