// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The dispatcher: a single worker that drains the job store.
//
// One job at a time: claim, resolve the printer, send `copies` times, then
// record the outcome.  A failing copy aborts the attempt and the whole job is
// retried, so a retried job may print some copies twice; label printers
// make that visible but it never loses a label.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use printagent_core::AgentConfig;
use printagent_core::error::{AgentError, Result};
use printagent_core::types::{Job, JobId, JobStatus};
use printagent_security::{AuditLog, verify_hash};

use crate::backend::BackendFactory;
use crate::clock::Clock;
use crate::registry::PrinterRegistry;
use crate::retry::{RetryDecision, RetryPolicy, should_retry};
use crate::store::JobStore;

/// Worker timing.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub retry: RetryPolicy,
    /// Pause between checks of an empty queue.
    pub poll_interval: Duration,
}

impl From<&AgentConfig> for DispatchSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            retry: RetryPolicy::from(config),
            poll_interval: config.poll_interval,
        }
    }
}

/// What happened to the job a `run_once` call picked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub job_id: JobId,
    /// Attempt number this run used (1-based).
    pub attempts: u32,
    /// Status after the run: `done`, `queued` (retry pending) or `failed`.
    pub status: JobStatus,
    pub error: Option<String>,
}

/// Shared flag reporting whether the worker loop is alive.
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus(Arc<AtomicBool>);

impl WorkerStatus {
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, running: bool) {
        self.0.store(running, Ordering::Release);
    }
}

pub struct Dispatcher {
    store: Arc<JobStore>,
    registry: Arc<PrinterRegistry>,
    backends: Arc<dyn BackendFactory>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    settings: DispatchSettings,
    shutdown: watch::Sender<bool>,
    status: WorkerStatus,
}

impl Dispatcher {
    pub fn new(
        store: Arc<JobStore>,
        registry: Arc<PrinterRegistry>,
        backends: Arc<dyn BackendFactory>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
        settings: DispatchSettings,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            registry,
            backends,
            audit,
            clock,
            settings,
            shutdown,
            status: WorkerStatus::default(),
        }
    }

    /// Handle for observing the worker loop from elsewhere (e.g. `/status`).
    pub fn status(&self) -> WorkerStatus {
        self.status.clone()
    }

    /// Ask the loop to stop at its next suspension point.  An in-flight send
    /// is not interrupted.
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep on the clock unless shutdown is requested first.  Returns `true`
    /// if the pause was cut short.
    async fn pause(&self, duration: Duration) -> bool {
        let mut rx = self.shutdown.subscribe();
        if *rx.borrow_and_update() {
            return true;
        }
        tokio::select! {
            _ = self.clock.sleep(duration) => false,
            _ = rx.wait_for(|stop| *stop) => true,
        }
    }

    /// Process at most one job.  `Ok(None)` when the queue is empty.
    ///
    /// Errors are storage failures; printer failures are recorded on the job
    /// and reported through the outcome.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<Option<DispatchOutcome>> {
        let Some(job) = self.store.claim_next_queued()? else {
            return Ok(None);
        };
        let attempt = job.attempts;
        info!(job_id = %job.id, printer = %job.printer_name, attempt, "dispatching job");
        self.audit.append(
            "job_processing",
            json!({"job_id": job.id, "printer": job.printer_name, "attempt": attempt}),
        );

        let failure = match self.execute(&job).await {
            Ok(()) => {
                self.store.mark_done(&job.id).map_err(|e| unrecorded(&job.id, e))?;
                self.audit.append(
                    "job_done",
                    json!({
                        "job_id": job.id,
                        "printer": job.printer_name,
                        "copies": job.copies,
                        "attempts": attempt,
                        "payload_hash": job.payload_hash,
                    }),
                );
                return Ok(Some(DispatchOutcome {
                    job_id: job.id,
                    attempts: attempt,
                    status: JobStatus::Done,
                    error: None,
                }));
            }
            Err(failure) => failure,
        };

        let message = failure.error.to_string();
        if failure.during_send {
            self.audit.append(
                "job_error",
                json!({"job_id": job.id, "attempt": attempt, "error": message}),
            );
        }

        let status = match should_retry(&failure.error, attempt, &self.settings.retry) {
            RetryDecision::GiveUp(_) => {
                self.store
                    .mark_failed(&job.id, &message)
                    .map_err(|e| unrecorded(&job.id, e))?;
                JobStatus::Failed
            }
            RetryDecision::Exhausted => {
                self.store
                    .requeue_with_backoff(&job.id, &message, self.settings.retry.max_retries)
                    .map_err(|e| unrecorded(&job.id, e))?
            }
            RetryDecision::RetryAfter(delay) => {
                warn!(job_id = %job.id, attempt, delay_ms = delay.as_millis() as u64, "attempt failed: {message}");
                if self.pause(delay).await {
                    info!(job_id = %job.id, "backoff interrupted by shutdown, requeueing now");
                }
                self.store
                    .requeue_with_backoff(&job.id, &message, self.settings.retry.max_retries)
                    .map_err(|e| unrecorded(&job.id, e))?
            }
        };

        let stored_error = if status == JobStatus::Failed {
            let stored = self.store.get(&job.id)?.last_error;
            self.audit.append(
                "job_failed",
                json!({"job_id": job.id, "attempts": attempt, "error": stored}),
            );
            stored
        } else {
            Some(message)
        };

        Ok(Some(DispatchOutcome {
            job_id: job.id,
            attempts: attempt,
            status,
            error: stored_error,
        }))
    }

    /// One attempt: checks, printer resolution, then every copy.
    async fn execute(&self, job: &Job) -> std::result::Result<(), Failure> {
        if job.payload.is_empty() {
            return Err(Failure::before_send(AgentError::InvalidPayload(
                "empty payload".into(),
            )));
        }
        verify_hash(&job.payload, &job.payload_hash).map_err(Failure::before_send)?;

        let printer = self
            .registry
            .resolve(&job.printer_name)
            .await
            .ok_or_else(|| {
                Failure::before_send(AgentError::PrinterNotFound(job.printer_name.clone()))
            })?;

        let backend = self.backends.backend_for(&printer);
        for copy in 1..=job.copies {
            backend
                .send(&job.payload)
                .await
                .map_err(Failure::during_send)?;
            debug!(job_id = %job.id, copy, copies = job.copies, "copy sent");
        }
        Ok(())
    }

    /// Drain the queue until shutdown is requested.
    pub async fn run(&self) {
        self.status.set(true);
        info!(
            poll_ms = self.settings.poll_interval.as_millis() as u64,
            max_retries = self.settings.retry.max_retries,
            "dispatcher started"
        );

        while !self.is_shutting_down() {
            match self.run_once().await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    self.pause(self.settings.poll_interval).await;
                }
                Err(e) => {
                    error!("dispatch cycle failed: {e}");
                    self.pause(self.settings.poll_interval).await;
                }
            }
        }

        self.status.set(false);
        info!("dispatcher stopped");
    }

    /// Run the loop on a tokio task.
    pub fn spawn(self: Arc<Self>) -> WorkerHandle {
        // Flag it before the task is scheduled so callers never observe a
        // freshly spawned worker as stopped.
        self.status.set(true);
        let dispatcher = Arc::clone(&self);
        let task = tokio::spawn(async move { dispatcher.run().await });
        WorkerHandle {
            dispatcher: self,
            task,
        }
    }
}

/// The outcome of an attempt could not be stored; the job stays `processing`
/// until the next startup recovers it.
fn unrecorded(id: &JobId, err: AgentError) -> AgentError {
    error!(job_id = %id, "job outcome not recorded, job left processing until restart: {err}");
    err
}

/// A failed attempt, remembering whether any bytes may have reached a printer.
struct Failure {
    error: AgentError,
    during_send: bool,
}

impl Failure {
    fn before_send(error: AgentError) -> Self {
        Self {
            error,
            during_send: false,
        }
    }

    fn during_send(error: AgentError) -> Self {
        Self {
            error,
            during_send: true,
        }
    }
}

/// Owner of a spawned dispatcher.
pub struct WorkerHandle {
    dispatcher: Arc<Dispatcher>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn status(&self) -> WorkerStatus {
        self.dispatcher.status()
    }

    /// Signal the loop and wait for it to finish its current job.
    pub async fn shutdown(self) {
        self.dispatcher.request_shutdown();
        if let Err(e) = self.task.await {
            error!("dispatcher task ended abnormally: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use printagent_core::types::{PrinterDescriptor, PrinterKind, PrinterSource};
    use printagent_security::hash_bytes;

    use super::*;
    use crate::clock::{RecordingClock, TokioClock};
    use crate::detect::StaticDetector;
    use crate::testing::{ScriptedBackends, Step};

    struct Harness {
        dispatcher: Arc<Dispatcher>,
        store: Arc<JobStore>,
        backends: ScriptedBackends,
        clock: Arc<RecordingClock>,
        audit: Arc<AuditLog>,
    }

    fn printers() -> Vec<PrinterDescriptor> {
        vec![
            PrinterDescriptor::new(
                "ZT411",
                PrinterKind::Network {
                    host: "10.0.0.5".into(),
                    port: 9100,
                },
                PrinterSource::Configured,
            ),
            PrinterDescriptor::new(
                "office",
                PrinterKind::Unsupported {
                    reason: "no raw transport".into(),
                },
                PrinterSource::Configured,
            ),
        ]
    }

    fn policy(max_retries: u32, ceiling_secs: u64) -> DispatchSettings {
        DispatchSettings {
            retry: RetryPolicy {
                max_retries,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(ceiling_secs),
            },
            poll_interval: Duration::from_millis(10),
        }
    }

    fn harness(script: Vec<Step>, settings: DispatchSettings) -> Harness {
        let store = Arc::new(JobStore::open_in_memory().expect("open in-memory db"));
        let audit = Arc::new(AuditLog::open_in_memory("agent-test").expect("audit"));
        let registry = Arc::new(PrinterRegistry::new(
            printers(),
            Arc::new(StaticDetector::default()),
        ));
        let backends = ScriptedBackends::new(script);
        let clock = Arc::new(RecordingClock::new());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            registry,
            Arc::new(backends.clone()),
            audit.clone(),
            clock.clone(),
            settings,
        ));
        Harness {
            dispatcher,
            store,
            backends,
            clock,
            audit,
        }
    }

    fn enqueue(store: &JobStore, id: &str, printer: &str, copies: u32) -> JobId {
        let payload = b"^XA^FO50,50^FDlabel^FS^XZ".to_vec();
        let hash = hash_bytes(&payload);
        let job = Job::new(JobId::parse(id).unwrap(), printer.into(), payload, hash, copies);
        store.insert(&job).expect("insert");
        job.id
    }

    async fn drain(h: &Harness) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = h.dispatcher.run_once().await.expect("run_once") {
            outcomes.push(outcome);
        }
        outcomes
    }

    fn events(audit: &AuditLog, id: &JobId) -> Vec<String> {
        audit
            .entries_for_job(id.as_str())
            .unwrap()
            .into_iter()
            .map(|e| e.event)
            .collect()
    }

    #[tokio::test]
    async fn empty_queue_yields_none() {
        let h = harness(vec![], policy(5, 60));
        assert!(h.dispatcher.run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn copies_are_sent_individually() {
        let h = harness(vec![], policy(5, 60));
        let id = enqueue(&h.store, "j1", "ZT411", 4);

        let outcome = h.dispatcher.run_once().await.unwrap().unwrap();
        assert_eq!(outcome.status, JobStatus::Done);
        assert_eq!(h.backends.send_count(), 4);
        assert!(h.backends.sends().iter().all(|(p, _)| p == "ZT411"));

        let job = h.store.get(&id).unwrap();
        assert_eq!((job.status, job.attempts), (JobStatus::Done, 1));
        assert_eq!(events(&h.audit, &id), ["job_processing", "job_done"]);
        assert!(h.clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn unknown_printer_fails_without_retry() {
        let h = harness(vec![], policy(5, 60));
        let id = enqueue(&h.store, "j1", "ghost", 1);

        drain(&h).await;
        let job = h.store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.last_error.as_deref(), Some("printer 'ghost' not found"));
        assert_eq!(h.backends.send_count(), 0);
        assert!(h.clock.sleeps().is_empty());
        assert_eq!(events(&h.audit, &id), ["job_processing", "job_failed"]);
    }

    #[tokio::test]
    async fn unsupported_printer_fails_on_first_attempt() {
        let h = harness(vec![], policy(5, 60));
        let id = enqueue(&h.store, "j1", "office", 1);

        drain(&h).await;
        let job = h.store.get(&id).unwrap();
        assert_eq!((job.status, job.attempts), (JobStatus::Failed, 1));
        assert_eq!(
            job.last_error.as_deref(),
            Some("printer type has no automatic transport")
        );
    }

    #[tokio::test]
    async fn permanent_backend_error_is_not_retried() {
        let h = harness(vec![Step::Permanent], policy(5, 60));
        let id = enqueue(&h.store, "j1", "ZT411", 1);

        drain(&h).await;
        let job = h.store.get(&id).unwrap();
        assert_eq!((job.status, job.attempts), (JobStatus::Failed, 1));
        assert_eq!(
            events(&h.audit, &id),
            ["job_processing", "job_error", "job_failed"]
        );
    }

    #[tokio::test]
    async fn transient_failures_then_success() {
        let h = harness(vec![Step::Transient, Step::Transient], policy(5, 60));
        let id = enqueue(&h.store, "j1", "ZT411", 1);

        let outcomes = drain(&h).await;
        let statuses: Vec<_> = outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            [JobStatus::Queued, JobStatus::Queued, JobStatus::Done]
        );

        let job = h.store.get(&id).unwrap();
        assert_eq!((job.status, job.attempts), (JobStatus::Done, 3));
        assert!(job.last_error.is_none());
        assert_eq!(
            h.clock.sleeps(),
            [Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test]
    async fn always_failing_job_exhausts_retries() {
        let h = harness(vec![Step::Transient; 10], policy(3, 60));
        let id = enqueue(&h.store, "j1", "ZT411", 1);

        drain(&h).await;
        let job = h.store.get(&id).unwrap();
        assert_eq!((job.status, job.attempts), (JobStatus::Failed, 3));
        assert!(
            job.last_error
                .as_deref()
                .unwrap()
                .starts_with("max retries reached: network send failed")
        );
        // No sleep after the final attempt.
        assert_eq!(
            h.clock.sleeps(),
            [Duration::from_secs(2), Duration::from_secs(4)]
        );
        let trail = events(&h.audit, &id);
        assert_eq!(trail.iter().filter(|e| *e == "job_error").count(), 3);
        assert_eq!(trail.last().map(String::as_str), Some("job_failed"));
    }

    #[tokio::test]
    async fn backoff_is_capped_by_ceiling() {
        let h = harness(vec![Step::Transient; 10], policy(5, 5));
        enqueue(&h.store, "j1", "ZT411", 1);

        drain(&h).await;
        let secs: Vec<u64> = h.clock.sleeps().iter().map(Duration::as_secs).collect();
        assert_eq!(secs, [2, 4, 5, 5]);
    }

    #[tokio::test]
    async fn mid_copy_failure_retries_whole_attempt() {
        // copies = 3, second physical send of attempt 1 fails.
        let h = harness(vec![Step::Ok, Step::Transient], policy(5, 60));
        let id = enqueue(&h.store, "zt411-label", "ZT411", 3);

        let outcomes = drain(&h).await;
        assert_eq!(outcomes.len(), 2);

        let job = h.store.get(&id).unwrap();
        assert_eq!((job.status, job.attempts), (JobStatus::Done, 2));
        assert_eq!(h.backends.send_count(), 5);
    }

    #[tokio::test]
    async fn corrupted_payload_fails_permanently() {
        let h = harness(vec![], policy(5, 60));
        let job = Job::new(
            JobId::parse("j1").unwrap(),
            "ZT411".into(),
            b"^XA^XZ".to_vec(),
            hash_bytes(b"something else"),
            1,
        );
        h.store.insert(&job).unwrap();

        drain(&h).await;
        let stored = h.store.get(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(h.backends.send_count(), 0);
    }

    #[tokio::test]
    async fn fifo_across_jobs() {
        let h = harness(vec![], policy(5, 60));
        enqueue(&h.store, "first", "ZT411", 1);
        enqueue(&h.store, "second", "ZT411", 1);

        let order: Vec<_> = drain(&h)
            .await
            .into_iter()
            .map(|o| o.job_id.to_string())
            .collect();
        assert_eq!(order, ["first", "second"]);
    }

    #[tokio::test]
    async fn worker_drains_queue_and_stops() {
        let h = harness(vec![], policy(5, 60));
        let a = enqueue(&h.store, "a", "ZT411", 1);
        let b = enqueue(&h.store, "b", "ZT411", 2);

        let worker = h.dispatcher.clone().spawn();
        let status = worker.status();
        assert!(status.is_running());

        tokio::time::timeout(Duration::from_secs(5), async {
            while h.store.get(&b).unwrap().status != JobStatus::Done {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("worker finished both jobs");

        assert_eq!(h.store.get(&a).unwrap().status, JobStatus::Done);
        worker.shutdown().await;
        assert!(!status.is_running());
    }

    #[tokio::test]
    async fn shutdown_interrupts_backoff_and_requeues() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let backends = ScriptedBackends::new(vec![Step::Transient]);
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            Arc::new(PrinterRegistry::new(
                printers(),
                Arc::new(StaticDetector::default()),
            )),
            Arc::new(backends.clone()),
            Arc::new(AuditLog::open_in_memory("agent-test").unwrap()),
            Arc::new(TokioClock),
            DispatchSettings {
                retry: RetryPolicy {
                    max_retries: 5,
                    base_delay: Duration::from_secs(3600),
                    max_delay: Duration::from_secs(3600),
                },
                poll_interval: Duration::from_millis(10),
            },
        ));
        let id = enqueue(&store, "j1", "ZT411", 1);

        let worker = dispatcher.spawn();
        tokio::time::timeout(Duration::from_secs(5), async {
            while backends.send_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("first attempt made");

        tokio::time::timeout(Duration::from_secs(5), worker.shutdown())
            .await
            .expect("shutdown does not wait for the backoff");

        let job = store.get(&id).unwrap();
        assert_eq!((job.status, job.attempts), (JobStatus::Queued, 1));
        assert!(job.last_error.is_some());
    }

    /// Make writes matching `event` fail, from a second connection, as a
    /// full disk would.
    fn sabotage(db: &std::path::Path, event: &str) {
        let conn = rusqlite::Connection::open(db).unwrap();
        conn.execute_batch(&format!(
            "CREATE TRIGGER sabotage {event}
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;"
        ))
        .unwrap();
    }

    fn file_backed(dir: &std::path::Path, script: Vec<Step>) -> Harness {
        let store = Arc::new(JobStore::open(dir.join("jobs.db")).unwrap());
        let audit = Arc::new(AuditLog::open(dir.join("audit.db"), "agent-test").unwrap());
        let backends = ScriptedBackends::new(script);
        let clock = Arc::new(RecordingClock::new());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            Arc::new(PrinterRegistry::new(printers(), Arc::new(StaticDetector::default()))),
            Arc::new(backends.clone()),
            audit.clone(),
            clock.clone(),
            policy(5, 60),
        ));
        Harness {
            dispatcher,
            store,
            backends,
            clock,
            audit,
        }
    }

    #[tokio::test]
    async fn failing_audit_writes_do_not_stop_printing() {
        let dir = tempfile::tempdir().unwrap();
        let h = file_backed(dir.path(), vec![Step::Transient]);
        let id = enqueue(&h.store, "j1", "ZT411", 2);
        sabotage(&dir.path().join("audit.db"), "BEFORE INSERT ON audit_log");

        let outcomes = drain(&h).await;
        assert_eq!(outcomes.len(), 2);

        let job = h.store.get(&id).unwrap();
        assert_eq!((job.status, job.attempts), (JobStatus::Done, 2));
        assert_eq!(h.backends.send_count(), 3);
        assert_eq!(h.audit.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn unrecorded_outcome_surfaces_and_is_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let h = file_backed(dir.path(), vec![]);
        let id = enqueue(&h.store, "j1", "ZT411", 1);
        sabotage(
            &dir.path().join("jobs.db"),
            "BEFORE UPDATE OF status ON jobs WHEN NEW.status = 'done'",
        );

        let err = h.dispatcher.run_once().await.unwrap_err();
        assert!(matches!(err, AgentError::Database(_)), "{err}");
        assert_eq!(h.backends.send_count(), 1);
        assert_eq!(h.store.get(&id).unwrap().status, JobStatus::Processing);

        rusqlite::Connection::open(dir.path().join("jobs.db"))
            .unwrap()
            .execute_batch("DROP TRIGGER sabotage;")
            .unwrap();
        let recovered = h.store.recover_interrupted(5).unwrap();
        assert_eq!(recovered, vec![(id.clone(), JobStatus::Queued)]);
    }
}
