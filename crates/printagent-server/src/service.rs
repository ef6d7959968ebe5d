// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Agent service layer: the operations behind the HTTP API.
//
// Kept free of axum types so the same calls can be made from tests or a
// different front end.  Everything is behind `Arc`, so the service is cheap
// to clone into every request.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};

use printagent_core::AgentConfig;
use printagent_core::error::{AgentError, Result};
use printagent_core::types::{
    Job, JobId, JobStatus, MAX_COPIES, PrinterDescriptor, PrinterKind, validate_copies,
};
use printagent_print::{JobStore, PrinterRegistry, WorkerStatus};
use printagent_security::{AuditLog, hash_bytes};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub ok: bool,
    pub agent_id: String,
    pub name: String,
    pub printers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub ok: bool,
    pub agent_id: String,
    pub name: String,
    /// Jobs waiting in `queued`.
    pub queue_len: usize,
    /// Jobs stored in any state.
    pub jobs_total: usize,
    /// Whether the dispatcher loop is alive.
    pub running: bool,
}

/// A printer as listed by `GET /printers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterView {
    pub name: String,
    pub kind: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub printer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&PrinterDescriptor> for PrinterView {
    fn from(p: &PrinterDescriptor) -> Self {
        let mut view = Self {
            name: p.name.clone(),
            kind: p.kind.label().to_owned(),
            source: p.source.as_str().to_owned(),
            host: None,
            port: None,
            cmd: None,
            printer: None,
            reason: None,
        };
        match &p.kind {
            PrinterKind::Network { host, port } => {
                view.host = Some(host.clone());
                view.port = Some(*port);
            }
            PrinterKind::Command { cmd } => view.cmd = Some(cmd.clone()),
            PrinterKind::Native { .. } => view.printer = Some(p.native_target().to_owned()),
            PrinterKind::Unsupported { reason } => view.reason = Some(reason.clone()),
        }
        view
    }
}

/// Body of `POST /jobs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub printer: String,
    #[serde(default)]
    pub raw_base64: Option<String>,
    #[serde(default)]
    pub raw_text: Option<String>,
    /// Signed so that negative values reach validation instead of failing
    /// deserialization.
    #[serde(default = "default_copies")]
    pub copies: i64,
    #[serde(default)]
    pub client_job_id: Option<String>,
}

fn default_copies() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub job_id: String,
    pub status: JobStatus,
}

/// A job as reported by `GET /jobs/{id}`.  The payload is never echoed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub id: String,
    pub printer: String,
    pub copies: u32,
    pub attempts: u32,
    pub status: JobStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id.to_string(),
            printer: job.printer_name,
            copies: job.copies,
            attempts: job.attempts,
            status: job.status,
            last_error: job.last_error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AgentService {
    config: Arc<AgentConfig>,
    store: Arc<JobStore>,
    registry: Arc<PrinterRegistry>,
    audit: Arc<AuditLog>,
    worker: WorkerStatus,
}

impl AgentService {
    pub fn new(
        config: Arc<AgentConfig>,
        store: Arc<JobStore>,
        registry: Arc<PrinterRegistry>,
        audit: Arc<AuditLog>,
        worker: WorkerStatus,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            audit,
            worker,
        }
    }

    /// The shared secret clients must present, if one is configured.
    pub fn token(&self) -> Option<&str> {
        self.config.token.as_deref()
    }

    /// Unauthenticated, so it reports the names known from the last
    /// detection instead of spawning OS tools per request.
    pub fn health(&self) -> Health {
        Health {
            ok: true,
            agent_id: self.config.agent_id.clone(),
            name: self.config.display_name().to_owned(),
            printers: self.registry.known_names(),
        }
    }

    pub fn status(&self) -> Result<AgentStatus> {
        Ok(AgentStatus {
            ok: true,
            agent_id: self.config.agent_id.clone(),
            name: self.config.display_name().to_owned(),
            queue_len: self.store.queued_count()?,
            jobs_total: self.store.count()?,
            running: self.worker.is_running(),
        })
    }

    pub async fn list_printers(&self) -> Vec<PrinterView> {
        self.registry
            .resolve_all()
            .await
            .values()
            .map(PrinterView::from)
            .collect()
    }

    /// Validate a submission and persist it as a `queued` job.
    #[instrument(skip_all, fields(printer = %req.printer))]
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<EnqueueResponse> {
        let printer = req.printer.trim();
        if printer.is_empty() {
            return Err(AgentError::Validation("printer is required".into()));
        }

        let payload = decode_payload(&req)?;
        let copies = u32::try_from(req.copies)
            .ok()
            .and_then(|c| validate_copies(c).ok())
            .ok_or_else(|| {
                AgentError::Validation(format!("copies must be between 1 and {MAX_COPIES}"))
            })?;
        let id = match req.client_job_id.as_deref() {
            Some(raw) => JobId::parse(raw)?,
            None => JobId::new(),
        };

        if self.config.validate_printer_on_enqueue
            && self.registry.resolve(printer).await.is_none()
        {
            return Err(AgentError::PrinterNotFound(printer.to_owned()));
        }

        let payload_hash = hash_bytes(&payload);
        let bytes = payload.len();
        let job = Job::new(id, printer.to_owned(), payload, payload_hash, copies);
        self.store.insert_bounded(&job, self.config.queue_capacity)?;

        self.audit.append(
            "job_queued",
            json!({
                "job_id": job.id,
                "printer": job.printer_name,
                "copies": job.copies,
                "bytes": bytes,
                "payload_hash": job.payload_hash,
            }),
        );
        info!(job_id = %job.id, copies, bytes, "job queued");

        Ok(EnqueueResponse {
            job_id: job.id.to_string(),
            status: JobStatus::Queued,
        })
    }

    pub fn job_status(&self, id: &str) -> Result<JobView> {
        // An id that could never have been stored cannot be found either.
        let id = JobId::parse(id).map_err(|_| AgentError::NotFound(id.to_owned()))?;
        Ok(self.store.get(&id)?.into())
    }
}

/// `raw_base64` wins when non-empty; otherwise `raw_text` as UTF-8.
fn decode_payload(req: &EnqueueRequest) -> Result<Vec<u8>> {
    let payload = match req.raw_base64.as_deref().filter(|s| !s.is_empty()) {
        Some(encoded) => STANDARD
            .decode(encoded.trim())
            .map_err(|e| AgentError::Validation(format!("raw_base64 is not valid base64: {e}")))?,
        None => req
            .raw_text
            .as_deref()
            .map(|text| text.as_bytes().to_vec())
            .unwrap_or_default(),
    };
    if payload.is_empty() {
        return Err(AgentError::Validation(
            "one of raw_base64 or raw_text must carry a non-empty payload".into(),
        ));
    }
    Ok(payload)
}
