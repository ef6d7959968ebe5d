// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Agent configuration.
//
// Loaded once at startup and immutable afterwards.  Layers, lowest priority
// first: built-in defaults, an optional JSON file named by `AGENT_CONFIG`,
// then individual environment variables (a `.env` file in the working
// directory is read first, as the original deployment scripts expect).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AgentError, Result};
use crate::types::{PrinterDescriptor, PrinterSource};

/// Process-wide agent settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Identity reported by `/health` and stamped on audit records.
    pub agent_id: String,
    /// Optional human-readable name (defaults to `agent_id`).
    pub agent_name: Option<String>,
    /// Shared secret expected in `X-Agent-Token`.  `None` fails closed.
    pub token: Option<String>,
    /// HTTP listen address.
    pub bind_addr: SocketAddr,
    /// SQLite database holding the job queue.
    pub db_path: PathBuf,
    /// SQLite database holding the audit trail.
    pub audit_path: PathBuf,
    /// Dispatcher sleep between empty-queue checks.
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    /// Attempts before a transiently failing job is finalized as `failed`.
    pub max_retries: u32,
    /// Backoff for attempt `n` is `backoff_base * 2^(n-1)`.
    #[serde(with = "duration_secs")]
    pub backoff_base: Duration,
    /// Upper bound on a single backoff delay.
    #[serde(with = "duration_secs")]
    pub backoff_ceiling: Duration,
    /// Maximum number of jobs waiting in `queued`.
    pub queue_capacity: usize,
    /// Connect / write timeout for raw TCP printers.
    #[serde(with = "duration_secs")]
    pub network_timeout: Duration,
    /// Wall-clock limit for command and spooler invocations.
    #[serde(with = "duration_secs")]
    pub command_timeout: Duration,
    /// Reject `POST /jobs` for printers that are not currently known.
    pub validate_printer_on_enqueue: bool,
    /// Enumerate OS printers in addition to the configured ones.
    pub detect_printers: bool,
    /// Statically configured printers.
    pub printers: Vec<PrinterDescriptor>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: "agent-unknown".into(),
            agent_name: None,
            token: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9001)),
            db_path: PathBuf::from("print_agent_jobs.db"),
            audit_path: PathBuf::from("print_agent_audit.db"),
            poll_interval: Duration::from_secs(2),
            max_retries: 5,
            backoff_base: Duration::from_secs(2),
            backoff_ceiling: Duration::from_secs(60),
            queue_capacity: 200,
            network_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            validate_printer_on_enqueue: false,
            detect_printers: true,
            printers: Vec::new(),
        }
    }
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("agent_id", &self.agent_id)
            .field("agent_name", &self.agent_name)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("bind_addr", &self.bind_addr)
            .field("db_path", &self.db_path)
            .field("audit_path", &self.audit_path)
            .field("poll_interval", &self.poll_interval)
            .field("max_retries", &self.max_retries)
            .field("backoff_base", &self.backoff_base)
            .field("backoff_ceiling", &self.backoff_ceiling)
            .field("queue_capacity", &self.queue_capacity)
            .field("validate_printer_on_enqueue", &self.validate_printer_on_enqueue)
            .field("detect_printers", &self.detect_printers)
            .field("printers", &self.printers.len())
            .finish_non_exhaustive()
    }
}

impl AgentConfig {
    /// Load the configuration from `.env`, `AGENT_CONFIG` and the process
    /// environment, then validate it.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => info!(path = %path.display(), "loaded .env file"),
            Err(dotenvy::Error::Io(_)) => {}
            Err(e) => return Err(AgentError::Config(format!(".env: {e}"))),
        }

        let mut config = match std::env::var("AGENT_CONFIG") {
            Ok(path) if !path.is_empty() => Self::from_file(Path::new(&path))?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file.  Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| AgentError::Config(format!("parse {}: {e}", path.display())))?;
        Ok(config)
    }

    /// Apply environment overrides.  `lookup` abstracts `std::env::var` so
    /// tests can feed a fixed map.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("AGENT_ID") {
            self.agent_id = v;
        }
        if let Some(v) = get("AGENT_NAME") {
            self.agent_name = Some(v);
        }
        if let Some(v) = get("AGENT_TOKEN").or_else(|| get("PRINT_AGENT_TOKEN")) {
            self.token = Some(v);
        }
        if let Some(v) = get("AGENT_BIND") {
            self.bind_addr = v
                .parse()
                .map_err(|e| AgentError::Config(format!("AGENT_BIND '{v}': {e}")))?;
        }
        if let Some(v) = get("DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = get("AUDIT_DB_PATH") {
            self.audit_path = PathBuf::from(v);
        }
        if let Some(v) = get("WORKER_POLL_INTERVAL") {
            self.poll_interval = parse_secs("WORKER_POLL_INTERVAL", &v)?;
        }
        if let Some(v) = get("MAX_RETRIES") {
            self.max_retries = parse_num("MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("RETRY_BACKOFF_BASE") {
            self.backoff_base = parse_secs("RETRY_BACKOFF_BASE", &v)?;
        }
        if let Some(v) = get("RETRY_BACKOFF_CEILING") {
            self.backoff_ceiling = parse_secs("RETRY_BACKOFF_CEILING", &v)?;
        }
        if let Some(v) = get("QUEUE_MAX") {
            self.queue_capacity = parse_num("QUEUE_MAX", &v)?;
        }
        if let Some(v) = get("NETWORK_TIMEOUT") {
            self.network_timeout = parse_secs("NETWORK_TIMEOUT", &v)?;
        }
        if let Some(v) = get("COMMAND_TIMEOUT") {
            self.command_timeout = parse_secs("COMMAND_TIMEOUT", &v)?;
        }
        if let Some(v) = get("VALIDATE_PRINTER_ON_ENQUEUE") {
            self.validate_printer_on_enqueue = parse_bool("VALIDATE_PRINTER_ON_ENQUEUE", &v)?;
        }
        if let Some(v) = get("DETECT_PRINTERS") {
            self.detect_printers = parse_bool("DETECT_PRINTERS", &v)?;
        }
        if let Some(v) = get("PRINTERS_JSON") {
            self.printers = parse_printers_json(&v)?;
        }
        Ok(())
    }

    /// Reject settings the agent cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(AgentError::Config("max_retries must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(AgentError::Config("queue_capacity must be at least 1".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(AgentError::Config("poll_interval must be positive".into()));
        }
        let mut seen = HashSet::new();
        for printer in &self.printers {
            if printer.name.is_empty() {
                return Err(AgentError::Config("configured printer without a name".into()));
            }
            if !seen.insert(printer.name.as_str()) {
                return Err(AgentError::Config(format!(
                    "printer '{}' configured more than once",
                    printer.name
                )));
            }
        }
        if self.token.is_none() {
            warn!("no agent token configured, authenticated routes will answer 500");
        }
        Ok(())
    }

    /// Name shown to clients.
    pub fn display_name(&self) -> &str {
        self.agent_name.as_deref().unwrap_or(&self.agent_id)
    }
}

/// Parse `PRINTERS_JSON`.  Entries without a name are skipped with a warning;
/// any other malformed entry is a configuration error.
fn parse_printers_json(raw: &str) -> Result<Vec<PrinterDescriptor>> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(raw)
        .map_err(|e| AgentError::Config(format!("PRINTERS_JSON must be a JSON list: {e}")))?;

    let mut printers = Vec::with_capacity(entries.len());
    for entry in entries {
        let named = entry
            .get("name")
            .and_then(|n| n.as_str())
            .is_some_and(|n| !n.is_empty());
        if !named {
            warn!(entry = %entry, "skipping PRINTERS_JSON entry without a name");
            continue;
        }
        let mut printer: PrinterDescriptor = serde_json::from_value(entry)
            .map_err(|e| AgentError::Config(format!("PRINTERS_JSON entry: {e}")))?;
        printer.source = PrinterSource::Configured;
        printers.push(printer);
    }
    Ok(printers)
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|e| AgentError::Config(format!("{key} '{value}': {e}")))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|e| AgentError::Config(format!("{key} '{value}': {e}")))
}

fn parse_num<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AgentError::Config(format!("{key} '{value}': {e}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AgentError::Config(format!("{key} '{value}': expected a boolean"))),
    }
}

/// Durations are written as (fractional) seconds in config files.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
