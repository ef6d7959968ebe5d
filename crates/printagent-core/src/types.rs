// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the print agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{AgentError, Result};

/// Upper bound on `copies` for a single job.
pub const MAX_COPIES: u32 = 100;

/// `last_error` is truncated to this many characters before it is stored.
pub const MAX_ERROR_LEN: usize = 1000;

/// Longest client-supplied job id we accept.
pub const MAX_JOB_ID_LEN: usize = 128;

/// Default raw TCP port (HP JetDirect).
pub const RAW_PORT: u16 = 9100;

/// Unique identifier for a print job.
///
/// Either supplied by the client (for idempotent re-submission) or a freshly
/// generated UUID v4.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Validate a client-supplied id.
    ///
    /// Accepts 1..=128 characters from `[A-Za-z0-9._:-]`.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() || raw.len() > MAX_JOB_ID_LEN {
            return Err(AgentError::Validation(format!(
                "client_job_id must be 1..={MAX_JOB_ID_LEN} characters"
            )));
        }
        let valid = raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'));
        if !valid {
            return Err(AgentError::Validation(
                "client_job_id may only contain letters, digits, '.', '_', ':' and '-'".into(),
            ));
        }
        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle states of a print job.
///
/// `queued → processing → {done | queued (retry) | failed}`; `done` and
/// `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for the dispatcher.
    Queued,
    /// Claimed by the dispatcher, transport in flight.
    Processing,
    /// Every copy was delivered.
    Done,
    /// Permanently failed, see `last_error`.
    Failed,
}

impl JobStatus {
    /// Column / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(AgentError::Database(format!("unknown job status '{other}'"))),
        }
    }
}

/// Classification of errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Timeout, refused connection, busy spooler. Safe to retry.
    Transient,
    /// Configuration problem or bad data. Retrying cannot help.
    Permanent,
}

/// A unit of print work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub printer_name: String,
    /// Raw printer-language bytes (ZPL, ESC/POS, PCL, ...). Never interpreted.
    #[serde(skip)]
    pub payload: Vec<u8>,
    /// SHA-256 hex digest of `payload`.
    pub payload_hash: String,
    pub copies: u32,
    pub status: JobStatus,
    /// Number of times the job has been claimed for execution.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        id: JobId,
        printer_name: String,
        payload: Vec<u8>,
        payload_hash: String,
        copies: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            printer_name,
            payload,
            payload_hash,
            copies,
            status: JobStatus::Queued,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Check `copies` against `1..=MAX_COPIES`.
pub fn validate_copies(copies: u32) -> Result<u32> {
    if (1..=MAX_COPIES).contains(&copies) {
        Ok(copies)
    } else {
        Err(AgentError::Validation(format!(
            "copies must be between 1 and {MAX_COPIES}"
        )))
    }
}

/// Cut `message` down to at most `max` characters (not bytes).
pub fn truncate_message(message: &str, max: usize) -> String {
    match message.char_indices().nth(max) {
        Some((idx, _)) => message[..idx].to_owned(),
        None => message.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Printers
// ---------------------------------------------------------------------------

/// Where a printer descriptor came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterSource {
    /// Statically configured (`PRINTERS_JSON` / config file).
    #[default]
    Configured,
    /// Found by OS enumeration at resolution time.
    Detected,
}

impl PrinterSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configured => "configured",
            Self::Detected => "detected",
        }
    }
}

/// Dispatch capability of a printer, with the transport parameters it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PrinterKind {
    /// Raw TCP socket (JetDirect style).
    Network {
        host: String,
        #[serde(default = "default_raw_port")]
        port: u16,
    },
    /// External executable that receives the payload on stdin.
    Command {
        #[serde(alias = "argv", deserialize_with = "deserialize_argv")]
        cmd: Vec<String>,
    },
    /// OS print spooler, raw datatype. `printer` defaults to the descriptor name.
    #[serde(alias = "windows")]
    Native {
        #[serde(default)]
        printer: Option<String>,
    },
    /// Known destination without an automatic transport.
    #[serde(alias = "local")]
    Unsupported {
        #[serde(default = "default_unsupported_reason")]
        reason: String,
    },
}

impl PrinterKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Command { .. } => "command",
            Self::Native { .. } => "native",
            Self::Unsupported { .. } => "unsupported",
        }
    }
}

fn default_raw_port() -> u16 {
    RAW_PORT
}

fn default_unsupported_reason() -> String {
    "printer type has no automatic transport".into()
}

/// `cmd` may be written either as an argv list or as a single command line.
fn deserialize_argv<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Argv {
        List(Vec<String>),
        Line(String),
    }

    Ok(match Argv::deserialize(deserializer)? {
        Argv::List(list) => list,
        Argv::Line(line) => line.split_whitespace().map(String::from).collect(),
    })
}

/// A named print destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterDescriptor {
    pub name: String,
    #[serde(flatten)]
    pub kind: PrinterKind,
    #[serde(default)]
    pub source: PrinterSource,
}

impl PrinterDescriptor {
    pub fn new(name: impl Into<String>, kind: PrinterKind, source: PrinterSource) -> Self {
        Self {
            name: name.into(),
            kind,
            source,
        }
    }

    /// OS-level printer identifier for native dispatch.
    pub fn native_target(&self) -> &str {
        match &self.kind {
            PrinterKind::Native {
                printer: Some(printer),
            } => printer,
            _ => &self.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_job_id_validation() {
        assert!(JobId::parse("order-42:label.1_a").is_ok());
        assert!(JobId::parse("").is_err());
        assert!(JobId::parse("has space").is_err());
        assert!(JobId::parse(&"x".repeat(MAX_JOB_ID_LEN + 1)).is_err());
    }

    #[test]
    fn copies_bounds() {
        assert!(validate_copies(0).is_err());
        assert_eq!(validate_copies(1).unwrap(), 1);
        assert_eq!(validate_copies(MAX_COPIES).unwrap(), MAX_COPIES);
        assert!(validate_copies(MAX_COPIES + 1).is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_message("impresión", 8), "impresió");
        assert_eq!(truncate_message("short", 100), "short");
    }

    #[test]
    fn status_parses_from_column_text() {
        assert_eq!("processing".parse::<JobStatus>().unwrap(), JobStatus::Processing);
    }

    #[test]
    fn parse_network_descriptor_with_default_port() {
        let p: PrinterDescriptor =
            serde_json::from_str(r#"{"name":"zebra1","type":"network","host":"10.0.0.5"}"#)
                .unwrap();
        assert_eq!(
            p.kind,
            PrinterKind::Network {
                host: "10.0.0.5".into(),
                port: RAW_PORT
            }
        );
        assert_eq!(p.source, PrinterSource::Configured);
    }

    #[test]
    fn parse_command_descriptor_from_string_or_list() {
        let line: PrinterDescriptor =
            serde_json::from_str(r#"{"name":"lp1","type":"command","cmd":"lp -d Zebra_TP"}"#)
                .unwrap();
        let list: PrinterDescriptor = serde_json::from_str(
            r#"{"name":"lp1","type":"command","cmd":["lp","-d","Zebra_TP"]}"#,
        )
        .unwrap();
        assert_eq!(line.kind, list.kind);
    }

    #[test]
    fn legacy_type_aliases() {
        let win: PrinterDescriptor =
            serde_json::from_str(r#"{"name":"ZDesigner","type":"windows"}"#).unwrap();
        assert_eq!(win.kind.label(), "native");
        assert_eq!(win.native_target(), "ZDesigner");

        let local: PrinterDescriptor =
            serde_json::from_str(r#"{"name":"office","type":"local"}"#).unwrap();
        assert_eq!(local.kind.label(), "unsupported");
    }
}
