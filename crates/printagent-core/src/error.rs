// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for the print agent.

use thiserror::Error;

use crate::types::JobStatus;

/// Top-level error type for all print agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    // -- Transport errors --
    #[error("network send failed: {0}")]
    Network(String),

    #[error("print command failed: {0}")]
    Command(String),

    #[error("print spooler error: {0}")]
    Spooler(String),

    // -- Printer configuration --
    #[error("printer '{0}' not found")]
    PrinterNotFound(String),

    #[error("{0}")]
    UnsupportedPrinter(String),

    #[error("invalid printer configuration: {0}")]
    InvalidPrinterConfig(String),

    #[error("printer detection failed: {0}")]
    Detection(String),

    // -- Jobs --
    #[error("job {0} already exists")]
    AlreadyExists(String),

    #[error("job {0} not found")]
    NotFound(String),

    #[error("job {id} cannot leave state {status}")]
    InvalidTransition { id: String, status: JobStatus },

    #[error("queue is full ({0} jobs waiting), try again later")]
    QueueFull(usize),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("stored payload does not match its hash (expected {expected}, got {actual})")]
    IntegrityMismatch { expected: String, actual: String },

    // -- Configuration --
    #[error("configuration error: {0}")]
    Config(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AgentError>;
