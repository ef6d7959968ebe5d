// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// External command backend: the payload is piped to a program's stdin
// (`lp -d <queue>`, a vendor CLI, a serial port writer...).

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use printagent_core::error::{AgentError, Result};

use super::PrinterBackend;

#[derive(Debug, Clone)]
pub struct CommandBackend {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandBackend {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }
}

#[async_trait]
impl PrinterBackend for CommandBackend {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        if self.argv.is_empty() {
            return Err(AgentError::InvalidPrinterConfig(
                "command printer has an empty argv".into(),
            ));
        }
        run_with_stdin(&self.argv, payload, self.timeout)
            .await
            .map_err(AgentError::Command)
    }
}

/// Run `argv`, stream `payload` to its stdin and wait for a zero exit.
///
/// The child is killed if it outlives `limit`.  Errors come back as a plain
/// message so callers can wrap them in the variant that fits their transport.
pub(crate) async fn run_with_stdin(
    argv: &[String],
    payload: &[u8],
    limit: Duration,
) -> std::result::Result<(), String> {
    let Some((program, args)) = argv.split_first() else {
        return Err("empty argv".into());
    };

    info!(%program, bytes = payload.len(), "running print command");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => format!("'{program}' not found"),
            _ => format!("spawn '{program}': {e}"),
        })?;

    let stdin = child.stdin.take();
    let feed = async move {
        if let Some(mut stdin) = stdin {
            // A program that exits early closes the pipe; its exit status and
            // stderr explain why, so the write error itself is only logged.
            if let Err(e) = stdin.write_all(payload).await {
                debug!("writing to '{program}' stdin: {e}");
            }
        }
    };
    // stdin is fed while stderr is drained, so a chatty program cannot stall
    // on a full stderr pipe before it reads its input.
    let run = async move {
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        output
    };

    let output = match tokio::time::timeout(limit, run).await {
        Err(_) => {
            return Err(format!(
                "'{program}' timed out after {}s and was killed",
                limit.as_secs_f64()
            ));
        }
        Ok(Err(e)) => return Err(format!("waiting for '{program}': {e}")),
        Ok(Ok(output)) => output,
    };

    if output.status.success() {
        debug!(%program, "print command finished");
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!(
            "'{program}' exited with {}: {}",
            output.status,
            stderr.trim()
        ))
    }
}
