// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw TCP backend (JetDirect style, port 9100 by default).
//
// Open a socket, write the bytes, close.  No protocol negotiation and no
// feedback from the printer: a clean close is the only success signal.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use printagent_core::error::{AgentError, Result};

use super::PrinterBackend;

/// Writes are chunked so progress shows up in debug logs on large payloads.
const CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone)]
pub struct NetworkBackend {
    host: String,
    port: u16,
    timeout: Duration,
}

impl NetworkBackend {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl PrinterBackend for NetworkBackend {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        if self.host.trim().is_empty() || self.port == 0 {
            return Err(AgentError::InvalidPrinterConfig(format!(
                "network printer needs a host and a non-zero port, got '{}'",
                self.addr()
            )));
        }

        let addr = self.addr();
        info!(addr = %addr, bytes = payload.len(), "connecting via raw TCP");

        let mut stream = timeout(self.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                AgentError::Network(format!(
                    "connection to {addr} timed out after {}s",
                    self.timeout.as_secs_f64()
                ))
            })?
            .map_err(|e| AgentError::Network(format!("connect to {addr}: {e}")))?;

        let write = async {
            let mut sent = 0usize;
            for chunk in payload.chunks(CHUNK_SIZE) {
                stream.write_all(chunk).await.map_err(|e| {
                    AgentError::Network(format!("send to {addr} failed at byte {sent}: {e}"))
                })?;
                sent += chunk.len();
                debug!(sent, total = payload.len(), "raw TCP progress");
            }
            stream
                .flush()
                .await
                .map_err(|e| AgentError::Network(format!("flush {addr}: {e}")))?;
            stream
                .shutdown()
                .await
                .map_err(|e| AgentError::Network(format!("shutdown {addr}: {e}")))
        };

        timeout(self.timeout, write).await.map_err(|_| {
            AgentError::Network(format!(
                "write to {addr} timed out after {}s",
                self.timeout.as_secs_f64()
            ))
        })??;

        info!(addr = %addr, "raw payload delivered");
        Ok(())
    }
}
