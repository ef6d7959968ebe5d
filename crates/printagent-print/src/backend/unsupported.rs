// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Backend for printers the agent knows about but cannot drive.

use async_trait::async_trait;

use printagent_core::error::{AgentError, Result};

use super::PrinterBackend;

#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedBackend;

#[async_trait]
impl PrinterBackend for UnsupportedBackend {
    async fn send(&self, _payload: &[u8]) -> Result<()> {
        Err(AgentError::UnsupportedPrinter(
            "printer type has no automatic transport".into(),
        ))
    }
}
