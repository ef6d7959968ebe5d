// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer backends: one transport per `PrinterKind`.
//
// A backend moves opaque payload bytes to a printer exactly once per `send`
// call.  It never inspects the bytes, never retries and never touches the
// job store; copies, retries and bookkeeping belong to the dispatcher.

pub mod command;
pub mod native;
pub mod network;
pub mod unsupported;

use std::time::Duration;

use async_trait::async_trait;

use printagent_core::AgentConfig;
use printagent_core::error::Result;
use printagent_core::types::{PrinterDescriptor, PrinterKind};

pub use command::CommandBackend;
pub use native::NativeBackend;
pub use network::NetworkBackend;
pub use unsupported::UnsupportedBackend;

/// Delivers one copy of a payload.
#[async_trait]
pub trait PrinterBackend: Send + Sync {
    async fn send(&self, payload: &[u8]) -> Result<()>;
}

/// Builds the backend for a resolved printer.
pub trait BackendFactory: Send + Sync {
    fn backend_for(&self, printer: &PrinterDescriptor) -> Box<dyn PrinterBackend>;
}

/// Production factory: real sockets, processes and spoolers.
#[derive(Debug, Clone, Copy)]
pub struct SystemBackends {
    pub network_timeout: Duration,
    pub command_timeout: Duration,
}

impl SystemBackends {
    pub fn new(network_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            network_timeout,
            command_timeout,
        }
    }
}

impl From<&AgentConfig> for SystemBackends {
    fn from(config: &AgentConfig) -> Self {
        Self::new(config.network_timeout, config.command_timeout)
    }
}

impl BackendFactory for SystemBackends {
    fn backend_for(&self, printer: &PrinterDescriptor) -> Box<dyn PrinterBackend> {
        match &printer.kind {
            PrinterKind::Network { host, port } => {
                Box::new(NetworkBackend::new(host.clone(), *port, self.network_timeout))
            }
            PrinterKind::Command { cmd } => {
                Box::new(CommandBackend::new(cmd.clone(), self.command_timeout))
            }
            PrinterKind::Native { .. } => Box::new(NativeBackend::new(
                printer.native_target().to_owned(),
                self.command_timeout,
            )),
            PrinterKind::Unsupported { .. } => Box::new(UnsupportedBackend),
        }
    }
}
