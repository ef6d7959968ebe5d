// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scriptable backend factory for exercising the dispatcher without printers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use printagent_core::error::{AgentError, Result};
use printagent_core::types::{PrinterDescriptor, PrinterKind};

use crate::backend::{BackendFactory, PrinterBackend, UnsupportedBackend};

/// Result of one scripted `send` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Ok,
    /// Fails with `AgentError::Network`.
    Transient,
    /// Fails with `AgentError::InvalidPrinterConfig`.
    Permanent,
}

#[derive(Debug, Default)]
struct Shared {
    script: VecDeque<Step>,
    sends: Vec<(String, Vec<u8>)>,
}

/// Backend factory whose sends follow a script.
///
/// Every `send`, on any printer, pops the next [`Step`]; an exhausted script
/// succeeds.  `unsupported` printers still get the real
/// [`UnsupportedBackend`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackends {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedBackends {
    pub fn new(script: impl IntoIterator<Item = Step>) -> Self {
        let shared = Shared {
            script: script.into_iter().collect(),
            sends: Vec::new(),
        };
        Self {
            shared: Arc::new(Mutex::new(shared)),
        }
    }

    /// Every send seen so far as `(printer, payload)`.
    pub fn sends(&self) -> Vec<(String, Vec<u8>)> {
        self.shared
            .lock()
            .map(|s| s.sends.clone())
            .unwrap_or_default()
    }

    pub fn send_count(&self) -> usize {
        self.shared.lock().map(|s| s.sends.len()).unwrap_or(0)
    }
}

impl BackendFactory for ScriptedBackends {
    fn backend_for(&self, printer: &PrinterDescriptor) -> Box<dyn PrinterBackend> {
        match printer.kind {
            PrinterKind::Unsupported { .. } => Box::new(UnsupportedBackend),
            _ => Box::new(ScriptedBackend {
                printer: printer.name.clone(),
                shared: Arc::clone(&self.shared),
            }),
        }
    }
}

struct ScriptedBackend {
    printer: String,
    shared: Arc<Mutex<Shared>>,
}

#[async_trait]
impl PrinterBackend for ScriptedBackend {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        let step = {
            let mut shared = self
                .shared
                .lock()
                .map_err(|_| AgentError::Network("scripted backend poisoned".into()))?;
            shared.sends.push((self.printer.clone(), payload.to_vec()));
            shared.script.pop_front().unwrap_or(Step::Ok)
        };
        match step {
            Step::Ok => Ok(()),
            Step::Transient => Err(AgentError::Network(format!(
                "connection to {} refused",
                self.printer
            ))),
            Step::Permanent => Err(AgentError::InvalidPrinterConfig(format!(
                "{} is misconfigured",
                self.printer
            ))),
        }
    }
}
