// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer registry: the merged view of configured and detected printers.
//
// Resolution re-runs detection on every call so a printer plugged in after
// startup is usable without a restart.  The names seen by the last detection
// are kept for cheap listings that must not spawn OS tools.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use printagent_core::types::{PrinterDescriptor, PrinterSource};

use crate::detect::PrinterDetector;

pub struct PrinterRegistry {
    configured: Vec<PrinterDescriptor>,
    detector: Arc<dyn PrinterDetector>,
    last_detected: Mutex<Vec<String>>,
}

impl PrinterRegistry {
    pub fn new(configured: Vec<PrinterDescriptor>, detector: Arc<dyn PrinterDetector>) -> Self {
        let configured = configured
            .into_iter()
            .map(|mut p| {
                p.source = PrinterSource::Configured;
                p
            })
            .collect();
        Self {
            configured,
            detector,
            last_detected: Mutex::new(Vec::new()),
        }
    }

    /// All printers by name.  Configured entries win over detected ones with
    /// the same name; a failing detector contributes nothing.
    pub async fn resolve_all(&self) -> BTreeMap<String, PrinterDescriptor> {
        let detected = match self.detector.detect().await {
            Ok(printers) => printers,
            Err(e) => {
                warn!("printer detection failed, using configured printers only: {e}");
                Vec::new()
            }
        };

        if let Ok(mut last) = self.last_detected.lock() {
            *last = detected.iter().map(|p| p.name.clone()).collect();
        }

        let mut printers = BTreeMap::new();
        for mut printer in detected {
            printer.source = PrinterSource::Detected;
            printers.insert(printer.name.clone(), printer);
        }
        for printer in &self.configured {
            printers.insert(printer.name.clone(), printer.clone());
        }

        debug!(count = printers.len(), "printers resolved");
        printers
    }

    /// Look up a single printer by exact name.
    pub async fn resolve(&self, name: &str) -> Option<PrinterDescriptor> {
        self.resolve_all().await.remove(name)
    }

    /// Configured names plus those seen by the most recent detection, sorted.
    /// Never runs detection.
    pub fn known_names(&self) -> Vec<String> {
        let mut names: BTreeSet<String> =
            self.configured.iter().map(|p| p.name.clone()).collect();
        if let Ok(last) = self.last_detected.lock() {
            names.extend(last.iter().cloned());
        }
        names.into_iter().collect()
    }
}
