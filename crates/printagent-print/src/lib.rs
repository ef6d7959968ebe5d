// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// printagent-print: the durable job store, printer registry and detection,
// the transport backends and the dispatcher that ties them together.

pub mod backend;
pub mod clock;
pub mod detect;
pub mod dispatch;
pub mod registry;
pub mod retry;
pub mod store;
pub mod testing;

pub use backend::{BackendFactory, PrinterBackend, SystemBackends};
pub use clock::{Clock, RecordingClock, TokioClock};
pub use detect::{NoDetection, PrinterDetector, StaticDetector, SystemDetector};
pub use dispatch::{DispatchOutcome, DispatchSettings, Dispatcher, WorkerHandle, WorkerStatus};
pub use registry::PrinterRegistry;
pub use retry::{RetryDecision, RetryPolicy};
pub use store::JobStore;
