// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print agent: core types, configuration and error definitions shared by
// every crate in the workspace.

pub mod config;
pub mod error;
pub mod types;

pub use config::AgentConfig;
pub use error::AgentError;
pub use types::*;
