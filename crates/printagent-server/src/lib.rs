// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// printagent-server: the authenticated HTTP API in front of the job queue.

pub mod api;
pub mod auth;
pub mod error;
pub mod service;

pub use api::router;
pub use auth::{Authorized, TOKEN_HEADER};
pub use error::{ApiError, ApiResult};
pub use service::{AgentService, EnqueueRequest};
