// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `X-Agent-Token` extractor.

use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::{error, warn};

use printagent_security::{TokenCheck, verify_token};

use crate::error::ApiError;
use crate::service::AgentService;

pub const TOKEN_HEADER: &str = "x-agent-token";

/// Proof that the request carried the agent's shared secret.
///
/// Taking this as a handler argument is what makes a route authenticated.
#[derive(Debug, Clone, Copy)]
pub struct Authorized;

impl FromRequestParts<AgentService> for Authorized {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AgentService,
    ) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());

        match verify_token(state.token(), presented) {
            TokenCheck::Accepted => Ok(Authorized),
            TokenCheck::Missing => Err(ApiError::unauthorized("missing X-Agent-Token header")),
            TokenCheck::Mismatch => {
                warn!(path = %parts.uri.path(), "rejected request with a wrong agent token");
                Err(ApiError::unauthorized("invalid agent token"))
            }
            TokenCheck::NotConfigured => {
                error!("no agent token configured; refusing authenticated request");
                Err(ApiError::internal("agent token is not configured"))
            }
        }
    }
}
