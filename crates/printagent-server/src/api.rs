// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP routes.

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    routing::{get, post},
};
use tracing::instrument;

use crate::auth::Authorized;
use crate::error::{ApiError, ApiResult};
use crate::service::{
    AgentService, AgentStatus, EnqueueRequest, EnqueueResponse, Health, JobView, PrinterView,
};

pub fn router(service: AgentService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/printers", get(printers))
        .route("/jobs", post(enqueue))
        .route("/jobs/{id}", get(job_status))
        .with_state(service)
}

#[instrument(skip_all)]
async fn health(State(service): State<AgentService>) -> Json<Health> {
    Json(service.health())
}

#[instrument(skip_all)]
async fn status(
    _auth: Authorized,
    State(service): State<AgentService>,
) -> ApiResult<Json<AgentStatus>> {
    Ok(Json(service.status()?))
}

#[instrument(skip_all)]
async fn printers(_auth: Authorized, State(service): State<AgentService>) -> Json<Vec<PrinterView>> {
    Json(service.list_printers().await)
}

#[instrument(skip_all)]
async fn enqueue(
    _auth: Authorized,
    State(service): State<AgentService>,
    body: Result<Json<EnqueueRequest>, JsonRejection>,
) -> ApiResult<Json<EnqueueResponse>> {
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    Ok(Json(service.enqueue(req).await?))
}

#[instrument(skip_all, fields(job_id = %id))]
async fn job_status(
    _auth: Authorized,
    State(service): State<AgentService>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobView>> {
    Ok(Json(service.job_status(&id)?))
}
