//! `POST /webhook/job/{jobRecordId}`.
//!
//! The provider must not retry: any parse outcome short of "job unknown"
//! returns 200, with `OnJobTerminal` already applied if the payload was
//! terminal.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use orchestrator_core::error::OrchestratorError;
use orchestrator_core::provider::StatusPayload;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn receive_job_webhook(
    State(state): State<AppState>,
    Path(job_record_id): Path<Uuid>,
    Json(payload): Json<serde_json::Value>,
) -> Result<StatusCode, ApiError> {
    match state.wait_coordinator.handle_webhook(job_record_id, StatusPayload(payload)).await {
        Ok(()) => Ok(StatusCode::OK),
        Err(OrchestratorError::JobNotFound(id)) => Err(ApiError::Orchestrator(OrchestratorError::JobNotFound(id))),
        Err(e) => {
            tracing::error!(job_record_id = %job_record_id, error = %e, "webhook handling failed, acknowledging anyway");
            Ok(StatusCode::OK)
        }
    }
}
