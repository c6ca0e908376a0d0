//! Maps domain errors to HTTP status codes and bodies. `orchestrator-core`
//! never imports axum; this is the only place that translates
//! `OrchestratorError` into a response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orchestrator_core::error::{OrchestratorError, PlanValidationError, UsageError};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid API key")]
    Unauthorized,

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Orchestrator(OrchestratorError::Plan(_)) => (StatusCode::BAD_REQUEST, "INVALID_PLAN"),
            ApiError::Orchestrator(OrchestratorError::Usage(UsageError::QuotaExceeded { .. })) => {
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED")
            }
            ApiError::Orchestrator(OrchestratorError::Usage(UsageError::UnknownTenant(_))) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED")
            }
            ApiError::Orchestrator(OrchestratorError::ExecutionNotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Orchestrator(OrchestratorError::JobNotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Orchestrator(OrchestratorError::Resolver(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
            ApiError::Orchestrator(OrchestratorError::Provider(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
            ApiError::Orchestrator(OrchestratorError::Database(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }

        let message = match &self {
            // Admission-time validation errors carry a plan-level detail
            // worth surfacing (cyclic or malformed plan).
            ApiError::Orchestrator(OrchestratorError::Plan(plan_err)) => plan_detail(plan_err),
            _ => self.to_string(),
        };

        (status, Json(ErrorBody { code, message })).into_response()
    }
}

fn plan_detail(err: &PlanValidationError) -> String {
    err.to_string()
}
