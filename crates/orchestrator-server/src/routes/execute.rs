//! `POST /execute`, `GET /execute/{id}/status`, `POST /execute/{id}/cancel`.

use std::collections::HashMap;

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use orchestrator_core::db::Store;
use orchestrator_core::execution::{Execution, WebhookDescriptor};
use orchestrator_core::job::{Job, JobResult};
use orchestrator_core::plan::ExecutionPlan;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::TenantId;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExecutionRequest {
    pub execution_plan: ExecutionPlan,
    #[serde(default)]
    pub options: ExecutionOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    #[serde(default)]
    pub provider_api_keys: HashMap<String, String>,
    pub webhook: Option<WebhookOptions>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookOptions {
    pub url: String,
    pub secret: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExecutionResponse {
    pub execution_id: Uuid,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
}

pub async fn create_execution(
    State(state): State<AppState>,
    Extension(TenantId(tenant_id)): Extension<TenantId>,
    Json(request): Json<CreateExecutionRequest>,
) -> Result<(StatusCode, Json<CreateExecutionResponse>), ApiError> {
    // Client-supplied provider keys override whatever's stored; persist them
    // encrypted so a future dispatch that needs a refreshed key has one,
    // even though this call's own jobs haven't launched yet.
    for (provider, plaintext) in &request.options.provider_api_keys {
        let ciphertext = state
            .kek
            .encrypt(plaintext)
            .map_err(orchestrator_core::error::OrchestratorError::from)?;
        state.store.upsert_provider_api_key(tenant_id, provider, &ciphertext).await?;
    }

    let webhook = request.options.webhook.map(|w| WebhookDescriptor {
        url: w.url,
        secret: w.secret,
    });

    let execution = state
        .orchestrator
        .create_execution(tenant_id, request.execution_plan, webhook)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateExecutionResponse {
            execution_id: execution.id,
            status: execution.status.as_str(),
            created_at: execution.created_at,
        }),
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatusResponse {
    pub id: Uuid,
    pub status: &'static str,
    pub jobs: Vec<JobStatusEntry>,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusEntry {
    pub id: String,
    pub operation: String,
    pub status: &'static str,
    pub result: Option<JobResult>,
    pub error: Option<String>,
}

pub async fn get_execution_status(
    State(state): State<AppState>,
    Extension(TenantId(tenant_id)): Extension<TenantId>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<ExecutionStatusResponse>, ApiError> {
    let execution = load_owned_execution(&state, tenant_id, execution_id).await?;
    let jobs = state.store.get_jobs(execution_id).await?;
    Ok(Json(to_status_response(execution, jobs)))
}

pub async fn cancel_execution(
    State(state): State<AppState>,
    Extension(TenantId(tenant_id)): Extension<TenantId>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<ExecutionStatusResponse>, ApiError> {
    load_owned_execution(&state, tenant_id, execution_id).await?;
    let execution = state.orchestrator.cancel_execution(execution_id).await?;
    let jobs = state.store.get_jobs(execution_id).await?;
    Ok(Json(to_status_response(execution, jobs)))
}

async fn load_owned_execution(state: &AppState, tenant_id: Uuid, execution_id: Uuid) -> Result<Execution, ApiError> {
    let execution = state
        .store
        .get_execution(execution_id)
        .await?
        .ok_or(orchestrator_core::error::OrchestratorError::ExecutionNotFound(execution_id))?;
    if execution.tenant_id != tenant_id {
        // Don't leak existence of another tenant's execution.
        return Err(orchestrator_core::error::OrchestratorError::ExecutionNotFound(execution_id).into());
    }
    Ok(execution)
}

fn to_status_response(execution: Execution, jobs: Vec<Job>) -> ExecutionStatusResponse {
    ExecutionStatusResponse {
        id: execution.id,
        status: execution.status.as_str(),
        jobs: jobs
            .into_iter()
            .map(|j| JobStatusEntry {
                id: j.plan_local_id,
                operation: j.operation,
                status: j.status.as_str(),
                result: j.result,
                error: j.error,
            })
            .collect(),
        result: execution.result,
        error: execution.error,
        created_at: execution.created_at,
        completed_at: execution.completed_at,
    }
}
