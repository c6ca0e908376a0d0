//! API key auth middleware.
//!
//! Hashes the bearer token and looks it up by hash — the plaintext key is
//! never persisted, so there's nothing to compare it against directly.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// The authenticated tenant, attached to the request extensions by
/// [`require_api_key`] for handlers to pull out with `Extension<TenantId>`.
#[derive(Debug, Clone, Copy)]
pub struct TenantId(pub Uuid);

pub async fn require_api_key(State(state): State<AppState>, mut request: Request, next: Next) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or(ApiError::Unauthorized)?;
    let hash = orchestrator_core::apikey::hash(token);

    let record = state
        .store
        .find_api_key_by_hash(&hash)
        .await?
        .ok_or(ApiError::Unauthorized)?;
    if record.revoked {
        return Err(ApiError::Unauthorized);
    }

    request.extensions_mut().insert(TenantId(record.tenant_id));
    Ok(next.run(request).await)
}
