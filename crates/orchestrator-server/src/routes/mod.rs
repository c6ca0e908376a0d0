pub mod execute;
pub mod webhook;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::auth::require_api_key;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/execute", post(execute::create_execution))
        .route("/execute/:id/status", get(execute::get_execution_status))
        .route("/execute/:id/cancel", post(execute::cancel_execution))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    // The webhook callback is authenticated by the unguessable job record id
    // in the path, not a bearer token.
    let public = Router::new().route("/webhook/job/:job_record_id", post(webhook::receive_job_webhook));

    Router::new().merge(authenticated).merge(public).with_state(state)
}
