//! Provider Adapter.
//!
//! A provider adapter is a pair of pure-ish async functions plus a
//! capability descriptor. This is the only boundary the core couples to
//! provider specifics: everything upstream deals only in `LaunchOutcome`
//! and `StatusOutcome`. Modeled as an `async_trait`, the same shape as a
//! `BlobStore` abstraction over local-disk vs. S3-compatible storage.

pub mod adapters;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::job::{JobOutput, WaitStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredStrategy {
    Webhook,
    Polling,
}

#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub supports_webhook: bool,
    pub supports_polling: bool,
    pub default_strategy: PreferredStrategy,
}

/// What `launch` returns.
#[derive(Debug, Clone)]
pub enum LaunchOutcome {
    Sync { outputs: Vec<JobOutput> },
    Async {
        provider_job_id: String,
        wait_strategy: WaitStrategy,
    },
    Failed { error: String },
}

/// What `parse_status` (fed by either the webhook body or a poll response)
/// returns.
#[derive(Debug, Clone)]
pub enum StatusOutcome {
    Processing,
    Completed { outputs: Vec<JobOutput> },
    Failed { error: String },
}

/// Raw payload handed to `parse_status`: either an inbound webhook body or
/// whatever `poll` fetched from the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload(pub serde_json::Value);

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Launch a provider request with already-resolved params.
    async fn launch(&self, params: &serde_json::Value) -> Result<LaunchOutcome, ProviderError>;

    /// Parse a status payload (webhook body, or the result of `poll`) into a
    /// terminal/non-terminal outcome.
    fn parse_status(&self, payload: &StatusPayload) -> Result<StatusOutcome, ProviderError>;

    /// Fetch current provider state for `provider_job_id` and feed it
    /// through `parse_status`. Only called by the polling path.
    async fn poll(&self, provider_job_id: &str) -> Result<StatusOutcome, ProviderError>;

    /// Resolve which wait strategy `launch` should request, constrained by
    /// this adapter's capabilities and whether a public webhook base URL is
    /// configured.
    fn resolve_wait_strategy(&self, webhook_base_url_configured: bool) -> WaitStrategy {
        let caps = self.capabilities();
        let prefers_webhook = matches!(caps.default_strategy, PreferredStrategy::Webhook);
        if prefers_webhook && caps.supports_webhook && webhook_base_url_configured {
            WaitStrategy::Webhook
        } else if caps.supports_polling {
            WaitStrategy::Polling
        } else {
            WaitStrategy::Webhook
        }
    }
}
