//! Two concrete provider adapters: an HTTP-backed adapter for opaque
//! external AI providers (image/video/audio generation, transcription —
//! launch + webhook/poll status), and a deterministic adapter for media
//! transforms that always complete synchronously in-process (merge,
//! green-screen replace). The provider-specific request/response schemas
//! themselves are out of scope — both adapters treat the wire format as a
//! small, generic JSON shape rather than modeling any one vendor's API.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{Capabilities, LaunchOutcome, PreferredStrategy, ProviderAdapter, StatusOutcome, StatusPayload};
use crate::error::ProviderError;
use crate::job::JobOutput;

/// Generic shape assumed for the opaque provider's status payload, used by
/// both the webhook body and a poll response. A concrete adapter for a real
/// vendor would have its own, which is exactly why this is a pluggable
/// registry entry rather than inline dispatch.
#[derive(Debug, Deserialize)]
struct GenericStatusPayload {
    status: GenericStatus,
    #[serde(default)]
    outputs: Vec<JobOutput>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum GenericStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Deserialize)]
struct GenericLaunchResponse {
    /// Present when the provider answers synchronously.
    #[serde(default)]
    outputs: Option<Vec<JobOutput>>,
    /// Present when the provider hands back an async job handle.
    #[serde(default)]
    provider_job_id: Option<String>,
}

/// An HTTP-backed adapter for an opaque external AI provider.
pub struct HttpProviderAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    launch_path: String,
    poll_path_template: String,
    capabilities: Capabilities,
    /// Whether the installation has a publicly reachable webhook base URL
    /// configured (`WEBHOOK_BASE_URL`). Fixed at registration time, since
    /// that's process-wide configuration, not something that varies per
    /// `launch` call.
    webhook_base_url_configured: bool,
}

impl HttpProviderAdapter {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        launch_path: impl Into<String>,
        poll_path_template: impl Into<String>,
        capabilities: Capabilities,
        webhook_base_url_configured: bool,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            launch_path: launch_path.into(),
            poll_path_template: poll_path_template.into(),
            capabilities,
            webhook_base_url_configured,
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn status_to_outcome(payload: GenericStatusPayload) -> StatusOutcome {
        match payload.status {
            GenericStatus::Processing => StatusOutcome::Processing,
            GenericStatus::Completed => StatusOutcome::Completed {
                outputs: payload.outputs,
            },
            GenericStatus::Failed => StatusOutcome::Failed {
                error: payload.error.unwrap_or_else(|| "provider reported failure".to_string()),
            },
        }
    }
}

#[async_trait]
impl ProviderAdapter for HttpProviderAdapter {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn launch(&self, params: &serde_json::Value) -> Result<LaunchOutcome, ProviderError> {
        let url = format!("{}{}", self.base_url, self.launch_path);
        let request = self.authorize(self.client.post(&url).json(params));
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Ok(LaunchOutcome::Failed {
                error: format!("provider returned {status}: {body}"),
            });
        }

        let parsed: GenericLaunchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedPayload(e.to_string()))?;

        match (parsed.outputs, parsed.provider_job_id) {
            (Some(outputs), _) => Ok(LaunchOutcome::Sync { outputs }),
            (None, Some(provider_job_id)) => {
                let wait_strategy = self.resolve_wait_strategy(self.webhook_base_url_configured);
                Ok(LaunchOutcome::Async {
                    provider_job_id,
                    wait_strategy,
                })
            }
            (None, None) => Err(ProviderError::MalformedPayload(
                "launch response had neither outputs nor a provider_job_id".to_string(),
            )),
        }
    }

    fn parse_status(&self, payload: &StatusPayload) -> Result<StatusOutcome, ProviderError> {
        let parsed: GenericStatusPayload = serde_json::from_value(payload.0.clone())
            .map_err(|e| ProviderError::MalformedPayload(e.to_string()))?;
        Ok(Self::status_to_outcome(parsed))
    }

    async fn poll(&self, provider_job_id: &str) -> Result<StatusOutcome, ProviderError> {
        let path = self.poll_path_template.replace("{id}", provider_job_id);
        let url = format!("{}{}", self.base_url, path);
        let request = self.authorize(self.client.get(&url));
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ProviderError::RequestFailed(format!("poll returned {status}")));
        }

        let parsed: GenericStatusPayload = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedPayload(e.to_string()))?;
        Ok(Self::status_to_outcome(parsed))
    }
}

/// Capability preset for a provider that only ever completes synchronously
/// or notifies via webhook (e.g. several image providers).
pub fn webhook_capable() -> Capabilities {
    Capabilities {
        supports_webhook: true,
        supports_polling: false,
        default_strategy: PreferredStrategy::Webhook,
    }
}

/// Capability preset for a provider reachable only by polling (no public
/// webhook support at all, e.g. several audio/transcription providers).
pub fn polling_only() -> Capabilities {
    Capabilities {
        supports_webhook: false,
        supports_polling: true,
        default_strategy: PreferredStrategy::Polling,
    }
}

/// A deterministic, in-process media transform (merge, green-screen
/// replace, reframe, ...). Always completes synchronously — there is no
/// provider round trip, so `parse_status`/`poll` are unreachable and return
/// `UnsupportedWaitStrategy` if ever called. The actual pixel/media work is
/// out of scope here; `transform` is the minimal interface contract the
/// orchestrator needs from it.
pub struct DeterministicTransformAdapter {
    transform: Arc<dyn Fn(&serde_json::Value) -> Result<Vec<JobOutput>, ProviderError> + Send + Sync>,
}

impl DeterministicTransformAdapter {
    pub fn new(
        transform: impl Fn(&serde_json::Value) -> Result<Vec<JobOutput>, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            transform: Arc::new(transform),
        }
    }
}

#[async_trait]
impl ProviderAdapter for DeterministicTransformAdapter {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_webhook: false,
            supports_polling: false,
            default_strategy: PreferredStrategy::Webhook,
        }
    }

    async fn launch(&self, params: &serde_json::Value) -> Result<LaunchOutcome, ProviderError> {
        match (self.transform)(params) {
            Ok(outputs) => Ok(LaunchOutcome::Sync { outputs }),
            Err(e) => Ok(LaunchOutcome::Failed { error: e.to_string() }),
        }
    }

    fn parse_status(&self, _payload: &StatusPayload) -> Result<StatusOutcome, ProviderError> {
        Err(ProviderError::UnsupportedWaitStrategy)
    }

    async fn poll(&self, _provider_job_id: &str) -> Result<StatusOutcome, ProviderError> {
        Err(ProviderError::UnsupportedWaitStrategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_adapter_completes_synchronously() {
        let adapter = DeterministicTransformAdapter::new(|_params| {
            Ok(vec![JobOutput {
                output_type: crate::job::OutputType::Image,
                url: "https://store/merged.png".to_string(),
                mime_type: "image/png".to_string(),
            }])
        });
        let outcome = adapter.launch(&serde_json::json!({})).await.unwrap();
        assert!(matches!(outcome, LaunchOutcome::Sync { .. }));
    }

    #[test]
    fn resolve_wait_strategy_forces_polling_without_a_webhook_base_url() {
        let webhook_adapter =
            HttpProviderAdapter::new("https://example", None, "/launch", "/status/{id}", webhook_capable(), false);
        assert_eq!(
            webhook_adapter.resolve_wait_strategy(webhook_adapter.webhook_base_url_configured),
            crate::job::WaitStrategy::Polling
        );

        let configured_adapter =
            HttpProviderAdapter::new("https://example", None, "/launch", "/status/{id}", webhook_capable(), true);
        assert_eq!(
            configured_adapter.resolve_wait_strategy(configured_adapter.webhook_base_url_configured),
            crate::job::WaitStrategy::Webhook
        );
    }

    #[test]
    fn generic_status_payload_parses_completed() {
        let payload = StatusPayload(serde_json::json!({
            "status": "COMPLETED",
            "outputs": [{"type": "video", "url": "https://store/v.mp4", "mimeType": "video/mp4"}],
        }));
        let adapter = HttpProviderAdapter::new("https://example", None, "/launch", "/status/{id}", webhook_capable(), true);
        let outcome = adapter.parse_status(&payload).unwrap();
        match outcome {
            StatusOutcome::Completed { outputs } => assert_eq!(outputs.len(), 1),
            other => panic!("expected Completed, got {other:?}"),
        }
    }
}
