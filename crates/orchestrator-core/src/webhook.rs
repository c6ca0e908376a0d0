//! Outbound Webhook Deliverer: sweeps executions whose terminal result is
//! waiting on delivery, POSTs the execution body to the submitter's
//! callback URL, and signs the body with HMAC-SHA256 when the webhook
//! descriptor carries a shared secret.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::Store;
use crate::error::OrchestratorError;
use crate::execution::Execution;
use crate::job::JobResult;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
const USER_AGENT: &str = "orchestrator-Webhooks/1.0";

#[derive(Debug, Serialize)]
struct WebhookBody {
    #[serde(rename = "executionId")]
    execution_id: uuid::Uuid,
    status: String,
    result: Option<JobResult>,
    error: Option<String>,
    #[serde(rename = "completedAt")]
    completed_at: Option<DateTime<Utc>>,
}

pub struct WebhookDeliverer {
    store: Arc<dyn Store>,
    client: reqwest::Client,
    config: Config,
}

impl WebhookDeliverer {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.webhook_timeout)
            .build()
            .expect("reqwest client builder with static config cannot fail");
        Self { store, client, config }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("webhook deliverer sweep started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.sweep().await {
                error!(error = %e, "error sweeping webhook deliveries");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.webhook_sweep_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("webhook deliverer shutting down");
    }

    async fn sweep(&self) -> Result<(), OrchestratorError> {
        let due = self
            .store
            .due_webhook_deliveries(Utc::now(), self.config.webhook_max_attempts)
            .await?;
        for execution in due {
            self.deliver_one(execution).await?;
        }
        Ok(())
    }

    async fn deliver_one(&self, execution: Execution) -> Result<(), OrchestratorError> {
        let Some(webhook) = execution.webhook.clone() else {
            return Ok(());
        };

        let body = WebhookBody {
            execution_id: execution.id,
            status: execution.status.as_str().to_string(),
            result: execution.result.clone(),
            error: execution.error.clone(),
            completed_at: execution.completed_at,
        };
        let body_bytes = serde_json::to_vec(&body).expect("WebhookBody is always serializable");

        let mut request = self
            .client
            .post(&webhook.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", USER_AGENT);
        if let Some(secret) = &webhook.secret {
            let signature = sign(secret, &body_bytes);
            request = request.header(SIGNATURE_HEADER, format!("sha256={signature}"));
        }

        let outcome = request.body(body_bytes).send().await;
        match outcome {
            Ok(response) if response.status().is_success() => {
                debug!(execution_id = %execution.id, "webhook delivered");
                self.store.record_webhook_attempt(execution.id, true, None, None).await?;
            }
            Ok(response) => {
                let status = response.status();
                warn!(execution_id = %execution.id, %status, "webhook delivery rejected");
                let next_retry_at = self.next_retry_at(execution.webhook_delivery_attempts);
                self.store
                    .record_webhook_attempt(
                        execution.id,
                        false,
                        Some(format!("webhook endpoint returned {status}")),
                        Some(next_retry_at),
                    )
                    .await?;
            }
            Err(e) => {
                warn!(execution_id = %execution.id, error = %e, "webhook delivery failed");
                let next_retry_at = self.next_retry_at(execution.webhook_delivery_attempts);
                self.store
                    .record_webhook_attempt(execution.id, false, Some(e.to_string()), Some(next_retry_at))
                    .await?;
            }
        }

        Ok(())
    }

    /// Attempt-indexed backoff for the next retry (30 s × 2^attempts,
    /// capped). `attempts` is the count *before* this failed attempt is
    /// recorded, matching the attempt index that just failed.
    fn next_retry_at(&self, attempts: u32) -> DateTime<Utc> {
        let base_ms = self.config.webhook_retry_base.as_millis() as f64;
        let cap_ms = self.config.webhook_retry_cap.as_millis() as f64;
        let backoff_ms = (base_ms * 2f64.powi(attempts as i32)).min(cap_ms);
        Utc::now() + chrono::Duration::milliseconds(backoff_ms as i64)
    }
}

/// Hex-encoded HMAC-SHA256 of the request body, so the receiver can verify
/// the delivery actually came from this installation. Same primitive
/// pairing as the installation's provider credential digests — `hmac` +
/// `sha2`.
fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
