//! Async Wait Coordinator: the two paths by which an async job's completion
//! reaches the system — an inbound webhook delivery, or this module's own
//! polling sweep — both converging on the same
//! `Orchestrator::on_job_terminal` call, made idempotent by the store's
//! `apply_job_terminal` no-op-if-already-terminal check.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::{JobOutcome, Store};
use crate::error::OrchestratorError;
use crate::job::JobResult;
use crate::orchestrator::Orchestrator;
use crate::provider::registry::AdapterRegistry;
use crate::provider::{StatusOutcome, StatusPayload};

pub struct AsyncWaitCoordinator {
    store: Arc<dyn Store>,
    orchestrator: Arc<Orchestrator>,
    adapters: AdapterRegistry,
    config: Config,
}

impl AsyncWaitCoordinator {
    pub fn new(store: Arc<dyn Store>, orchestrator: Arc<Orchestrator>, adapters: AdapterRegistry, config: Config) -> Self {
        Self {
            store,
            orchestrator,
            adapters,
            config,
        }
    }

    /// Handle an inbound webhook delivery for `job_record_id`. The job's own
    /// `operation` selects which adapter interprets the payload — the
    /// webhook route only knows the job id, not which provider sent it.
    pub async fn handle_webhook(&self, job_record_id: uuid::Uuid, payload: StatusPayload) -> Result<(), OrchestratorError> {
        let Some(job) = self.store.get_job(job_record_id).await? else {
            return Err(OrchestratorError::JobNotFound(job_record_id));
        };
        if job.status.is_terminal() {
            debug!(job_id = %job.plan_local_id, "webhook delivered for already-terminal job, ignoring");
            return Ok(());
        }

        let model_id = job.params.get("modelId").and_then(|v| v.as_str());
        let Some(adapter) = self.adapters.get(&job.operation, model_id) else {
            warn!(job_id = %job.plan_local_id, "webhook delivered but no adapter registered for its operation");
            return Ok(());
        };

        match adapter.parse_status(&payload) {
            Ok(StatusOutcome::Processing) => Ok(()),
            Ok(StatusOutcome::Completed { outputs }) => {
                self.orchestrator
                    .on_job_terminal(job_record_id, JobOutcome::Completed(JobResult { outputs }))
                    .await
            }
            Ok(StatusOutcome::Failed { error }) => {
                self.orchestrator
                    .on_job_terminal(job_record_id, JobOutcome::Failed(error))
                    .await
            }
            Err(e) => {
                warn!(job_id = %job.plan_local_id, error = %e, "malformed webhook payload, failing job");
                self.orchestrator
                    .on_job_terminal(job_record_id, JobOutcome::Failed(e.to_string()))
                    .await
            }
        }
    }

    /// The polling loop for providers that don't support webhooks. Mirrors
    /// the job worker's shape: a claim pass, then sleep (at the configured
    /// interval rather than the worker's tight idle poll, since there's
    /// nothing urgent about a job that isn't due yet).
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("async wait coordinator polling loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.poll_due_jobs().await {
                error!(error = %e, "error polling due jobs");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("async wait coordinator shutting down");
    }

    /// One polling sweep. `run` is this in a loop; exposed directly so
    /// tests can drive a poll cycle deterministically.
    pub async fn poll_due_jobs(&self) -> Result<(), OrchestratorError> {
        let now = chrono::Utc::now();
        let due = self.store.due_polling_jobs(now, self.config.poll_batch_cap).await?;

        for job in due {
            // The attempt cap is checked before the provider is ever called
            // again, not just when the call itself errors — a provider that
            // keeps answering `processing` forever must still hit the
            // ceiling.
            if job.poll_attempts >= self.config.max_poll_attempts {
                self.orchestrator
                    .on_job_terminal(job.record_id, JobOutcome::Failed("exceeded polling attempts".to_string()))
                    .await?;
                continue;
            }

            let model_id = job.params.get("modelId").and_then(|v| v.as_str());
            let Some(adapter) = self.adapters.get(&job.operation, model_id) else {
                warn!(job_id = %job.plan_local_id, "polling due job but no adapter registered");
                continue;
            };
            let Some(provider_job_id) = job.provider_job_id.clone() else {
                warn!(job_id = %job.plan_local_id, "polling due job with no provider_job_id recorded");
                continue;
            };

            match adapter.poll(&provider_job_id).await {
                Ok(StatusOutcome::Processing) => {
                    self.schedule_next_poll(job.record_id, job.poll_attempts).await?;
                }
                Ok(StatusOutcome::Completed { outputs }) => {
                    self.orchestrator
                        .on_job_terminal(job.record_id, JobOutcome::Completed(JobResult { outputs }))
                        .await?;
                }
                Ok(StatusOutcome::Failed { error }) => {
                    self.orchestrator.on_job_terminal(job.record_id, JobOutcome::Failed(error)).await?;
                }
                Err(e) => {
                    // Transient provider failure: counted as an attempt, not
                    // a job failure, until the cap above is hit on some
                    // later cycle.
                    self.store
                        .record_poll_attempt(job.record_id, self.next_poll_at(job.poll_attempts), Some(e.to_string()))
                        .await?;
                }
            }
        }

        Ok(())
    }

    async fn schedule_next_poll(&self, record_id: uuid::Uuid, poll_attempts: u32) -> Result<(), OrchestratorError> {
        self.store
            .record_poll_attempt(record_id, self.next_poll_at(poll_attempts), None)
            .await
    }

    /// Exponential backoff from `initial_backoff`, capped so a long-waiting
    /// job doesn't end up polled once an hour.
    fn next_poll_at(&self, poll_attempts: u32) -> chrono::DateTime<chrono::Utc> {
        const MAX_BACKOFF_SECS: f64 = 300.0;
        let backoff_secs = self.config.initial_backoff.as_secs_f64() * self.config.backoff_multiplier.powi(poll_attempts as i32);
        let backoff = Duration::from_secs_f64(backoff_secs.min(MAX_BACKOFF_SECS));
        chrono::Utc::now() + chrono::Duration::from_std(backoff).unwrap_or(chrono::Duration::seconds(60))
    }
}
