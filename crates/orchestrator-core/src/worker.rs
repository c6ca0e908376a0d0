//! Job Worker: claims a ready job, resolves its params against sibling
//! outputs, dispatches it to its provider adapter, and either finalizes it
//! immediately (synchronous providers, deterministic transforms) or hands it
//! to the Async Wait Coordinator.
//!
//! Modeled on a task queue listener loop — poll for work, act, sleep if
//! nothing was found, select against a shutdown signal — but polling
//! `due_pending_jobs` instead of an async-result queue, and capping
//! concurrency per job kind with a semaphore instead of a single consumer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{JobOutcome, Store};
use crate::error::{OrchestratorError, ResolverError};
use crate::job::{Job, JobStatus};
use crate::orchestrator::Orchestrator;
use crate::provider::registry::AdapterRegistry;
use crate::provider::LaunchOutcome;
use crate::resolver::{self, UpstreamOutputs};

/// How long the worker sleeps after a pass over `due_pending_jobs` claims
/// nothing, before polling again.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct JobWorker {
    store: Arc<dyn Store>,
    orchestrator: Arc<Orchestrator>,
    adapters: AdapterRegistry,
    batch_cap: usize,
    kind_limits: HashMap<String, Arc<Semaphore>>,
}

impl JobWorker {
    pub fn new(store: Arc<dyn Store>, orchestrator: Arc<Orchestrator>, adapters: AdapterRegistry, config: &Config) -> Self {
        let kind_limits = config
            .job_kind_concurrency
            .iter()
            .map(|(kind, cap)| (kind.clone(), Arc::new(Semaphore::new(*cap))))
            .collect();

        Self {
            store,
            orchestrator,
            adapters,
            batch_cap: config.poll_batch_cap,
            kind_limits,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("job worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.dispatch_one_pass().await {
                Ok(0) => {
                    tokio::select! {
                        _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
                Ok(_) => continue,
                Err(e) => {
                    error!(error = %e, "error scanning for ready jobs");
                    tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                }
            }
        }
        info!("job worker shutting down");
    }

    /// Claim whatever's ready this pass and spawn a dispatch task per job,
    /// gated by that job's operation's concurrency semaphore. Returns the
    /// number of jobs claimed. `run` is this in a loop; exposed directly so
    /// tests can drive claim passes deterministically instead of waiting on
    /// the idle-poll sleep.
    pub async fn dispatch_one_pass(&self) -> Result<usize, OrchestratorError> {
        let candidates = self.store.due_pending_jobs(self.batch_cap).await?;
        let mut claimed = 0;

        for candidate in candidates {
            let Some(job) = self.store.claim_job_for_processing(candidate.record_id).await? else {
                continue; // lost the race to another worker instance
            };
            claimed += 1;

            let permit = self.kind_limits.get(&job.operation).cloned();
            let store = self.store.clone();
            let orchestrator = self.orchestrator.clone();
            let adapters = self.adapters.clone();

            tokio::spawn(async move {
                let _permit = match &permit {
                    Some(sem) => Some(sem.clone().acquire_owned().await.expect("semaphore not closed")),
                    None => None,
                };
                dispatch(store, orchestrator, adapters, job).await;
            });
        }

        Ok(claimed)
    }
}

struct SiblingOutputs<'a> {
    jobs: &'a [Job],
}

impl UpstreamOutputs for SiblingOutputs<'_> {
    fn primary_output(&self, plan_local_id: &str) -> Result<Option<String>, ResolverError> {
        let job = self
            .jobs
            .iter()
            .find(|j| j.plan_local_id == plan_local_id)
            .ok_or_else(|| ResolverError::UnknownReference(plan_local_id.to_string()))?;

        if job.status != JobStatus::Completed {
            return Err(ResolverError::UpstreamNotCompleted(plan_local_id.to_string()));
        }

        Ok(job
            .result
            .as_ref()
            .and_then(|r| r.outputs.first())
            .map(|o| o.url.clone()))
    }
}

async fn dispatch(store: Arc<dyn Store>, orchestrator: Arc<Orchestrator>, adapters: AdapterRegistry, job: Job) {
    let record_id = job.record_id;
    if let Err(e) = dispatch_inner(&store, &orchestrator, &adapters, job).await {
        error!(job_record_id = %record_id, error = %e, "job dispatch failed");
    }
}

async fn dispatch_inner(
    store: &Arc<dyn Store>,
    orchestrator: &Arc<Orchestrator>,
    adapters: &AdapterRegistry,
    job: Job,
) -> Result<(), OrchestratorError> {
    let siblings = store.get_jobs(job.execution_id).await?;
    let upstream = SiblingOutputs { jobs: &siblings };

    let resolved_params = match resolver::resolve_params(&job.params, &upstream) {
        Ok(params) => params,
        Err(e) => {
            warn!(job_id = %job.plan_local_id, error = %e, "param resolution failed");
            orchestrator
                .on_job_terminal(job.record_id, JobOutcome::Failed(e.to_string()))
                .await?;
            return Ok(());
        }
    };

    let model_id = resolved_params.get("modelId").and_then(|v| v.as_str());
    let Some(adapter) = adapters.get(&job.operation, model_id) else {
        orchestrator
            .on_job_terminal(
                job.record_id,
                JobOutcome::Failed(format!("no provider adapter registered for {}", job.operation)),
            )
            .await?;
        return Ok(());
    };

    match adapter.launch(&resolved_params).await {
        Ok(LaunchOutcome::Sync { outputs }) => {
            debug!(job_id = %job.plan_local_id, "job completed synchronously");
            orchestrator
                .on_job_terminal(job.record_id, JobOutcome::Completed(crate::job::JobResult { outputs }))
                .await?;
        }
        Ok(LaunchOutcome::Async {
            provider_job_id,
            wait_strategy,
        }) => {
            let next_poll_at = matches!(wait_strategy, crate::job::WaitStrategy::Polling).then(|| Utc::now());
            store
                .set_job_waiting(job.record_id, provider_job_id, wait_strategy, next_poll_at)
                .await?;
        }
        Ok(LaunchOutcome::Failed { error }) => {
            orchestrator
                .on_job_terminal(job.record_id, JobOutcome::Failed(error))
                .await?;
        }
        Err(e) => {
            orchestrator
                .on_job_terminal(job.record_id, JobOutcome::Failed(e.to_string()))
                .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryStore;
    use crate::job::{JobOutput, JobResult, OutputType};
    use crate::plan::{ExecutionPlan, JobSpec};
    use crate::provider::adapters::DeterministicTransformAdapter;
    use crate::usage::{PlanKind, UsageLimits};
    use chrono::Duration as ChronoDuration;

    fn seed_usage(store: &InMemoryStore, tenant_id: Uuid) {
        store.seed_usage_limits(UsageLimits {
            tenant_id,
            plan_kind: PlanKind::Pro,
            monthly_action_limit: 1000,
            unlimited: false,
            period_start: Utc::now(),
            period_end: Utc::now() + ChronoDuration::days(30),
            actions_used_this_period: 0,
            overage_actions_this_period: 0,
            overage_allowed: true,
            overage_price_per_action: 0.05,
        });
    }

    #[tokio::test]
    async fn dispatches_a_ready_job_and_drives_it_to_completion() {
        let memory = InMemoryStore::new();
        let tenant_id = Uuid::new_v4();
        seed_usage(&memory, tenant_id);
        let store: Arc<dyn Store> = Arc::new(memory);

        let mut adapters = AdapterRegistry::new();
        adapters.register(
            "generateImage",
            None,
            Arc::new(DeterministicTransformAdapter::new(|_| {
                Ok(vec![JobOutput {
                    output_type: OutputType::Image,
                    url: "https://store/cat.png".to_string(),
                    mime_type: "image/png".to_string(),
                }])
            })),
        );

        let orchestrator = Arc::new(Orchestrator::new(store.clone(), adapters.clone()));
        let plan = ExecutionPlan {
            jobs: vec![JobSpec {
                id: "img".to_string(),
                operation: "generateImage".to_string(),
                params: serde_json::json!({}),
                depends_on: vec![],
            }],
            base_execution_id: None,
        };
        let execution = orchestrator.create_execution(tenant_id, plan, None).await.unwrap();

        let config = Config {
            database_url: String::new(),
            api_key_encryption_secret: "secret".to_string(),
            webhook_base_url: None,
            port: 0,
            poll_interval: Duration::from_secs(1),
            initial_backoff: Duration::from_secs(1),
            backoff_multiplier: 1.5,
            max_poll_attempts: 10,
            poll_batch_cap: 10,
            webhook_sweep_interval: Duration::from_secs(1),
            webhook_max_attempts: 5,
            webhook_timeout: Duration::from_secs(1),
            webhook_retry_base: Duration::from_millis(1),
            webhook_retry_cap: Duration::from_secs(1),
            job_kind_concurrency: HashMap::new(),
        };
        let worker = JobWorker::new(store.clone(), orchestrator, adapters, &config);
        let claimed = worker.dispatch_one_pass().await.unwrap();
        assert_eq!(claimed, 1);

        // The dispatch itself runs on a spawned task; give it a beat.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let jobs = store.get_jobs(execution.id).await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn a_job_with_no_registered_adapter_fails_cleanly() {
        let memory = InMemoryStore::new();
        let tenant_id = Uuid::new_v4();
        seed_usage(&memory, tenant_id);
        let store: Arc<dyn Store> = Arc::new(memory);
        let adapters = AdapterRegistry::new();
        let orchestrator = Arc::new(Orchestrator::new(store.clone(), adapters.clone()));

        // Bypass admission's unsupported-operation check by inserting the job
        // directly, simulating an adapter that was deregistered after admission.
        let execution = crate::execution::Execution::new(
            tenant_id,
            ExecutionPlan {
                jobs: vec![JobSpec {
                    id: "img".to_string(),
                    operation: "generateImage".to_string(),
                    params: serde_json::json!({}),
                    depends_on: vec![],
                }],
                base_execution_id: None,
            },
            "img".to_string(),
            None,
        );
        let job = Job::new(execution.id, "img".to_string(), "generateImage".to_string(), serde_json::json!({}), vec![], 0);
        store.insert_execution_with_jobs(execution.clone(), vec![job.clone()]).await.unwrap();

        let config = Config {
            database_url: String::new(),
            api_key_encryption_secret: "secret".to_string(),
            webhook_base_url: None,
            port: 0,
            poll_interval: Duration::from_secs(1),
            initial_backoff: Duration::from_secs(1),
            backoff_multiplier: 1.5,
            max_poll_attempts: 10,
            poll_batch_cap: 10,
            webhook_sweep_interval: Duration::from_secs(1),
            webhook_max_attempts: 5,
            webhook_timeout: Duration::from_secs(1),
            webhook_retry_base: Duration::from_millis(1),
            webhook_retry_cap: Duration::from_secs(1),
            job_kind_concurrency: HashMap::new(),
        };
        let worker = JobWorker::new(store.clone(), orchestrator, adapters, &config);
        worker.dispatch_one_pass().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let job = store.get_job(job.record_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }
}
