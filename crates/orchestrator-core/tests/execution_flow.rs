//! Full admission -> readiness -> terminal roll-up scenarios, driven end to
//! end over `InMemoryStore` without a live Postgres. One scenario per
//! named end-to-end case, plus its two DAG-shape boundary cases.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use orchestrator_core::config::Config;
use orchestrator_core::db::memory::InMemoryStore;
use orchestrator_core::db::Store;
use orchestrator_core::error::OrchestratorError;
use orchestrator_core::execution::ExecutionStatus;
use orchestrator_core::job::{JobOutput, JobStatus, OutputType, WaitStrategy};
use orchestrator_core::orchestrator::Orchestrator;
use orchestrator_core::plan::{ExecutionPlan, JobSpec};
use orchestrator_core::provider::adapters::DeterministicTransformAdapter;
use orchestrator_core::provider::registry::AdapterRegistry;
use orchestrator_core::provider::{Capabilities, LaunchOutcome, PreferredStrategy, ProviderAdapter, StatusOutcome, StatusPayload};
use orchestrator_core::usage::{PlanKind, UsageLimits};
use orchestrator_core::wait_coordinator::AsyncWaitCoordinator;
use orchestrator_core::worker::JobWorker;
use uuid::Uuid;

fn usage_limits(tenant_id: Uuid, monthly_action_limit: i64, overage_allowed: bool) -> UsageLimits {
    usage_limits_with_used(tenant_id, monthly_action_limit, overage_allowed, 0)
}

fn usage_limits_with_used(tenant_id: Uuid, monthly_action_limit: i64, overage_allowed: bool, actions_used_this_period: i64) -> UsageLimits {
    UsageLimits {
        tenant_id,
        plan_kind: PlanKind::Free,
        monthly_action_limit,
        unlimited: false,
        period_start: Utc::now(),
        period_end: Utc::now() + chrono::Duration::days(30),
        actions_used_this_period,
        overage_actions_this_period: 0,
        overage_allowed,
        overage_price_per_action: 0.05,
    }
}

fn fast_config() -> Config {
    Config {
        database_url: String::new(),
        api_key_encryption_secret: "test-secret".to_string(),
        webhook_base_url: None,
        port: 0,
        poll_interval: Duration::from_millis(1),
        initial_backoff: Duration::ZERO,
        backoff_multiplier: 1.0,
        max_poll_attempts: 10,
        poll_batch_cap: 4096,
        webhook_sweep_interval: Duration::from_secs(1),
        webhook_max_attempts: 5,
        webhook_timeout: Duration::from_secs(1),
        webhook_retry_base: Duration::from_millis(1),
        webhook_retry_cap: Duration::from_secs(1),
        job_kind_concurrency: HashMap::new(),
    }
}

fn job_spec(id: &str, operation: &str, params: serde_json::Value, deps: &[&str]) -> JobSpec {
    JobSpec {
        id: id.to_string(),
        operation: operation.to_string(),
        params,
        depends_on: deps.iter().map(|s| s.to_string()).collect(),
    }
}

fn image_output(url: &str) -> JobOutput {
    JobOutput {
        output_type: OutputType::Image,
        url: url.to_string(),
        mime_type: "image/png".to_string(),
    }
}

/// Repeatedly claims ready jobs and lets their spawned dispatch tasks run,
/// until a pass claims nothing. Caps iterations so a genuinely stuck DAG
/// fails the test instead of hanging.
async fn drain(worker: &Arc<JobWorker>, max_passes: usize) {
    for _ in 0..max_passes {
        let claimed = worker.dispatch_one_pass().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        if claimed == 0 {
            break;
        }
    }
}

/// A provider that answers `Processing` the first `processing_rounds` polls,
/// then `Completed`. Models an async video provider polled by the Async Wait
/// Coordinator.
struct CountingPollAdapter {
    processing_rounds: u32,
    polls: AtomicU32,
}

impl CountingPollAdapter {
    fn new(processing_rounds: u32) -> Self {
        Self {
            processing_rounds,
            polls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ProviderAdapter for CountingPollAdapter {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_webhook: false,
            supports_polling: true,
            default_strategy: PreferredStrategy::Polling,
        }
    }

    async fn launch(&self, _params: &serde_json::Value) -> Result<LaunchOutcome, orchestrator_core::error::ProviderError> {
        Ok(LaunchOutcome::Async {
            provider_job_id: "provider-vid-1".to_string(),
            wait_strategy: WaitStrategy::Polling,
        })
    }

    fn parse_status(&self, _payload: &StatusPayload) -> Result<StatusOutcome, orchestrator_core::error::ProviderError> {
        Err(orchestrator_core::error::ProviderError::UnsupportedWaitStrategy)
    }

    async fn poll(&self, _provider_job_id: &str) -> Result<StatusOutcome, orchestrator_core::error::ProviderError> {
        let round = self.polls.fetch_add(1, Ordering::SeqCst);
        if round < self.processing_rounds {
            Ok(StatusOutcome::Processing)
        } else {
            Ok(StatusOutcome::Completed {
                outputs: vec![JobOutput {
                    output_type: OutputType::Video,
                    url: "https://store/cat.mp4".to_string(),
                    mime_type: "video/mp4".to_string(),
                }],
            })
        }
    }
}

/// A provider that only ever completes via an inbound webhook, never a
/// successful poll, so a webhook-first race can be driven without also
/// completing the job through `poll`.
struct WebhookOnlyAdapter;

#[async_trait]
impl ProviderAdapter for WebhookOnlyAdapter {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_webhook: true,
            supports_polling: true,
            default_strategy: PreferredStrategy::Webhook,
        }
    }

    async fn launch(&self, _params: &serde_json::Value) -> Result<LaunchOutcome, orchestrator_core::error::ProviderError> {
        Ok(LaunchOutcome::Async {
            provider_job_id: "provider-vid-2".to_string(),
            wait_strategy: WaitStrategy::Webhook,
        })
    }

    fn parse_status(&self, payload: &StatusPayload) -> Result<StatusOutcome, orchestrator_core::error::ProviderError> {
        let status = payload.0.get("status").and_then(|v| v.as_str()).unwrap_or("");
        match status {
            "COMPLETED" => Ok(StatusOutcome::Completed {
                outputs: vec![JobOutput {
                    output_type: OutputType::Video,
                    url: "https://store/v.mp4".to_string(),
                    mime_type: "video/mp4".to_string(),
                }],
            }),
            _ => Ok(StatusOutcome::Processing),
        }
    }

    async fn poll(&self, _provider_job_id: &str) -> Result<StatusOutcome, orchestrator_core::error::ProviderError> {
        Ok(StatusOutcome::Processing)
    }
}

#[tokio::test]
async fn single_sync_job_completes_and_logs_one_action() {
    let memory = InMemoryStore::new();
    let tenant_id = Uuid::new_v4();
    memory.seed_usage_limits(usage_limits(tenant_id, 100, false));
    let store: Arc<dyn Store> = Arc::new(memory);

    let mut adapters = AdapterRegistry::new();
    adapters.register(
        "removeImageBackground",
        None,
        Arc::new(DeterministicTransformAdapter::new(|_| Ok(vec![image_output("https://store/x-nb.png")]))),
    );

    let orchestrator = Arc::new(Orchestrator::new(store.clone(), adapters.clone()));
    let plan = ExecutionPlan {
        jobs: vec![job_spec("a", "removeImageBackground", serde_json::json!({"image": "https://x/x.png"}), &[])],
        base_execution_id: None,
    };
    let execution = orchestrator.create_execution(tenant_id, plan, None).await.unwrap();

    let worker = Arc::new(JobWorker::new(store.clone(), orchestrator, adapters, &fast_config()));
    drain(&worker, 10).await;

    let execution = store.get_execution(execution.id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    let jobs = store.get_jobs(execution.id).await.unwrap();
    assert_eq!(jobs[0].status, JobStatus::Completed);

    let limits = store.get_usage_limits(tenant_id).await.unwrap().unwrap();
    assert_eq!(limits.actions_used_this_period, 1);
}

#[tokio::test]
async fn chained_async_video_resolves_upstream_output_and_polls_to_completion() {
    let memory = InMemoryStore::new();
    let tenant_id = Uuid::new_v4();
    memory.seed_usage_limits(usage_limits(tenant_id, 100, false));
    let store: Arc<dyn Store> = Arc::new(memory);

    let mut adapters = AdapterRegistry::new();
    adapters.register(
        "generateImage",
        None,
        Arc::new(DeterministicTransformAdapter::new(|_| Ok(vec![image_output("https://store/cat.png")]))),
    );
    adapters.register("generateVideo", None, Arc::new(CountingPollAdapter::new(3)));

    let orchestrator = Arc::new(Orchestrator::new(store.clone(), adapters.clone()));
    let plan = ExecutionPlan {
        jobs: vec![
            job_spec("img", "generateImage", serde_json::json!({"prompt": "cat"}), &[]),
            job_spec("vid", "generateVideo", serde_json::json!({"prompt": "cat walks", "image": "$img"}), &[]),
        ],
        base_execution_id: None,
    };
    let execution = orchestrator.create_execution(tenant_id, plan, None).await.unwrap();

    let worker = Arc::new(JobWorker::new(store.clone(), orchestrator.clone(), adapters.clone(), &fast_config()));
    drain(&worker, 10).await;

    let jobs = store.get_jobs(execution.id).await.unwrap();
    let vid = jobs.iter().find(|j| j.plan_local_id == "vid").unwrap();
    assert_eq!(vid.status, JobStatus::Waiting);
    assert_eq!(
        vid.params.get("image").and_then(|v| v.as_str()),
        Some("https://store/cat.png"),
        "vid's params should have been resolved against img's completed output"
    );

    let coordinator = Arc::new(AsyncWaitCoordinator::new(store.clone(), orchestrator, adapters, fast_config()));
    for _ in 0..4 {
        coordinator.poll_due_jobs().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let execution = store.get_execution(execution.id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    let jobs = store.get_jobs(execution.id).await.unwrap();
    let vid = jobs.iter().find(|j| j.plan_local_id == "vid").unwrap();
    assert_eq!(vid.status, JobStatus::Completed);
    assert_eq!(vid.poll_attempts, 3);

    let limits = store.get_usage_limits(tenant_id).await.unwrap().unwrap();
    assert_eq!(limits.actions_used_this_period, 2);
}

#[tokio::test]
async fn webhook_arriving_first_wins_the_race_against_a_stale_poll() {
    let memory = InMemoryStore::new();
    let tenant_id = Uuid::new_v4();
    memory.seed_usage_limits(usage_limits(tenant_id, 100, false));
    let store: Arc<dyn Store> = Arc::new(memory);

    let mut adapters = AdapterRegistry::new();
    adapters.register("generateVideo", None, Arc::new(WebhookOnlyAdapter));

    let orchestrator = Arc::new(Orchestrator::new(store.clone(), adapters.clone()));
    let plan = ExecutionPlan {
        jobs: vec![job_spec("vid", "generateVideo", serde_json::json!({"prompt": "cat walks"}), &[])],
        base_execution_id: None,
    };
    let execution = orchestrator.create_execution(tenant_id, plan, None).await.unwrap();

    let worker = Arc::new(JobWorker::new(store.clone(), orchestrator.clone(), adapters.clone(), &fast_config()));
    drain(&worker, 10).await;

    let coordinator = Arc::new(AsyncWaitCoordinator::new(store.clone(), orchestrator, adapters, fast_config()));
    let jobs = store.get_jobs(execution.id).await.unwrap();
    let vid_record_id = jobs[0].record_id;

    let payload = StatusPayload(serde_json::json!({
        "status": "COMPLETED",
        "outputs": [{"type": "video", "url": "https://store/v.mp4", "mimeType": "video/mp4"}],
    }));
    coordinator.handle_webhook(vid_record_id, payload).await.unwrap();

    // The poller races in after the webhook already committed; its stale
    // read must see the job already terminal and leave state untouched.
    coordinator.poll_due_jobs().await.unwrap();

    let jobs = store.get_jobs(execution.id).await.unwrap();
    assert_eq!(jobs[0].status, JobStatus::Completed);
    assert_eq!(jobs[0].result.as_ref().unwrap().outputs[0].url, "https://store/v.mp4");

    let limits = store.get_usage_limits(tenant_id).await.unwrap().unwrap();
    assert_eq!(limits.actions_used_this_period, 1, "exactly one ActionLog row despite two completion attempts");
}

#[tokio::test]
async fn a_failed_dependency_cancels_every_transitive_dependent() {
    let memory = InMemoryStore::new();
    let tenant_id = Uuid::new_v4();
    memory.seed_usage_limits(usage_limits(tenant_id, 100, false));
    let store: Arc<dyn Store> = Arc::new(memory);

    let mut adapters = AdapterRegistry::new();
    adapters.register(
        "generateImage",
        None,
        Arc::new(DeterministicTransformAdapter::new(|_| Err(orchestrator_core::error::ProviderError::RequestFailed("provider rejected prompt".to_string())))),
    );
    adapters.register("generateVideo", None, Arc::new(DeterministicTransformAdapter::new(|_| Ok(vec![]))));
    adapters.register("merge", None, Arc::new(DeterministicTransformAdapter::new(|_| Ok(vec![]))));

    let orchestrator = Arc::new(Orchestrator::new(store.clone(), adapters.clone()));
    let plan = ExecutionPlan {
        jobs: vec![
            job_spec("a", "generateImage", serde_json::json!({}), &[]),
            job_spec("b", "generateVideo", serde_json::json!({}), &["a"]),
            job_spec("c", "merge", serde_json::json!({}), &["b"]),
        ],
        base_execution_id: None,
    };
    let execution = orchestrator.create_execution(tenant_id, plan, None).await.unwrap();

    let worker = Arc::new(JobWorker::new(store.clone(), orchestrator, adapters, &fast_config()));
    drain(&worker, 10).await;

    let execution = store.get_execution(execution.id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.as_ref().unwrap().contains("generateImage:"));

    let jobs = store.get_jobs(execution.id).await.unwrap();
    let status_of = |id: &str| jobs.iter().find(|j| j.plan_local_id == id).unwrap().status;
    assert_eq!(status_of("a"), JobStatus::Failed);
    assert_eq!(status_of("b"), JobStatus::Cancelled);
    assert_eq!(status_of("c"), JobStatus::Cancelled);
}

#[tokio::test]
async fn two_independent_failures_are_both_reported_in_the_aggregated_error() {
    let memory = InMemoryStore::new();
    let tenant_id = Uuid::new_v4();
    memory.seed_usage_limits(usage_limits(tenant_id, 100, false));
    let store: Arc<dyn Store> = Arc::new(memory);

    let mut adapters = AdapterRegistry::new();
    adapters.register(
        "generateImage",
        None,
        Arc::new(DeterministicTransformAdapter::new(|_| Err(orchestrator_core::error::ProviderError::RequestFailed("bad prompt".to_string())))),
    );
    adapters.register(
        "generateAudio",
        None,
        Arc::new(DeterministicTransformAdapter::new(|_| Err(orchestrator_core::error::ProviderError::RequestFailed("bad voice id".to_string())))),
    );

    let orchestrator = Arc::new(Orchestrator::new(store.clone(), adapters.clone()));
    let plan = ExecutionPlan {
        jobs: vec![
            job_spec("img", "generateImage", serde_json::json!({}), &[]),
            job_spec("aud", "generateAudio", serde_json::json!({}), &[]),
        ],
        base_execution_id: None,
    };
    let execution = orchestrator.create_execution(tenant_id, plan, None).await.unwrap();

    let worker = Arc::new(JobWorker::new(store.clone(), orchestrator, adapters, &fast_config()));
    drain(&worker, 10).await;

    let execution = store.get_execution(execution.id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    let error = execution.error.unwrap();
    assert!(error.contains("generateImage: provider request failed: bad prompt"), "{error}");
    assert!(error.contains("generateAudio: provider request failed: bad voice id"), "{error}");
    assert!(error.contains("; "), "expected both failures joined by \"; \": {error}");
}

#[tokio::test]
async fn a_tenant_at_its_quota_boundary_admits_exactly_one_more_execution() {
    let memory = InMemoryStore::new();
    let tenant_id = Uuid::new_v4();
    memory.seed_usage_limits(usage_limits_with_used(tenant_id, 2000, false, 1999));
    let store: Arc<dyn Store> = Arc::new(memory);

    let mut adapters = AdapterRegistry::new();
    adapters.register(
        "generateImage",
        None,
        Arc::new(DeterministicTransformAdapter::new(|_| Ok(vec![image_output("https://store/cat.png")]))),
    );
    let orchestrator = Arc::new(Orchestrator::new(store.clone(), adapters.clone()));

    let plan = || ExecutionPlan {
        jobs: vec![job_spec("a", "generateImage", serde_json::json!({}), &[])],
        base_execution_id: None,
    };

    let execution = orchestrator.create_execution(tenant_id, plan(), None).await.unwrap();
    let worker = Arc::new(JobWorker::new(store.clone(), orchestrator.clone(), adapters, &fast_config()));
    drain(&worker, 10).await;

    let execution = store.get_execution(execution.id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    let limits = store.get_usage_limits(tenant_id).await.unwrap().unwrap();
    assert_eq!(limits.actions_used_this_period, 2000);

    let err = orchestrator.create_execution(tenant_id, plan(), None).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Usage(_)));
}

#[tokio::test]
async fn a_thousand_job_chain_completes_with_fan_out_one() {
    const DEPTH: usize = 1000;
    let memory = InMemoryStore::new();
    let tenant_id = Uuid::new_v4();
    memory.seed_usage_limits(usage_limits(tenant_id, (DEPTH as i64) + 10, false));
    let store: Arc<dyn Store> = Arc::new(memory);

    let mut adapters = AdapterRegistry::new();
    adapters.register(
        "generateImage",
        None,
        Arc::new(DeterministicTransformAdapter::new(|_| Ok(vec![image_output("https://store/step.png")]))),
    );
    let orchestrator = Arc::new(Orchestrator::new(store.clone(), adapters.clone()));

    let mut jobs = Vec::with_capacity(DEPTH);
    for i in 0..DEPTH {
        let id = format!("j{i}");
        let prev = format!("j{}", i.wrapping_sub(1));
        let deps: Vec<&str> = if i == 0 { vec![] } else { vec![prev.as_str()] };
        jobs.push(job_spec(&id, "generateImage", serde_json::json!({}), &deps));
    }
    let plan = ExecutionPlan { jobs, base_execution_id: None };
    let execution = orchestrator.create_execution(tenant_id, plan, None).await.unwrap();

    let worker = Arc::new(JobWorker::new(store.clone(), orchestrator, adapters, &fast_config()));
    drain(&worker, DEPTH + 10).await;

    let execution = store.get_execution(execution.id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    let completed = store
        .get_jobs(execution.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|j| j.status == JobStatus::Completed)
        .count();
    assert_eq!(completed, DEPTH);
}

#[tokio::test]
async fn a_perfect_binary_tree_of_depth_ten_completes_with_full_parallelism_per_level() {
    const DEPTH: usize = 10;
    let total_nodes = (1usize << (DEPTH + 1)) - 1; // 1023
    let memory = InMemoryStore::new();
    let tenant_id = Uuid::new_v4();
    memory.seed_usage_limits(usage_limits(tenant_id, (total_nodes as i64) + 10, false));
    let store: Arc<dyn Store> = Arc::new(memory);

    let mut adapters = AdapterRegistry::new();
    adapters.register(
        "generateImage",
        None,
        Arc::new(DeterministicTransformAdapter::new(|_| Ok(vec![image_output("https://store/leaf.png")]))),
    );
    let orchestrator = Arc::new(Orchestrator::new(store.clone(), adapters.clone()));

    // Node k's children are 2k+1 and 2k+2, so a child depends on its parent.
    let mut jobs = Vec::with_capacity(total_nodes);
    for k in 0..total_nodes {
        let id = format!("n{k}");
        let deps: Vec<String> = if k == 0 { vec![] } else { vec![format!("n{}", (k - 1) / 2)] };
        jobs.push(job_spec(&id, "generateImage", serde_json::json!({}), &deps.iter().map(|s| s.as_str()).collect::<Vec<_>>()));
    }
    let plan = ExecutionPlan { jobs, base_execution_id: None };
    let execution = orchestrator.create_execution(tenant_id, plan, None).await.unwrap();

    let worker = Arc::new(JobWorker::new(store.clone(), orchestrator, adapters, &fast_config()));
    // Only DEPTH + 1 levels of true serialization; a little slack for races.
    drain(&worker, DEPTH + 10).await;

    let execution = store.get_execution(execution.id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    let completed = store
        .get_jobs(execution.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|j| j.status == JobStatus::Completed)
        .count();
    assert_eq!(completed, total_nodes);
}

#[tokio::test]
async fn a_provider_that_never_finishes_fails_once_poll_attempts_are_exhausted() {
    let memory = InMemoryStore::new();
    let tenant_id = Uuid::new_v4();
    memory.seed_usage_limits(usage_limits(tenant_id, 100, false));
    let store: Arc<dyn Store> = Arc::new(memory);

    let mut adapters = AdapterRegistry::new();
    // Always answers `processing`, far past the configured attempt cap.
    adapters.register("generateVideo", None, Arc::new(CountingPollAdapter::new(1_000)));

    let orchestrator = Arc::new(Orchestrator::new(store.clone(), adapters.clone()));
    let plan = ExecutionPlan {
        jobs: vec![job_spec("vid", "generateVideo", serde_json::json!({"prompt": "cat walks"}), &[])],
        base_execution_id: None,
    };
    let execution = orchestrator.create_execution(tenant_id, plan, None).await.unwrap();

    let mut config = fast_config();
    config.max_poll_attempts = 3;
    let worker = Arc::new(JobWorker::new(store.clone(), orchestrator.clone(), adapters.clone(), &config));
    drain(&worker, 10).await;

    let coordinator = Arc::new(AsyncWaitCoordinator::new(store.clone(), orchestrator, adapters, config));
    // Three cycles burn the allotted attempts (each returns `processing`); a
    // fourth must fail the job without calling the adapter again — once
    // pollAttempts reaches maxPollAttempts, the next poll fails the job with
    // the exceeded-attempts error instead of calling the provider again.
    for _ in 0..4 {
        coordinator.poll_due_jobs().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let jobs = store.get_jobs(execution.id).await.unwrap();
    let vid = jobs.iter().find(|j| j.plan_local_id == "vid").unwrap();
    assert_eq!(vid.status, JobStatus::Failed);
    assert_eq!(vid.error.as_deref(), Some("exceeded polling attempts"));

    let execution = store.get_execution(execution.id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
}
