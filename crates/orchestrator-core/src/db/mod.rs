//! Durable Store abstraction. A `Store` implementation is the single
//! source of truth and the only place that needs serializable transactions
//! / row-level locking — everything above this trait (`Orchestrator`, `JobWorker`,
//! `AsyncWaitCoordinator`, `UsageAccounting`, the webhook deliverer) talks
//! only to `Store`, never to `sqlx` directly. Trait-based so tests can swap
//! in `memory::InMemoryStore` instead of a live Postgres, the same
//! pluggable-backend shape the corpus uses for a publish-state store.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::execution::{Execution, ExecutionStatus};
use crate::job::{Job, JobResult, JobStatus, WaitStrategy};
use crate::usage::{ActionLogEntry, UsageLimits};

/// What the caller wants written when a job reaches a terminal state.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed(JobResult),
    Failed(String),
}

/// Everything `apply_job_terminal` needs to do its work atomically: write
/// the job's terminal state and, if completed, the usage ledger row, all
/// under one transaction, gated by the at-most-once `action_logged` check.
#[derive(Debug, Clone)]
pub struct JobTerminalWrite {
    pub job_record_id: Uuid,
    pub outcome: JobOutcome,
    pub action_kind: String,
}

#[derive(Debug, Clone)]
pub struct JobTerminalResult {
    /// `false` if the job was already terminal when this call ran — the
    /// idempotent no-op path that lets the webhook and polling routes race
    /// safely.
    pub applied: bool,
    pub job: Job,
    pub ledger_entry: Option<ActionLogEntry>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_execution_with_jobs(&self, execution: Execution, jobs: Vec<Job>) -> Result<(), OrchestratorError>;
    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>, OrchestratorError>;
    async fn get_job(&self, record_id: Uuid) -> Result<Option<Job>, OrchestratorError>;
    async fn get_jobs(&self, execution_id: Uuid) -> Result<Vec<Job>, OrchestratorError>;

    /// Atomic `pending -> processing` compare-and-set. Returns `None` if the
    /// job wasn't `pending` (already claimed by a competing consumer, or
    /// past `pending` entirely) — the idempotency guard against at-least-once
    /// queue redelivery.
    async fn claim_job_for_processing(&self, record_id: Uuid) -> Result<Option<Job>, OrchestratorError>;

    async fn set_job_waiting(
        &self,
        record_id: Uuid,
        provider_job_id: String,
        wait_strategy: WaitStrategy,
        next_poll_at: Option<DateTime<Utc>>,
    ) -> Result<(), OrchestratorError>;

    async fn record_poll_attempt(
        &self,
        record_id: Uuid,
        next_poll_at: DateTime<Utc>,
        last_error: Option<String>,
    ) -> Result<(), OrchestratorError>;

    /// Claim up to `batch_cap` jobs due for polling (`status = waiting`,
    /// `wait_strategy = polling`, `next_poll_at <= now`), safe to call from
    /// multiple instances concurrently.
    async fn due_polling_jobs(&self, now: DateTime<Utc>, batch_cap: usize) -> Result<Vec<Job>, OrchestratorError>;

    /// Jobs still `pending` whose every dependency has reached `completed`.
    /// The Work Queue's dispatch loop polls this the same way a listener
    /// loop polls an async task-result queue, rather than tracking
    /// readiness in process memory, so dispatch survives a restart with
    /// nothing lost.
    async fn due_pending_jobs(&self, batch_cap: usize) -> Result<Vec<Job>, OrchestratorError>;

    /// The atomic core of `OnJobTerminal`: idempotency check, terminal
    /// status/result/error/`completedAt` write, and — on `Completed` — the
    /// usage ledger insert + counter increment + flipping `actionLogged`,
    /// all under one transaction.
    async fn apply_job_terminal(&self, write: JobTerminalWrite) -> Result<JobTerminalResult, OrchestratorError>;

    /// Mark every non-terminal job in `plan_local_ids` as `cancelled` with
    /// `reason` (used both by the upstream-failure cascade and by
    /// execution-level cancellation).
    async fn cancel_jobs(&self, execution_id: Uuid, plan_local_ids: &[String], reason: &str) -> Result<(), OrchestratorError>;

    async fn set_execution_status(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        result: Option<JobResult>,
        error: Option<String>,
    ) -> Result<(), OrchestratorError>;

    async fn mark_webhook_pending(&self, execution_id: Uuid) -> Result<(), OrchestratorError>;

    async fn due_webhook_deliveries(&self, now: DateTime<Utc>, max_attempts: u32) -> Result<Vec<Execution>, OrchestratorError>;

    /// Record the outcome of one delivery attempt. `next_retry_at` is the
    /// attempt-indexed backoff deadline, ignored when `delivered` is true.
    async fn record_webhook_attempt(
        &self,
        execution_id: Uuid,
        delivered: bool,
        error: Option<String>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), OrchestratorError>;

    async fn get_usage_limits(&self, tenant_id: Uuid) -> Result<Option<UsageLimits>, OrchestratorError>;

    /// Roll forward every free-plan tenant whose `period_end <= now`.
    /// Returns the number of tenants reset.
    async fn reset_expired_free_plan_periods(&self, now: DateTime<Utc>) -> Result<u64, OrchestratorError>;

    async fn find_api_key_by_hash(&self, hash: &str) -> Result<Option<ApiKeyRecord>, OrchestratorError>;

    /// Persist (or replace) a tenant's encrypted credential for `provider`.
    /// `ciphertext` is the `iv:authTag:ciphertext` hex triple produced by
    /// [`crate::crypto`].
    async fn upsert_provider_api_key(&self, tenant_id: Uuid, provider: &str, ciphertext: &str) -> Result<(), OrchestratorError>;

    async fn get_provider_api_key(&self, tenant_id: Uuid, provider: &str) -> Result<Option<String>, OrchestratorError>;
}

#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub hash: String,
    pub display_prefix: String,
    pub revoked: bool,
}

pub(crate) fn is_job_terminal(status: JobStatus) -> bool {
    status.is_terminal()
}
