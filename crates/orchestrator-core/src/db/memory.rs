//! In-memory `Store` used by tests in place of a live Postgres, so
//! state-machine logic can be exercised without a database up for unit
//! tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{ApiKeyRecord, JobOutcome, JobTerminalResult, JobTerminalWrite, Store};
use crate::error::OrchestratorError;
use crate::execution::{Execution, ExecutionStatus};
use crate::job::{Job, JobResult, JobStatus, WaitStrategy};
use crate::usage::{ActionLogEntry, UsageLimits};

#[derive(Default)]
struct Inner {
    executions: HashMap<Uuid, Execution>,
    jobs: HashMap<Uuid, Job>,
    usage: HashMap<Uuid, UsageLimits>,
    ledger: Vec<ActionLogEntry>,
    api_keys: HashMap<String, ApiKeyRecord>,
    provider_keys: HashMap<(Uuid, String), String>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_usage_limits(&self, limits: UsageLimits) {
        self.inner.lock().unwrap().usage.insert(limits.tenant_id, limits);
    }

    pub fn seed_api_key(&self, hash: String, record: ApiKeyRecord) {
        self.inner.lock().unwrap().api_keys.insert(hash, record);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_execution_with_jobs(&self, execution: Execution, jobs: Vec<Job>) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().unwrap();
        inner.executions.insert(execution.id, execution);
        for job in jobs {
            inner.jobs.insert(job.record_id, job);
        }
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>, OrchestratorError> {
        Ok(self.inner.lock().unwrap().executions.get(&id).cloned())
    }

    async fn get_job(&self, record_id: Uuid) -> Result<Option<Job>, OrchestratorError> {
        Ok(self.inner.lock().unwrap().jobs.get(&record_id).cloned())
    }

    async fn get_jobs(&self, execution_id: Uuid) -> Result<Vec<Job>, OrchestratorError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .jobs
            .values()
            .filter(|j| j.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn claim_job_for_processing(&self, record_id: Uuid) -> Result<Option<Job>, OrchestratorError> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner.jobs.get_mut(&record_id);
        match job {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Processing;
                job.started_at = Some(Utc::now());
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_job_waiting(
        &self,
        record_id: Uuid,
        provider_job_id: String,
        wait_strategy: WaitStrategy,
        next_poll_at: Option<DateTime<Utc>>,
    ) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(&record_id) {
            job.status = JobStatus::Waiting;
            job.provider_job_id = Some(provider_job_id);
            job.wait_strategy = Some(wait_strategy);
            job.next_poll_at = next_poll_at;
            job.poll_attempts = 0;
        }
        Ok(())
    }

    async fn record_poll_attempt(
        &self,
        record_id: Uuid,
        next_poll_at: DateTime<Utc>,
        last_error: Option<String>,
    ) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(&record_id) {
            job.poll_attempts += 1;
            job.next_poll_at = Some(next_poll_at);
            if let Some(err) = last_error {
                job.error = Some(err);
            }
        }
        Ok(())
    }

    async fn due_polling_jobs(&self, now: DateTime<Utc>, batch_cap: usize) -> Result<Vec<Job>, OrchestratorError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Waiting
                    && j.wait_strategy == Some(WaitStrategy::Polling)
                    && j.next_poll_at.map(|t| t <= now).unwrap_or(false)
            })
            .take(batch_cap)
            .cloned()
            .collect())
    }

    async fn due_pending_jobs(&self, batch_cap: usize) -> Result<Vec<Job>, OrchestratorError> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for job in inner.jobs.values() {
            if job.status != JobStatus::Pending {
                continue;
            }
            let deps_done = job.dependencies.iter().all(|dep| {
                inner
                    .jobs
                    .values()
                    .any(|d| d.execution_id == job.execution_id && &d.plan_local_id == dep && d.status == JobStatus::Completed)
            });
            if deps_done {
                out.push(job.clone());
            }
            if out.len() >= batch_cap {
                break;
            }
        }
        out.sort_by_key(|j| j.insertion_order);
        Ok(out)
    }

    async fn apply_job_terminal(&self, write: JobTerminalWrite) -> Result<JobTerminalResult, OrchestratorError> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner
            .jobs
            .get(&write.job_record_id)
            .cloned()
            .ok_or(OrchestratorError::JobNotFound(write.job_record_id))?;

        if job.status.is_terminal() {
            return Ok(JobTerminalResult {
                applied: false,
                job,
                ledger_entry: None,
            });
        }

        let mut ledger_entry = None;
        {
            let job = inner.jobs.get_mut(&write.job_record_id).unwrap();
            job.completed_at = Some(Utc::now());
            match write.outcome {
                JobOutcome::Completed(result) => {
                    job.status = JobStatus::Completed;
                    job.result = Some(result);
                }
                JobOutcome::Failed(error) => {
                    job.status = JobStatus::Failed;
                    job.error = Some(error);
                }
            }
        }

        // Usage ledger: tenant_id lives on the execution, not the job, so
        // look it up via the execution row (mirrors the single-transaction
        // write the real store does against both tables at once).
        let execution_id = inner.jobs.get(&write.job_record_id).unwrap().execution_id;
        if let Some(execution) = inner.executions.get(&execution_id).cloned() {
            let job = inner.jobs.get_mut(&write.job_record_id).unwrap();
            if job.status == JobStatus::Completed && !job.action_logged {
                let is_overage = inner
                    .usage
                    .get(&execution.tenant_id)
                    .map(crate::usage::is_next_action_overage)
                    .unwrap_or(false);
                let cost = inner
                    .usage
                    .get(&execution.tenant_id)
                    .map(|u| crate::usage::estimated_cost(u, is_overage))
                    .unwrap_or(0.0);

                let entry = ActionLogEntry {
                    tenant_id: execution.tenant_id,
                    execution_id,
                    job_record_id: write.job_record_id,
                    action_kind: write.action_kind,
                    count: 1,
                    is_overage,
                    estimated_cost: cost,
                    logged_at: Utc::now(),
                };
                inner.ledger.push(entry.clone());
                ledger_entry = Some(entry);

                if let Some(usage) = inner.usage.get_mut(&execution.tenant_id) {
                    if is_overage {
                        usage.overage_actions_this_period += 1;
                    } else {
                        usage.actions_used_this_period += 1;
                    }
                }

                job.action_logged = true;
            }
        }

        let job = inner.jobs.get(&write.job_record_id).unwrap().clone();
        Ok(JobTerminalResult {
            applied: true,
            job,
            ledger_entry,
        })
    }

    async fn cancel_jobs(&self, execution_id: Uuid, plan_local_ids: &[String], reason: &str) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().unwrap();
        for job in inner.jobs.values_mut() {
            if job.execution_id == execution_id
                && plan_local_ids.contains(&job.plan_local_id)
                && !job.status.is_terminal()
            {
                job.status = JobStatus::Cancelled;
                job.error = Some(reason.to_string());
                job.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn set_execution_status(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        result: Option<JobResult>,
        error: Option<String>,
    ) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(execution) = inner.executions.get_mut(&execution_id) {
            execution.status = status;
            execution.result = result;
            execution.error = error;
            if status.is_terminal() {
                execution.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn mark_webhook_pending(&self, execution_id: Uuid) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(execution) = inner.executions.get_mut(&execution_id) {
            if execution.webhook.is_some() {
                execution.webhook_pending = true;
            }
        }
        Ok(())
    }

    async fn due_webhook_deliveries(&self, now: DateTime<Utc>, max_attempts: u32) -> Result<Vec<Execution>, OrchestratorError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .executions
            .values()
            .filter(|e| {
                e.status.is_terminal()
                    && e.webhook.is_some()
                    && e.webhook_pending
                    && e.webhook_delivered_at.is_none()
                    && e.webhook_delivery_attempts < max_attempts
                    && e.webhook_next_retry_at.map(|t| t <= now).unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn record_webhook_attempt(
        &self,
        execution_id: Uuid,
        delivered: bool,
        error: Option<String>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(execution) = inner.executions.get_mut(&execution_id) {
            execution.webhook_delivery_attempts += 1;
            execution.webhook_last_error = error;
            if delivered {
                execution.webhook_delivered_at = Some(Utc::now());
                execution.webhook_pending = false;
                execution.webhook_next_retry_at = None;
            } else {
                execution.webhook_next_retry_at = next_retry_at;
            }
        }
        Ok(())
    }

    async fn get_usage_limits(&self, tenant_id: Uuid) -> Result<Option<UsageLimits>, OrchestratorError> {
        Ok(self.inner.lock().unwrap().usage.get(&tenant_id).cloned())
    }

    async fn reset_expired_free_plan_periods(&self, now: DateTime<Utc>) -> Result<u64, OrchestratorError> {
        let mut inner = self.inner.lock().unwrap();
        let mut count = 0u64;
        for usage in inner.usage.values_mut() {
            if usage.plan_kind == crate::usage::PlanKind::Free && usage.period_end <= now {
                crate::usage::advance_free_plan_period(usage, now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn find_api_key_by_hash(&self, hash: &str) -> Result<Option<ApiKeyRecord>, OrchestratorError> {
        Ok(self.inner.lock().unwrap().api_keys.get(hash).cloned())
    }

    async fn upsert_provider_api_key(&self, tenant_id: Uuid, provider: &str, ciphertext: &str) -> Result<(), OrchestratorError> {
        self.inner
            .lock()
            .unwrap()
            .provider_keys
            .insert((tenant_id, provider.to_string()), ciphertext.to_string());
        Ok(())
    }

    async fn get_provider_api_key(&self, tenant_id: Uuid, provider: &str) -> Result<Option<String>, OrchestratorError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .provider_keys
            .get(&(tenant_id, provider.to_string()))
            .cloned())
    }
}
