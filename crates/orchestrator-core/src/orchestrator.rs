//! Orchestrator: plan admission and the `OnJobTerminal` cascade, plus the
//! execution-cancellation operation.
//!
//! Readiness isn't tracked here in process memory: a job becomes eligible
//! for dispatch purely by virtue of its dependencies reaching `completed` in
//! the store, and the Work Queue discovers that the same way the listener
//! discovers a queued async result — by polling. This module only ever
//! reacts to one job's terminal write at a time and decides what it implies
//! for the rest of the DAG.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{JobOutcome, JobTerminalWrite, Store};
use crate::error::{OrchestratorError, UsageError};
use crate::execution::{Execution, ExecutionStatus, WebhookDescriptor};
use crate::job::{Job, JobStatus};
use crate::plan::{self, ExecutionPlan};
use crate::provider::registry::AdapterRegistry;
use crate::usage::check_usage_allowed;

pub struct Orchestrator {
    store: Arc<dyn Store>,
    adapters: AdapterRegistry,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn Store>, adapters: AdapterRegistry) -> Self {
        Self { store, adapters }
    }

    /// Admit a new execution: usage check, plan validation/canonicalization,
    /// job-row construction, single atomic insert.
    pub async fn create_execution(
        &self,
        tenant_id: Uuid,
        plan: ExecutionPlan,
        webhook: Option<WebhookDescriptor>,
    ) -> Result<Execution, OrchestratorError> {
        let limits = self
            .store
            .get_usage_limits(tenant_id)
            .await?
            .ok_or(UsageError::UnknownTenant(tenant_id))?;
        let decision = check_usage_allowed(&limits);
        if !decision.allowed {
            return Err(UsageError::QuotaExceeded {
                tenant: tenant_id,
                period_end: limits.period_end,
            }
            .into());
        }

        let registry = &self.adapters;
        let canonical = plan::validate_and_canonicalize(plan.clone(), &|op| registry.knows_operation(op))?;
        let result_job_plan_local_id = canonical.jobs[canonical.result_job_index].id.clone();

        let canonical_plan = ExecutionPlan {
            jobs: canonical.jobs.clone(),
            base_execution_id: plan.base_execution_id,
        };
        let mut execution = Execution::new(tenant_id, canonical_plan, result_job_plan_local_id, webhook);

        let jobs: Vec<Job> = canonical
            .jobs
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                Job::new(
                    execution.id,
                    spec.id.clone(),
                    spec.operation.clone(),
                    spec.params.clone(),
                    spec.depends_on.clone(),
                    i as i32,
                )
            })
            .collect();

        execution.status = ExecutionStatus::Processing;
        self.store.insert_execution_with_jobs(execution.clone(), jobs).await?;

        info!(
            execution_id = %execution.id,
            tenant_id = %tenant_id,
            job_count = canonical.jobs.len(),
            "execution admitted"
        );

        Ok(execution)
    }

    /// Apply a job's terminal write and cascade: on failure, cancel every
    /// transitive dependent; once every job in the execution has reached a
    /// terminal state, roll the execution's own status up.
    pub async fn on_job_terminal(&self, job_record_id: Uuid, outcome: JobOutcome) -> Result<(), OrchestratorError> {
        let job = self
            .store
            .get_job(job_record_id)
            .await?
            .ok_or(OrchestratorError::JobNotFound(job_record_id))?;
        let action_kind = job.operation.clone();

        let result = self
            .store
            .apply_job_terminal(JobTerminalWrite {
                job_record_id,
                outcome,
                action_kind,
            })
            .await?;

        if !result.applied {
            // Already terminal: the webhook/polling race's idempotent no-op.
            return Ok(());
        }

        let jobs = self.store.get_jobs(result.job.execution_id).await?;

        if result.job.status == JobStatus::Failed {
            let dependents = transitive_dependents(&jobs, &result.job.plan_local_id);
            if !dependents.is_empty() {
                warn!(
                    job_id = %result.job.plan_local_id,
                    execution_id = %result.job.execution_id,
                    count = dependents.len(),
                    "cancelling downstream jobs after upstream failure"
                );
                self.store
                    .cancel_jobs(
                        result.job.execution_id,
                        &dependents,
                        &format!("upstream job {} failed", result.job.plan_local_id),
                    )
                    .await?;
            }
        }

        self.maybe_finalize_execution(result.job.execution_id).await
    }

    /// Cancel every non-terminal job in an execution and mark the execution
    /// itself cancelled.
    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<Execution, OrchestratorError> {
        let execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or(OrchestratorError::ExecutionNotFound(execution_id))?;

        if execution.status.is_terminal() {
            return Ok(execution);
        }

        let jobs = self.store.get_jobs(execution_id).await?;
        let all_ids: Vec<String> = jobs.iter().map(|j| j.plan_local_id.clone()).collect();
        self.store
            .cancel_jobs(execution_id, &all_ids, "execution cancelled by caller")
            .await?;
        self.store
            .set_execution_status(
                execution_id,
                ExecutionStatus::Cancelled,
                None,
                Some("cancelled by caller".to_string()),
            )
            .await?;
        self.store.mark_webhook_pending(execution_id).await?;

        self.store
            .get_execution(execution_id)
            .await?
            .ok_or(OrchestratorError::ExecutionNotFound(execution_id))
    }

    async fn maybe_finalize_execution(&self, execution_id: Uuid) -> Result<(), OrchestratorError> {
        let jobs = self.store.get_jobs(execution_id).await?;
        if !jobs.iter().all(|j| j.status.is_terminal()) {
            return Ok(());
        }

        let execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or(OrchestratorError::ExecutionNotFound(execution_id))?;

        let failed: Vec<&Job> = jobs.iter().filter(|j| j.status == JobStatus::Failed).collect();
        let any_cancelled = jobs.iter().any(|j| j.status == JobStatus::Cancelled);

        let (status, result, error) = if !failed.is_empty() {
            let detail = failed
                .iter()
                .map(|j| {
                    let detail = j.error.clone().unwrap_or_else(|| "job failed".to_string());
                    format!("{}: {}", j.operation, detail)
                })
                .collect::<Vec<_>>()
                .join("; ");
            (ExecutionStatus::Failed, None, Some(detail))
        } else if any_cancelled {
            (ExecutionStatus::Cancelled, None, execution.error.clone())
        } else {
            let result_job = jobs
                .iter()
                .find(|j| j.plan_local_id == execution.result_job_plan_local_id);
            (ExecutionStatus::Completed, result_job.and_then(|j| j.result.clone()), None)
        };

        info!(execution_id = %execution_id, status = %status, "execution finalized");

        self.store
            .set_execution_status(execution_id, status, result, error)
            .await?;
        self.store.mark_webhook_pending(execution_id).await?;
        Ok(())
    }
}

/// Every job transitively depending on `plan_local_id`, not already terminal.
fn transitive_dependents(jobs: &[Job], plan_local_id: &str) -> Vec<String> {
    let mut affected: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(plan_local_id.to_string());

    while let Some(current) = queue.pop_front() {
        for job in jobs {
            if job.dependencies.iter().any(|d| d == &current) && affected.insert(job.plan_local_id.clone()) {
                queue.push_back(job.plan_local_id.clone());
            }
        }
    }

    jobs.iter()
        .filter(|j| affected.contains(&j.plan_local_id) && !j.status.is_terminal())
        .map(|j| j.plan_local_id.clone())
        .collect()
}
