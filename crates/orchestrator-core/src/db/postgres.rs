//! Postgres-backed `Store`.
//!
//! All queries use runtime-checked `sqlx::query()`/`query_as()` rather than
//! the compile-time `query!()` macros, since the schema is applied by
//! migrations that don't exist when this crate is compiled.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;

use super::{ApiKeyRecord, JobOutcome, JobTerminalResult, JobTerminalWrite, Store};
use crate::error::OrchestratorError;
use crate::execution::{Execution, ExecutionStatus, WebhookDescriptor};
use crate::job::{Job, JobResult, JobStatus, WaitStrategy};
use crate::plan::ExecutionPlan;
use crate::usage::{ActionLogEntry, PlanKind, UsageLimits};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct ExecutionRow {
    id: Uuid,
    tenant_id: Uuid,
    plan: serde_json::Value,
    result_job_plan_local_id: String,
    status: String,
    result: Option<serde_json::Value>,
    error: Option<String>,
    webhook_url: Option<String>,
    webhook_secret: Option<String>,
    webhook_delivery_attempts: i32,
    webhook_last_error: Option<String>,
    webhook_delivered_at: Option<DateTime<Utc>>,
    webhook_pending: bool,
    webhook_next_retry_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ExecutionRow> for Execution {
    type Error = OrchestratorError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        let plan: ExecutionPlan = serde_json::from_value(row.plan)
            .map_err(|e| OrchestratorError::Database(sqlx::Error::Decode(Box::new(e))))?;
        let result = row
            .result
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| OrchestratorError::Database(sqlx::Error::Decode(Box::new(e))))?;
        let status = ExecutionStatus::from_str(&row.status)
            .map_err(|e| OrchestratorError::Database(sqlx::Error::Decode(e.into())))?;

        Ok(Execution {
            id: row.id,
            tenant_id: row.tenant_id,
            plan,
            result_job_plan_local_id: row.result_job_plan_local_id,
            status,
            result,
            error: row.error,
            webhook: row.webhook_url.map(|url| WebhookDescriptor {
                url,
                secret: row.webhook_secret,
            }),
            webhook_delivery_attempts: row.webhook_delivery_attempts as u32,
            webhook_last_error: row.webhook_last_error,
            webhook_delivered_at: row.webhook_delivered_at,
            webhook_pending: row.webhook_pending,
            webhook_next_retry_at: row.webhook_next_retry_at,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(FromRow)]
struct JobRow {
    record_id: Uuid,
    execution_id: Uuid,
    plan_local_id: String,
    operation: String,
    params: serde_json::Value,
    dependencies: serde_json::Value,
    status: String,
    result: Option<serde_json::Value>,
    error: Option<String>,
    provider_job_id: Option<String>,
    wait_strategy: Option<String>,
    next_poll_at: Option<DateTime<Utc>>,
    poll_attempts: i32,
    action_logged: bool,
    insertion_order: i32,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = OrchestratorError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let dependencies: Vec<String> = serde_json::from_value(row.dependencies)
            .map_err(|e| OrchestratorError::Database(sqlx::Error::Decode(Box::new(e))))?;
        let result = row
            .result
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| OrchestratorError::Database(sqlx::Error::Decode(Box::new(e))))?;
        let status = JobStatus::from_str(&row.status)
            .map_err(|e| OrchestratorError::Database(sqlx::Error::Decode(e.into())))?;
        let wait_strategy = row
            .wait_strategy
            .map(|s| WaitStrategy::from_str(&s))
            .transpose()
            .map_err(|e| OrchestratorError::Database(sqlx::Error::Decode(e.into())))?;

        Ok(Job {
            record_id: row.record_id,
            execution_id: row.execution_id,
            plan_local_id: row.plan_local_id,
            operation: row.operation,
            params: row.params,
            dependencies,
            status,
            result,
            error: row.error,
            provider_job_id: row.provider_job_id,
            wait_strategy,
            next_poll_at: row.next_poll_at,
            poll_attempts: row.poll_attempts as u32,
            action_logged: row.action_logged,
            insertion_order: row.insertion_order,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

const EXECUTION_COLUMNS: &str = r#"
    id, tenant_id, plan, result_job_plan_local_id, status, result, error,
    webhook_url, webhook_secret, webhook_delivery_attempts, webhook_last_error,
    webhook_delivered_at, webhook_pending, webhook_next_retry_at, created_at, completed_at
"#;

const JOB_COLUMNS: &str = r#"
    record_id, execution_id, plan_local_id, operation, params, dependencies,
    status, result, error, provider_job_id, wait_strategy, next_poll_at,
    poll_attempts, action_logged, insertion_order, created_at, started_at, completed_at
"#;

#[async_trait]
impl Store for PgStore {
    async fn insert_execution_with_jobs(&self, execution: Execution, jobs: Vec<Job>) -> Result<(), OrchestratorError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO executions
                (id, tenant_id, plan, result_job_plan_local_id, status, result, error,
                 webhook_url, webhook_secret, webhook_delivery_attempts, webhook_last_error,
                 webhook_delivered_at, webhook_pending, webhook_next_retry_at, created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(execution.id)
        .bind(execution.tenant_id)
        .bind(serde_json::to_value(&execution.plan).unwrap())
        .bind(&execution.result_job_plan_local_id)
        .bind(execution.status.as_str())
        .bind(execution.result.as_ref().map(|r| serde_json::to_value(r).unwrap()))
        .bind(&execution.error)
        .bind(execution.webhook.as_ref().map(|w| w.url.clone()))
        .bind(execution.webhook.as_ref().and_then(|w| w.secret.clone()))
        .bind(execution.webhook_delivery_attempts as i32)
        .bind(&execution.webhook_last_error)
        .bind(execution.webhook_delivered_at)
        .bind(execution.webhook_pending)
        .bind(execution.webhook_next_retry_at)
        .bind(execution.created_at)
        .bind(execution.completed_at)
        .execute(&mut *tx)
        .await?;

        for job in jobs {
            sqlx::query(
                r#"
                INSERT INTO execution_jobs
                    (record_id, execution_id, plan_local_id, operation, params, dependencies,
                     status, result, error, provider_job_id, wait_strategy, next_poll_at,
                     poll_attempts, action_logged, insertion_order, created_at, started_at, completed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
                "#,
            )
            .bind(job.record_id)
            .bind(job.execution_id)
            .bind(&job.plan_local_id)
            .bind(&job.operation)
            .bind(&job.params)
            .bind(serde_json::to_value(&job.dependencies).unwrap())
            .bind(job.status.as_str())
            .bind(job.result.as_ref().map(|r| serde_json::to_value(r).unwrap()))
            .bind(&job.error)
            .bind(&job.provider_job_id)
            .bind(job.wait_strategy.map(|w| w.as_str()))
            .bind(job.next_poll_at)
            .bind(job.poll_attempts as i32)
            .bind(job.action_logged)
            .bind(job.insertion_order)
            .bind(job.created_at)
            .bind(job.started_at)
            .bind(job.completed_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>, OrchestratorError> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Execution::try_from).transpose()
    }

    async fn get_job(&self, record_id: Uuid) -> Result<Option<Job>, OrchestratorError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM execution_jobs WHERE record_id = $1"
        ))
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Job::try_from).transpose()
    }

    async fn get_jobs(&self, execution_id: Uuid) -> Result<Vec<Job>, OrchestratorError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM execution_jobs WHERE execution_id = $1 ORDER BY insertion_order"
        ))
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn claim_job_for_processing(&self, record_id: Uuid) -> Result<Option<Job>, OrchestratorError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE execution_jobs
            SET status = 'processing', started_at = now()
            WHERE record_id = $1 AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Job::try_from).transpose()
    }

    async fn set_job_waiting(
        &self,
        record_id: Uuid,
        provider_job_id: String,
        wait_strategy: WaitStrategy,
        next_poll_at: Option<DateTime<Utc>>,
    ) -> Result<(), OrchestratorError> {
        sqlx::query(
            r#"
            UPDATE execution_jobs
            SET status = 'waiting', provider_job_id = $2, wait_strategy = $3,
                next_poll_at = $4, poll_attempts = 0
            WHERE record_id = $1
            "#,
        )
        .bind(record_id)
        .bind(provider_job_id)
        .bind(wait_strategy.as_str())
        .bind(next_poll_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_poll_attempt(
        &self,
        record_id: Uuid,
        next_poll_at: DateTime<Utc>,
        last_error: Option<String>,
    ) -> Result<(), OrchestratorError> {
        sqlx::query(
            r#"
            UPDATE execution_jobs
            SET poll_attempts = poll_attempts + 1,
                next_poll_at = $2,
                error = COALESCE($3, error)
            WHERE record_id = $1
            "#,
        )
        .bind(record_id)
        .bind(next_poll_at)
        .bind(last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn due_polling_jobs(&self, now: DateTime<Utc>, batch_cap: usize) -> Result<Vec<Job>, OrchestratorError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM execution_jobs
            WHERE status = 'waiting' AND wait_strategy = 'polling' AND next_poll_at <= $1
            ORDER BY next_poll_at
            FOR UPDATE SKIP LOCKED
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(batch_cap as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn due_pending_jobs(&self, batch_cap: usize) -> Result<Vec<Job>, OrchestratorError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM execution_jobs j
            WHERE j.status = 'pending'
              AND NOT EXISTS (
                  SELECT 1 FROM jsonb_array_elements_text(j.dependencies) AS dep(id)
                  WHERE NOT EXISTS (
                      SELECT 1 FROM execution_jobs d
                      WHERE d.execution_id = j.execution_id
                        AND d.plan_local_id = dep.id
                        AND d.status = 'completed'
                  )
              )
            ORDER BY j.insertion_order
            FOR UPDATE SKIP LOCKED
            LIMIT $1
            "#
        ))
        .bind(batch_cap as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn apply_job_terminal(&self, write: JobTerminalWrite) -> Result<JobTerminalResult, OrchestratorError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM execution_jobs WHERE record_id = $1 FOR UPDATE"
        ))
        .bind(write.job_record_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(OrchestratorError::JobNotFound(write.job_record_id))?;
        let current = Job::try_from(current)?;

        if current.status.is_terminal() {
            tx.commit().await?;
            return Ok(JobTerminalResult {
                applied: false,
                job: current,
                ledger_entry: None,
            });
        }

        let (status, result_json, error) = match &write.outcome {
            JobOutcome::Completed(result) => ("completed", Some(serde_json::to_value(result).unwrap()), None),
            JobOutcome::Failed(msg) => ("failed", None, Some(msg.clone())),
        };

        let updated = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE execution_jobs
            SET status = $2, result = $3, error = $4, completed_at = now()
            WHERE record_id = $1
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(write.job_record_id)
        .bind(status)
        .bind(result_json)
        .bind(error)
        .fetch_one(&mut *tx)
        .await?;
        let mut updated = Job::try_from(updated)?;

        let mut ledger_entry = None;
        if updated.status == JobStatus::Completed && !updated.action_logged {
            let execution_row = sqlx::query("SELECT tenant_id FROM executions WHERE id = $1 FOR UPDATE")
                .bind(updated.execution_id)
                .fetch_one(&mut *tx)
                .await?;
            let tenant_id: Uuid = execution_row.get("tenant_id");

            let limits_row = sqlx::query_as::<_, UsageLimitsRow>(
                r#"SELECT tenant_id, plan_kind, monthly_action_limit, unlimited, period_start,
                          period_end, actions_used_this_period, overage_actions_this_period,
                          overage_allowed, overage_price_per_action
                   FROM usage_limits WHERE tenant_id = $1 FOR UPDATE"#,
            )
            .bind(tenant_id)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(limits_row) = limits_row {
                let limits: UsageLimits = limits_row.try_into()?;
                let is_overage = crate::usage::is_next_action_overage(&limits);
                let cost = crate::usage::estimated_cost(&limits, is_overage);

                let entry = ActionLogEntry {
                    tenant_id,
                    execution_id: updated.execution_id,
                    job_record_id: updated.record_id,
                    action_kind: write.action_kind.clone(),
                    count: 1,
                    is_overage,
                    estimated_cost: cost,
                    logged_at: Utc::now(),
                };

                sqlx::query(
                    r#"
                    INSERT INTO action_logs
                        (id, tenant_id, execution_id, job_record_id, action_kind, count, is_overage, estimated_cost, logged_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(entry.tenant_id)
                .bind(entry.execution_id)
                .bind(entry.job_record_id)
                .bind(&entry.action_kind)
                .bind(entry.count)
                .bind(entry.is_overage)
                .bind(entry.estimated_cost)
                .bind(entry.logged_at)
                .execute(&mut *tx)
                .await?;

                if is_overage {
                    sqlx::query("UPDATE usage_limits SET overage_actions_this_period = overage_actions_this_period + 1 WHERE tenant_id = $1")
                        .bind(tenant_id)
                        .execute(&mut *tx)
                        .await?;
                } else {
                    sqlx::query("UPDATE usage_limits SET actions_used_this_period = actions_used_this_period + 1 WHERE tenant_id = $1")
                        .bind(tenant_id)
                        .execute(&mut *tx)
                        .await?;
                }

                ledger_entry = Some(entry);
            }

            sqlx::query("UPDATE execution_jobs SET action_logged = true WHERE record_id = $1")
                .bind(updated.record_id)
                .execute(&mut *tx)
                .await?;
            updated.action_logged = true;
        }

        tx.commit().await?;
        Ok(JobTerminalResult {
            applied: true,
            job: updated,
            ledger_entry,
        })
    }

    async fn cancel_jobs(&self, execution_id: Uuid, plan_local_ids: &[String], reason: &str) -> Result<(), OrchestratorError> {
        let ids = serde_json::to_value(plan_local_ids).unwrap();
        sqlx::query(
            r#"
            UPDATE execution_jobs
            SET status = 'cancelled', error = $3, completed_at = now()
            WHERE execution_id = $1
              AND plan_local_id IN (SELECT value #>> '{}' FROM jsonb_array_elements($2::jsonb))
              AND status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(execution_id)
        .bind(ids)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_execution_status(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        result: Option<JobResult>,
        error: Option<String>,
    ) -> Result<(), OrchestratorError> {
        sqlx::query(
            r#"
            UPDATE executions
            SET status = $2, result = $3, error = $4,
                completed_at = CASE WHEN $5 THEN now() ELSE completed_at END
            WHERE id = $1
            "#,
        )
        .bind(execution_id)
        .bind(status.as_str())
        .bind(result.map(|r| serde_json::to_value(r).unwrap()))
        .bind(error)
        .bind(status.is_terminal())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_webhook_pending(&self, execution_id: Uuid) -> Result<(), OrchestratorError> {
        sqlx::query(
            r#"
            UPDATE executions SET webhook_pending = true
            WHERE id = $1 AND webhook_url IS NOT NULL
            "#,
        )
        .bind(execution_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn due_webhook_deliveries(&self, now: DateTime<Utc>, max_attempts: u32) -> Result<Vec<Execution>, OrchestratorError> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS} FROM executions
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND webhook_url IS NOT NULL
              AND webhook_pending = true
              AND webhook_delivered_at IS NULL
              AND webhook_delivery_attempts < $1
              AND (webhook_next_retry_at IS NULL OR webhook_next_retry_at <= $2)
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .bind(max_attempts as i32)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Execution::try_from).collect()
    }

    async fn record_webhook_attempt(
        &self,
        execution_id: Uuid,
        delivered: bool,
        error: Option<String>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), OrchestratorError> {
        sqlx::query(
            r#"
            UPDATE executions
            SET webhook_delivery_attempts = webhook_delivery_attempts + 1,
                webhook_last_error = $2,
                webhook_delivered_at = CASE WHEN $3 THEN now() ELSE webhook_delivered_at END,
                webhook_pending = CASE WHEN $3 THEN false ELSE webhook_pending END,
                webhook_next_retry_at = CASE WHEN $3 THEN NULL ELSE $4 END
            WHERE id = $1
            "#,
        )
        .bind(execution_id)
        .bind(error)
        .bind(delivered)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_usage_limits(&self, tenant_id: Uuid) -> Result<Option<UsageLimits>, OrchestratorError> {
        let row = sqlx::query_as::<_, UsageLimitsRow>(
            r#"SELECT tenant_id, plan_kind, monthly_action_limit, unlimited, period_start,
                      period_end, actions_used_this_period, overage_actions_this_period,
                      overage_allowed, overage_price_per_action
               FROM usage_limits WHERE tenant_id = $1"#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UsageLimits::try_from).transpose()
    }

    async fn reset_expired_free_plan_periods(&self, now: DateTime<Utc>) -> Result<u64, OrchestratorError> {
        let period_end = now + chrono::Duration::days(30);
        let result = sqlx::query(
            r#"
            UPDATE usage_limits
            SET actions_used_this_period = 0,
                overage_actions_this_period = 0,
                period_start = $1,
                period_end = $2
            WHERE plan_kind = 'free' AND period_end <= $1
            "#,
        )
        .bind(now)
        .bind(period_end)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn find_api_key_by_hash(&self, hash: &str) -> Result<Option<ApiKeyRecord>, OrchestratorError> {
        let row = sqlx::query("SELECT id, tenant_id, hash, display_prefix, revoked FROM api_keys WHERE hash = $1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| ApiKeyRecord {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            hash: row.get("hash"),
            display_prefix: row.get("display_prefix"),
            revoked: row.get("revoked"),
        }))
    }

    async fn upsert_provider_api_key(&self, tenant_id: Uuid, provider: &str, ciphertext: &str) -> Result<(), OrchestratorError> {
        sqlx::query(
            r#"
            INSERT INTO provider_api_keys (id, tenant_id, provider, ciphertext, created_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (tenant_id, provider) DO UPDATE SET ciphertext = EXCLUDED.ciphertext
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(provider)
        .bind(ciphertext)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_provider_api_key(&self, tenant_id: Uuid, provider: &str) -> Result<Option<String>, OrchestratorError> {
        let row = sqlx::query("SELECT ciphertext FROM provider_api_keys WHERE tenant_id = $1 AND provider = $2")
            .bind(tenant_id)
            .bind(provider)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("ciphertext")))
    }
}

#[derive(FromRow)]
struct UsageLimitsRow {
    tenant_id: Uuid,
    plan_kind: String,
    monthly_action_limit: i64,
    unlimited: bool,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    actions_used_this_period: i64,
    overage_actions_this_period: i64,
    overage_allowed: bool,
    overage_price_per_action: f64,
}

impl TryFrom<UsageLimitsRow> for UsageLimits {
    type Error = OrchestratorError;

    fn try_from(row: UsageLimitsRow) -> Result<Self, Self::Error> {
        let plan_kind = match row.plan_kind.as_str() {
            "free" => PlanKind::Free,
            "pro" => PlanKind::Pro,
            "custom" => PlanKind::Custom,
            other => {
                return Err(OrchestratorError::Database(sqlx::Error::Decode(
                    format!("unknown plan kind: {other}").into(),
                )))
            }
        };

        Ok(UsageLimits {
            tenant_id: row.tenant_id,
            plan_kind,
            monthly_action_limit: row.monthly_action_limit,
            unlimited: row.unlimited,
            period_start: row.period_start,
            period_end: row.period_end,
            actions_used_this_period: row.actions_used_this_period,
            overage_actions_this_period: row.overage_actions_this_period,
            overage_allowed: row.overage_allowed,
            overage_price_per_action: row.overage_price_per_action,
        })
    }
}
