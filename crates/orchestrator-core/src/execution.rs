//! Execution record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::JobResult;
use crate::plan::ExecutionPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// The submitter's completion-webhook descriptor (URL + optional shared secret).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDescriptor {
    pub url: String,
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub plan: ExecutionPlan,
    /// The plan-local id of the canonical plan's designated result job,
    /// decided once at admission time so finalization never has to re-run
    /// the tiebreak against possibly-cancelled jobs.
    pub result_job_plan_local_id: String,
    pub status: ExecutionStatus,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub webhook: Option<WebhookDescriptor>,

    pub webhook_delivery_attempts: u32,
    pub webhook_last_error: Option<String>,
    pub webhook_delivered_at: Option<DateTime<Utc>>,
    /// Set when the execution becomes terminal and a webhook is configured;
    /// cleared once `webhook_delivered_at` is set. Drives the sweeper's
    /// selection query without scanning every terminal execution for a
    /// webhook that was never registered.
    pub webhook_pending: bool,
    /// Earliest time the sweeper may attempt delivery again, set from the
    /// attempt-indexed backoff after every failed POST (30 s × 2^attempts,
    /// capped). `None` means due immediately (never attempted yet).
    pub webhook_next_retry_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn new(
        tenant_id: Uuid,
        plan: ExecutionPlan,
        result_job_plan_local_id: String,
        webhook: Option<WebhookDescriptor>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            plan,
            result_job_plan_local_id,
            status: ExecutionStatus::Pending,
            result: None,
            error: None,
            webhook,
            webhook_delivery_attempts: 0,
            webhook_last_error: None,
            webhook_delivered_at: None,
            webhook_pending: false,
            webhook_next_retry_at: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}
