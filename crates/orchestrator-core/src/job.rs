//! Job record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A job's lifecycle status. Transitions only ever move forward:
/// `Pending -> Processing -> (Waiting ->)? {Completed | Failed | Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(test, derive(Hash))]
pub enum JobStatus {
    Pending,
    Processing,
    Waiting,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "waiting" => Ok(Self::Waiting),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// How an async job's completion is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitStrategy {
    Webhook,
    Polling,
}

impl WaitStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Polling => "polling",
        }
    }
}

impl std::str::FromStr for WaitStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook" => Ok(Self::Webhook),
            "polling" => Ok(Self::Polling),
            other => Err(format!("unknown wait strategy: {other}")),
        }
    }
}

/// The kind of media a produced output represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    Video,
    Image,
    Audio,
}

/// One produced output of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutput {
    #[serde(rename = "type")]
    pub output_type: OutputType,
    pub url: String,
    pub mime_type: String,
}

/// The result of a successfully completed job: its ordered list of outputs.
/// The first element is the "primary output" substituted for `$jobId` /
/// `from-jobId` references.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobResult {
    pub outputs: Vec<JobOutput>,
}

/// One job in an execution's DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Globally unique, used in async webhook URLs.
    pub record_id: Uuid,
    pub execution_id: Uuid,
    /// The submitter-chosen id, unique within the execution, used for
    /// `dependsOn` references and `$jobId` substitution.
    pub plan_local_id: String,
    pub operation: String,
    pub params: serde_json::Value,
    pub dependencies: Vec<String>,
    pub status: JobStatus,
    pub result: Option<JobResult>,
    pub error: Option<String>,

    pub provider_job_id: Option<String>,
    pub wait_strategy: Option<WaitStrategy>,
    pub next_poll_at: Option<DateTime<Utc>>,
    pub poll_attempts: u32,

    /// At-most-once metering flag.
    pub action_logged: bool,

    /// Insertion order within the plan; used for the execution's
    /// "designated result job" tiebreak.
    pub insertion_order: i32,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        execution_id: Uuid,
        plan_local_id: String,
        operation: String,
        params: serde_json::Value,
        dependencies: Vec<String>,
        insertion_order: i32,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            execution_id,
            plan_local_id,
            operation,
            params,
            dependencies,
            status: JobStatus::Pending,
            result: None,
            error: None,
            provider_job_id: None,
            wait_strategy: None,
            next_poll_at: None,
            poll_attempts: 0,
            action_logged: false,
            insertion_order,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_ready(&self, completed: &std::collections::HashSet<String>) -> bool {
        self.status == JobStatus::Pending && self.dependencies.iter().all(|d| completed.contains(d))
    }
}
