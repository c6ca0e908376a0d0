use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Errors raised while validating or canonicalizing a submitted plan.
#[derive(Debug, thiserror::Error)]
pub enum PlanValidationError {
    #[error("duplicate job id in plan: {0}")]
    DuplicateJobId(String),

    #[error("job {0} depends on unknown job {1}")]
    UnknownDependency(String, String),

    #[error("dependency cycle detected, involving job {0}")]
    Cycle(String),

    #[error("job {0} has unsupported operation kind {1}")]
    UnsupportedOperation(String, String),

    #[error("job {0} references unresolved param {1}")]
    UnresolvedParamReference(String, String),

    #[error("plan has no jobs")]
    EmptyPlan,
}

/// Errors raised while resolving a job's params against upstream outputs.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("referenced job {0} has not completed")]
    UpstreamNotCompleted(String),

    #[error("referenced job {0} produced no outputs")]
    EmptyUpstreamOutput(String),

    #[error("reference {0} does not resolve to a job in this execution")]
    UnknownReference(String),
}

/// Errors surfaced by a provider adapter.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("no adapter registered for operation {operation:?} / model {model_id:?}")]
    NoAdapter {
        operation: String,
        model_id: Option<String>,
    },

    #[error("provider request failed: {0}")]
    RequestFailed(String),

    #[error("provider returned malformed status payload: {0}")]
    MalformedPayload(String),

    #[error("requested wait strategy unsupported by adapter")]
    UnsupportedWaitStrategy,

    #[error("failed to decrypt provider credential: {0}")]
    DecryptionFailed(String),
}

/// Errors raised by usage accounting.
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("tenant {tenant} is at its monthly action cap and overage is not allowed; resets {period_end}")]
    QuotaExceeded { tenant: Uuid, period_end: DateTime<Utc> },

    #[error("no usage limits row for tenant {0}")]
    UnknownTenant(Uuid),
}

/// Top-level error for orchestrator operations (plan admission, job terminal
/// handling, cancellation). Database failures propagate through `#[from]`
/// the same way `WorkflowError` wraps `sqlx::Error` elsewhere in the corpus.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error(transparent)]
    Plan(#[from] PlanValidationError),

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors raised while loading process configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(String),

    #[error("environment variable {0} has an invalid value: {1}")]
    Invalid(String, String),
}
