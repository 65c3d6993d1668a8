use thiserror::Error;

/// Convenience alias for Results across the fleet core.
pub type Result<T> = std::result::Result<T, FleetError>;

/// Error taxonomy for the fleet core.
///
/// Several concrete variants share a [`kind`](FleetError::kind) on purpose:
/// the dispatcher's retry rule table and the event bus's severity mapping
/// are keyed on [`ErrorKind`], not on the enum discriminant.
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("timeout: {message}")]
    Timeout { message: String },

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("memory store I/O error: {0}")]
    Storage(String),

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("agent error: {message}")]
    Agent { message: String },

    #[error("task execution error: {task_id} - {message}")]
    TaskExecution { task_id: String, message: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("queue is full")]
    QueueFull,

    #[error("unauthorized")]
    Unauthorized,
}

/// Coarse-grained error kind used by the dispatcher's retry rule table and
/// the event bus's severity mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    Validation,
    Timeout,
    TransientNetwork,
    Storage,
    DependencyUnavailable,
    NotFound,
    Cancelled,
    Internal,
}

impl FleetError {
    /// Classifies this error for retry-policy and severity purposes.
    ///
    /// An unclassified error is treated as `internal` and the owning agent
    /// transitions to `failed`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FleetError::Validation(_) => ErrorKind::Validation,
            FleetError::Timeout { .. } => ErrorKind::Timeout,
            FleetError::TransientNetwork(_) => ErrorKind::TransientNetwork,
            FleetError::Storage(_) => ErrorKind::Storage,
            FleetError::DependencyUnavailable(_) => ErrorKind::DependencyUnavailable,
            FleetError::NotFound(_) => ErrorKind::NotFound,
            FleetError::Cancelled => ErrorKind::Cancelled,
            FleetError::Agent { .. }
            | FleetError::TaskExecution { .. }
            | FleetError::Configuration(_)
            | FleetError::Serialization(_)
            | FleetError::ConfigLoad(_)
            | FleetError::QueueFull
            | FleetError::Unauthorized
            | FleetError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// `true` for kinds retryable-by-default, before the retry rule table's
    /// explicit per-kind overrides are consulted.
    pub fn retryable_by_default(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Timeout | ErrorKind::TransientNetwork | ErrorKind::DependencyUnavailable
        )
    }
}
