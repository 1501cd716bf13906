//! Error types for the orchestration engine

use crate::{ActivityTypeKey, ExecutionId, TaskToken, TimeoutKind, WorkflowType};

/// Errors that can occur in Conductor operations
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    #[error("Unknown task list: {0}")]
    UnknownTaskList(String),

    #[error("Unknown activity type: {0}")]
    UnknownActivityType(ActivityTypeKey),

    /// The token is stale, unknown, or belongs to a task that already closed
    #[error("Invalid task token: {0}")]
    InvalidTaskToken(TaskToken),

    #[error("Execution closed: {0}")]
    ExecutionClosed(ExecutionId),

    #[error("Decision validation failed: {0}")]
    DecisionValidation(String),

    /// A deadline class fired. Surfaced to deciders as an
    /// `ActivityTimedOut` event, see [`crate::EventPayload::timeout_error`].
    #[error("Timeout exceeded: {0}")]
    TimeoutExceeded(TimeoutKind),

    #[error("Unknown workflow type: {0}")]
    UnknownWorkflowType(WorkflowType),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("Invalid timeout policy: {0}")]
    InvalidTimeoutPolicy(String),

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("Decider failed: {0}")]
    DeciderFailed(String),

    #[error("Engine is shutting down")]
    ShuttingDown,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ConductorError {
    fn from(e: serde_json::Error) -> Self {
        ConductorError::Serialization(e.to_string())
    }
}

/// Result type alias for Conductor operations
pub type ConductorResult<T> = Result<T, ConductorError>;
