//! Identifiers for executions, activities and task tokens

use serde::{Deserialize, Serialize};
use std::fmt;

// ── Execution Identifier ─────────────────────────────────────────────

/// Unique identifier of a workflow execution
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Activity Identifier ──────────────────────────────────────────────

/// Identifier of one scheduled activity, assigned when the decision is built
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityId(pub String);

impl ActivityId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Task Key ─────────────────────────────────────────────────────────

/// Engine-wide identity of an activity task.
///
/// Activity ids are chosen by deciders and are only unique within their
/// execution, so the engine keys tasks by both.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub execution_id: ExecutionId,
    pub activity_id: ActivityId,
}

impl TaskKey {
    pub fn new(execution_id: ExecutionId, activity_id: ActivityId) -> Self {
        Self {
            execution_id,
            activity_id,
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.execution_id, self.activity_id)
    }
}

// ── Task Token ───────────────────────────────────────────────────────

/// Single-use capability granted to the worker that claims a task.
///
/// A fresh token is issued on every claim. Once the task leaves `Started`
/// the token is permanently invalid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskToken(pub uuid::Uuid);

impl TaskToken {
    pub fn issue() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for TaskToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Workflow Type ────────────────────────────────────────────────────

/// Name and version of a workflow, the key a decider definition is registered under
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowType {
    pub name: String,
    pub version: String,
}

impl WorkflowType {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}
