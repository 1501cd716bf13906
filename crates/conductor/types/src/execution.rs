//! Workflow executions: identity, current state, data bag and history

use crate::{EventPayload, ExecutionId, WorkflowEvent, WorkflowType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Open/closed status of an execution. Closed statuses are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Open,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_closed(&self) -> bool {
        !matches!(self, ExecutionStatus::Open)
    }
}

/// One run of a workflow type
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: ExecutionId,
    pub workflow_type: WorkflowType,
    /// Name of the decider state the execution is in
    pub state: String,
    /// Workflow-local data, mutated only by the execution's decider
    pub data: serde_json::Value,
    pub history: Vec<WorkflowEvent>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl WorkflowExecution {
    pub fn new(id: ExecutionId, workflow_type: WorkflowType, state: impl Into<String>) -> Self {
        Self {
            id,
            workflow_type,
            state: state.into(),
            data: serde_json::Value::Null,
            history: Vec::new(),
            status: ExecutionStatus::Open,
            started_at: Utc::now(),
            closed_at: None,
            result: None,
            failure: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status.is_closed()
    }

    pub fn last_sequence_id(&self) -> u64 {
        self.history.last().map(|e| e.sequence_id).unwrap_or(0)
    }

    /// Append an event with the next sequence id
    pub fn append(&mut self, payload: EventPayload) -> &WorkflowEvent {
        let sequence_id = self.last_sequence_id() + 1;
        self.history.push(WorkflowEvent::new(sequence_id, payload));
        &self.history[self.history.len() - 1]
    }

    /// Record `ExecutionCompleted` and close
    pub fn close_completed(&mut self, result: serde_json::Value) {
        self.append(EventPayload::ExecutionCompleted {
            result: result.clone(),
        });
        self.status = ExecutionStatus::Completed;
        self.result = Some(result);
        self.closed_at = Some(Utc::now());
    }

    /// Record `ExecutionFailed` and close
    pub fn close_failed(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.append(EventPayload::ExecutionFailed {
            reason: reason.clone(),
        });
        self.status = ExecutionStatus::Failed;
        self.failure = Some(reason);
        self.closed_at = Some(Utc::now());
    }
}
