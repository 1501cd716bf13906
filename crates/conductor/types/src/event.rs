//! Workflow history events
//!
//! Events are appended to an execution's history in the order they are
//! applied and are immutable afterwards. Sequence ids start at 1 and
//! increase by one per appended event.

use crate::{ActivityId, ActivityTypeKey, ConductorError, TimeoutKind, WorkflowType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminant of a history event, used to index decider transition tables
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowEventType {
    ExecutionStarted,
    ActivityScheduled,
    ActivityCompleted,
    ActivityFailed,
    ActivityTimedOut,
    ActivityCanceled,
    ExecutionCompleted,
    ExecutionFailed,
}

impl fmt::Display for WorkflowEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Event body, one variant per [`WorkflowEventType`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    ExecutionStarted {
        workflow_type: WorkflowType,
        input: serde_json::Value,
    },
    ActivityScheduled {
        activity_id: ActivityId,
        activity_type: ActivityTypeKey,
        task_list: String,
        input: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        control: Option<String>,
    },
    ActivityCompleted {
        activity_id: ActivityId,
        result: serde_json::Value,
    },
    ActivityFailed {
        activity_id: ActivityId,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
    ActivityTimedOut {
        activity_id: ActivityId,
        timeout: TimeoutKind,
        /// Details of the last heartbeat received before the deadline
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
    ActivityCanceled {
        activity_id: ActivityId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
    ExecutionCompleted {
        result: serde_json::Value,
    },
    ExecutionFailed {
        reason: String,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> WorkflowEventType {
        match self {
            EventPayload::ExecutionStarted { .. } => WorkflowEventType::ExecutionStarted,
            EventPayload::ActivityScheduled { .. } => WorkflowEventType::ActivityScheduled,
            EventPayload::ActivityCompleted { .. } => WorkflowEventType::ActivityCompleted,
            EventPayload::ActivityFailed { .. } => WorkflowEventType::ActivityFailed,
            EventPayload::ActivityTimedOut { .. } => WorkflowEventType::ActivityTimedOut,
            EventPayload::ActivityCanceled { .. } => WorkflowEventType::ActivityCanceled,
            EventPayload::ExecutionCompleted { .. } => WorkflowEventType::ExecutionCompleted,
            EventPayload::ExecutionFailed { .. } => WorkflowEventType::ExecutionFailed,
        }
    }

    /// The activity a scheduling or outcome event refers to
    pub fn activity_id(&self) -> Option<&ActivityId> {
        match self {
            EventPayload::ActivityScheduled { activity_id, .. }
            | EventPayload::ActivityCompleted { activity_id, .. }
            | EventPayload::ActivityFailed { activity_id, .. }
            | EventPayload::ActivityTimedOut { activity_id, .. }
            | EventPayload::ActivityCanceled { activity_id, .. } => Some(activity_id),
            _ => None,
        }
    }

    /// Whether this event closes an activity task
    pub fn is_activity_outcome(&self) -> bool {
        matches!(
            self,
            EventPayload::ActivityCompleted { .. }
                | EventPayload::ActivityFailed { .. }
                | EventPayload::ActivityTimedOut { .. }
                | EventPayload::ActivityCanceled { .. }
        )
    }

    /// The error an `ActivityTimedOut` event stands for
    pub fn timeout_error(&self) -> Option<ConductorError> {
        match self {
            EventPayload::ActivityTimedOut { timeout, .. } => {
                Some(ConductorError::TimeoutExceeded(*timeout))
            }
            _ => None,
        }
    }

    /// Whether this event closes the execution
    pub fn is_execution_close(&self) -> bool {
        matches!(
            self,
            EventPayload::ExecutionCompleted { .. } | EventPayload::ExecutionFailed { .. }
        )
    }
}

/// An immutable entry of an execution's history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub sequence_id: u64,
    pub recorded_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl WorkflowEvent {
    pub fn new(sequence_id: u64, payload: EventPayload) -> Self {
        Self {
            sequence_id,
            recorded_at: Utc::now(),
            payload,
        }
    }

    pub fn event_type(&self) -> WorkflowEventType {
        self.payload.event_type()
    }

    pub fn activity_id(&self) -> Option<&ActivityId> {
        self.payload.activity_id()
    }

    /// Input of an `ExecutionStarted` event
    pub fn input(&self) -> Option<&serde_json::Value> {
        match &self.payload {
            EventPayload::ExecutionStarted { input, .. } => Some(input),
            _ => None,
        }
    }

    /// Result of an `ActivityCompleted` event
    pub fn result(&self) -> Option<&serde_json::Value> {
        match &self.payload {
            EventPayload::ActivityCompleted { result, .. } => Some(result),
            _ => None,
        }
    }
}
