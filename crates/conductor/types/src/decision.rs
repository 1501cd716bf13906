//! Decisions: the output of a decider's state handlers
//!
//! A decision is never persisted on its own. The engine translates each one
//! into a history event plus a dispatcher action.

use crate::{ActivityId, ActivityTypeKey, Timeout, TimeoutKind, TimeoutOverrides};
use serde::{Deserialize, Serialize};

/// Request to schedule one activity task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleActivity {
    pub activity_id: ActivityId,
    pub name: String,
    /// `None` resolves to the engine's default activity version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub input: serde_json::Value,
    /// Opaque data echoed back on the `ActivityScheduled` event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
    /// Overrides the activity type's default task list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_list: Option<String>,
    #[serde(default, skip_serializing_if = "TimeoutOverrides::is_empty")]
    pub timeouts: TimeoutOverrides,
}

impl ScheduleActivity {
    pub fn new(name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            activity_id: ActivityId::generate(),
            name: name.into(),
            version: None,
            input,
            control: None,
            task_list: None,
            timeouts: TimeoutOverrides::default(),
        }
    }

    /// Use a caller-chosen id. Ids only need to be unique within one execution.
    pub fn with_id(mut self, activity_id: impl Into<String>) -> Self {
        self.activity_id = ActivityId::new(activity_id);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_control(mut self, control: impl Into<String>) -> Self {
        self.control = Some(control.into());
        self
    }

    pub fn on_task_list(mut self, task_list: impl Into<String>) -> Self {
        self.task_list = Some(task_list.into());
        self
    }

    pub fn with_timeout(mut self, kind: TimeoutKind, timeout: Timeout) -> Self {
        self.timeouts.set(kind, timeout);
        self
    }

    /// Resolve the activity type key, filling in the default version
    pub fn key(&self, default_version: &str) -> ActivityTypeKey {
        ActivityTypeKey::new(
            self.name.clone(),
            self.version.as_deref().unwrap_or(default_version),
        )
    }
}

/// What a decider asks the engine to do
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    ScheduleActivityTask(ScheduleActivity),
    RequestCancelActivityTask { activity_id: ActivityId },
    CompleteExecution { result: serde_json::Value },
    FailExecution { reason: String },
}

impl Decision {
    pub fn schedule(activity: ScheduleActivity) -> Self {
        Decision::ScheduleActivityTask(activity)
    }

    pub fn complete(result: serde_json::Value) -> Self {
        Decision::CompleteExecution { result }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Decision::FailExecution {
            reason: reason.into(),
        }
    }

    /// Whether this decision closes the execution
    pub fn is_close(&self) -> bool {
        matches!(
            self,
            Decision::CompleteExecution { .. } | Decision::FailExecution { .. }
        )
    }
}
