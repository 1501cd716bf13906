//! Activity types and activity tasks
//!
//! An [`ActivityType`] is registered once and looked up by `(name, version)`.
//! An [`ActivityTask`] is one scheduled instance of a type, owned by exactly
//! one execution and routed through exactly one task list.

use crate::{
    ActivityId, ConductorError, ConductorResult, ExecutionId, TaskKey, TaskToken, TimeoutPolicy,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Activity Type ────────────────────────────────────────────────────

/// Lookup key of a registered activity type
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityTypeKey {
    pub name: String,
    pub version: String,
}

impl ActivityTypeKey {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ActivityTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

/// A registered, immutable unit of externally executed work
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityType {
    pub name: String,
    pub version: String,
    /// Default task list tasks of this type are routed to
    pub task_list: String,
    /// Default deadlines; a schedule decision may override any of them
    #[serde(default)]
    pub timeouts: TimeoutPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ActivityType {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        task_list: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            task_list: task_list.into(),
            timeouts: TimeoutPolicy::unbounded(),
            description: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn key(&self) -> ActivityTypeKey {
        ActivityTypeKey::new(self.name.clone(), self.version.clone())
    }

    pub fn validate(&self) -> ConductorResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConductorError::InvalidDefinition(
                "activity type requires a name".to_string(),
            ));
        }
        if self.version.trim().is_empty() {
            return Err(ConductorError::InvalidDefinition(format!(
                "activity type '{}' requires a version",
                self.name
            )));
        }
        if self.task_list.trim().is_empty() {
            return Err(ConductorError::InvalidDefinition(format!(
                "activity type '{}' requires a task list",
                self.name
            )));
        }
        self.timeouts.validate()
    }
}

// ── Activity Task ────────────────────────────────────────────────────

/// Lifecycle state of an activity task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityTaskState {
    Scheduled,
    Started,
    Completed,
    Failed,
    TimedOut,
    Canceled,
}

impl ActivityTaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActivityTaskState::Completed
                | ActivityTaskState::Failed
                | ActivityTaskState::TimedOut
                | ActivityTaskState::Canceled
        )
    }
}

impl fmt::Display for ActivityTaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivityTaskState::Scheduled => "scheduled",
            ActivityTaskState::Started => "started",
            ActivityTaskState::Completed => "completed",
            ActivityTaskState::Failed => "failed",
            ActivityTaskState::TimedOut => "timed_out",
            ActivityTaskState::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// One scheduled instance of an activity type
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActivityTask {
    pub activity_id: ActivityId,
    pub execution_id: ExecutionId,
    pub activity_type: ActivityTypeKey,
    pub task_list: String,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
    /// Effective deadlines after per-decision overrides
    pub timeouts: TimeoutPolicy,
    pub state: ActivityTaskState,
    /// Present only while the task is `Started`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_token: Option<TaskToken>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Details carried by the most recent heartbeat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_details: Option<serde_json::Value>,
    #[serde(default)]
    pub cancel_requested: bool,
}

impl ActivityTask {
    pub fn new(
        activity_id: ActivityId,
        execution_id: ExecutionId,
        activity_type: ActivityTypeKey,
        task_list: impl Into<String>,
        input: serde_json::Value,
        timeouts: TimeoutPolicy,
    ) -> Self {
        Self {
            activity_id,
            execution_id,
            activity_type,
            task_list: task_list.into(),
            input,
            control: None,
            timeouts,
            state: ActivityTaskState::Scheduled,
            task_token: None,
            scheduled_at: Utc::now(),
            started_at: None,
            closed_at: None,
            last_heartbeat_at: None,
            heartbeat_details: None,
            cancel_requested: false,
        }
    }

    pub fn with_control(mut self, control: Option<String>) -> Self {
        self.control = control;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.execution_id.clone(), self.activity_id.clone())
    }

    /// Whether `token` is the live capability for this task
    pub fn accepts(&self, token: &TaskToken) -> bool {
        self.state == ActivityTaskState::Started && self.task_token.as_ref() == Some(token)
    }
}

/// Acknowledgement of an accepted heartbeat
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    /// Set once cancellation of the task has been requested
    pub cancel_requested: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Timeout;

    #[test]
    fn test_activity_type_key_display() {
        let ty = ActivityType::new("load-user", "0.1.1", "users");
        assert_eq!(ty.key().to_string(), "load-user/0.1.1");
    }

    #[test]
    fn test_activity_type_validation() {
        assert!(ActivityType::new("load-user", "0.1.1", "users")
            .validate()
            .is_ok());
        assert!(ActivityType::new("", "0.1.1", "users").validate().is_err());
        assert!(ActivityType::new("load-user", "", "users")
            .validate()
            .is_err());
        assert!(ActivityType::new("load-user", "0.1.1", " ")
            .validate()
            .is_err());
    }

    #[test]
    fn test_activity_type_from_declaration() {
        let ty: ActivityType = serde_json::from_value(serde_json::json!({
            "name": "load-user",
            "version": "0.1.1",
            "task_list": "test-tasklist-worker",
            "timeouts": {
                "heartbeat": "15",
                "schedule_to_close": "NONE",
                "schedule_to_start": "NONE",
                "start_to_close": "10"
            }
        }))
        .unwrap();

        assert_eq!(ty.timeouts.heartbeat, Timeout::secs(15));
        assert!(ty.timeouts.schedule_to_close.is_unbounded());
        assert!(ty.validate().is_ok());
    }

    #[test]
    fn test_task_token_acceptance() {
        let mut task = ActivityTask::new(
            ActivityId::generate(),
            ExecutionId::generate(),
            ActivityTypeKey::new("load-user", "0.1.1"),
            "users",
            serde_json::json!({}),
            TimeoutPolicy::unbounded(),
        );
        let token = TaskToken::issue();
        assert!(!task.accepts(&token));

        task.state = ActivityTaskState::Started;
        task.task_token = Some(token);
        assert!(task.accepts(&token));
        assert!(!task.accepts(&TaskToken::issue()));

        task.state = ActivityTaskState::Completed;
        assert!(!task.accepts(&token));
        assert!(task.is_terminal());
    }
}
