//! The boundary activity workers talk to
//!
//! Workers only depend on [`ActivityService`], so the engine can sit in the
//! same process or behind any transport that implements it.

use crate::Conductor;
use async_trait::async_trait;
use conductor_types::{ActivityTask, ConductorResult, HeartbeatAck, TaskToken};

/// Worker-facing operations of the activity dispatcher
#[async_trait]
pub trait ActivityService: Send + Sync {
    /// Long-poll `task_list` and claim the next task
    async fn poll_activity_task(&self, task_list: &str, identity: &str)
        -> ConductorResult<ActivityTask>;

    async fn respond_completed(&self, token: TaskToken, result: serde_json::Value)
        -> ConductorResult<()>;

    async fn respond_failed(
        &self,
        token: TaskToken,
        reason: String,
        details: Option<serde_json::Value>,
    ) -> ConductorResult<()>;

    async fn respond_canceled(
        &self,
        token: TaskToken,
        details: Option<serde_json::Value>,
    ) -> ConductorResult<()>;

    async fn record_heartbeat(
        &self,
        token: TaskToken,
        details: Option<serde_json::Value>,
    ) -> ConductorResult<HeartbeatAck>;
}

#[async_trait]
impl ActivityService for Conductor {
    async fn poll_activity_task(
        &self,
        task_list: &str,
        identity: &str,
    ) -> ConductorResult<ActivityTask> {
        self.poll(task_list, identity).await
    }

    async fn respond_completed(
        &self,
        token: TaskToken,
        result: serde_json::Value,
    ) -> ConductorResult<()> {
        self.complete(token, result)
    }

    async fn respond_failed(
        &self,
        token: TaskToken,
        reason: String,
        details: Option<serde_json::Value>,
    ) -> ConductorResult<()> {
        self.fail(token, reason, details)
    }

    async fn respond_canceled(
        &self,
        token: TaskToken,
        details: Option<serde_json::Value>,
    ) -> ConductorResult<()> {
        self.cancel(token, details)
    }

    async fn record_heartbeat(
        &self,
        token: TaskToken,
        details: Option<serde_json::Value>,
    ) -> ConductorResult<HeartbeatAck> {
        self.heartbeat(token, details)
    }
}
