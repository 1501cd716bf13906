//! Activity bodies and the context they run with

use async_trait::async_trait;
use conductor_types::{ActivityId, ActivityTask};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// How an activity body can end without a result
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActivityError {
    #[error("{reason}")]
    Failed {
        reason: String,
        details: Option<serde_json::Value>,
    },

    /// The body stopped early after cancellation was requested
    #[error("activity canceled")]
    Canceled { details: Option<serde_json::Value> },
}

impl ActivityError {
    pub fn failed(reason: impl Into<String>) -> Self {
        ActivityError::Failed {
            reason: reason.into(),
            details: None,
        }
    }

    pub fn canceled() -> Self {
        ActivityError::Canceled { details: None }
    }

    pub fn with_details(self, details: serde_json::Value) -> Self {
        match self {
            ActivityError::Failed { reason, .. } => ActivityError::Failed {
                reason,
                details: Some(details),
            },
            ActivityError::Canceled { .. } => ActivityError::Canceled {
                details: Some(details),
            },
        }
    }
}

impl From<serde_json::Error> for ActivityError {
    fn from(e: serde_json::Error) -> Self {
        ActivityError::failed(format!("invalid activity payload: {}", e))
    }
}

/// Per-task handle passed to an activity body
#[derive(Clone, Debug)]
pub struct ActivityContext {
    task: Arc<ActivityTask>,
    progress: Arc<Mutex<Option<serde_json::Value>>>,
    cancel: watch::Receiver<bool>,
}

impl ActivityContext {
    pub(crate) fn new(
        task: Arc<ActivityTask>,
        progress: Arc<Mutex<Option<serde_json::Value>>>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            task,
            progress,
            cancel,
        }
    }

    pub fn task(&self) -> &ActivityTask {
        &self.task
    }

    pub fn activity_id(&self) -> &ActivityId {
        &self.task.activity_id
    }

    /// Details sent with the next heartbeat
    pub fn record_progress(&self, details: serde_json::Value) {
        *self.progress.lock() = Some(details);
    }

    pub fn is_cancel_requested(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once cancellation is requested or the task stops accepting
    /// heartbeats
    pub async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        // A closed channel means the heartbeat sender is gone; wait forever
        if cancel.wait_for(|requested| *requested).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// The body of an activity type
#[async_trait]
pub trait Activity: Send + Sync {
    async fn execute(
        &self,
        ctx: ActivityContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ActivityError>;
}

/// Adapter turning an async closure into an [`Activity`]
pub struct FnActivity<F>(F);

/// Wrap an async closure as an activity body
pub fn activity_fn<F, Fut>(f: F) -> FnActivity<F>
where
    F: Fn(ActivityContext, serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, ActivityError>> + Send,
{
    FnActivity(f)
}

#[async_trait]
impl<F, Fut> Activity for FnActivity<F>
where
    F: Fn(ActivityContext, serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, ActivityError>> + Send,
{
    async fn execute(
        &self,
        ctx: ActivityContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ActivityError> {
        (self.0)(ctx, input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::{ActivityTypeKey, ExecutionId, TimeoutPolicy};

    fn context() -> (ActivityContext, watch::Sender<bool>) {
        let task = ActivityTask::new(
            ActivityId::new("a1"),
            ExecutionId::generate(),
            ActivityTypeKey::new("load-user", "0.1.0"),
            "users",
            serde_json::json!({"userId": "abc"}),
            TimeoutPolicy::unbounded(),
        );
        let (tx, rx) = watch::channel(false);
        let ctx = ActivityContext::new(Arc::new(task), Arc::new(Mutex::new(None)), rx);
        (ctx, tx)
    }

    #[test]
    fn test_error_details() {
        let err = ActivityError::failed("user not found").with_details(serde_json::json!(404));
        assert_eq!(err.to_string(), "user not found");
        assert_eq!(
            err,
            ActivityError::Failed {
                reason: "user not found".to_string(),
                details: Some(serde_json::json!(404)),
            }
        );
    }

    #[tokio::test]
    async fn test_cancellation_is_observed() {
        let (ctx, tx) = context();
        assert!(!ctx.is_cancel_requested());
        tx.send_replace(true);
        assert!(ctx.is_cancel_requested());
        ctx.cancelled().await;
    }

    #[tokio::test]
    async fn test_fn_activity_runs_closure() {
        let (ctx, _tx) = context();
        let activity = activity_fn(|ctx: ActivityContext, input: serde_json::Value| async move {
            ctx.record_progress(serde_json::json!({"percentComplete": 50}));
            Ok::<_, ActivityError>(serde_json::json!({"userId": input["userId"], "name": "Fred Flintstone"}))
        });

        let result = activity.execute(ctx.clone(), ctx.task().input.clone()).await.unwrap();
        assert_eq!(result["name"], "Fred Flintstone");
        assert_eq!(*ctx.progress.lock(), Some(serde_json::json!({"percentComplete": 50})));
    }
}
