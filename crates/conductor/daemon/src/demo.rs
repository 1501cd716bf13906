//! User onboarding workflow hosted by the daemon

use conductor_engine::{Conductor, DeciderDefinition, StateDefinition};
use conductor_types::{
    ActivityType, ConductorResult, EventPayload, ScheduleActivity, Timeout, TimeoutPolicy,
    WorkflowEventType, WorkflowType,
};
use conductor_worker::{activity_fn, ActivityContext, ActivityError, ActivityWorker, WorkerConfig};
use serde_json::{json, Value};
use std::sync::Arc;

pub const LOAD_USER: &str = "load-user";
pub const VERSION: &str = "0.1.0";

pub fn onboarding() -> WorkflowType {
    WorkflowType::new("user-onboarding", VERSION)
}

/// Load the user named by `userId`, then close with the accumulated data
pub fn onboarding_decider() -> DeciderDefinition {
    let mut loading = StateDefinition::new().on(WorkflowEventType::ActivityCompleted, |ctx, event| {
        ctx.set("user", event.result().cloned().unwrap_or_default());
        let data = ctx.data().clone();
        ctx.complete(data);
        Ok(())
    });
    for outcome in [
        WorkflowEventType::ActivityFailed,
        WorkflowEventType::ActivityTimedOut,
        WorkflowEventType::ActivityCanceled,
    ] {
        loading = loading.on(outcome, |ctx, event| {
            let payload = &event.payload;
            let reason = match (payload, payload.timeout_error()) {
                (EventPayload::ActivityFailed { reason, .. }, _) => reason.clone(),
                (_, Some(timeout)) => format!("{} loading user", timeout),
                (other, None) => format!("{} loading user", other.event_type()),
            };
            ctx.fail(reason);
            Ok(())
        });
    }

    DeciderDefinition::new(onboarding(), "start")
        .state(
            "start",
            StateDefinition::new().on(WorkflowEventType::ExecutionStarted, |ctx, event| {
                let input = event.input().cloned().unwrap_or_default();
                match input.get("userId") {
                    Some(user_id) => {
                        ctx.set("userId", user_id.clone());
                        ctx.schedule_activity(ScheduleActivity::new(
                            LOAD_USER,
                            json!({ "userId": user_id }),
                        ));
                        ctx.transition("loading-user");
                    }
                    None => ctx.fail("Missing userId"),
                }
                Ok(())
            }),
        )
        .state("loading-user", loading)
}

pub fn load_user_type(task_list: &str) -> ActivityType {
    ActivityType::new(LOAD_USER, VERSION, task_list).with_timeouts(
        TimeoutPolicy::unbounded()
            .with_start_to_close(Timeout::secs(10))
            .with_heartbeat(Timeout::secs(15)),
    )
}

async fn load_user(ctx: ActivityContext, input: Value) -> Result<Value, ActivityError> {
    ctx.record_progress(json!({ "percentComplete": 50 }));
    Ok(json!({
        "userId": input["userId"],
        "name": "Fred Flintstone",
        "email": "fred@bedrock.com",
        "status": 200,
    }))
}

/// Register the onboarding decider and its activity type
pub fn register(conductor: &Conductor, task_list: &str) -> ConductorResult<()> {
    conductor.register_activity_type(load_user_type(task_list))?;
    conductor.register_decider(onboarding_decider())
}

pub fn worker(conductor: Arc<Conductor>, config: WorkerConfig) -> ActivityWorker {
    ActivityWorker::new(conductor, config).register(LOAD_USER, VERSION, activity_fn(load_user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_engine::EngineConfig;
    use conductor_types::ExecutionStatus;

    #[tokio::test(start_paused = true)]
    async fn test_onboarding_loads_user() {
        let conductor = Conductor::new(EngineConfig::default());
        register(&conductor, "users").unwrap();
        let worker = worker(conductor.clone(), WorkerConfig::new("users")).start();

        let id = conductor
            .start_execution(&onboarding(), json!({"userId": "fred"}))
            .unwrap();
        let execution = conductor.wait_for_close(&id).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        let result = execution.result.unwrap();
        assert_eq!(result["userId"], "fred");
        assert_eq!(result["user"]["email"], "fred@bedrock.com");
        worker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_onboarding_without_user_fails() {
        let conductor = Conductor::new(EngineConfig::default());
        register(&conductor, "users").unwrap();

        let id = conductor.start_execution(&onboarding(), json!({})).unwrap();
        let execution = conductor.wait_for_close(&id).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.failure.as_deref(), Some("Missing userId"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_load_user_times_out() {
        let conductor = Conductor::new(EngineConfig::default());
        register(&conductor, "users").unwrap();

        let id = conductor
            .start_execution(&onboarding(), json!({"userId": "fred"}))
            .unwrap();
        let _claimed = conductor.poll("users", "stalled-worker").await.unwrap();
        let execution = conductor.wait_for_close(&id).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(
            execution.failure.as_deref(),
            Some("Timeout exceeded: start_to_close loading user")
        );
    }
}
