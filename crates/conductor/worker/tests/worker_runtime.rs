//! Activity workers running against an in-process Conductor

use conductor_engine::{Conductor, DeciderDefinition, EngineConfig, StateDefinition};
use conductor_types::{
    ActivityTaskState, ActivityType, EventPayload, ExecutionId, ExecutionStatus,
    ScheduleActivity, Timeout, TimeoutPolicy, WorkflowEventType, WorkflowExecution, WorkflowType,
};
use conductor_worker::{activity_fn, ActivityContext, ActivityError, ActivityWorker, WorkerConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const TASK_LIST: &str = "test-tasklist-worker";

fn single_activity() -> WorkflowType {
    WorkflowType::new("single-activity", "0.1.0")
}

/// Runs the activity named in the input and closes with its outcome
fn single_activity_decider() -> DeciderDefinition {
    let mut running = StateDefinition::new().on(WorkflowEventType::ActivityCompleted, |ctx, event| {
        ctx.complete(event.result().cloned().unwrap_or_default());
        Ok(())
    });
    for outcome in [
        WorkflowEventType::ActivityFailed,
        WorkflowEventType::ActivityTimedOut,
        WorkflowEventType::ActivityCanceled,
    ] {
        running = running.on(outcome, |ctx, event| {
            let reason = match &event.payload {
                EventPayload::ActivityFailed { reason, .. } => reason.clone(),
                other => other.event_type().to_string(),
            };
            ctx.fail(reason);
            Ok(())
        });
    }

    DeciderDefinition::new(single_activity(), "start")
        .state(
            "start",
            StateDefinition::new().on(WorkflowEventType::ExecutionStarted, |ctx, event| {
                let input = event.input().cloned().unwrap_or_default();
                let name = input["activity"].as_str().unwrap_or("load-user").to_string();
                ctx.schedule_activity(ScheduleActivity::new(name, input["args"].clone()));
                ctx.transition("running");
                Ok(())
            }),
        )
        .state("running", running)
}

fn conductor(heartbeat: Timeout) -> Arc<Conductor> {
    let conductor = Conductor::new(EngineConfig::default());
    for name in ["load-user", "slow-import", "unimplemented"] {
        conductor
            .register_activity_type(
                ActivityType::new(name, "0.1.0", TASK_LIST)
                    .with_timeouts(TimeoutPolicy::unbounded().with_heartbeat(heartbeat)),
            )
            .unwrap();
    }
    conductor.register_decider(single_activity_decider()).unwrap();
    conductor
}

async fn load_user(_ctx: ActivityContext, input: Value) -> Result<Value, ActivityError> {
    Ok(json!({
        "userId": input["userId"],
        "name": "Fred Flintstone",
        "email": "fred@bedrock.com",
        "status": 200,
    }))
}

fn worker(conductor: &Arc<Conductor>) -> ActivityWorker {
    ActivityWorker::new(
        conductor.clone(),
        WorkerConfig::new(TASK_LIST).with_identity("worker-1"),
    )
    .register("load-user", "0.1.0", activity_fn(load_user))
}

async fn closed(conductor: &Conductor, id: &ExecutionId) -> WorkflowExecution {
    tokio::time::timeout(Duration::from_secs(3600), conductor.wait_for_close(id))
        .await
        .expect("execution did not close")
        .unwrap()
}

async fn started_activity(conductor: &Conductor, id: &ExecutionId) -> conductor_types::ActivityId {
    loop {
        let execution = conductor.describe_execution(id).await.unwrap();
        let scheduled = execution.history.iter().find_map(|e| match &e.payload {
            EventPayload::ActivityScheduled { activity_id, .. } => Some(activity_id.clone()),
            _ => None,
        });
        if let Some(activity_id) = scheduled {
            if conductor.activity_task(id, &activity_id).map(|t| t.state)
                == Some(ActivityTaskState::Started)
            {
                return activity_id;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_worker_completes_load_user() {
    let conductor = conductor(Timeout::Unbounded);
    let handle = worker(&conductor).start();

    let id = conductor
        .start_execution(
            &single_activity(),
            json!({"activity": "load-user", "args": {"userId": "abc"}}),
        )
        .unwrap();
    let execution = closed(&conductor, &id).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let result = execution.result.unwrap();
    assert_eq!(result["name"], "Fred Flintstone");
    assert_eq!(result["userId"], "abc");
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_keep_long_activity_alive() {
    let conductor = conductor(Timeout::secs(10));
    let handle = worker(&conductor)
        .register(
            "slow-import",
            "0.1.0",
            activity_fn(|ctx: ActivityContext, _input: Value| async move {
                for percent in [25, 50, 75, 100] {
                    tokio::time::sleep(Duration::from_secs(9)).await;
                    ctx.record_progress(json!({ "percentComplete": percent }));
                }
                Ok::<_, ActivityError>(json!({"imported": 4}))
            }),
        )
        .start();

    let id = conductor
        .start_execution(&single_activity(), json!({"activity": "slow-import", "args": {}}))
        .unwrap();
    let execution = closed(&conductor, &id).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.result, Some(json!({"imported": 4})));
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unregistered_activity_is_failed() {
    let conductor = conductor(Timeout::Unbounded);
    let handle = worker(&conductor).start();

    let id = conductor
        .start_execution(&single_activity(), json!({"activity": "unimplemented", "args": {}}))
        .unwrap();
    let execution = closed(&conductor, &id).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(
        execution.failure.as_deref(),
        Some("The activity worker has no registered body for activity type [unimplemented/0.1.0]")
    );
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_activity_error_is_reported_as_failure() {
    let conductor = conductor(Timeout::Unbounded);
    let handle = ActivityWorker::new(conductor.clone(), WorkerConfig::new(TASK_LIST))
        .register(
            "load-user",
            "0.1.0",
            activity_fn(|_ctx: ActivityContext, _input: Value| async move {
                Err::<Value, _>(ActivityError::failed("user not found").with_details(json!(404)))
            }),
        )
        .start();

    let id = conductor
        .start_execution(&single_activity(), json!({"activity": "load-user", "args": {}}))
        .unwrap();
    let execution = closed(&conductor, &id).await;

    assert_eq!(execution.failure.as_deref(), Some("user not found"));
    assert!(matches!(
        &execution.history[2].payload,
        EventPayload::ActivityFailed { details: Some(details), .. } if *details == json!(404)
    ));
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_reaches_running_activity() {
    let conductor = conductor(Timeout::secs(10));
    let handle = worker(&conductor)
        .register(
            "slow-import",
            "0.1.0",
            activity_fn(|ctx: ActivityContext, _input: Value| async move {
                tokio::select! {
                    _ = ctx.cancelled() => {
                        Err(ActivityError::canceled().with_details(json!({"stoppedAt": "batch-1"})))
                    }
                    _ = tokio::time::sleep(Duration::from_secs(600)) => Ok(json!({"imported": 1})),
                }
            }),
        )
        .start();

    let id = conductor
        .start_execution(&single_activity(), json!({"activity": "slow-import", "args": {}}))
        .unwrap();
    let activity_id = started_activity(&conductor, &id).await;
    conductor.request_cancel_activity(&id, &activity_id).unwrap();

    let execution = closed(&conductor, &id).await;
    assert_eq!(execution.failure.as_deref(), Some("ActivityCanceled"));
    assert!(matches!(
        &execution.history[2].payload,
        EventPayload::ActivityCanceled { details: Some(details), .. } if details["stoppedAt"] == "batch-1"
    ));
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_running_activities() {
    let conductor = conductor(Timeout::Unbounded);
    let handle = ActivityWorker::new(conductor.clone(), WorkerConfig::new(TASK_LIST))
        .register(
            "slow-import",
            "0.1.0",
            activity_fn(|_ctx: ActivityContext, _input: Value| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, ActivityError>(json!("done"))
            }),
        )
        .start();

    let id = conductor
        .start_execution(&single_activity(), json!({"activity": "slow-import", "args": {}}))
        .unwrap();
    started_activity(&conductor, &id).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(handle.in_flight(), 1);

    handle.shutdown().await;
    let execution = closed(&conductor, &id).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.result, Some(json!("done")));
}

#[tokio::test(start_paused = true)]
async fn test_paused_worker_does_not_claim() {
    let conductor = conductor(Timeout::Unbounded);
    let handle = worker(&conductor).start();
    handle.pause();
    tokio::task::yield_now().await;

    let id = conductor
        .start_execution(
            &single_activity(),
            json!({"activity": "load-user", "args": {"userId": "abc"}}),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(conductor.open_executions(), vec![id.clone()]);

    handle.resume();
    let execution = closed(&conductor, &id).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    handle.shutdown().await;
}
