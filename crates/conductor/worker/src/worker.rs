//! Activity worker: polls one task list and runs registered activity bodies

use crate::activity::{Activity, ActivityContext, ActivityError};
use crate::config::WorkerConfig;
use crate::heartbeat::HeartbeatMonitor;
use conductor_engine::ActivityService;
use conductor_types::{ActivityTask, ActivityTypeKey, ConductorError, ConductorResult, TaskToken};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Polling mode of a running worker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Polling,
    Paused,
    ShuttingDown,
}

/// Builder and runtime of an activity worker
pub struct ActivityWorker {
    config: WorkerConfig,
    service: Arc<dyn ActivityService>,
    activities: HashMap<ActivityTypeKey, Arc<dyn Activity>>,
}

impl ActivityWorker {
    pub fn new(service: Arc<dyn ActivityService>, config: WorkerConfig) -> Self {
        Self {
            config,
            service,
            activities: HashMap::new(),
        }
    }

    /// Register the body run for tasks of `name`/`version`
    pub fn register(
        mut self,
        name: impl Into<String>,
        version: impl Into<String>,
        activity: impl Activity + 'static,
    ) -> Self {
        let key = ActivityTypeKey::new(name, version);
        debug!(activity_type = %key, task_list = %self.config.task_list, "Activity body registered");
        self.activities.insert(key, Arc::new(activity));
        self
    }

    pub fn handles(&self, key: &ActivityTypeKey) -> bool {
        self.activities.contains_key(key)
    }

    /// Spawn the polling loop
    pub fn start(self) -> WorkerHandle {
        let (control, control_rx) = watch::channel(WorkerState::Polling);
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_activities.max(1)));
        let runner = Arc::new(Runner {
            heartbeat: HeartbeatMonitor::new(self.service.clone(), self.config.heartbeat_fraction),
            config: self.config,
            service: self.service,
            activities: self.activities,
            in_flight: AtomicUsize::new(0),
        });

        info!(
            task_list = %runner.config.task_list,
            identity = %runner.config.identity,
            activities = runner.activities.len(),
            "Activity worker started"
        );
        let join = tokio::spawn(runner.clone().run(control_rx, permits));

        WorkerHandle {
            control,
            join,
            runner,
        }
    }
}

/// Control surface of a started worker
pub struct WorkerHandle {
    control: watch::Sender<WorkerState>,
    join: JoinHandle<()>,
    runner: Arc<Runner>,
}

impl WorkerHandle {
    /// Stop polling. Running activities are not affected.
    pub fn pause(&self) {
        self.control.send_if_modified(|state| {
            let changed = *state == WorkerState::Polling;
            if changed {
                *state = WorkerState::Paused;
            }
            changed
        });
    }

    /// Resume polling after [`WorkerHandle::pause`]
    pub fn resume(&self) {
        self.control.send_if_modified(|state| {
            let changed = *state == WorkerState::Paused;
            if changed {
                *state = WorkerState::Polling;
            }
            changed
        });
    }

    pub fn state(&self) -> WorkerState {
        *self.control.borrow()
    }

    /// Activities currently executing
    pub fn in_flight(&self) -> usize {
        self.runner.in_flight.load(Ordering::SeqCst)
    }

    /// Stop polling and wait for every running activity to report
    pub async fn shutdown(self) {
        self.control.send_replace(WorkerState::ShuttingDown);
        if let Err(e) = self.join.await {
            error!(error = %e, "Activity worker loop panicked");
        }
    }
}

struct Runner {
    config: WorkerConfig,
    service: Arc<dyn ActivityService>,
    activities: HashMap<ActivityTypeKey, Arc<dyn Activity>>,
    heartbeat: HeartbeatMonitor,
    in_flight: AtomicUsize,
}

impl Runner {
    async fn run(self: Arc<Self>, mut control: watch::Receiver<WorkerState>, permits: Arc<Semaphore>) {
        let mut running = JoinSet::new();

        loop {
            while let Some(finished) = running.try_join_next() {
                if let Err(e) = finished {
                    error!(error = %e, "Activity task panicked");
                }
            }

            let state = *control.borrow_and_update();
            match state {
                WorkerState::ShuttingDown => break,
                WorkerState::Paused => {
                    if control.changed().await.is_err() {
                        break;
                    }
                    continue;
                }
                WorkerState::Polling => {}
            }

            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                changed = control.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let polled = tokio::select! {
                polled = self.service.poll_activity_task(&self.config.task_list, &self.config.identity) => polled,
                changed = control.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match polled {
                Ok(task) => {
                    running.spawn(self.clone().execute(task, permit));
                }
                Err(ConductorError::ShuttingDown) => {
                    info!(task_list = %self.config.task_list, "Engine is shutting down; worker stops polling");
                    break;
                }
                Err(e) => {
                    warn!(task_list = %self.config.task_list, error = %e, "Poll failed");
                    tokio::time::sleep(self.config.poll_retry_delay()).await;
                }
            }
        }

        let draining = running.len();
        if draining > 0 {
            info!(in_flight = draining, "Waiting for running activities");
        }
        while let Some(finished) = running.join_next().await {
            if let Err(e) = finished {
                error!(error = %e, "Activity task panicked");
            }
        }
        info!(task_list = %self.config.task_list, "Activity worker terminated");
    }

    async fn execute(self: Arc<Self>, task: ActivityTask, _permit: OwnedSemaphorePermit) {
        let Some(token) = task.task_token else {
            error!(activity_id = %task.activity_id, "Claimed task carries no token");
            return;
        };

        let Some(activity) = self.activities.get(&task.activity_type).cloned() else {
            warn!(activity_type = %task.activity_type, "No activity body registered");
            let reason = format!(
                "The activity worker has no registered body for activity type [{}]",
                task.activity_type
            );
            if let Err(e) = self.service.respond_failed(token, reason, None).await {
                warn!(activity_id = %task.activity_id, error = %e, "Failure report rejected");
            }
            return;
        };

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = self.run_activity(activity, task.clone(), token).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Err(e) = result {
            warn!(activity_id = %task.activity_id, error = %e, "Activity outcome rejected");
        }
    }

    async fn run_activity(
        &self,
        activity: Arc<dyn Activity>,
        task: ActivityTask,
        token: TaskToken,
    ) -> ConductorResult<()> {
        let heartbeat_timeout = task
            .timeouts
            .heartbeat
            .duration()
            .unwrap_or_else(|| self.config.default_heartbeat_timeout());
        let progress = Arc::new(Mutex::new(None));
        let (cancel, cancel_rx) = watch::channel(false);

        let guard = self
            .heartbeat
            .start(token, heartbeat_timeout, progress.clone(), cancel);
        let input = task.input.clone();
        let activity_id = task.activity_id.clone();
        let ctx = ActivityContext::new(Arc::new(task), progress, cancel_rx);

        debug!(activity_id = %activity_id, "Running activity");
        let outcome = activity.execute(ctx, input).await;

        // The heartbeat keeps running until the outcome has been reported
        let reported = match outcome {
            Ok(result) => self.service.respond_completed(token, result).await,
            Err(ActivityError::Failed { reason, details }) => {
                self.service.respond_failed(token, reason, details).await
            }
            Err(ActivityError::Canceled { details }) => {
                self.service.respond_canceled(token, details).await
            }
        };
        guard.stop();

        if reported.is_ok() {
            debug!(activity_id = %activity_id, "Activity outcome reported");
        }
        reported
    }
}
