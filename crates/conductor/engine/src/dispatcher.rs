//! Activity dispatcher
//!
//! Owns every activity task from scheduling to its terminal state. All state
//! changes of one task happen under that task's lock, so a worker response
//! and a firing deadline can never both close the same task. Each task emits
//! exactly one outcome event, delivered to the owning execution through the
//! outcome channel. A task is forgotten as soon as it closes; its token dies
//! with it.

use crate::task_list::{TaskList, TaskListRegistry};
use crate::timeout_manager::{Expiry, TimeoutManager};
use conductor_types::{
    ActivityId, ActivityTask, ActivityTaskState, ActivityType, ActivityTypeKey, ConductorError,
    ConductorResult, EventPayload, ExecutionId, HeartbeatAck, ScheduleActivity, TaskKey,
    TaskToken, TimeoutKind, TimeoutPolicy,
};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// An activity outcome on its way to the owning execution
#[derive(Clone, Debug, PartialEq)]
pub struct ActivityOutcome {
    pub execution_id: ExecutionId,
    pub payload: EventPayload,
}

/// How a worker closed a task
#[derive(Clone, Debug, PartialEq)]
pub enum WorkerResponse {
    Completed(serde_json::Value),
    Failed {
        reason: String,
        details: Option<serde_json::Value>,
    },
    Canceled(Option<serde_json::Value>),
}

/// A schedule request that passed validation. Enqueuing it cannot fail.
#[derive(Debug, Clone)]
pub struct ResolvedSchedule {
    key: ActivityTypeKey,
    task_list: Arc<TaskList>,
    timeouts: TimeoutPolicy,
}

impl ResolvedSchedule {
    pub fn key(&self) -> &ActivityTypeKey {
        &self.key
    }

    pub fn task_list(&self) -> &str {
        self.task_list.name()
    }

    pub fn timeouts(&self) -> &TimeoutPolicy {
        &self.timeouts
    }
}

type TaskSlot = Arc<Mutex<ActivityTask>>;

/// Routes activity tasks to workers and enforces their deadlines
pub struct ActivityDispatcher {
    task_lists: Arc<TaskListRegistry>,
    activity_types: DashMap<ActivityTypeKey, ActivityType>,
    tasks: DashMap<TaskKey, TaskSlot>,
    tokens: DashMap<TaskToken, TaskKey>,
    timeouts: TimeoutManager,
    outcomes: mpsc::UnboundedSender<ActivityOutcome>,
    shutdown: watch::Sender<bool>,
    default_version: String,
}

impl ActivityDispatcher {
    /// Create a dispatcher and spawn its deadline loop
    pub fn spawn(
        task_lists: Arc<TaskListRegistry>,
        default_version: impl Into<String>,
        outcomes: mpsc::UnboundedSender<ActivityOutcome>,
    ) -> Arc<Self> {
        let (timeouts, mut expired) = TimeoutManager::new();
        let (shutdown, _) = watch::channel(false);
        let dispatcher = Arc::new(Self {
            task_lists,
            activity_types: DashMap::new(),
            tasks: DashMap::new(),
            tokens: DashMap::new(),
            timeouts,
            outcomes,
            shutdown,
            default_version: default_version.into(),
        });

        let weak: Weak<Self> = Arc::downgrade(&dispatcher);
        tokio::spawn(async move {
            while let Some(expiry) = expired.recv().await {
                let Some(dispatcher) = weak.upgrade() else {
                    break;
                };
                dispatcher.on_expiry(expiry);
            }
            debug!("Deadline loop stopped");
        });

        dispatcher
    }

    pub fn default_version(&self) -> &str {
        &self.default_version
    }

    // ── Activity types ──────────────────────────────────────────────

    /// Register an activity type. Re-registering an identical type is a no-op;
    /// a type's definition can not change once registered.
    pub fn register_activity_type(&self, activity_type: ActivityType) -> ConductorResult<()> {
        activity_type.validate()?;
        let key = activity_type.key();

        if let Some(existing) = self.activity_types.get(&key) {
            if *existing == activity_type {
                return Ok(());
            }
            return Err(ConductorError::InvalidDefinition(format!(
                "activity type {} is already registered with a different definition",
                key
            )));
        }

        info!(
            activity_type = %key,
            task_list = %activity_type.task_list,
            "Activity type registered"
        );
        self.activity_types.insert(key, activity_type);
        Ok(())
    }

    pub fn activity_type(&self, key: &ActivityTypeKey) -> Option<ActivityType> {
        self.activity_types.get(key).map(|t| t.clone())
    }

    // ── Scheduling ──────────────────────────────────────────────────

    /// Check a schedule request of `execution_id` without side effects
    pub fn validate(
        &self,
        execution_id: &ExecutionId,
        request: &ScheduleActivity,
    ) -> ConductorResult<ResolvedSchedule> {
        let key = request.key(&self.default_version);
        let activity_type = self
            .activity_types
            .get(&key)
            .map(|t| t.clone())
            .ok_or_else(|| ConductorError::UnknownActivityType(key.clone()))?;

        let list_name = request
            .task_list
            .as_deref()
            .unwrap_or(&activity_type.task_list);
        let task_list = self.task_lists.resolve(list_name)?;

        let timeouts = activity_type.timeouts.merged(&request.timeouts);
        timeouts.validate()?;

        if self
            .tasks
            .contains_key(&TaskKey::new(execution_id.clone(), request.activity_id.clone()))
        {
            return Err(duplicate_activity(&request.activity_id));
        }

        Ok(ResolvedSchedule {
            key,
            task_list,
            timeouts,
        })
    }

    /// Validate and enqueue a new task
    pub fn schedule(
        &self,
        execution_id: &ExecutionId,
        request: &ScheduleActivity,
    ) -> ConductorResult<ActivityTask> {
        let resolved = self.validate(execution_id, request)?;
        self.schedule_resolved(execution_id, request, resolved)
    }

    /// Enqueue a task that already passed [`ActivityDispatcher::validate`].
    ///
    /// Only fails when the execution already has an open task with the same
    /// activity id.
    pub fn schedule_resolved(
        &self,
        execution_id: &ExecutionId,
        request: &ScheduleActivity,
        resolved: ResolvedSchedule,
    ) -> ConductorResult<ActivityTask> {
        let activity_id = request.activity_id.clone();
        let key = TaskKey::new(execution_id.clone(), activity_id.clone());
        let task = ActivityTask::new(
            activity_id.clone(),
            execution_id.clone(),
            resolved.key,
            resolved.task_list.name(),
            request.input.clone(),
            resolved.timeouts,
        )
        .with_control(request.control.clone());
        let snapshot = task.clone();

        let slot = Arc::new(Mutex::new(task));
        {
            // Hold the slot while arming so an early deadline sees the task
            let _guard = slot.lock();
            match self.tasks.entry(key.clone()) {
                Entry::Occupied(_) => return Err(duplicate_activity(&activity_id)),
                Entry::Vacant(vacant) => {
                    vacant.insert(slot.clone());
                }
            }
            self.timeouts.arm(
                &key,
                TimeoutKind::ScheduleToStart,
                resolved.timeouts.schedule_to_start,
            );
            self.timeouts.arm(
                &key,
                TimeoutKind::ScheduleToClose,
                resolved.timeouts.schedule_to_close,
            );
        }
        resolved.task_list.push(key);

        info!(
            execution_id = %execution_id,
            activity_id = %activity_id,
            activity_type = %snapshot.activity_type,
            task_list = %snapshot.task_list,
            "Activity task scheduled"
        );
        Ok(snapshot)
    }

    // ── Worker operations ───────────────────────────────────────────

    /// Long-poll a task list and claim the next schedulable task.
    ///
    /// Polling an unknown list registers it. Dropping the returned future
    /// never loses a task.
    pub async fn poll(&self, task_list: &str, identity: &str) -> ConductorResult<ActivityTask> {
        let list = self.task_lists.register(task_list);
        list.record_poller(identity);

        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Err(ConductorError::ShuttingDown);
        }

        loop {
            let key = tokio::select! {
                key = list.next() => key,
                _ = shutdown.changed() => return Err(ConductorError::ShuttingDown),
            };
            if let Some(task) = self.claim(&key, identity) {
                return Ok(task);
            }
        }
    }

    /// Claim the next task without waiting
    pub fn try_poll(&self, task_list: &str, identity: &str) -> ConductorResult<Option<ActivityTask>> {
        if *self.shutdown.borrow() {
            return Err(ConductorError::ShuttingDown);
        }
        let list = self.task_lists.register(task_list);
        list.record_poller(identity);

        while let Some(key) = list.try_pop() {
            if let Some(task) = self.claim(&key, identity) {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    fn claim(&self, key: &TaskKey, identity: &str) -> Option<ActivityTask> {
        let slot = self.slot(key)?;
        let mut task = slot.lock();
        if task.state != ActivityTaskState::Scheduled {
            debug!(task = %key, state = %task.state, "Skipping unclaimable task");
            return None;
        }

        let token = TaskToken::issue();
        task.state = ActivityTaskState::Started;
        task.task_token = Some(token);
        task.started_at = Some(Utc::now());
        self.tokens.insert(token, key.clone());

        self.timeouts.disarm(key, TimeoutKind::ScheduleToStart);
        self.timeouts
            .arm(key, TimeoutKind::StartToClose, task.timeouts.start_to_close);
        self.timeouts
            .arm(key, TimeoutKind::Heartbeat, task.timeouts.heartbeat);

        info!(
            execution_id = %task.execution_id,
            activity_id = %task.activity_id,
            identity = %identity,
            "Activity task started"
        );
        Some(task.clone())
    }

    /// Close a started task on behalf of the worker holding `token`
    pub fn respond(&self, token: TaskToken, response: WorkerResponse) -> ConductorResult<()> {
        let slot = self.slot_for_token(token)?;
        let outcome = {
            let mut task = slot.lock();
            if !task.accepts(&token) {
                warn!(activity_id = %task.activity_id, state = %task.state, "Rejected response for closed task");
                return Err(ConductorError::InvalidTaskToken(token));
            }

            let activity_id = task.activity_id.clone();
            let payload = match response {
                WorkerResponse::Completed(result) => {
                    task.state = ActivityTaskState::Completed;
                    EventPayload::ActivityCompleted {
                        activity_id,
                        result,
                    }
                }
                WorkerResponse::Failed { reason, details } => {
                    task.state = ActivityTaskState::Failed;
                    EventPayload::ActivityFailed {
                        activity_id,
                        reason,
                        details,
                    }
                }
                WorkerResponse::Canceled(details) => {
                    task.state = ActivityTaskState::Canceled;
                    EventPayload::ActivityCanceled {
                        activity_id,
                        details,
                    }
                }
            };
            self.close(&mut task);

            info!(
                execution_id = %task.execution_id,
                activity_id = %task.activity_id,
                state = %task.state,
                "Activity task closed by worker"
            );
            ActivityOutcome {
                execution_id: task.execution_id.clone(),
                payload,
            }
        };
        self.emit(outcome);
        Ok(())
    }

    pub fn complete(&self, token: TaskToken, result: serde_json::Value) -> ConductorResult<()> {
        self.respond(token, WorkerResponse::Completed(result))
    }

    pub fn fail(
        &self,
        token: TaskToken,
        reason: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> ConductorResult<()> {
        self.respond(
            token,
            WorkerResponse::Failed {
                reason: reason.into(),
                details,
            },
        )
    }

    pub fn cancel(&self, token: TaskToken, details: Option<serde_json::Value>) -> ConductorResult<()> {
        self.respond(token, WorkerResponse::Canceled(details))
    }

    /// Record liveness of a started task and re-arm its heartbeat deadline.
    /// After shutdown the beat is still acknowledged but nothing is re-armed.
    pub fn heartbeat(
        &self,
        token: TaskToken,
        details: Option<serde_json::Value>,
    ) -> ConductorResult<HeartbeatAck> {
        let slot = self.slot_for_token(token)?;
        let mut task = slot.lock();
        if !task.accepts(&token) {
            return Err(ConductorError::InvalidTaskToken(token));
        }

        task.last_heartbeat_at = Some(Utc::now());
        if details.is_some() {
            task.heartbeat_details = details;
        }
        if !*self.shutdown.borrow() {
            self.timeouts
                .arm(&task.key(), TimeoutKind::Heartbeat, task.timeouts.heartbeat);
        }

        debug!(activity_id = %task.activity_id, "Heartbeat recorded");
        Ok(HeartbeatAck {
            cancel_requested: task.cancel_requested,
        })
    }

    /// Ask for an open task of `execution_id` to be cancelled.
    ///
    /// A task nobody claimed yet is cancelled at once. A started task is only
    /// flagged; its worker learns about it from the next heartbeat ack.
    pub fn request_cancel(
        &self,
        execution_id: &ExecutionId,
        activity_id: &ActivityId,
    ) -> ConductorResult<()> {
        let key = TaskKey::new(execution_id.clone(), activity_id.clone());
        let slot = self.slot(&key).ok_or_else(|| {
            ConductorError::DecisionValidation(format!(
                "execution {} has no open activity {}",
                execution_id, activity_id
            ))
        })?;

        let outcome = {
            let mut task = slot.lock();
            match task.state {
                ActivityTaskState::Scheduled => {
                    if let Ok(list) = self.task_lists.resolve(&task.task_list) {
                        list.remove(&key);
                    }
                    task.state = ActivityTaskState::Canceled;
                    task.cancel_requested = true;
                    self.close(&mut task);
                    info!(activity_id = %activity_id, "Scheduled activity task canceled");
                    Some(ActivityOutcome {
                        execution_id: task.execution_id.clone(),
                        payload: EventPayload::ActivityCanceled {
                            activity_id: activity_id.clone(),
                            details: None,
                        },
                    })
                }
                ActivityTaskState::Started => {
                    task.cancel_requested = true;
                    info!(activity_id = %activity_id, "Cancellation requested for started task");
                    None
                }
                _ => None,
            }
        };

        if let Some(outcome) = outcome {
            self.emit(outcome);
        }
        Ok(())
    }

    // ── Deadlines ───────────────────────────────────────────────────

    fn on_expiry(&self, expiry: Expiry) {
        let Some(slot) = self.slot(&expiry.key) else {
            return;
        };

        let outcome = {
            let mut task = slot.lock();
            // Checked under the task lock so a concurrent heartbeat re-arm wins
            if !self.timeouts.claim(&expiry) {
                debug!(task = %expiry.key, timeout = %expiry.kind, "Stale deadline ignored");
                return;
            }

            let live = match expiry.kind {
                TimeoutKind::ScheduleToStart => task.state == ActivityTaskState::Scheduled,
                TimeoutKind::ScheduleToClose => !task.is_terminal(),
                TimeoutKind::StartToClose | TimeoutKind::Heartbeat => {
                    task.state == ActivityTaskState::Started
                }
            };
            if !live {
                return;
            }

            if task.state == ActivityTaskState::Scheduled {
                if let Ok(list) = self.task_lists.resolve(&task.task_list) {
                    list.remove(&expiry.key);
                }
            }
            task.state = ActivityTaskState::TimedOut;
            self.close(&mut task);

            let error = ConductorError::TimeoutExceeded(expiry.kind);
            warn!(
                execution_id = %task.execution_id,
                activity_id = %task.activity_id,
                error = %error,
                "Activity task timed out"
            );
            ActivityOutcome {
                execution_id: task.execution_id.clone(),
                payload: EventPayload::ActivityTimedOut {
                    activity_id: task.activity_id.clone(),
                    timeout: expiry.kind,
                    details: task.heartbeat_details.clone(),
                },
            }
        };
        self.emit(outcome);
    }

    // ── Introspection ───────────────────────────────────────────────

    /// Snapshot of an open task. Closed tasks are forgotten.
    pub fn task(&self, key: &TaskKey) -> Option<ActivityTask> {
        self.slot(key).map(|slot| slot.lock().clone())
    }

    /// Deadline kinds currently armed for a task
    pub fn armed_timeouts(&self, key: &TaskKey) -> Vec<TimeoutKind> {
        self.timeouts.armed(key)
    }

    /// Tasks that have not reached a terminal state
    pub fn open_task_count(&self) -> usize {
        // Collected first: a slot is locked while its entry is removed
        let slots: Vec<TaskSlot> = self.tasks.iter().map(|e| e.value().clone()).collect();
        slots.iter().filter(|slot| !slot.lock().is_terminal()).count()
    }

    /// Tasks, tokens and deadline sets still held
    pub fn retained(&self) -> (usize, usize, usize) {
        (self.tasks.len(), self.tokens.len(), self.timeouts.tracked())
    }

    /// Stop serving polls and abort every deadline
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.timeouts.shutdown();
        info!("Activity dispatcher shut down");
    }

    // ── Internals ───────────────────────────────────────────────────

    fn slot(&self, key: &TaskKey) -> Option<TaskSlot> {
        self.tasks.get(key).map(|slot| slot.clone())
    }

    fn slot_for_token(&self, token: TaskToken) -> ConductorResult<TaskSlot> {
        self.tokens
            .get(&token)
            .map(|key| key.clone())
            .and_then(|key| self.slot(&key))
            .ok_or(ConductorError::InvalidTaskToken(token))
    }

    /// Finish a task that was just moved to a terminal state and forget it.
    /// Called with the task's lock held.
    fn close(&self, task: &mut ActivityTask) {
        if let Some(token) = task.task_token.take() {
            self.tokens.remove(&token);
        }
        task.closed_at = Some(Utc::now());
        let key = task.key();
        self.timeouts.disarm_all(&key);
        self.tasks.remove(&key);
    }

    fn emit(&self, outcome: ActivityOutcome) {
        if self.outcomes.send(outcome).is_err() {
            warn!("Outcome receiver dropped; activity outcome discarded");
        }
    }
}

fn duplicate_activity(activity_id: &ActivityId) -> ConductorError {
    ConductorError::DecisionValidation(format!("activity id {} is already in use", activity_id))
}

impl std::fmt::Debug for ActivityDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityDispatcher")
            .field("activity_types", &self.activity_types.len())
            .field("tasks", &self.tasks.len())
            .field("default_version", &self.default_version)
            .finish()
    }
}
