//! The Conductor: public entry point wiring executions, deciders and the
//! activity dispatcher together

use crate::config::EngineConfig;
use crate::decider::DeciderDefinition;
use crate::dispatcher::{ActivityDispatcher, ActivityOutcome};
use crate::execution::{Delivery, ExecutionActor, ExecutionHandle};
use crate::task_list::TaskListRegistry;
use conductor_types::{
    ActivityId, ActivityTask, ActivityType, ConductorError, ConductorResult, EventPayload,
    ExecutionId, HeartbeatAck, TaskKey, TaskToken, TimeoutKind, WorkflowExecution, WorkflowType,
};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, instrument, warn};

/// Orchestration engine facade
#[derive(Debug)]
pub struct Conductor {
    config: EngineConfig,
    task_lists: Arc<TaskListRegistry>,
    dispatcher: Arc<ActivityDispatcher>,
    deciders: DashMap<WorkflowType, Arc<DeciderDefinition>>,
    executions: Arc<DashMap<ExecutionId, ExecutionHandle>>,
    decider_permits: Arc<Semaphore>,
    accepting: AtomicBool,
}

impl Conductor {
    /// Build an engine and spawn its outcome router. Must run inside a tokio runtime.
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let task_lists = Arc::new(TaskListRegistry::new());
        for name in &config.task_lists {
            task_lists.register(name);
        }

        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let dispatcher = ActivityDispatcher::spawn(
            task_lists.clone(),
            config.default_activity_version.clone(),
            outcomes_tx,
        );
        let executions = Arc::new(DashMap::new());
        tokio::spawn(route_outcomes(outcomes_rx, executions.clone()));

        info!(
            max_concurrent_deciders = config.max_concurrent_deciders,
            default_activity_version = %config.default_activity_version,
            "Conductor started"
        );

        Arc::new(Self {
            decider_permits: Arc::new(Semaphore::new(config.max_concurrent_deciders.max(1))),
            config,
            task_lists,
            dispatcher,
            deciders: DashMap::new(),
            executions,
            accepting: AtomicBool::new(true),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn task_lists(&self) -> &TaskListRegistry {
        &self.task_lists
    }

    pub fn dispatcher(&self) -> &Arc<ActivityDispatcher> {
        &self.dispatcher
    }

    // ── Registration ────────────────────────────────────────────────

    pub fn register_task_list(&self, name: &str) {
        self.task_lists.register(name);
    }

    /// Register an activity type and the task list it routes to
    pub fn register_activity_type(&self, activity_type: ActivityType) -> ConductorResult<()> {
        let task_list = activity_type.task_list.clone();
        self.dispatcher.register_activity_type(activity_type)?;
        self.task_lists.register(&task_list);
        Ok(())
    }

    pub fn register_decider(&self, definition: DeciderDefinition) -> ConductorResult<()> {
        definition.validate()?;
        let workflow_type = definition.workflow_type().clone();
        if self.deciders.contains_key(&workflow_type) {
            return Err(ConductorError::InvalidDefinition(format!(
                "decider for {} is already registered",
                workflow_type
            )));
        }
        info!(workflow_type = %workflow_type, initial_state = %definition.initial_state(), "Decider registered");
        self.deciders.insert(workflow_type, Arc::new(definition));
        Ok(())
    }

    // ── Executions ──────────────────────────────────────────────────

    /// Start a new execution of `workflow_type`
    #[instrument(skip_all, fields(workflow_type = %workflow_type))]
    pub fn start_execution(
        &self,
        workflow_type: &WorkflowType,
        input: serde_json::Value,
    ) -> ConductorResult<ExecutionId> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ConductorError::ShuttingDown);
        }
        let definition = self
            .deciders
            .get(workflow_type)
            .map(|d| d.clone())
            .ok_or_else(|| ConductorError::UnknownWorkflowType(workflow_type.clone()))?;

        let id = ExecutionId::generate();
        let (actor, handle) = ExecutionActor::new(
            id.clone(),
            definition,
            self.dispatcher.clone(),
            self.decider_permits.clone(),
        );
        // Registered before the actor runs so no outcome can miss it
        self.executions.insert(id.clone(), handle);
        actor.launch(input);
        Ok(id)
    }

    /// Deliver an event to an execution and wait until it has been applied
    pub async fn deliver(
        &self,
        execution_id: &ExecutionId,
        payload: EventPayload,
    ) -> ConductorResult<Delivery> {
        self.handle(execution_id)?.deliver(payload).await
    }

    pub async fn describe_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> ConductorResult<WorkflowExecution> {
        self.handle(execution_id)?.describe().await
    }

    /// Wait for an execution to close and return its final record
    pub async fn wait_for_close(
        &self,
        execution_id: &ExecutionId,
    ) -> ConductorResult<WorkflowExecution> {
        let handle = self.handle(execution_id)?;
        handle.closed().await;
        handle.describe().await
    }

    /// Executions that have not closed yet
    pub fn open_executions(&self) -> Vec<ExecutionId> {
        self.executions
            .iter()
            .filter(|entry| !entry.value().status().is_closed())
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn handle(&self, execution_id: &ExecutionId) -> ConductorResult<ExecutionHandle> {
        self.executions
            .get(execution_id)
            .map(|h| h.clone())
            .ok_or_else(|| ConductorError::ExecutionNotFound(execution_id.clone()))
    }

    // ── Activity tasks ──────────────────────────────────────────────

    pub async fn poll(&self, task_list: &str, identity: &str) -> ConductorResult<ActivityTask> {
        self.dispatcher.poll(task_list, identity).await
    }

    pub fn try_poll(&self, task_list: &str, identity: &str) -> ConductorResult<Option<ActivityTask>> {
        self.dispatcher.try_poll(task_list, identity)
    }

    pub fn complete(&self, token: TaskToken, result: serde_json::Value) -> ConductorResult<()> {
        self.dispatcher.complete(token, result)
    }

    pub fn fail(
        &self,
        token: TaskToken,
        reason: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> ConductorResult<()> {
        self.dispatcher.fail(token, reason, details)
    }

    pub fn cancel(&self, token: TaskToken, details: Option<serde_json::Value>) -> ConductorResult<()> {
        self.dispatcher.cancel(token, details)
    }

    pub fn heartbeat(
        &self,
        token: TaskToken,
        details: Option<serde_json::Value>,
    ) -> ConductorResult<HeartbeatAck> {
        self.dispatcher.heartbeat(token, details)
    }

    /// Request cancellation of an activity on behalf of its execution
    pub fn request_cancel_activity(
        &self,
        execution_id: &ExecutionId,
        activity_id: &ActivityId,
    ) -> ConductorResult<()> {
        if self.handle(execution_id)?.status().is_closed() {
            return Err(ConductorError::ExecutionClosed(execution_id.clone()));
        }
        self.dispatcher.request_cancel(execution_id, activity_id)
    }

    /// Snapshot of an open activity task; `None` once it closed
    pub fn activity_task(
        &self,
        execution_id: &ExecutionId,
        activity_id: &ActivityId,
    ) -> Option<ActivityTask> {
        self.dispatcher
            .task(&TaskKey::new(execution_id.clone(), activity_id.clone()))
    }

    pub fn armed_timeouts(
        &self,
        execution_id: &ExecutionId,
        activity_id: &ActivityId,
    ) -> Vec<TimeoutKind> {
        self.dispatcher
            .armed_timeouts(&TaskKey::new(execution_id.clone(), activity_id.clone()))
    }

    /// Activity tasks not yet closed, across all executions
    pub fn open_activity_count(&self) -> usize {
        self.dispatcher.open_task_count()
    }

    /// Tasks, tokens and deadline sets the dispatcher still holds
    pub fn retained_activity_state(&self) -> (usize, usize, usize) {
        self.dispatcher.retained()
    }

    /// Stop accepting executions, release pollers and abort deadlines.
    /// Open executions stay open.
    pub fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        self.dispatcher.shutdown();
        info!(open_executions = self.open_executions().len(), "Conductor shut down");
    }
}

/// Hand activity outcomes to their executions
async fn route_outcomes(
    mut outcomes: mpsc::UnboundedReceiver<ActivityOutcome>,
    executions: Arc<DashMap<ExecutionId, ExecutionHandle>>,
) {
    while let Some(outcome) = outcomes.recv().await {
        let handle = executions
            .get(&outcome.execution_id)
            .map(|h| h.clone());
        match handle {
            Some(handle) => {
                if let Err(e) = handle.forward(outcome.payload) {
                    warn!(execution_id = %outcome.execution_id, error = %e, "Outcome could not be routed");
                }
            }
            None => {
                warn!(execution_id = %outcome.execution_id, "Outcome for unknown execution dropped");
            }
        }
    }
    debug!("Outcome router stopped");
}
