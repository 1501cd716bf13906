//! Workflow execution actors
//!
//! Every open execution is a tokio task that owns its [`WorkflowExecution`]
//! record and [`DeciderRuntime`]. Events reach it through an inbox and are
//! applied strictly one at a time, so an execution never runs two decision
//! cycles at once. A shared semaphore bounds how many executions decide
//! concurrently.

use crate::decider::{DeciderDefinition, DeciderRuntime};
use crate::dispatcher::{ActivityDispatcher, ResolvedSchedule};
use conductor_types::{
    ActivityId, ConductorError, ConductorResult, Decision, EventPayload, ExecutionId,
    ExecutionStatus, WorkflowExecution, WorkflowType,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tracing::{debug, info, warn};

/// What happened to a delivered event
#[derive(Clone, Debug, PartialEq)]
pub enum Delivery {
    /// Appended at `sequence_id`; the decider answered with `decisions`
    Applied {
        sequence_id: u64,
        decisions: Vec<Decision>,
    },
    /// Duplicate or unexpected; the execution is unchanged
    Ignored,
}

pub(crate) enum ExecutionCommand {
    Deliver {
        payload: EventPayload,
        reply: Option<oneshot::Sender<ConductorResult<Delivery>>>,
    },
    Describe {
        reply: oneshot::Sender<WorkflowExecution>,
    },
}

// ── Handle ──────────────────────────────────────────────────────────

/// Cloneable address of a running execution
#[derive(Clone, Debug)]
pub struct ExecutionHandle {
    id: ExecutionId,
    workflow_type: WorkflowType,
    inbox: mpsc::UnboundedSender<ExecutionCommand>,
    status: watch::Receiver<ExecutionStatus>,
}

impl std::fmt::Debug for ExecutionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionCommand::Deliver { payload, .. } => {
                write!(f, "Deliver({})", payload.event_type())
            }
            ExecutionCommand::Describe { .. } => f.write_str("Describe"),
        }
    }
}

impl ExecutionHandle {
    pub fn id(&self) -> &ExecutionId {
        &self.id
    }

    pub fn workflow_type(&self) -> &WorkflowType {
        &self.workflow_type
    }

    pub fn status(&self) -> ExecutionStatus {
        *self.status.borrow()
    }

    /// Deliver an event and wait until it has been applied
    pub async fn deliver(&self, payload: EventPayload) -> ConductorResult<Delivery> {
        let (reply, rx) = oneshot::channel();
        self.send(ExecutionCommand::Deliver {
            payload,
            reply: Some(reply),
        })?;
        rx.await
            .map_err(|_| ConductorError::ExecutionClosed(self.id.clone()))?
    }

    /// Deliver an event without waiting for it to be applied
    pub(crate) fn forward(&self, payload: EventPayload) -> ConductorResult<()> {
        self.send(ExecutionCommand::Deliver {
            payload,
            reply: None,
        })
    }

    /// Snapshot of the execution record
    pub async fn describe(&self) -> ConductorResult<WorkflowExecution> {
        let (reply, rx) = oneshot::channel();
        self.send(ExecutionCommand::Describe { reply })?;
        rx.await
            .map_err(|_| ConductorError::ExecutionClosed(self.id.clone()))
    }

    /// Resolve once the execution reaches a closed status
    pub async fn closed(&self) -> ExecutionStatus {
        let mut status = self.status.clone();
        loop {
            let current = *status.borrow_and_update();
            if current.is_closed() {
                return current;
            }
            if status.changed().await.is_err() {
                return *status.borrow();
            }
        }
    }

    fn send(&self, command: ExecutionCommand) -> ConductorResult<()> {
        self.inbox
            .send(command)
            .map_err(|_| ConductorError::ExecutionClosed(self.id.clone()))
    }
}

// ── Actor ───────────────────────────────────────────────────────────

pub(crate) struct ExecutionActor {
    execution: WorkflowExecution,
    decider: DeciderRuntime,
    dispatcher: Arc<ActivityDispatcher>,
    /// Activities scheduled and not yet resolved
    outstanding: HashSet<ActivityId>,
    commands: mpsc::UnboundedReceiver<ExecutionCommand>,
    status: watch::Sender<ExecutionStatus>,
    permits: Arc<Semaphore>,
}

impl ExecutionActor {
    pub(crate) fn new(
        id: ExecutionId,
        definition: Arc<DeciderDefinition>,
        dispatcher: Arc<ActivityDispatcher>,
        permits: Arc<Semaphore>,
    ) -> (Self, ExecutionHandle) {
        let workflow_type = definition.workflow_type().clone();
        let (inbox, commands) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(ExecutionStatus::Open);

        let actor = Self {
            execution: WorkflowExecution::new(
                id.clone(),
                workflow_type.clone(),
                definition.initial_state(),
            ),
            decider: DeciderRuntime::new(definition),
            dispatcher,
            outstanding: HashSet::new(),
            commands,
            status,
            permits,
        };
        let handle = ExecutionHandle {
            id,
            workflow_type,
            inbox,
            status: status_rx,
        };
        (actor, handle)
    }

    /// Spawn the actor; it records `ExecutionStarted` before reading its inbox
    pub(crate) fn launch(self, input: serde_json::Value) {
        tokio::spawn(self.run(input));
    }

    async fn run(mut self, input: serde_json::Value) {
        {
            let Ok(_permit) = self.permits.clone().acquire_owned().await else {
                warn!(execution_id = %self.execution.id, "Decider permits closed before start");
                return;
            };
            self.start(input);
        }

        while let Some(command) = self.commands.recv().await {
            match command {
                ExecutionCommand::Deliver { payload, reply } => {
                    let result = match self.permits.clone().acquire_owned().await {
                        Ok(_permit) => self.deliver(payload),
                        Err(_) => Err(ConductorError::ShuttingDown),
                    };
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    } else if let Err(e) = result {
                        debug!(execution_id = %self.execution.id, error = %e, "Forwarded event rejected");
                    }
                }
                ExecutionCommand::Describe { reply } => {
                    let _ = reply.send(self.execution.clone());
                }
            }
        }
        debug!(execution_id = %self.execution.id, "Execution inbox closed");
    }

    fn start(&mut self, input: serde_json::Value) {
        info!(
            execution_id = %self.execution.id,
            workflow_type = %self.execution.workflow_type,
            "Execution started"
        );
        let event = self
            .execution
            .append(EventPayload::ExecutionStarted {
                workflow_type: self.execution.workflow_type.clone(),
                input,
            })
            .clone();

        let decided = self
            .decider
            .initialize(&self.execution.id, &mut self.execution.data)
            .and_then(|mut decisions| {
                let more =
                    self.decider
                        .apply(&self.execution.id, &mut self.execution.data, &event)?;
                decisions.extend(more);
                Ok(decisions)
            });

        match decided {
            Ok(decisions) => self.execute(decisions),
            Err(e) => self.fail(format!("Decider failed: {}", e)),
        }
        self.publish();
    }

    fn deliver(&mut self, payload: EventPayload) -> ConductorResult<Delivery> {
        let outcome_for = payload
            .is_activity_outcome()
            .then(|| payload.activity_id().cloned())
            .flatten();

        if let Some(activity_id) = &outcome_for {
            if self.is_resolved(activity_id) {
                debug!(
                    execution_id = %self.execution.id,
                    activity_id = %activity_id,
                    "Duplicate activity outcome ignored"
                );
                return Ok(Delivery::Ignored);
            }
        }

        if self.execution.is_closed() {
            return Err(ConductorError::ExecutionClosed(self.execution.id.clone()));
        }

        match &outcome_for {
            Some(activity_id) => {
                if !self.outstanding.remove(activity_id) {
                    warn!(
                        execution_id = %self.execution.id,
                        activity_id = %activity_id,
                        "Outcome for an activity this execution never scheduled"
                    );
                    return Ok(Delivery::Ignored);
                }
            }
            None => {
                warn!(
                    execution_id = %self.execution.id,
                    event_type = %payload.event_type(),
                    "Only activity outcomes can be delivered to a running execution"
                );
                return Ok(Delivery::Ignored);
            }
        }

        let event = self.execution.append(payload).clone();
        let decisions =
            match self
                .decider
                .apply(&self.execution.id, &mut self.execution.data, &event)
            {
                Ok(decisions) => {
                    self.execute(decisions.clone());
                    decisions
                }
                Err(e) => {
                    self.fail(format!("Decider failed: {}", e));
                    Vec::new()
                }
            };
        self.publish();

        Ok(Delivery::Applied {
            sequence_id: event.sequence_id,
            decisions,
        })
    }

    /// Validate a decision batch as a whole, then apply it
    fn execute(&mut self, decisions: Vec<Decision>) {
        let resolved = match self.validate(&decisions) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(execution_id = %self.execution.id, error = %e, "Decision batch rejected");
                self.fail(e.to_string());
                return;
            }
        };

        for (decision, schedule) in decisions.into_iter().zip(resolved) {
            match (decision, schedule) {
                (Decision::ScheduleActivityTask(request), Some(schedule)) => {
                    let task = match self.dispatcher.schedule_resolved(
                        &self.execution.id,
                        &request,
                        schedule,
                    ) {
                        Ok(task) => task,
                        Err(e) => {
                            warn!(execution_id = %self.execution.id, error = %e, "Scheduling failed");
                            self.fail(rejection(e).to_string());
                            return;
                        }
                    };
                    self.outstanding.insert(task.activity_id.clone());
                    self.execution.append(EventPayload::ActivityScheduled {
                        activity_id: task.activity_id,
                        activity_type: task.activity_type,
                        task_list: task.task_list,
                        input: task.input,
                        control: task.control,
                    });
                }
                (Decision::RequestCancelActivityTask { activity_id }, _) => {
                    if let Err(e) = self
                        .dispatcher
                        .request_cancel(&self.execution.id, &activity_id)
                    {
                        warn!(execution_id = %self.execution.id, error = %e, "Cancel request failed");
                    }
                }
                (Decision::CompleteExecution { result }, _) => self.complete(result),
                (Decision::FailExecution { reason }, _) => self.fail(reason),
                (Decision::ScheduleActivityTask(_), None) => {}
            }
        }

        if !self.execution.is_closed() && self.decider.is_terminal() {
            let result = self.execution.data.clone();
            self.complete(result);
        }
    }

    fn validate(&self, decisions: &[Decision]) -> ConductorResult<Vec<Option<ResolvedSchedule>>> {
        let mut resolved = Vec::with_capacity(decisions.len());
        let mut batch_ids: HashSet<&ActivityId> = HashSet::new();

        for (index, decision) in decisions.iter().enumerate() {
            if decision.is_close() && index + 1 != decisions.len() {
                return Err(ConductorError::DecisionValidation(
                    "a close decision must be the last decision of its batch".to_string(),
                ));
            }

            match decision {
                Decision::ScheduleActivityTask(request) => {
                    let known = self.outstanding.contains(&request.activity_id)
                        || self.was_scheduled(&request.activity_id);
                    if known || !batch_ids.insert(&request.activity_id) {
                        return Err(ConductorError::DecisionValidation(format!(
                            "activity id {} is already in use",
                            request.activity_id
                        )));
                    }
                    let schedule = self
                        .dispatcher
                        .validate(&self.execution.id, request)
                        .map_err(rejection)?;
                    resolved.push(Some(schedule));
                }
                Decision::RequestCancelActivityTask { activity_id } => {
                    if !self.outstanding.contains(activity_id) && !batch_ids.contains(activity_id) {
                        return Err(ConductorError::DecisionValidation(format!(
                            "activity {} is not outstanding",
                            activity_id
                        )));
                    }
                    resolved.push(None);
                }
                Decision::CompleteExecution { .. } | Decision::FailExecution { .. } => {
                    resolved.push(None);
                }
            }
        }
        Ok(resolved)
    }

    fn was_scheduled(&self, activity_id: &ActivityId) -> bool {
        self.execution.history.iter().any(|event| {
            matches!(
                &event.payload,
                EventPayload::ActivityScheduled { activity_id: id, .. } if id == activity_id
            )
        })
    }

    /// Scheduled earlier and no longer outstanding
    fn is_resolved(&self, activity_id: &ActivityId) -> bool {
        !self.outstanding.contains(activity_id) && self.was_scheduled(activity_id)
    }

    fn complete(&mut self, result: serde_json::Value) {
        self.execution.close_completed(result);
        info!(execution_id = %self.execution.id, state = %self.decider.state(), "Execution completed");
    }

    fn fail(&mut self, reason: String) {
        warn!(execution_id = %self.execution.id, reason = %reason, "Execution failed");
        self.execution.close_failed(reason);
    }

    fn publish(&mut self) {
        self.execution.state = self.decider.state().to_string();
        self.status.send_replace(self.execution.status);
    }
}

/// Any error that rejects a decision batch, as a `DecisionValidation` error
fn rejection(error: ConductorError) -> ConductorError {
    match error {
        e @ ConductorError::DecisionValidation(_) => e,
        other => ConductorError::DecisionValidation(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::ActivityTypeKey;

    #[test]
    fn test_rejection_wraps_once() {
        let duplicate =
            rejection(ConductorError::DecisionValidation("activity id a is already in use".into()));
        assert_eq!(
            duplicate.to_string(),
            "Decision validation failed: activity id a is already in use"
        );

        let unknown = rejection(ConductorError::UnknownActivityType(ActivityTypeKey::new(
            "missing", "0.1.0",
        )));
        assert!(matches!(unknown, ConductorError::DecisionValidation(_)));
        assert_eq!(
            unknown.to_string().matches("Decision validation failed").count(),
            1
        );
    }
}
