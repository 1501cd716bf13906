//! Declarative state-table deciders
//!
//! A [`DeciderDefinition`] maps state names to a [`StateDefinition`]: an
//! optional on-enter hook plus handlers keyed by history event type. A state
//! with no handlers is terminal. The [`DeciderRuntime`] walks one execution
//! through the table, collecting the decisions its hooks and handlers emit.

use conductor_types::{
    ActivityId, ConductorError, ConductorResult, Decision, ExecutionId, ScheduleActivity,
    WorkflowEvent, WorkflowEventType, WorkflowType,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Longest chain of transitions a single event may trigger
const MAX_CHAINED_TRANSITIONS: usize = 32;

/// Hook run when a state is entered
pub type EnterHook = Arc<dyn Fn(&mut DeciderContext<'_>) -> ConductorResult<()> + Send + Sync>;

/// Handler run when an event of a given type is applied in a state
pub type EventHandler =
    Arc<dyn Fn(&mut DeciderContext<'_>, &WorkflowEvent) -> ConductorResult<()> + Send + Sync>;

// ── Definition ──────────────────────────────────────────────────────

/// One row of a decider's transition table
#[derive(Clone, Default)]
pub struct StateDefinition {
    on_enter: Option<EnterHook>,
    handlers: HashMap<WorkflowEventType, EventHandler>,
}

impl StateDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_enter<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut DeciderContext<'_>) -> ConductorResult<()> + Send + Sync + 'static,
    {
        self.on_enter = Some(Arc::new(hook));
        self
    }

    pub fn on<F>(mut self, event_type: WorkflowEventType, handler: F) -> Self
    where
        F: Fn(&mut DeciderContext<'_>, &WorkflowEvent) -> ConductorResult<()>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(event_type, Arc::new(handler));
        self
    }

    pub fn handles(&self, event_type: WorkflowEventType) -> bool {
        self.handlers.contains_key(&event_type)
    }

    pub fn is_terminal(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for StateDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handled: Vec<String> = self.handlers.keys().map(|t| t.to_string()).collect();
        handled.sort();
        f.debug_struct("StateDefinition")
            .field("on_enter", &self.on_enter.is_some())
            .field("handles", &handled)
            .finish()
    }
}

/// A workflow's decider: its type, initial state and transition table
#[derive(Clone, Debug)]
pub struct DeciderDefinition {
    workflow_type: WorkflowType,
    initial_state: String,
    states: HashMap<String, StateDefinition>,
}

impl DeciderDefinition {
    pub fn new(workflow_type: WorkflowType, initial_state: impl Into<String>) -> Self {
        Self {
            workflow_type,
            initial_state: initial_state.into(),
            states: HashMap::new(),
        }
    }

    pub fn state(mut self, name: impl Into<String>, definition: StateDefinition) -> Self {
        self.states.insert(name.into(), definition);
        self
    }

    pub fn workflow_type(&self) -> &WorkflowType {
        &self.workflow_type
    }

    pub fn initial_state(&self) -> &str {
        &self.initial_state
    }

    pub fn get_state(&self, name: &str) -> Option<&StateDefinition> {
        self.states.get(name)
    }

    /// Unknown states are not terminal
    pub fn is_terminal(&self, name: &str) -> bool {
        self.states.get(name).is_some_and(StateDefinition::is_terminal)
    }

    pub fn validate(&self) -> ConductorResult<()> {
        if self.workflow_type.name.trim().is_empty() || self.workflow_type.version.trim().is_empty() {
            return Err(ConductorError::InvalidDefinition(
                "decider requires a workflow name and version".to_string(),
            ));
        }
        let initial = self.states.get(&self.initial_state).ok_or_else(|| {
            ConductorError::InvalidDefinition(format!(
                "decider {} has no initial state '{}'",
                self.workflow_type, self.initial_state
            ))
        })?;
        if initial.is_terminal() {
            return Err(ConductorError::InvalidDefinition(format!(
                "initial state '{}' of decider {} is terminal",
                self.initial_state, self.workflow_type
            )));
        }
        Ok(())
    }
}

// ── Context ─────────────────────────────────────────────────────────

/// What a hook or handler can see and do during one step
pub struct DeciderContext<'a> {
    execution_id: &'a ExecutionId,
    state: &'a str,
    data: &'a mut serde_json::Value,
    decisions: &'a mut Vec<Decision>,
    transition: Option<String>,
}

impl<'a> DeciderContext<'a> {
    fn new(
        execution_id: &'a ExecutionId,
        state: &'a str,
        data: &'a mut serde_json::Value,
        decisions: &'a mut Vec<Decision>,
    ) -> Self {
        Self {
            execution_id,
            state,
            data,
            decisions,
            transition: None,
        }
    }

    pub fn execution_id(&self) -> &ExecutionId {
        self.execution_id
    }

    /// State whose hook or handler is running
    pub fn state(&self) -> &str {
        self.state
    }

    pub fn data(&self) -> &serde_json::Value {
        self.data
    }

    pub fn data_mut(&mut self) -> &mut serde_json::Value {
        self.data
    }

    /// Set a field on the data bag, turning it into an object if needed
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        if !self.data.is_object() {
            *self.data = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(map) = self.data.as_object_mut() {
            map.insert(key.into(), value);
        }
    }

    /// Move to `state` once the current step returns. The last call wins.
    pub fn transition(&mut self, state: impl Into<String>) {
        self.transition = Some(state.into());
    }

    pub fn decide(&mut self, decision: Decision) {
        self.decisions.push(decision);
    }

    pub fn schedule_activity(&mut self, activity: ScheduleActivity) -> ActivityId {
        let activity_id = activity.activity_id.clone();
        self.decide(Decision::schedule(activity));
        activity_id
    }

    pub fn request_cancel_activity(&mut self, activity_id: ActivityId) {
        self.decide(Decision::RequestCancelActivityTask { activity_id });
    }

    pub fn complete(&mut self, result: serde_json::Value) {
        self.decide(Decision::complete(result));
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.decide(Decision::fail(reason));
    }
}

// ── Runtime ─────────────────────────────────────────────────────────

/// Drives one execution through a decider's transition table
#[derive(Debug, Clone)]
pub struct DeciderRuntime {
    definition: Arc<DeciderDefinition>,
    state: String,
}

impl DeciderRuntime {
    pub fn new(definition: Arc<DeciderDefinition>) -> Self {
        let state = definition.initial_state().to_string();
        Self { definition, state }
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.definition.is_terminal(&self.state)
    }

    pub fn definition(&self) -> &Arc<DeciderDefinition> {
        &self.definition
    }

    /// Run the initial state's on-enter hook
    pub fn initialize(
        &mut self,
        execution_id: &ExecutionId,
        data: &mut serde_json::Value,
    ) -> ConductorResult<Vec<Decision>> {
        let mut decisions = Vec::new();
        let definition = self.definition.clone();
        let next = match definition.get_state(&self.state).and_then(|s| s.on_enter.clone()) {
            Some(hook) => {
                let mut ctx = DeciderContext::new(execution_id, &self.state, data, &mut decisions);
                hook(&mut ctx)?;
                ctx.transition
            }
            None => None,
        };
        self.follow(next, execution_id, data, &mut decisions)?;
        Ok(decisions)
    }

    /// Apply one history event and return the decisions it produced.
    ///
    /// Events the current state has no handler for are ignored.
    pub fn apply(
        &mut self,
        execution_id: &ExecutionId,
        data: &mut serde_json::Value,
        event: &WorkflowEvent,
    ) -> ConductorResult<Vec<Decision>> {
        if self.is_terminal() {
            return Err(ConductorError::ExecutionClosed(execution_id.clone()));
        }

        let definition = self.definition.clone();
        let Some(handler) = definition
            .get_state(&self.state)
            .and_then(|s| s.handlers.get(&event.event_type()).cloned())
        else {
            debug!(
                execution_id = %execution_id,
                state = %self.state,
                event_type = %event.event_type(),
                "No handler for event in current state; ignored"
            );
            return Ok(Vec::new());
        };

        let mut decisions = Vec::new();
        let next = {
            let mut ctx = DeciderContext::new(execution_id, &self.state, data, &mut decisions);
            handler(&mut ctx, event)?;
            ctx.transition
        };
        self.follow(next, execution_id, data, &mut decisions)?;
        Ok(decisions)
    }

    fn follow(
        &mut self,
        mut next: Option<String>,
        execution_id: &ExecutionId,
        data: &mut serde_json::Value,
        decisions: &mut Vec<Decision>,
    ) -> ConductorResult<()> {
        let definition = self.definition.clone();
        let mut hops = 0;

        while let Some(target) = next.take() {
            hops += 1;
            if hops > MAX_CHAINED_TRANSITIONS {
                return Err(ConductorError::DeciderFailed(format!(
                    "more than {} chained transitions from state '{}'",
                    MAX_CHAINED_TRANSITIONS, self.state
                )));
            }
            if definition.is_terminal(&self.state) {
                return Err(ConductorError::DeciderFailed(format!(
                    "terminal state '{}' can not transition to '{}'",
                    self.state, target
                )));
            }
            let state = definition.get_state(&target).ok_or_else(|| {
                ConductorError::DeciderFailed(format!("unknown state '{}'", target))
            })?;

            debug!(execution_id = %execution_id, from = %self.state, to = %target, "State transition");
            self.state = target;

            if let Some(hook) = state.on_enter.clone() {
                let mut ctx = DeciderContext::new(execution_id, &self.state, data, decisions);
                hook(&mut ctx)?;
                next = ctx.transition;
            }
        }
        Ok(())
    }

    /// Rebuild a runtime and data bag from an execution's history.
    ///
    /// Only events the engine delivers to deciders are re-applied; the
    /// decisions produced along the way are discarded.
    pub fn replay(
        definition: Arc<DeciderDefinition>,
        execution_id: &ExecutionId,
        history: &[WorkflowEvent],
    ) -> ConductorResult<(Self, serde_json::Value)> {
        let mut runtime = Self::new(definition);
        let mut data = serde_json::Value::Null;
        runtime.initialize(execution_id, &mut data)?;

        for event in history {
            let delivered = matches!(
                event.event_type(),
                WorkflowEventType::ExecutionStarted
                    | WorkflowEventType::ActivityCompleted
                    | WorkflowEventType::ActivityFailed
                    | WorkflowEventType::ActivityTimedOut
                    | WorkflowEventType::ActivityCanceled
            );
            if !delivered || runtime.is_terminal() {
                continue;
            }
            runtime.apply(execution_id, &mut data, event)?;
        }
        Ok((runtime, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::EventPayload;

    fn onboarding() -> DeciderDefinition {
        DeciderDefinition::new(WorkflowType::new("onboarding", "0.1.0"), "uninitialized")
            .state(
                "uninitialized",
                StateDefinition::new().on(WorkflowEventType::ExecutionStarted, |ctx, event| {
                    let input = event.input().cloned().unwrap_or_default();
                    ctx.set("job", input);
                    ctx.transition("identification");
                    Ok(())
                }),
            )
            .state(
                "identification",
                StateDefinition::new()
                    .on_enter(|ctx| {
                        let user_id = ctx.data()["job"]["userId"].clone();
                        ctx.schedule_activity(ScheduleActivity::new(
                            "load-user",
                            serde_json::json!({ "userId": user_id }),
                        ));
                        Ok(())
                    })
                    .on(WorkflowEventType::ActivityCompleted, |ctx, event| {
                        ctx.set("user", event.result().cloned().unwrap_or_default());
                        ctx.transition("completed");
                        Ok(())
                    })
                    .on(WorkflowEventType::ActivityTimedOut, |ctx, _| {
                        ctx.transition("failed");
                        Ok(())
                    }),
            )
            .state(
                "completed",
                StateDefinition::new().on_enter(|ctx| {
                    let result = ctx.data()["user"].clone();
                    ctx.complete(result);
                    Ok(())
                }),
            )
            .state(
                "failed",
                StateDefinition::new().on_enter(|ctx| {
                    ctx.fail("load-user timed out");
                    Ok(())
                }),
            )
    }

    fn started(sequence_id: u64) -> WorkflowEvent {
        WorkflowEvent::new(
            sequence_id,
            EventPayload::ExecutionStarted {
                workflow_type: WorkflowType::new("onboarding", "0.1.0"),
                input: serde_json::json!({"userId": "abc"}),
            },
        )
    }

    fn completed(sequence_id: u64, activity_id: ActivityId) -> WorkflowEvent {
        WorkflowEvent::new(
            sequence_id,
            EventPayload::ActivityCompleted {
                activity_id,
                result: serde_json::json!({"name": "Fred Flintstone"}),
            },
        )
    }

    #[test]
    fn test_definition_validation() {
        assert!(onboarding().validate().is_ok());

        let missing = DeciderDefinition::new(WorkflowType::new("wf", "1"), "nowhere");
        assert!(matches!(
            missing.validate(),
            Err(ConductorError::InvalidDefinition(_))
        ));

        let terminal_start = DeciderDefinition::new(WorkflowType::new("wf", "1"), "done")
            .state("done", StateDefinition::new());
        assert!(terminal_start.validate().is_err());
    }

    #[test]
    fn test_apply_runs_handler_then_on_enter() {
        let id = ExecutionId::generate();
        let mut data = serde_json::Value::Null;
        let mut runtime = DeciderRuntime::new(Arc::new(onboarding()));
        assert!(runtime.initialize(&id, &mut data).unwrap().is_empty());

        let decisions = runtime.apply(&id, &mut data, &started(1)).unwrap();
        assert_eq!(runtime.state(), "identification");
        assert_eq!(data["job"]["userId"], "abc");
        assert_eq!(decisions.len(), 1);
        let Decision::ScheduleActivityTask(schedule) = &decisions[0] else {
            panic!("expected a schedule decision");
        };
        assert_eq!(schedule.name, "load-user");
        assert_eq!(schedule.input["userId"], "abc");
    }

    #[test]
    fn test_unhandled_event_is_ignored() {
        let id = ExecutionId::generate();
        let mut data = serde_json::Value::Null;
        let mut runtime = DeciderRuntime::new(Arc::new(onboarding()));

        let decisions = runtime
            .apply(&id, &mut data, &completed(1, ActivityId::new("a1")))
            .unwrap();
        assert!(decisions.is_empty());
        assert_eq!(runtime.state(), "uninitialized");
    }

    #[test]
    fn test_terminal_state_completes() {
        let id = ExecutionId::generate();
        let mut data = serde_json::Value::Null;
        let mut runtime = DeciderRuntime::new(Arc::new(onboarding()));
        runtime.apply(&id, &mut data, &started(1)).unwrap();

        let decisions = runtime
            .apply(&id, &mut data, &completed(3, ActivityId::new("a1")))
            .unwrap();
        assert!(runtime.is_terminal());
        assert_eq!(
            decisions,
            vec![Decision::complete(serde_json::json!({"name": "Fred Flintstone"}))]
        );

        assert!(matches!(
            runtime.apply(&id, &mut data, &completed(4, ActivityId::new("a1"))),
            Err(ConductorError::ExecutionClosed(_))
        ));
    }

    #[test]
    fn test_unknown_target_state_fails() {
        let definition = DeciderDefinition::new(WorkflowType::new("wf", "1"), "start").state(
            "start",
            StateDefinition::new().on(WorkflowEventType::ExecutionStarted, |ctx, _| {
                ctx.transition("missing");
                Ok(())
            }),
        );
        let mut runtime = DeciderRuntime::new(Arc::new(definition));
        let mut data = serde_json::Value::Null;
        let result = runtime.apply(&ExecutionId::generate(), &mut data, &started(1));
        assert!(matches!(result, Err(ConductorError::DeciderFailed(_))));
    }

    #[test]
    fn test_runaway_transition_chain_is_bounded() {
        let definition = DeciderDefinition::new(WorkflowType::new("wf", "1"), "ping")
            .state(
                "ping",
                StateDefinition::new()
                    .on_enter(|ctx| {
                        ctx.transition("pong");
                        Ok(())
                    })
                    .on(WorkflowEventType::ExecutionStarted, |ctx, _| {
                        ctx.transition("pong");
                        Ok(())
                    }),
            )
            .state(
                "pong",
                StateDefinition::new()
                    .on_enter(|ctx| {
                        ctx.transition("ping");
                        Ok(())
                    })
                    .on(WorkflowEventType::ActivityCompleted, |_, _| Ok(())),
            );
        let mut runtime = DeciderRuntime::new(Arc::new(definition));
        let mut data = serde_json::Value::Null;
        let result = runtime.initialize(&ExecutionId::generate(), &mut data);
        assert!(matches!(result, Err(ConductorError::DeciderFailed(_))));
    }

    #[test]
    fn test_replay_rebuilds_state_and_data() {
        let id = ExecutionId::generate();
        let activity_id = ActivityId::new("a1");
        let history = vec![
            started(1),
            WorkflowEvent::new(
                2,
                EventPayload::ActivityScheduled {
                    activity_id: activity_id.clone(),
                    activity_type: conductor_types::ActivityTypeKey::new("load-user", "0.1.0"),
                    task_list: "users".to_string(),
                    input: serde_json::json!({"userId": "abc"}),
                    control: None,
                },
            ),
            completed(3, activity_id),
        ];

        let (runtime, data) = DeciderRuntime::replay(Arc::new(onboarding()), &id, &history).unwrap();
        assert_eq!(runtime.state(), "completed");
        assert_eq!(data["user"]["name"], "Fred Flintstone");
        assert_eq!(data["job"]["userId"], "abc");
    }
}
