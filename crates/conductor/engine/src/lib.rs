//! # Conductor Engine
//!
//! Runtime of the Conductor orchestration engine.
//!
//! - **Deciders**: declarative state tables that turn history events into decisions
//! - **Executions**: one actor per workflow run, applying events strictly in order
//! - **Task lists**: named FIFO queues long-polled by activity workers
//! - **Dispatcher**: activity task lifecycle, task tokens and heartbeats
//! - **Timeouts**: cancellable per-task deadlines for all four deadline classes
//!
//! ## Example
//!
//! ```rust,no_run
//! use conductor_engine::{Conductor, DeciderDefinition, EngineConfig, StateDefinition};
//! use conductor_types::{ActivityType, ScheduleActivity, WorkflowEventType, WorkflowType};
//!
//! # async fn run() -> conductor_types::ConductorResult<()> {
//! let conductor = Conductor::new(EngineConfig::default());
//! conductor.register_activity_type(ActivityType::new("load-user", "0.1.0", "users"))?;
//!
//! let workflow = WorkflowType::new("onboarding", "0.1.0");
//! conductor.register_decider(
//!     DeciderDefinition::new(workflow.clone(), "start")
//!         .state(
//!             "start",
//!             StateDefinition::new().on(WorkflowEventType::ExecutionStarted, |ctx, event| {
//!                 let input = event.input().cloned().unwrap_or_default();
//!                 ctx.schedule_activity(ScheduleActivity::new("load-user", input));
//!                 ctx.transition("loading");
//!                 Ok(())
//!             }),
//!         )
//!         .state(
//!             "loading",
//!             StateDefinition::new().on(WorkflowEventType::ActivityCompleted, |ctx, event| {
//!                 ctx.complete(event.result().cloned().unwrap_or_default());
//!                 Ok(())
//!             }),
//!         ),
//! )?;
//!
//! let id = conductor.start_execution(&workflow, serde_json::json!({"userId": "abc"}))?;
//! let task = conductor.poll("users", "worker-1").await?;
//! if let Some(token) = task.task_token {
//!     conductor.complete(token, serde_json::json!({"name": "Fred Flintstone"}))?;
//! }
//! let closed = conductor.wait_for_close(&id).await?;
//! # let _ = closed;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod conductor;
pub mod config;
pub mod decider;
pub mod dispatcher;
pub mod execution;
pub mod service;
pub mod task_list;
pub mod timeout_manager;

pub use conductor::Conductor;
pub use config::EngineConfig;
pub use decider::{DeciderContext, DeciderDefinition, DeciderRuntime, StateDefinition};
pub use dispatcher::{ActivityDispatcher, ActivityOutcome, ResolvedSchedule, WorkerResponse};
pub use execution::{Delivery, ExecutionHandle};
pub use service::ActivityService;
pub use task_list::{TaskList, TaskListRegistry};
pub use timeout_manager::{Expiry, TimeoutManager};
