//! Domain types for the Conductor orchestration engine
//!
//! Conductor follows the decider/activity-worker model: a decider interprets
//! the history of one workflow execution and emits decisions, while activity
//! workers claim scheduled tasks from named task lists and report outcomes
//! back through a single-use task token.
//!
//! This crate holds the data model shared by the engine and by workers:
//!
//! - [`ExecutionId`], [`ActivityId`], [`TaskToken`]: identifiers
//! - [`TimeoutPolicy`]: the four independent deadline classes of a task
//! - [`ActivityType`] / [`ActivityTask`]: registered work and its instances
//! - [`WorkflowEvent`]: append-only execution history
//! - [`Decision`]: what a decider asks the engine to do next
//! - [`ConductorError`]: the error taxonomy

#![deny(unsafe_code)]

pub mod activity;
pub mod decision;
pub mod error;
pub mod event;
pub mod execution;
pub mod ids;
pub mod timeout;

pub use activity::*;
pub use decision::*;
pub use error::*;
pub use event::*;
pub use execution::*;
pub use ids::*;
pub use timeout::*;
