//! # Conductor Worker
//!
//! Runs activity bodies for tasks claimed from a Conductor task list.
//!
//! A worker long-polls one task list, runs the body registered for the
//! task's activity type and reports the outcome. While a body runs, a
//! heartbeat is sent every 45% of the task's heartbeat timeout; a
//! cancellation request observed on a heartbeat acknowledgement is surfaced
//! through [`ActivityContext::cancelled`].

#![deny(unsafe_code)]

pub mod activity;
pub mod config;
pub mod heartbeat;
pub mod worker;

pub use activity::{activity_fn, Activity, ActivityContext, ActivityError, FnActivity};
pub use config::WorkerConfig;
pub use heartbeat::{
    HeartbeatGuard, HeartbeatMonitor, DEFAULT_HEARTBEAT_FRACTION, MAX_HEARTBEAT_INTERVAL,
};
pub use worker::{ActivityWorker, WorkerHandle, WorkerState};
