//! Cancellable per-task deadlines
//!
//! Every armed deadline is a sleeping tokio task. When it wakes it sends an
//! [`Expiry`] to the dispatcher. Each arm gets a fresh generation number, so
//! an expiry that raced with a disarm or re-arm is recognised as stale by
//! [`TimeoutManager::claim`] and dropped.
//!
//! A deadline too far out to be represented as an [`Instant`] never fires
//! and is treated as unbounded. After [`TimeoutManager::shutdown`] nothing is
//! armed again.

use conductor_types::{TaskKey, Timeout, TimeoutKind};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// A deadline that elapsed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expiry {
    pub key: TaskKey,
    pub kind: TimeoutKind,
    generation: u64,
}

#[derive(Debug)]
struct Deadline {
    generation: u64,
    fires_at: Instant,
    timer: AbortHandle,
}

/// Tracks the armed deadlines of every live activity task
#[derive(Debug)]
pub struct TimeoutManager {
    deadlines: DashMap<TaskKey, HashMap<TimeoutKind, Deadline>>,
    next_generation: AtomicU64,
    closed: AtomicBool,
    expired_tx: mpsc::UnboundedSender<Expiry>,
}

impl TimeoutManager {
    /// Create a manager and the receiving end of its expiry stream
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Expiry>) {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        let manager = Self {
            deadlines: DashMap::new(),
            next_generation: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            expired_tx,
        };
        (manager, expired_rx)
    }

    /// Arm `kind` for a task, replacing any deadline of the same kind.
    /// Unbounded or unrepresentable timeouts disarm instead. Returns the
    /// instant it fires at.
    pub fn arm(&self, key: &TaskKey, kind: TimeoutKind, timeout: Timeout) -> Option<Instant> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let Some(duration) = timeout.duration() else {
            self.disarm(key, kind);
            return None;
        };
        let Some(fires_at) = Instant::now().checked_add(duration) else {
            debug!(task = %key, timeout = %kind, "Deadline beyond the clock range; left unbounded");
            self.disarm(key, kind);
            return None;
        };

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let expiry = Expiry {
            key: key.clone(),
            kind,
            generation,
        };
        let tx = self.expired_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(fires_at).await;
            let _ = tx.send(expiry);
        })
        .abort_handle();

        let previous = self.deadlines.entry(key.clone()).or_default().insert(
            kind,
            Deadline {
                generation,
                fires_at,
                timer,
            },
        );
        if let Some(previous) = previous {
            previous.timer.abort();
        }
        // Lost a race with shutdown
        if self.closed.load(Ordering::SeqCst) {
            self.disarm(key, kind);
            return None;
        }

        trace!(task = %key, timeout = %kind, secs = duration.as_secs(), "Deadline armed");
        Some(fires_at)
    }

    /// Disarm one deadline. Returns false if it was not armed.
    pub fn disarm(&self, key: &TaskKey, kind: TimeoutKind) -> bool {
        let removed = match self.deadlines.get_mut(key) {
            Some(mut slots) => slots.remove(&kind),
            None => None,
        };
        self.deadlines.remove_if(key, |_, slots| slots.is_empty());

        match removed {
            Some(deadline) => {
                deadline.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Disarm every deadline of a task
    pub fn disarm_all(&self, key: &TaskKey) {
        if let Some((_, slots)) = self.deadlines.remove(key) {
            for deadline in slots.into_values() {
                deadline.timer.abort();
            }
        }
    }

    /// Consume an expiry. Returns false when the deadline it belongs to was
    /// disarmed or re-armed after the timer fired.
    pub fn claim(&self, expiry: &Expiry) -> bool {
        let current = match self.deadlines.get_mut(&expiry.key) {
            Some(mut slots) => {
                let is_current = slots
                    .get(&expiry.kind)
                    .is_some_and(|d| d.generation == expiry.generation);
                if is_current {
                    slots.remove(&expiry.kind);
                }
                is_current
            }
            None => false,
        };
        self.deadlines.remove_if(&expiry.key, |_, slots| slots.is_empty());
        current
    }

    pub fn is_armed(&self, key: &TaskKey, kind: TimeoutKind) -> bool {
        self.deadline(key, kind).is_some()
    }

    /// When the armed deadline of `kind` fires
    pub fn deadline(&self, key: &TaskKey, kind: TimeoutKind) -> Option<Instant> {
        self.deadlines
            .get(key)
            .and_then(|slots| slots.get(&kind).map(|d| d.fires_at))
    }

    /// Armed deadline kinds of a task, in [`TimeoutKind::ALL`] order
    pub fn armed(&self, key: &TaskKey) -> Vec<TimeoutKind> {
        match self.deadlines.get(key) {
            Some(slots) => TimeoutKind::ALL
                .into_iter()
                .filter(|kind| slots.contains_key(kind))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Tasks with at least one armed deadline
    pub fn tracked(&self) -> usize {
        self.deadlines.len()
    }

    /// Abort every timer and refuse to arm new ones
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for entry in self.deadlines.iter() {
            for deadline in entry.value().values() {
                deadline.timer.abort();
            }
        }
        self.deadlines.clear();
    }
}
