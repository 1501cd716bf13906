//! Task lists: named FIFO queues of scheduled activity tasks
//!
//! A task list only holds task keys. The dispatcher owns the tasks
//! themselves and decides whether a dequeued key is still claimable.

use conductor_types::{ConductorError, ConductorResult, TaskKey};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

/// A named queue polled by activity workers
#[derive(Debug)]
pub struct TaskList {
    name: String,
    queue: Mutex<VecDeque<TaskKey>>,
    pollers: Mutex<BTreeSet<String>>,
    available: Notify,
}

impl TaskList {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            pollers: Mutex::new(BTreeSet::new()),
            available: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of queued keys, including ones the dispatcher will skip
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Identities of workers that have polled this list
    pub fn pollers(&self) -> Vec<String> {
        self.pollers.lock().iter().cloned().collect()
    }

    pub(crate) fn record_poller(&self, identity: &str) {
        let mut pollers = self.pollers.lock();
        if !pollers.contains(identity) {
            debug!(task_list = %self.name, identity = %identity, "New poller on task list");
            pollers.insert(identity.to_string());
        }
    }

    pub(crate) fn push(&self, key: TaskKey) {
        self.queue.lock().push_back(key);
        self.available.notify_one();
    }

    pub(crate) fn try_pop(&self) -> Option<TaskKey> {
        self.queue.lock().pop_front()
    }

    /// Drop a queued key. Returns false if it was not queued.
    pub(crate) fn remove(&self, key: &TaskKey) -> bool {
        let mut queue = self.queue.lock();
        let before = queue.len();
        queue.retain(|queued| queued != key);
        queue.len() != before
    }

    /// Wait for the next queued key.
    ///
    /// Cancel-safe: a key is only removed from the queue in the same poll
    /// that returns it, so dropping this future never loses one.
    pub(crate) async fn next(&self) -> TaskKey {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(key) = self.try_pop() {
                return key;
            }
            notified.await;
        }
    }
}

/// Registry of all task lists known to the engine
#[derive(Debug, Default)]
pub struct TaskListRegistry {
    lists: DashMap<String, Arc<TaskList>>,
}

impl TaskListRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a list. Registering an existing name returns the existing list.
    pub fn register(&self, name: &str) -> Arc<TaskList> {
        self.lists
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(task_list = %name, "Task list registered");
                Arc::new(TaskList::new(name))
            })
            .clone()
    }

    pub fn resolve(&self, name: &str) -> ConductorResult<Arc<TaskList>> {
        self.lists
            .get(name)
            .map(|list| list.clone())
            .ok_or_else(|| ConductorError::UnknownTaskList(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lists.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lists.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
