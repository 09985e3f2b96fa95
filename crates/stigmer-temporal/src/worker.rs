//! Worker registration

use std::collections::HashMap;

use crate::workflow::{ActivityFn, WorkflowFn};

/// Everything a worker serves on one task queue. A worker registers only
/// what it implements: the daemon's workers carry orchestration workflows
/// and local/system activities, never runner activities.
#[derive(Clone, Default)]
pub struct WorkerRegistration {
    pub task_queue: String,
    pub workflows: HashMap<String, WorkflowFn>,
    pub activities: HashMap<String, ActivityFn>,
    pub local_activities: HashMap<String, ActivityFn>,
}

impl WorkerRegistration {
    pub fn new(task_queue: impl Into<String>) -> Self {
        Self {
            task_queue: task_queue.into(),
            ..Default::default()
        }
    }

    pub fn register_workflow(mut self, name: impl Into<String>, f: WorkflowFn) -> Self {
        self.workflows.insert(name.into(), f);
        self
    }

    pub fn register_activity(mut self, name: impl Into<String>, f: ActivityFn) -> Self {
        self.activities.insert(name.into(), f);
        self
    }

    pub fn register_local_activity(mut self, name: impl Into<String>, f: ActivityFn) -> Self {
        self.local_activities.insert(name.into(), f);
        self
    }
}

/// Running worker. Dropping the handle leaves the worker running; call
/// `shutdown` to stop it.
pub struct WorkerHandle {
    task_queue: String,
    shutdown: Option<Box<dyn FnOnce() + Send>>,
}

impl WorkerHandle {
    pub fn new(task_queue: impl Into<String>, shutdown: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            task_queue: task_queue.into(),
            shutdown: Some(shutdown),
        }
    }

    pub fn task_queue(&self) -> &str {
        &self.task_queue
    }

    pub fn shutdown(mut self) {
        if let Some(f) = self.shutdown.take() {
            f();
        }
    }
}
