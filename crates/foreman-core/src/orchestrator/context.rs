//! Read-only view of job state exposed to handlers.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::model::{Task, TaskStatus};
use crate::registry::HandlerRegistry;

use super::JobState;

/// The only channel through which a handler observes the rest of the job.
///
/// Lookups return clones; handlers never hold references into the shared
/// graph and never mutate other tasks.
#[derive(Clone)]
pub struct JobContext {
    state: Arc<Mutex<JobState>>,
    registry: Arc<HandlerRegistry>,
    verbose: bool,
}

impl JobContext {
    pub(crate) fn new(
        state: Arc<Mutex<JobState>>,
        registry: Arc<HandlerRegistry>,
        verbose: bool,
    ) -> Self {
        Self {
            state,
            registry,
            verbose,
        }
    }

    /// Look up a task by id.
    pub async fn get_task(&self, id: &str) -> Option<Task> {
        self.state.lock().await.graph.get_node(id).cloned()
    }

    /// Look up a task's output by id.
    pub async fn get_task_output(&self, id: &str) -> Option<Value> {
        self.state
            .lock()
            .await
            .graph
            .get_node(id)
            .and_then(|task| task.output.clone())
    }

    /// Look up a task's status by id.
    pub async fn get_task_status(&self, id: &str) -> Option<TaskStatus> {
        self.state.lock().await.graph.get_node(id).map(|task| task.status)
    }

    /// Whether the job was submitted with verbose diagnostics enabled.
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// The job's handler registry (capability catalog included).
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }
}
