//! The orchestrator loop: drives a job to completion by executing ready
//! tasks concurrently, spawning validated children at runtime, and
//! propagating status through the dependency graph.
//!
//! The registry of tasks and the graph are shared mutable state guarded by
//! one mutex; handler execution happens outside it. Workers are cooperative
//! tokio tasks joined at an iteration barrier, so every effect from
//! iteration `k` is visible to iteration `k + 1`.

mod context;
mod spawn;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _, Result};
use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::JobError;
use crate::graph::TaskGraph;
use crate::model::{ChildTaskSpec, JobStatus, Task, TaskStatus};
use crate::plan::validate_plan;
use crate::registry::HandlerRegistry;

pub use context::JobContext;

/// Shared mutable job state: the task graph (which owns every task), the
/// set of retired task ids, and the global failed-task flag.
pub(crate) struct JobState {
    pub graph: TaskGraph,
    pub completed: HashSet<String>,
    pub failed: bool,
}

impl JobState {
    pub fn new(graph: TaskGraph) -> Self {
        Self {
            graph,
            completed: HashSet::new(),
            failed: false,
        }
    }
}

/// Execution limits and flags resolved from the job request.
#[derive(Debug, Clone)]
pub(crate) struct EngineConfig {
    pub abort_on_failure: bool,
    pub ai_planning: bool,
    pub max_tasks: usize,
    pub max_depth: u32,
    pub verbose: bool,
    pub timeout: Option<Duration>,
}

/// Run the main loop until every task has retired.
///
/// Returns the aggregate job status, [`JobError::DeadlineExceeded`] when the
/// job-wide deadline elapses, or [`JobError::Internal`] on a runtime
/// deadlock (no executable task while the job is incomplete).
pub(crate) async fn run_job(
    state: Arc<Mutex<JobState>>,
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
) -> Result<JobStatus, JobError> {
    let started = Instant::now();

    loop {
        let (total, done) = {
            let st = state.lock().await;
            (st.graph.len(), st.completed.len())
        };
        if done >= total {
            break;
        }

        if let Some(timeout) = config.timeout {
            if started.elapsed() > timeout {
                return Err(JobError::DeadlineExceeded(format!(
                    "job timed out after {}ms: {done}/{total} tasks completed",
                    started.elapsed().as_millis()
                )));
            }
        }

        let ready = {
            let st = state.lock().await;
            st.graph.executable_tasks(&st.completed)
        };
        if ready.is_empty() {
            let incomplete = {
                let st = state.lock().await;
                let mut ids: Vec<String> = st
                    .graph
                    .node_ids()
                    .filter(|id| !st.completed.contains(*id))
                    .map(str::to_owned)
                    .collect();
                ids.sort();
                ids
            };
            return Err(JobError::Internal(format!(
                "deadlock detected: no executable tasks; incomplete tasks: {}",
                incomplete.join(", ")
            )));
        }

        tracing::debug!(
            ready = ready.len(),
            completed = done,
            total,
            "scheduling iteration"
        );

        let workers: Vec<_> = ready
            .into_iter()
            .map(|task_id| {
                let state = Arc::clone(&state);
                let registry = Arc::clone(&registry);
                let config = config.clone();
                tokio::spawn(async move {
                    execute_task(task_id, state, registry, config).await;
                })
            })
            .collect();

        for joined in join_all(workers).await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "worker panicked");
                state.lock().await.failed = true;
            }
        }
    }

    let failed = state.lock().await.failed;
    Ok(if failed {
        JobStatus::Failed
    } else {
        JobStatus::Succeeded
    })
}

/// What the pre-check decided for a ready task.
enum Action {
    /// The task was retired under the lock (planned placeholder, pre-marked
    /// terminal, or aborted because of an earlier failure).
    Retired,
    /// Run the handler against this snapshot.
    Run(Box<Task>),
}

/// One worker: pre-check, handler call, result handling.
async fn execute_task(
    task_id: String,
    state: Arc<Mutex<JobState>>,
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
) {
    let action = {
        let mut guard = state.lock().await;
        let st = &mut *guard;
        let failed_already = st.failed;
        let Some(task) = st.graph.get_node_mut(&task_id) else {
            tracing::error!(task_id = %task_id, "ready task disappeared from graph");
            st.failed = true;
            return;
        };

        match task.status {
            TaskStatus::Planned => {
                // Plan-mode outcome, not a failure: the task awaits external
                // approval and retires immediately.
                let now = Utc::now();
                task.started_at = Some(now);
                task.completed_at = Some(now);
                st.completed.insert(task_id.clone());
                tracing::info!(task_id = %task_id, "planned task awaiting approval");
                Action::Retired
            }
            TaskStatus::Failed | TaskStatus::Aborted => {
                if task.output.is_none() {
                    task.output = Some(json!({
                        "aborted": true,
                        "reason": "a dependency failed or was aborted",
                    }));
                }
                task.completed_at = Some(Utc::now());
                st.completed.insert(task_id.clone());
                tracing::info!(task_id = %task_id, status = %task.status, "retired pre-marked task");
                Action::Retired
            }
            _ if failed_already && config.abort_on_failure => {
                task.status = TaskStatus::Aborted;
                task.output = Some(json!({
                    "aborted": true,
                    "reason": "a previous task failed and abortOnFailure is set",
                }));
                task.completed_at = Some(Utc::now());
                st.completed.insert(task_id.clone());
                tracing::info!(task_id = %task_id, "aborted due to earlier failure");
                Action::Retired
            }
            _ => {
                task.status = TaskStatus::Started;
                task.started_at = Some(Utc::now());
                Action::Run(Box::new(task.clone()))
            }
        }
    };

    let Action::Run(snapshot) = action else {
        return;
    };

    tracing::info!(
        task_id = %task_id,
        service = %snapshot.service,
        command = %snapshot.command,
        depth = snapshot.depth,
        "task started"
    );

    if let Err(err) = run_handler(&snapshot, &state, &registry, &config).await {
        fail_task(&state, &task_id, &format!("{err:#}")).await;
    }
}

/// Invoke the handler for a started task and apply its result: store
/// output/audit, spawn validated children, propagate statuses, and mark the
/// task succeeded.
async fn run_handler(
    task: &Task,
    state: &Arc<Mutex<JobState>>,
    registry: &Arc<HandlerRegistry>,
    config: &EngineConfig,
) -> Result<()> {
    let handler = registry.get(&task.service, &task.command).ok_or_else(|| {
        anyhow!(
            "no handler registered for {}.{}",
            task.service,
            task.command
        )
    })?;

    let ctx = JobContext::new(Arc::clone(state), Arc::clone(registry), config.verbose);
    let value = handler.call(task, &ctx).await?;
    let (output, audit, children) = decompose_result(value)?;

    // Validate the child batch before touching shared state. The registry
    // is immutable for the lifetime of the job, so this needs no lock.
    let validated: Option<Vec<ChildTaskSpec>> = match children {
        Some(specs) if !specs.is_empty() => {
            let plan = json!({ "tasks": specs });
            let validation = validate_plan(&plan, &task.id, registry);
            if !validation.report.is_valid {
                bail!(
                    "child task validation failed: {}",
                    validation.report.errors.join("; ")
                );
            }
            validation.tasks
        }
        _ => None,
    };

    let mut st = state.lock().await;
    {
        let node = st
            .graph
            .get_node_mut(&task.id)
            .with_context(|| format!("task {:?} disappeared from graph", task.id))?;
        node.output = Some(output);
        node.audit = audit;
    }

    if let Some(specs) = &validated {
        spawn::spawn_children(&mut st.graph, &task.id, specs, registry, config)?;
        let changed = spawn::cascade_statuses(&mut st.graph);
        if changed > 0 {
            tracing::debug!(task_id = %task.id, changed, "status cascade after spawn");
        }
        st.graph.validate_no_cycles().context("post-cascade validation")?;
    }

    let node = st
        .graph
        .get_node_mut(&task.id)
        .with_context(|| format!("task {:?} disappeared from graph", task.id))?;
    node.child_tasks = validated;
    node.status = TaskStatus::Succeeded;
    node.completed_at = Some(Utc::now());
    st.completed.insert(task.id.clone());
    tracing::info!(task_id = %task.id, "task succeeded");
    Ok(())
}

/// Fail a task: record the error output, set the global failed flag, abort
/// its direct `Pending` dependents, and cascade to transitive ones.
async fn fail_task(state: &Arc<Mutex<JobState>>, task_id: &str, message: &str) {
    tracing::warn!(task_id = %task_id, error = %message, "task failed");
    let mut st = state.lock().await;
    st.failed = true;

    if let Some(task) = st.graph.get_node_mut(task_id) {
        task.status = TaskStatus::Failed;
        task.output = Some(json!({ "error": message }));
        task.completed_at = Some(Utc::now());
    }
    st.completed.insert(task_id.to_owned());

    let dependents: Vec<String> = st.graph.successors_of(task_id).to_vec();
    for dependent_id in dependents {
        if let Some(dependent) = st.graph.get_node_mut(&dependent_id) {
            if dependent.status == TaskStatus::Pending {
                dependent.status = TaskStatus::Aborted;
            }
        }
    }
    let changed = spawn::cascade_statuses(&mut st.graph);
    if changed > 0 {
        tracing::debug!(task_id = %task_id, changed, "status cascade after failure");
    }
}

/// Split a handler's returned record into output, audit, and child specs.
///
/// A record carrying any of the distinguished keys is structured: `output`
/// is taken verbatim when present, otherwise the remaining keys become the
/// output. `childTasks` is never stored inside `output`. Non-object results
/// become the output as-is.
fn decompose_result(value: Value) -> Result<(Value, Option<Value>, Option<Vec<ChildTaskSpec>>)> {
    match value {
        Value::Object(mut map) => {
            let audit = map.remove("audit");
            let children = match map.remove("childTasks") {
                None | Some(Value::Null) => None,
                Some(raw) => Some(
                    serde_json::from_value::<Vec<ChildTaskSpec>>(raw)
                        .context("childTasks must be an array of child task specs")?,
                ),
            };
            let output = match map.remove("output") {
                Some(explicit) => explicit,
                None => Value::Object(map),
            };
            Ok((output, audit, children))
        }
        other => Ok((other, None, None)),
    }
}
