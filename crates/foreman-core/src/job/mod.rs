//! Job submission boundary.
//!
//! Validates a submission synchronously (configuration errors reject before
//! anything runs), builds the initial task graph, drives the orchestrator,
//! and assembles the final report with tasks in `startedAt` order.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::JobError;
use crate::graph::TaskGraph;
use crate::model::{JobReport, JobRequest, StatusCounts, Task, TaskStatus};
use crate::orchestrator::{run_job, EngineConfig, JobState};
use crate::registry::HandlerRegistry;

/// Execute a job to completion.
///
/// Rejects malformed submissions with [`JobError::InvalidArgument`]; a
/// job-wide timeout surfaces as [`JobError::DeadlineExceeded`] and a runtime
/// deadlock as [`JobError::Internal`]. Task-scoped failures do not error:
/// they are reported through task statuses and the aggregate job status.
pub async fn submit_job(
    request: JobRequest,
    registry: Arc<HandlerRegistry>,
) -> Result<JobReport, JobError> {
    let started_at = Utc::now();
    let run_id = Uuid::new_v4();

    if request.name.trim().is_empty() {
        return Err(JobError::InvalidArgument(
            "job name must not be empty".to_owned(),
        ));
    }
    if request.tasks.is_empty() {
        return Err(JobError::InvalidArgument(
            "job must contain at least one task".to_owned(),
        ));
    }
    if request.tasks.len() > request.max_tasks {
        return Err(JobError::InvalidArgument(format!(
            "job contains {} tasks, exceeding maxTasks={}",
            request.tasks.len(),
            request.max_tasks
        )));
    }

    // Assign ids and reject duplicates.
    let mut ids: Vec<String> = Vec::with_capacity(request.tasks.len());
    let mut seen: HashSet<String> = HashSet::new();
    for (index, spec) in request.tasks.iter().enumerate() {
        let id = spec.id.clone().unwrap_or_else(|| format!("task-{index}"));
        if !seen.insert(id.clone()) {
            return Err(JobError::InvalidArgument(format!(
                "duplicate task id {id:?}"
            )));
        }
        ids.push(id);
    }

    // Operations must resolve and inputs must validate up front.
    for (spec, id) in request.tasks.iter().zip(&ids) {
        if !registry.has(&spec.service, &spec.command) {
            return Err(JobError::InvalidArgument(format!(
                "task {id:?}: unknown operation {}.{}",
                spec.service, spec.command
            )));
        }
        let violations = registry.validate_input(&spec.service, &spec.command, &spec.input);
        if !violations.is_empty() {
            return Err(JobError::InvalidArgument(format!(
                "task {id:?}: invalid input: {}",
                violations.join("; ")
            )));
        }
        for dep in &spec.depends_on {
            if !seen.contains(dep) {
                return Err(JobError::InvalidArgument(format!(
                    "task {id:?} depends on unknown task {dep:?}"
                )));
            }
        }
    }

    // Build the graph; edge insertion rejects dependency cycles.
    let mut graph = TaskGraph::new();
    for (index, spec) in request.tasks.iter().enumerate() {
        graph.add_node(Task::from_spec(
            ids[index].clone(),
            spec.clone(),
            0,
            TaskStatus::Pending,
        ))?;
    }
    for (index, spec) in request.tasks.iter().enumerate() {
        for dep in &spec.depends_on {
            graph.add_edge(dep, &ids[index])?;
        }
    }

    tracing::info!(
        job = %request.name,
        run_id = %run_id,
        tasks = graph.len(),
        ai_planning = request.ai_planning,
        "job accepted"
    );

    let config = EngineConfig {
        abort_on_failure: request.abort_on_failure,
        ai_planning: request.ai_planning,
        max_tasks: request.max_tasks,
        max_depth: request.max_depth,
        verbose: request.verbose,
        timeout: request.timeout_ms.map(Duration::from_millis),
    };
    let state = Arc::new(Mutex::new(JobState::new(graph)));
    let status = run_job(Arc::clone(&state), registry, config).await?;

    let graph = state.lock().await.graph.clone();
    let mut tasks = graph.into_tasks();
    sort_by_started_at(&mut tasks);
    let counts = StatusCounts::tally(&tasks);

    tracing::info!(
        job = %request.name,
        run_id = %run_id,
        status = %status,
        succeeded = counts.succeeded,
        failed = counts.failed,
        aborted = counts.aborted,
        planned = counts.planned,
        "job finished"
    );

    Ok(JobReport {
        name: request.name,
        run_id,
        status,
        tasks,
        counts,
        started_at,
        finished_at: Utc::now(),
    })
}

/// Stable sort by `startedAt`; tasks that never started sort last.
fn sort_by_started_at(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| match (a.started_at, b.started_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::Map;

    use crate::model::TaskSpec;

    fn task(id: &str, started_ms: Option<i64>) -> Task {
        let spec = TaskSpec {
            id: Some(id.to_owned()),
            service: "s".into(),
            command: "c".into(),
            input: Map::new(),
            depends_on: vec![],
        };
        let mut task = Task::from_spec(id.to_owned(), spec, 0, TaskStatus::Pending);
        task.started_at = started_ms.map(|ms| Utc.timestamp_millis_opt(ms).unwrap());
        task
    }

    #[test]
    fn sort_orders_by_start_time() {
        let mut tasks = vec![task("late", Some(300)), task("early", Some(100))];
        sort_by_started_at(&mut tasks);
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["early", "late"]);
    }

    #[test]
    fn sort_puts_never_started_last() {
        let mut tasks = vec![
            task("never", None),
            task("second", Some(200)),
            task("first", Some(100)),
        ];
        sort_by_started_at(&mut tasks);
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["first", "second", "never"]);
    }

    #[test]
    fn sort_is_stable_for_missing_starts() {
        let mut tasks = vec![task("x", None), task("y", None)];
        sort_by_started_at(&mut tasks);
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["x", "y"]);
    }
}
