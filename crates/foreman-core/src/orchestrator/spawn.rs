//! Child insertion, dependency fan-out, and status propagation.
//!
//! Everything here runs with the job state mutex held. Spawning works on a
//! scratch copy of the graph and commits only when the whole batch passes,
//! so a rejected batch leaves the graph untouched and acyclicity holds at
//! every observable point.

use std::collections::HashSet;

use anyhow::{bail, Context, Result};

use crate::graph::TaskGraph;
use crate::model::{ChildTaskSpec, Task, TaskStatus};
use crate::registry::HandlerRegistry;

use super::EngineConfig;

/// Insert a validated child batch spawned by `parent_id` and rewire the
/// graph: vertices, dependency edges, and fan-out (every pre-existing
/// dependent of the parent also depends on each spawned child).
///
/// Returns the assigned child ids. On error nothing is committed and the
/// parent task should be failed by the caller.
pub(crate) fn spawn_children(
    graph: &mut TaskGraph,
    parent_id: &str,
    specs: &[ChildTaskSpec],
    registry: &HandlerRegistry,
    config: &EngineConfig,
) -> Result<Vec<String>> {
    let parent_depth = graph
        .get_node(parent_id)
        .with_context(|| format!("spawning parent {parent_id:?} not found in graph"))?
        .depth;
    let child_depth = parent_depth + 1;

    // Dependents recorded before the batch exists; the children themselves
    // must not fan out onto each other.
    let dependents: Vec<String> = graph.successors_of(parent_id).to_vec();

    let mut scratch = graph.clone();

    // Pass 1: assigned ids, rejected against both the batch and the graph.
    let mut assigned: Vec<String> = Vec::with_capacity(specs.len());
    let mut batch: HashSet<String> = HashSet::new();
    for (index, spec) in specs.iter().enumerate() {
        let id = spec
            .id
            .clone()
            .unwrap_or_else(|| format!("{parent_id}-{index}"));
        if !batch.insert(id.clone()) {
            bail!("duplicate child task id {id:?} in spawn batch of {parent_id:?}");
        }
        if scratch.has_node(&id) {
            bail!("child task id {id:?} already exists in the graph");
        }
        assigned.push(id);
    }

    // Pass 2: limits, dependency resolution, status assignment, insertion.
    for (index, spec) in specs.iter().enumerate() {
        if scratch.len() >= config.max_tasks {
            bail!(
                "task limit reached: child {:?} of {parent_id:?} would exceed maxTasks={}",
                assigned[index],
                config.max_tasks
            );
        }
        if child_depth > config.max_depth {
            bail!(
                "depth limit reached: child {:?} of {parent_id:?} would have depth {child_depth}, maxDepth is {}",
                assigned[index],
                config.max_depth
            );
        }
        for dep in &spec.depends_on {
            if !scratch.has_node(dep) && !batch.contains(dep.as_str()) {
                bail!(
                    "child task {:?} depends on unknown task {dep:?}",
                    assigned[index]
                );
            }
        }

        // Plan mode inserts mutating children as Planned placeholders;
        // observably read-only operations still run.
        let status = if !config.ai_planning {
            TaskStatus::Pending
        } else {
            let definition = registry
                .get_definition(&spec.service, &spec.command)
                .with_context(|| {
                    format!("unknown operation {}.{}", spec.service, spec.command)
                })?;
            if definition.allow_in_plan_mode {
                TaskStatus::Pending
            } else {
                TaskStatus::Planned
            }
        };

        let task = Task::from_child_spec(assigned[index].clone(), spec, child_depth, status);
        scratch.add_node(task)?;
    }

    // Edges after every vertex exists: siblings may reference forward.
    for (index, spec) in specs.iter().enumerate() {
        for dep in &spec.depends_on {
            scratch.add_edge(dep, &assigned[index])?;
        }
    }
    scratch.validate_no_cycles()?;

    // Fan-out: each pre-existing dependent of the parent now also depends
    // on every spawned child, so it cannot race the children.
    for dependent_id in &dependents {
        for child_id in &assigned {
            scratch.add_edge(child_id, dependent_id).with_context(|| {
                format!("dependency fan-out from {parent_id:?} to {dependent_id:?}")
            })?;
        }
        if let Some(dependent) = scratch.get_node_mut(dependent_id) {
            for child_id in &assigned {
                if !dependent.depends_on.contains(child_id) {
                    dependent.depends_on.push(child_id.clone());
                }
            }
        }
    }
    scratch.validate_no_cycles()?;

    *graph = scratch;
    tracing::debug!(
        parent_id = %parent_id,
        spawned = assigned.len(),
        fanned_out = dependents.len(),
        "spawned child tasks"
    );
    Ok(assigned)
}

/// Status propagation fixpoint.
///
/// Repeatedly scans every `Pending` task and applies the propagation rule:
/// any dependency `Failed`/`Aborted` makes the task `Aborted`; otherwise any
/// dependency `Planned` makes it `Planned`. Stops when a full pass changes
/// nothing. Statuses only move strictly forward, so the loop terminates in
/// at most one pass per task.
pub(crate) fn cascade_statuses(graph: &mut TaskGraph) -> usize {
    let mut total_changed = 0;
    loop {
        let mut changes: Vec<(String, TaskStatus)> = Vec::new();
        for task in graph.tasks() {
            if task.status != TaskStatus::Pending {
                continue;
            }
            let mut next: Option<TaskStatus> = None;
            for dep in &task.depends_on {
                match graph.get_node(dep).map(|d| d.status) {
                    Some(TaskStatus::Failed) | Some(TaskStatus::Aborted) => {
                        next = Some(TaskStatus::Aborted);
                        break;
                    }
                    Some(TaskStatus::Planned) => next = Some(TaskStatus::Planned),
                    _ => {}
                }
            }
            if let Some(status) = next {
                changes.push((task.id.clone(), status));
            }
        }
        if changes.is_empty() {
            break;
        }
        total_changed += changes.len();
        for (id, status) in changes {
            if let Some(task) = graph.get_node_mut(&id) {
                task.status = status;
            }
        }
    }
    total_changed
}
