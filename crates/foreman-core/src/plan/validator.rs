//! Plan validation: structural, registry, schema, identifier, and
//! graph-shape passes.
//!
//! Passes run in order; later passes execute only when earlier ones
//! produced no errors. Schema validation deliberately runs before graph
//! validation: malformed inputs are the common failure mode and schema
//! errors are the most actionable feedback for the model retry loop.
//! Identifier normalization happens inside validation because it must run
//! after duplicate detection but before edge resolution.

use std::collections::HashSet;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::graph::{GraphError, TaskGraph};
use crate::model::{ChildTaskSpec, Task, TaskSpec, TaskStatus};
use crate::registry::HandlerRegistry;

use super::ValidationReport;

/// Result of [`validate_plan`]: the report, plus the normalized child specs
/// when the plan is valid.
#[derive(Debug, Clone)]
pub struct PlanValidation {
    pub report: ValidationReport,
    /// `Some` exactly when `report.is_valid`.
    pub tasks: Option<Vec<ChildTaskSpec>>,
}

/// Intermediate representation of one plan task between passes.
struct RawTask {
    index: usize,
    service: String,
    command: String,
    input: Map<String, Value>,
    depends_on: Vec<String>,
    explicit_id: Option<String>,
    normalized_id: String,
    resolved_deps: Vec<String>,
}

/// Validate an AI-produced plan owned by the orchestrator task
/// `orchestrator_id`, producing either a report of errors/warnings or a
/// normalized list of child task specs suitable for graph insertion.
pub fn validate_plan(
    plan: &Value,
    orchestrator_id: &str,
    registry: &HandlerRegistry,
) -> PlanValidation {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    // Pass 1: structural.
    let mut raws = match structural_pass(plan, &mut errors, &mut warnings) {
        Some(raws) => raws,
        None => return invalid(errors, warnings, 0),
    };
    let total = raws.len();
    if !errors.is_empty() {
        return invalid(errors, warnings, total);
    }

    // Pass 2: service/command existence.
    for raw in &raws {
        if !registry.has(&raw.service, &raw.command) {
            errors.push(format!(
                "task {}: unknown operation {}.{}",
                raw.index, raw.service, raw.command
            ));
        }
    }
    if !errors.is_empty() {
        return invalid(errors, warnings, total);
    }

    // Pass 3: input validation against the registry definition.
    for raw in &raws {
        for message in registry.validate_input(&raw.service, &raw.command, &raw.input) {
            errors.push(format!(
                "task {} ({}.{}): {message}",
                raw.index, raw.service, raw.command
            ));
        }
    }
    if !errors.is_empty() {
        return invalid(errors, warnings, total);
    }

    // Pass 4: identifier normalization. The parent id prefix guarantees a
    // child's id is globally unique inside the job, even when the model
    // volunteers one of its own.
    let prefix = format!("{orchestrator_id}-");
    for raw in &mut raws {
        raw.normalized_id = match &raw.explicit_id {
            Some(id) if id.starts_with(&prefix) => id.clone(),
            Some(id) => {
                let renamed = format!("{prefix}{id}");
                warnings.push(format!(
                    "task {}: id {id:?} renamed to {renamed:?}",
                    raw.index
                ));
                renamed
            }
            None => format!("{prefix}{}", raw.index),
        };
    }
    let mut seen: HashSet<&str> = HashSet::new();
    for raw in &raws {
        if !seen.insert(raw.normalized_id.as_str()) {
            errors.push(format!(
                "duplicate task id {:?} after normalization",
                raw.normalized_id
            ));
        }
    }
    if !errors.is_empty() {
        return invalid(errors, warnings, total);
    }

    // Pass 5: graph-shape validation against a scratch graph holding the
    // orchestrator vertex and every normalized child vertex.
    let mut scratch = TaskGraph::new();
    if let Err(err) = scratch.add_node(placeholder(orchestrator_id)) {
        errors.push(err.to_string());
        return invalid(errors, warnings, total);
    }
    for raw in &raws {
        if let Err(err) = scratch.add_node(placeholder(&raw.normalized_id)) {
            errors.push(err.to_string());
            return invalid(errors, warnings, total);
        }
    }

    'tasks: for raw_index in 0..raws.len() {
        let deps = raws[raw_index].depends_on.clone();
        for dep in deps {
            let target = if scratch.has_node(&dep) {
                dep
            } else {
                let prefixed = format!("{prefix}{dep}");
                if scratch.has_node(&prefixed) {
                    warnings.push(format!(
                        "task {}: dependency {dep:?} resolved to {prefixed:?}",
                        raws[raw_index].index
                    ));
                    prefixed
                } else {
                    errors.push(format!(
                        "task {}: dependsOn references unknown task {dep:?}",
                        raws[raw_index].index
                    ));
                    continue;
                }
            };
            match scratch.add_edge(&target, &raws[raw_index].normalized_id) {
                Ok(()) => raws[raw_index].resolved_deps.push(target),
                Err(err @ GraphError::Cycle(_)) => {
                    errors.push(format!("task {}: {err}", raws[raw_index].index));
                    break 'tasks;
                }
                Err(err) => {
                    errors.push(format!("task {}: {err}", raws[raw_index].index));
                }
            }
        }
    }
    if !errors.is_empty() {
        return invalid(errors, warnings, total);
    }

    let tasks = raws
        .into_iter()
        .map(|raw| ChildTaskSpec {
            service: raw.service,
            command: raw.command,
            input: raw.input,
            depends_on: raw.resolved_deps,
            id: Some(raw.normalized_id),
        })
        .collect();

    PlanValidation {
        report: ValidationReport {
            is_valid: true,
            errors,
            warnings,
            tasks_validated: total,
            timestamp: Utc::now(),
        },
        tasks: Some(tasks),
    }
}

fn invalid(errors: Vec<String>, warnings: Vec<String>, total: usize) -> PlanValidation {
    PlanValidation {
        report: ValidationReport {
            is_valid: false,
            errors,
            warnings,
            tasks_validated: total,
            timestamp: Utc::now(),
        },
        tasks: None,
    }
}

/// Pass 1: check the plan's JSON shape and extract raw tasks.
///
/// Returns `None` when the plan is not even an object with a tasks array.
/// Per-task shape errors are collected into `errors` (all of them, not
/// first-only) and surface as a `Some` result alongside a non-empty error
/// list.
fn structural_pass(
    plan: &Value,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) -> Option<Vec<RawTask>> {
    let Some(obj) = plan.as_object() else {
        errors.push("plan must be a JSON object".to_owned());
        return None;
    };
    let Some(tasks) = obj.get("tasks").and_then(Value::as_array) else {
        errors.push("plan.tasks must be an array".to_owned());
        return None;
    };
    if tasks.is_empty() {
        warnings.push("plan contains no tasks".to_owned());
    }

    let mut raws = Vec::with_capacity(tasks.len());
    for (index, value) in tasks.iter().enumerate() {
        let Some(task) = value.as_object() else {
            errors.push(format!("task {index}: must be a JSON object"));
            continue;
        };

        let service = match task.get("service").and_then(Value::as_str) {
            Some(s) if !s.is_empty() => s.to_owned(),
            _ => {
                errors.push(format!("task {index}: service must be a non-empty string"));
                String::new()
            }
        };
        let command = match task.get("command").and_then(Value::as_str) {
            Some(s) if !s.is_empty() => s.to_owned(),
            _ => {
                errors.push(format!("task {index}: command must be a non-empty string"));
                String::new()
            }
        };

        let input = match task.get("input") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                errors.push(format!("task {index}: input must be a JSON object"));
                Map::new()
            }
        };

        let depends_on = match task.get("dependsOn") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => {
                let mut deps = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_str() {
                        Some(s) => deps.push(s.to_owned()),
                        None => errors.push(format!(
                            "task {index}: dependsOn entries must be strings"
                        )),
                    }
                }
                deps
            }
            Some(_) => {
                errors.push(format!("task {index}: dependsOn must be an array of strings"));
                Vec::new()
            }
        };

        let explicit_id = match task.get("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(id.clone()),
            Some(_) => {
                errors.push(format!("task {index}: id must be a string"));
                None
            }
        };

        raws.push(RawTask {
            index,
            service,
            command,
            input,
            depends_on,
            explicit_id,
            normalized_id: String::new(),
            resolved_deps: Vec::new(),
        });
    }
    Some(raws)
}

fn placeholder(id: &str) -> Task {
    let spec = TaskSpec {
        id: Some(id.to_owned()),
        service: String::new(),
        command: String::new(),
        input: Map::new(),
        depends_on: vec![],
    };
    Task::from_spec(id.to_owned(), spec, 0, TaskStatus::Pending)
}
