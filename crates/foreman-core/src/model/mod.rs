//! Core data model: tasks, statuses, task specs, and job request/report
//! types.
//!
//! Wire-visible types serialize as camelCase because the external JSON
//! contract uses camelCase keys (`dependsOn`, `childTasks`, `startedAt`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Status of a task.
///
/// `Succeeded`, `Failed`, and `Aborted` are always terminal. `Planned` is
/// terminal for the purposes of completion counting when the job runs in
/// plan mode; an external approval step may later flip it to `Approved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    Pending,
    Planned,
    Approved,
    Started,
    Succeeded,
    Failed,
    Aborted,
}

impl TaskStatus {
    /// Whether this status can never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Planned => "planned",
            Self::Approved => "approved",
            Self::Started => "started",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "planned" => Ok(Self::Planned),
            "approved" => Ok(Self::Approved),
            "started" => Ok(Self::Started),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "aborted" => Ok(Self::Aborted),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Aggregate outcome of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Task specs
// ---------------------------------------------------------------------------

/// A task as submitted with a job request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Explicit identifier; assigned positionally when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Operational domain selecting the handler.
    pub service: String,
    /// Operation within the service.
    pub command: String,
    /// Immutable handler input.
    #[serde(default)]
    pub input: Map<String, Value>,
    /// Identifiers of tasks that must succeed before this one runs.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A task a running handler requests to spawn.
///
/// Produced by the plan validator with a normalized `id` and normalized
/// `depends_on` references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildTaskSpec {
    pub service: String,
    pub command: String,
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// The atomic unit of work.
///
/// Owned exclusively by the task graph; handlers only ever see clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub service: String,
    pub command: String,
    pub input: Map<String, Value>,
    /// Set on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Handler-supplied diagnostic data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit: Option<Value>,
    /// Specs of children this task spawned (normalized).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_tasks: Option<Vec<ChildTaskSpec>>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub depends_on: Vec<String>,
    /// 0 for submitted tasks, `parent.depth + 1` for spawned children.
    pub depth: u32,
    /// Snapshot of the spec this task was created from, for reporting.
    pub spec: TaskSpec,
}

impl Task {
    /// Build a task from a spec with an assigned id.
    pub fn from_spec(id: String, spec: TaskSpec, depth: u32, status: TaskStatus) -> Self {
        Self {
            id,
            service: spec.service.clone(),
            command: spec.command.clone(),
            input: spec.input.clone(),
            output: None,
            audit: None,
            child_tasks: None,
            status,
            started_at: None,
            completed_at: None,
            depends_on: spec.depends_on.clone(),
            depth,
            spec,
        }
    }

    /// Build a task from a validated child spec. `id` must already be
    /// assigned (the spec's own id or the positional fallback).
    pub fn from_child_spec(
        id: String,
        spec: &ChildTaskSpec,
        depth: u32,
        status: TaskStatus,
    ) -> Self {
        let snapshot = TaskSpec {
            id: Some(id.clone()),
            service: spec.service.clone(),
            command: spec.command.clone(),
            input: spec.input.clone(),
            depends_on: spec.depends_on.clone(),
        };
        Self {
            id,
            service: spec.service.clone(),
            command: spec.command.clone(),
            input: spec.input.clone(),
            output: None,
            audit: None,
            child_tasks: None,
            status,
            started_at: None,
            completed_at: None,
            depends_on: spec.depends_on.clone(),
            depth,
            spec: snapshot,
        }
    }
}

// ---------------------------------------------------------------------------
// Job request / report
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_max_tasks() -> usize {
    1000
}

fn default_max_depth() -> u32 {
    10
}

/// A job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    /// Human-readable job name. Must be non-empty.
    pub name: String,
    /// Initial tasks. Must contain at least one entry.
    pub tasks: Vec<TaskSpec>,
    /// When true (the default), a single task failure aborts every task
    /// considered afterwards.
    #[serde(default = "default_true")]
    pub abort_on_failure: bool,
    /// Ceiling on the total number of tasks, spawned children included.
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    /// Ceiling on spawn depth.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Job-wide deadline in milliseconds.
    #[serde(default, rename = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub verbose: bool,
    /// Plan mode: mutating spawned children are inserted as `Planned` and
    /// short-circuited instead of executed.
    #[serde(default)]
    pub ai_planning: bool,
    /// Accepted for wire compatibility; persistence is not implemented and
    /// the flag is ignored.
    #[serde(default)]
    pub persist: bool,
}

impl JobRequest {
    /// A request with default limits and a single-use builder feel for tests.
    pub fn new(name: impl Into<String>, tasks: Vec<TaskSpec>) -> Self {
        Self {
            name: name.into(),
            tasks,
            abort_on_failure: true,
            max_tasks: default_max_tasks(),
            max_depth: default_max_depth(),
            timeout_ms: None,
            verbose: false,
            ai_planning: false,
            persist: false,
        }
    }
}

/// Per-status task counts for a finished job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pending: usize,
    pub planned: usize,
    pub approved: usize,
    pub started: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub aborted: usize,
}

impl StatusCounts {
    /// Tally statuses over a slice of tasks.
    pub fn tally(tasks: &[Task]) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Planned => counts.planned += 1,
                TaskStatus::Approved => counts.approved += 1,
                TaskStatus::Started => counts.started += 1,
                TaskStatus::Succeeded => counts.succeeded += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Aborted => counts.aborted += 1,
            }
        }
        counts
    }
}

/// The response for a completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub name: String,
    /// Identifier of this run, for log correlation.
    pub run_id: Uuid,
    pub status: JobStatus,
    /// Tasks in `startedAt` order; tasks that never started sort last.
    pub tasks: Vec<Task>,
    pub counts: StatusCounts,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
