//! Boundary error taxonomy.
//!
//! Every error surfaced to a job submitter maps onto one of five codes.
//! Task-scoped failures never reach this level: they fail the task and are
//! reported in the task's output instead.

use thiserror::Error;

use crate::graph::GraphError;

/// Errors emitted at the job submission boundary.
#[derive(Debug, Error)]
pub enum JobError {
    /// The caller is not authenticated. Assigned by embedders; the engine
    /// itself never constructs this variant.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The caller is not allowed to perform the operation. Assigned by
    /// embedders; the engine itself never constructs this variant.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The submission is malformed: missing name, empty task list, unknown
    /// operation, duplicate id, unresolved dependency, or a dependency cycle.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The job-wide deadline elapsed before every task reached a terminal
    /// status.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// The engine reached a state it cannot make progress from (e.g. a
    /// runtime deadlock after spawning).
    #[error("internal: {0}")]
    Internal(String),
}

impl JobError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::DeadlineExceeded(_) => "DEADLINE_EXCEEDED",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl From<GraphError> for JobError {
    /// Graph errors at submission time are caller mistakes.
    fn from(err: GraphError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}
