//! Foreman -- a dynamic-DAG job orchestration engine.
//!
//! A job is a named set of tasks with declared dependencies. The engine
//! executes ready tasks concurrently, lets running tasks spawn validated
//! children at runtime, propagates status through the dependency graph,
//! and terminates with an aggregate outcome.
//!
//! The moving parts:
//!
//! - [`graph::TaskGraph`] -- cycle-checked dependency structure owning
//!   every task.
//! - [`registry::HandlerRegistry`] -- the single source of truth about
//!   supported `(service, command)` operations and their capability
//!   metadata.
//! - [`plan::validate_plan`] -- converts an AI-produced plan into a
//!   normalized, cycle-free set of child task specs.
//! - [`planner::OrchestrateHandler`] -- the handler that turns a
//!   natural-language prompt into such a plan via a [`planner::PlanModel`].
//! - [`job::submit_job`] -- the submission boundary that drives the
//!   orchestrator loop to completion.
//!
//! Handlers implement [`registry::Handler`] and observe the rest of the job
//! only through [`orchestrator::JobContext`].

pub mod error;
pub mod graph;
pub mod job;
pub mod model;
pub mod orchestrator;
pub mod plan;
pub mod planner;
pub mod registry;

pub use error::JobError;
pub use graph::{GraphError, TaskGraph};
pub use job::submit_job;
pub use model::{
    ChildTaskSpec, JobReport, JobRequest, JobStatus, StatusCounts, Task, TaskSpec, TaskStatus,
};
pub use orchestrator::JobContext;
pub use plan::{validate_plan, Plan, PlanTask, PlanValidation, ValidationReport};
pub use planner::{
    register_orchestrate, ModelRequest, ModelResponse, ModelUsage, OrchestrateHandler,
    OrchestrateInput, PlanModel,
};
pub use registry::{Capability, Handler, HandlerDefinition, HandlerRegistry, RegistryError};
