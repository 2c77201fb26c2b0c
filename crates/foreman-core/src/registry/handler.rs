//! The `Handler` trait -- the adapter interface for task effects.
//!
//! Each concrete handler implements one `(service, command)` operation. The
//! trait is intentionally object-safe so it can be stored as
//! `Box<dyn Handler>` in the [`super::HandlerRegistry`].

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::model::Task;
use crate::orchestrator::JobContext;

/// Async interface implementing the effect of one `(service, command)` pair.
///
/// The returned record may carry three distinguished keys the scheduler
/// interprets specially: `output`, `audit`, and `childTasks`. A plain record
/// without an explicit `output` key becomes the task's output as-is (minus
/// the distinguished keys).
///
/// Handlers receive a read-only view of the task they execute and of the
/// [`JobContext`]; they never mutate other tasks.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Execute the operation for `task`.
    async fn call(&self, task: &Task, ctx: &JobContext) -> Result<Value>;
}

// Compile-time assertion: Handler must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Handler) {}
};
