//! The `PlanModel` trait -- the adapter interface for the external planning
//! model.
//!
//! The engine never talks to a model vendor directly; it hands a prepared
//! request to an implementation of this trait and consumes the returned
//! text. The trait is object-safe so it can be stored as
//! `Arc<dyn PlanModel>` inside the orchestrate handler.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single completion request.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: String,
    pub user: String,
    pub temperature: f64,
}

/// Token accounting reported by a model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl ModelUsage {
    /// Accumulate another call's usage into this one.
    pub fn add(&mut self, other: ModelUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// A model's reply: raw text expected to contain a JSON plan, plus optional
/// usage accounting.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub text: String,
    pub usage: Option<ModelUsage>,
}

/// Adapter interface for a chat model that produces task plans.
#[async_trait]
pub trait PlanModel: Send + Sync {
    /// Human-readable model name, for logs.
    fn name(&self) -> &str;

    /// Run one completion.
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse>;
}

// Compile-time assertion: PlanModel must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn PlanModel) {}
};
