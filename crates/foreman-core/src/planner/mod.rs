//! The AI orchestrate handler: converts a natural-language prompt into a
//! validated plan of child tasks.
//!
//! The handler builds prompts from the registry catalog, calls the
//! [`PlanModel`] under a deadline, and retries with error feedback until
//! the plan validates or attempts run out. `dryRun` defaults to true: the
//! handler sits at the boundary of a system that can mutate external state
//! on behalf of a generative model, so human-in-the-loop planning is the
//! default posture.

mod model;
mod prompt;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::model::Task;
use crate::orchestrator::JobContext;
use crate::plan::{validate_plan, Plan, PlanValidation};
use crate::registry::{Handler, HandlerDefinition, HandlerRegistry, RegistryError};

pub use model::{ModelRequest, ModelResponse, ModelUsage, PlanModel};
pub use prompt::{
    build_system_prompt, build_user_prompt, clip_errors, render_catalog, DependencyResult,
    RetryFeedback, MAX_FEEDBACK_ERRORS,
};

/// Service the orchestrate operation registers under.
pub const ORCHESTRATE_SERVICE: &str = "ai";
/// Command the orchestrate operation registers under.
pub const ORCHESTRATE_COMMAND: &str = "orchestrate";

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_temperature() -> f64 {
    0.2
}

fn default_max_child_tasks() -> usize {
    100
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_max_depth() -> u32 {
    10
}

/// Input accepted by the orchestrate handler.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrateInput {
    pub prompt: String,
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default = "default_max_child_tasks")]
    pub max_child_tasks: usize,
    /// Per-model-call deadline in milliseconds.
    #[serde(default = "default_timeout_ms", rename = "timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default)]
    pub verbose: bool,
}

/// Handler that plans child tasks with an external model.
pub struct OrchestrateHandler {
    model: Arc<dyn PlanModel>,
}

impl OrchestrateHandler {
    pub fn new(model: Arc<dyn PlanModel>) -> Self {
        Self { model }
    }

    /// The registry definition for the orchestrate operation.
    pub fn definition() -> HandlerDefinition {
        HandlerDefinition {
            service: ORCHESTRATE_SERVICE.to_owned(),
            command: ORCHESTRATE_COMMAND.to_owned(),
            description: "Generate and validate a plan of child tasks from a natural-language prompt"
                .to_owned(),
            required_params: vec!["prompt".to_owned()],
            optional_params: vec![
                "dryRun".to_owned(),
                "maxRetries".to_owned(),
                "temperature".to_owned(),
                "context".to_owned(),
                "maxChildTasks".to_owned(),
                "timeout".to_owned(),
                "maxDepth".to_owned(),
                "verbose".to_owned(),
            ],
            input_schema: Some(json!({
                "type": "object",
                "properties": {
                    "prompt": {"type": "string", "minLength": 1},
                    "dryRun": {"type": "boolean"},
                    "maxRetries": {"type": "integer", "minimum": 1},
                    "temperature": {"type": "number", "minimum": 0.0},
                    "context": {"type": "string"},
                    "maxChildTasks": {"type": "integer", "minimum": 1},
                    "timeout": {"type": "integer", "minimum": 1},
                    "maxDepth": {"type": "integer", "minimum": 0},
                    "verbose": {"type": "boolean"}
                },
                "required": ["prompt"]
            })),
            allow_in_plan_mode: true,
            examples: vec![json!({
                "prompt": "Summarize every document in the reports folder"
            })],
        }
    }
}

/// Register the orchestrate operation backed by `model`.
pub fn register_orchestrate(
    registry: &mut HandlerRegistry,
    model: Arc<dyn PlanModel>,
) -> Result<(), RegistryError> {
    registry.register(OrchestrateHandler::definition(), OrchestrateHandler::new(model))
}

#[async_trait]
impl Handler for OrchestrateHandler {
    async fn call(&self, task: &Task, ctx: &JobContext) -> Result<Value> {
        let input: OrchestrateInput =
            serde_json::from_value(Value::Object(task.input.clone()))
                .context("invalid orchestrate input")?;

        // Depth pre-check: children would land one level below this task.
        if task.depth >= input.max_depth {
            bail!(
                "Cannot orchestrate at depth {}: spawned tasks would exceed the limit. Maximum depth is {}.",
                task.depth,
                input.max_depth
            );
        }

        let catalog = ctx.registry().catalog();
        let system = build_system_prompt(&catalog);
        let dependencies = dependency_results(task, ctx).await;

        let mut usage_total: Option<ModelUsage> = None;
        let mut last_errors: Vec<String> = Vec::new();
        let mut last_response = String::new();
        let mut outcome: Option<(Value, PlanValidation)> = None;
        let mut retries_used = 0;

        for attempt in 0..input.max_retries {
            let retry_feedback;
            let retry = if attempt > 0 {
                retry_feedback = RetryFeedback {
                    errors: &last_errors,
                    previous_response: &last_response,
                };
                Some(&retry_feedback)
            } else {
                None
            };
            let user = build_user_prompt(
                &input.prompt,
                input.context.as_deref(),
                &dependencies,
                retry,
            );
            let request = ModelRequest {
                system: system.clone(),
                user,
                temperature: input.temperature,
            };

            tracing::debug!(
                task_id = %task.id,
                attempt,
                model = self.model.name(),
                "requesting plan"
            );
            let deadline = Duration::from_millis(input.timeout_ms);
            let response = match tokio::time::timeout(deadline, self.model.complete(&request)).await
            {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => {
                    last_errors = vec![format!("model call failed: {err:#}")];
                    last_response.clear();
                    continue;
                }
                Err(_) => {
                    last_errors =
                        vec![format!("model call timed out after {}ms", input.timeout_ms)];
                    last_response.clear();
                    continue;
                }
            };

            if let Some(usage) = response.usage {
                usage_total.get_or_insert_with(ModelUsage::default).add(usage);
            }
            last_response = response.text.clone();

            let parsed: Value = match serde_json::from_str(extract_json(&response.text)) {
                Ok(value) => value,
                Err(err) => {
                    last_errors = vec![format!("response is not valid JSON: {err}")];
                    continue;
                }
            };

            let validation = validate_plan(&parsed, &task.id, ctx.registry());
            if !validation.report.is_valid {
                tracing::warn!(
                    task_id = %task.id,
                    attempt,
                    errors = validation.report.errors.len(),
                    "plan failed validation"
                );
                last_errors = validation.report.errors.clone();
                continue;
            }

            retries_used = attempt;
            outcome = Some((parsed, validation));
            break;
        }

        let Some((plan_value, validation)) = outcome else {
            bail!(
                "plan validation failed after {} attempts:\n{}",
                input.max_retries,
                clip_errors(&last_errors, MAX_FEEDBACK_ERRORS)
            );
        };

        let specs = validation.tasks.clone().unwrap_or_default();
        if specs.len() > input.max_child_tasks {
            bail!(
                "plan contains {} tasks, exceeding the maxChildTasks limit of {}",
                specs.len(),
                input.max_child_tasks
            );
        }

        let plan: Plan =
            serde_json::from_value(plan_value.clone()).context("validated plan failed to parse")?;

        let mut result = json!({
            "prompt": input.prompt,
            "plan": plan_value,
            "reasoning": plan.reasoning,
            "dryRun": input.dry_run,
            "retriesUsed": retries_used,
            "validationReport": serde_json::to_value(&validation.report)?,
        });
        if let Some(usage) = usage_total {
            result["usage"] = serde_json::to_value(usage)?;
        }
        let key = if input.dry_run { "plannedTasks" } else { "childTasks" };
        result[key] = serde_json::to_value(&specs)?;

        tracing::info!(
            task_id = %task.id,
            tasks = specs.len(),
            retries_used,
            dry_run = input.dry_run,
            "plan accepted"
        );
        Ok(result)
    }
}

/// Collect each dependency's operation and output for the user prompt.
async fn dependency_results(task: &Task, ctx: &JobContext) -> Vec<DependencyResult> {
    let mut results = Vec::with_capacity(task.depends_on.len());
    for dep_id in &task.depends_on {
        if let Some(dep) = ctx.get_task(dep_id).await {
            results.push(DependencyResult {
                id: dep.id,
                service: dep.service,
                command: dep.command,
                output: dep.output,
            });
        }
    }
    results
}

/// Strip a markdown code fence from a model response, if present.
fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    match rest.rfind("```") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}
