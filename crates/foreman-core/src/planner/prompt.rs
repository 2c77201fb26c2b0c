//! Prompt construction for the orchestrate handler.
//!
//! Assembles the capability catalog into a system prompt, and the user
//! text, optional context, dependency results, and retry feedback into a
//! user prompt. This module is pure logic (no model calls).

use serde_json::Value;

use crate::registry::Capability;

/// How many errors are fed back verbatim on retry; the rest collapse into
/// a summary tail to cap token use.
pub const MAX_FEEDBACK_ERRORS: usize = 5;

/// Plan JSON schema reference included in the system prompt.
const SCHEMA_REFERENCE: &str = r#"## Plan JSON Schema

```json
{
  "tasks": [
    {
      "id": "string",            // Optional. Unique within the plan.
      "service": "string",       // REQUIRED. Operation domain.
      "command": "string",       // REQUIRED. Operation within the service.
      "input": {},               // Object matching the operation's parameters.
      "dependsOn": ["string"]    // Optional. Ids of tasks this depends on.
    }
  ],
  "reasoning": "string"          // Optional. Why the plan is shaped this way.
}
```
"#;

/// Planning guidelines included in the system prompt.
const PLANNING_GUIDELINES: &str = r#"## Planning Guidelines

1. **Use only the operations listed below.** Any other service/command pair fails validation.
2. **Provide every required parameter.** Inputs are schema-checked before anything runs.
3. **Maximize parallelism.** Tasks without dependencies run concurrently; add `dependsOn` only for real data dependencies.
4. **Reference tasks by id.** If task B consumes what task A produces, B's `dependsOn` must list A's id.
5. **Keep the plan acyclic.** Circular dependencies fail validation.
"#;

/// Dependency output shown to the model for one upstream task.
#[derive(Debug, Clone)]
pub struct DependencyResult {
    pub id: String,
    pub service: String,
    pub command: String,
    pub output: Option<Value>,
}

/// Feedback from a failed prior attempt, fed into the next user prompt.
#[derive(Debug, Clone)]
pub struct RetryFeedback<'a> {
    pub errors: &'a [String],
    pub previous_response: &'a str,
}

/// Build the system prompt from the registry's capability catalog.
pub fn build_system_prompt(catalog: &[Capability]) -> String {
    let mut prompt = String::with_capacity(2048);

    prompt.push_str(
        "# Task Planner\n\n\
         You decompose a request into a dependency-ordered set of tasks \
         for a job orchestration engine to execute.\n\n\
         Respond with a single JSON object and nothing else -- no prose \
         before or after it.\n\n",
    );
    prompt.push_str(SCHEMA_REFERENCE);
    prompt.push('\n');
    prompt.push_str(PLANNING_GUIDELINES);
    prompt.push('\n');
    prompt.push_str(&render_catalog(catalog));
    prompt
}

/// Render the capability catalog as the "Available Operations" block.
pub fn render_catalog(catalog: &[Capability]) -> String {
    let mut out = String::from("## Available Operations\n\n");
    if catalog.is_empty() {
        out.push_str("(none registered)\n");
        return out;
    }
    for capability in catalog {
        out.push_str(&format!(
            "- `{}.{}` -- {}",
            capability.service, capability.command, capability.description
        ));
        if !capability.required_params.is_empty() {
            out.push_str(&format!(
                " (required: {})",
                capability.required_params.join(", ")
            ));
        }
        if !capability.optional_params.is_empty() {
            out.push_str(&format!(
                " (optional: {})",
                capability.optional_params.join(", ")
            ));
        }
        out.push('\n');
        for example in &capability.examples {
            out.push_str(&format!("  example input: `{example}`\n"));
        }
    }
    out
}

/// Build the user prompt for one attempt.
pub fn build_user_prompt(
    prompt: &str,
    context: Option<&str>,
    dependencies: &[DependencyResult],
    retry: Option<&RetryFeedback<'_>>,
) -> String {
    let mut out = String::with_capacity(1024);
    out.push_str("## Request\n\n");
    out.push_str(prompt);
    out.push('\n');

    if let Some(context) = context {
        out.push_str("\n## Context\n\n");
        out.push_str(context);
        out.push('\n');
    }

    if !dependencies.is_empty() {
        out.push_str("\n## Dependency Task Results\n\n");
        for dep in dependencies {
            let output = dep
                .output
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "null".to_owned());
            out.push_str(&format!(
                "- `{}` ({}.{}): {}\n",
                dep.id, dep.service, dep.command, output
            ));
        }
    }

    if let Some(retry) = retry {
        out.push_str("\n## Previous Attempt Errors\n\n");
        out.push_str(
            "Your previous plan failed validation. Fix every error below \
             and respond with a corrected plan.\n\n",
        );
        out.push_str(&clip_errors(retry.errors, MAX_FEEDBACK_ERRORS));
        if !retry.previous_response.is_empty() {
            out.push_str("\n### Previous Response\n\n```\n");
            out.push_str(retry.previous_response);
            out.push_str("\n```\n");
        }
    }

    out
}

/// Render errors, keeping the first `max` verbatim and collapsing the rest
/// into a summary tail.
pub fn clip_errors(errors: &[String], max: usize) -> String {
    let mut out = String::new();
    for error in errors.iter().take(max) {
        out.push_str(&format!("- {error}\n"));
    }
    if errors.len() > max {
        out.push_str(&format!("- ... and {} more errors\n", errors.len() - max));
    }
    out
}
