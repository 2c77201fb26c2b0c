//! End-to-end tests for the AI orchestrate handler running inside a job:
//! planned children spawn, dry runs stay inert, retries feed errors back,
//! and dependency outputs reach the model prompt.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use foreman_core::{
    register_orchestrate, submit_job, Handler, HandlerDefinition, HandlerRegistry, JobContext,
    JobRequest, JobStatus, ModelRequest, ModelResponse, ModelUsage, PlanModel, Task, TaskSpec,
    TaskStatus,
};

// ===========================================================================
// Mock model and handlers
// ===========================================================================

/// Replays a fixed sequence of responses and records every user prompt.
struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|r| (*r).to_owned()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

#[async_trait]
impl PlanModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(request.user.clone());
        let text = self
            .responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .context("scripted model exhausted")?;
        Ok(ModelResponse {
            text,
            usage: Some(ModelUsage {
                input_tokens: 50,
                output_tokens: 10,
            }),
        })
    }
}

struct NoopHandler;

#[async_trait]
impl Handler for NoopHandler {
    async fn call(&self, task: &Task, _ctx: &JobContext) -> Result<Value> {
        Ok(json!({"handled": task.id}))
    }
}

fn definition(command: &str, allow_in_plan_mode: bool) -> HandlerDefinition {
    HandlerDefinition {
        service: "docs".into(),
        command: command.into(),
        description: format!("docs {command}"),
        required_params: vec!["path".into()],
        optional_params: vec![],
        input_schema: None,
        allow_in_plan_mode,
        examples: vec![],
    }
}

fn registry_with(model: Arc<dyn PlanModel>) -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register(definition("read", true), NoopHandler).unwrap();
    registry.register(definition("write", false), NoopHandler).unwrap();
    register_orchestrate(&mut registry, model).unwrap();
    Arc::new(registry)
}

fn orchestrate_spec(id: &str, input: Value, depends_on: &[&str]) -> TaskSpec {
    let input: Map<String, Value> = serde_json::from_value(input).expect("input must be an object");
    TaskSpec {
        id: Some(id.to_owned()),
        service: "ai".into(),
        command: "orchestrate".into(),
        input,
        depends_on: depends_on.iter().map(|d| (*d).to_owned()).collect(),
    }
}

fn docs_spec(id: &str, command: &str, path: &str) -> TaskSpec {
    TaskSpec {
        id: Some(id.to_owned()),
        service: "docs".into(),
        command: command.into(),
        input: serde_json::from_value(json!({"path": path})).unwrap(),
        depends_on: vec![],
    }
}

fn find<'a>(report: &'a foreman_core::JobReport, id: &str) -> &'a Task {
    report
        .tasks
        .iter()
        .find(|t| t.id == id)
        .unwrap_or_else(|| panic!("task {id} missing from report"))
}

const TWO_READS: &str = r#"{
    "tasks": [
        {"id": "fetch", "service": "docs", "command": "read", "input": {"path": "a"}},
        {"id": "check", "service": "docs", "command": "read", "input": {"path": "b"}, "dependsOn": ["fetch"]}
    ],
    "reasoning": "read then verify"
}"#;

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn live_orchestrate_spawns_and_executes_the_plan() {
    let model = ScriptedModel::new(&[TWO_READS]);
    let registry = registry_with(model);
    let request = JobRequest::new(
        "planned-job",
        vec![orchestrate_spec(
            "plan",
            json!({"prompt": "read both docs", "dryRun": false}),
            &[],
        )],
    );

    let report = submit_job(request, registry).await.unwrap();
    assert_eq!(report.status, JobStatus::Succeeded);
    assert_eq!(report.tasks.len(), 3);

    let orchestrator = find(&report, "plan");
    assert_eq!(orchestrator.status, TaskStatus::Succeeded);
    let output = orchestrator.output.as_ref().unwrap();
    assert_eq!(output["reasoning"], json!("read then verify"));
    assert_eq!(output["retriesUsed"], json!(0));
    assert_eq!(output["validationReport"]["isValid"], json!(true));
    // childTasks lives on the task record, never inside output.
    assert!(output.get("childTasks").is_none());
    assert_eq!(orchestrator.child_tasks.as_ref().unwrap().len(), 2);

    let fetch = find(&report, "plan-fetch");
    let check = find(&report, "plan-check");
    assert_eq!(fetch.status, TaskStatus::Succeeded);
    assert_eq!(check.depends_on, vec!["plan-fetch"]);
    assert!(fetch.started_at.unwrap() < check.started_at.unwrap());
}

#[tokio::test]
async fn dry_run_returns_planned_tasks_without_spawning() {
    let model = ScriptedModel::new(&[TWO_READS]);
    let registry = registry_with(model);
    let request = JobRequest::new(
        "dry-run",
        vec![orchestrate_spec("plan", json!({"prompt": "read both docs"}), &[])],
    );

    let report = submit_job(request, registry).await.unwrap();
    assert_eq!(report.status, JobStatus::Succeeded);
    // Nothing was inserted into the graph.
    assert_eq!(report.tasks.len(), 1);

    let output = find(&report, "plan").output.as_ref().unwrap();
    assert_eq!(output["dryRun"], json!(true));
    assert_eq!(output["plannedTasks"].as_array().unwrap().len(), 2);
    assert_eq!(output["plannedTasks"][0]["id"], json!("plan-fetch"));
    assert!(find(&report, "plan").child_tasks.is_none());
}

#[tokio::test]
async fn validation_errors_feed_the_retry_prompt() {
    let model = ScriptedModel::new(&[
        r#"{"tasks": [{"service": "blob", "command": "upload", "input": {}}]}"#,
        TWO_READS,
    ]);
    let registry = registry_with(Arc::clone(&model) as Arc<dyn PlanModel>);
    let request = JobRequest::new(
        "retry",
        vec![orchestrate_spec(
            "plan",
            json!({"prompt": "read both docs", "dryRun": false}),
            &[],
        )],
    );

    let report = submit_job(request, registry).await.unwrap();
    assert_eq!(report.status, JobStatus::Succeeded);

    let output = find(&report, "plan").output.as_ref().unwrap();
    assert_eq!(output["retriesUsed"], json!(1));
    assert_eq!(output["usage"]["inputTokens"], json!(100));

    let prompts = model.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("Previous Attempt Errors"));
    assert!(prompts[1].contains("Previous Attempt Errors"));
    assert!(prompts[1].contains("unknown operation blob.upload"));
}

#[tokio::test]
async fn exhausted_retries_fail_the_orchestrate_task_only() {
    let model = ScriptedModel::new(&["not json", "also not json"]);
    let registry = registry_with(model);
    let request = JobRequest::new(
        "exhausted",
        vec![
            docs_spec("fetch", "read", "a"),
            orchestrate_spec(
                "plan",
                json!({"prompt": "go", "maxRetries": 2, "dryRun": false}),
                &[],
            ),
        ],
    );

    let report = submit_job(request, registry).await.unwrap();
    // The orchestrate task failed; the job aggregate is failed, but the
    // independent task that started alongside it still succeeded.
    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(find(&report, "fetch").status, TaskStatus::Succeeded);

    let plan = find(&report, "plan");
    assert_eq!(plan.status, TaskStatus::Failed);
    let message = plan.output.as_ref().unwrap()["error"].as_str().unwrap();
    assert!(message.contains("after 2 attempts"), "got: {message}");
}

#[tokio::test]
async fn plan_mode_marks_mutating_planned_children() {
    let model = ScriptedModel::new(&[r#"{
        "tasks": [
            {"id": "look", "service": "docs", "command": "read", "input": {"path": "a"}},
            {"id": "change", "service": "docs", "command": "write", "input": {"path": "a"}, "dependsOn": ["look"]}
        ]
    }"#]);
    let registry = registry_with(model);
    let mut request = JobRequest::new(
        "plan-mode",
        vec![orchestrate_spec(
            "plan",
            json!({"prompt": "update the doc", "dryRun": false}),
            &[],
        )],
    );
    request.ai_planning = true;

    let report = submit_job(request, registry).await.unwrap();
    assert_eq!(report.status, JobStatus::Succeeded);
    assert_eq!(find(&report, "plan").status, TaskStatus::Succeeded);
    // The read-only child ran; the mutating one is awaiting approval.
    assert_eq!(find(&report, "plan-look").status, TaskStatus::Succeeded);
    assert_eq!(find(&report, "plan-change").status, TaskStatus::Planned);
}

#[tokio::test]
async fn dependency_outputs_reach_the_model_prompt() {
    let model = ScriptedModel::new(&[r#"{"tasks": []}"#]);
    let registry = registry_with(Arc::clone(&model) as Arc<dyn PlanModel>);
    let request = JobRequest::new(
        "dep-results",
        vec![
            docs_spec("fetch", "read", "reports/q3"),
            orchestrate_spec(
                "plan",
                json!({"prompt": "summarize what fetch found", "dryRun": false}),
                &["fetch"],
            ),
        ],
    );

    let report = submit_job(request, registry).await.unwrap();
    assert_eq!(report.status, JobStatus::Succeeded);

    let prompts = model.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Dependency Task Results"));
    assert!(prompts[0].contains("`fetch` (docs.read)"));
    assert!(prompts[0].contains("\"handled\":\"fetch\""));
}
