//! AI-generated plan types and validation.
//!
//! A plan is the document a planning model produces: an ordered list of task
//! specs plus optional free-text reasoning. Before execution it is converted
//! to normalized [`crate::model::ChildTaskSpec`]s by [`validate_plan`].

mod validator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use validator::{validate_plan, PlanValidation};

/// An AI-generated plan document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(default)]
    pub tasks: Vec<PlanTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// One task spec inside a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub service: String,
    pub command: String,
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Outcome of validating a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub tasks_validated: usize,
    pub timestamp: DateTime<Utc>,
}
