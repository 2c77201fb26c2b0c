//! Handler registry -- the single source of truth about supported
//! `(service, command)` operations.
//!
//! Each entry carries the handler itself plus its capability metadata:
//! description, required/optional input parameters, an optional JSON-Schema
//! (compiled at registration), and whether the operation may run in plan
//! mode. The scheduler never switches on strings directly; it always
//! consults the registry, and the plan validator and prompt construction
//! derive from the same entries.

mod handler;

use std::collections::BTreeMap;

use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use handler::Handler;

/// Errors from registering a handler.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid input schema for {service}.{command}: {message}")]
    InvalidSchema {
        service: String,
        command: String,
        message: String,
    },
}

/// Static metadata describing one `(service, command)` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerDefinition {
    pub service: String,
    pub command: String,
    pub description: String,
    /// Input parameters that must be present. Checked by name when no
    /// schema is supplied.
    #[serde(default)]
    pub required_params: Vec<String>,
    #[serde(default)]
    pub optional_params: Vec<String>,
    /// JSON-Schema for the task input. When present, input validation uses
    /// the schema and collects every violation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// True when the operation is observably read-only and may execute even
    /// while the job is in plan mode.
    #[serde(default)]
    pub allow_in_plan_mode: bool,
    /// Example inputs, surfaced in the capability catalog.
    #[serde(default)]
    pub examples: Vec<Value>,
}

/// One catalog entry: the capability metadata of a registered operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    pub service: String,
    pub command: String,
    pub description: String,
    pub required_params: Vec<String>,
    pub optional_params: Vec<String>,
    pub allow_in_plan_mode: bool,
    pub examples: Vec<Value>,
}

struct HandlerEntry {
    definition: HandlerDefinition,
    schema: Option<JSONSchema>,
    handler: Box<dyn Handler>,
}

/// Two-level lookup table mapping `(service, command)` to handler entries.
#[derive(Default)]
pub struct HandlerRegistry {
    services: BTreeMap<String, BTreeMap<String, HandlerEntry>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation.
    ///
    /// The entry is stored under the definition's `(service, command)`. If
    /// an entry with the same key is already registered, it is replaced.
    /// Fails if the definition carries a schema that does not compile.
    pub fn register(
        &mut self,
        definition: HandlerDefinition,
        handler: impl Handler + 'static,
    ) -> Result<(), RegistryError> {
        let schema = match &definition.input_schema {
            Some(raw) => Some(JSONSchema::compile(raw).map_err(|e| {
                RegistryError::InvalidSchema {
                    service: definition.service.clone(),
                    command: definition.command.clone(),
                    message: e.to_string(),
                }
            })?),
            None => None,
        };

        self.services
            .entry(definition.service.clone())
            .or_default()
            .insert(
                definition.command.clone(),
                HandlerEntry {
                    definition,
                    schema,
                    handler: Box::new(handler),
                },
            );
        Ok(())
    }

    fn entry(&self, service: &str, command: &str) -> Option<&HandlerEntry> {
        self.services.get(service)?.get(command)
    }

    /// Whether `(service, command)` is registered.
    pub fn has(&self, service: &str, command: &str) -> bool {
        self.entry(service, command).is_some()
    }

    /// Look up the handler for an operation.
    pub fn get(&self, service: &str, command: &str) -> Option<&dyn Handler> {
        self.entry(service, command).map(|e| e.handler.as_ref())
    }

    /// Look up the definition for an operation.
    pub fn get_definition(&self, service: &str, command: &str) -> Option<&HandlerDefinition> {
        self.entry(service, command).map(|e| &e.definition)
    }

    /// Names of every registered service, sorted.
    pub fn available_services(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    /// Commands registered under a service, sorted. Empty for an unknown
    /// service.
    pub fn commands(&self, service: &str) -> Vec<&str> {
        self.services
            .get(service)
            .map(|commands| commands.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Derived capability view, one entry per registered operation.
    pub fn catalog(&self) -> Vec<Capability> {
        self.services
            .values()
            .flat_map(|commands| commands.values())
            .map(|entry| Capability {
                service: entry.definition.service.clone(),
                command: entry.definition.command.clone(),
                description: entry.definition.description.clone(),
                required_params: entry.definition.required_params.clone(),
                optional_params: entry.definition.optional_params.clone(),
                allow_in_plan_mode: entry.definition.allow_in_plan_mode,
                examples: entry.definition.examples.clone(),
            })
            .collect()
    }

    /// Total number of registered operations.
    pub fn len(&self) -> usize {
        self.services.values().map(BTreeMap::len).sum()
    }

    /// Whether no operations are registered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Validate a task input against the operation's schema, or against the
    /// required parameter names when no schema is present.
    ///
    /// Returns every violation (not first-only). An unknown operation
    /// yields a single error naming it.
    pub fn validate_input(
        &self,
        service: &str,
        command: &str,
        input: &Map<String, Value>,
    ) -> Vec<String> {
        let Some(entry) = self.entry(service, command) else {
            return vec![format!("unknown operation {service}.{command}")];
        };

        match &entry.schema {
            Some(schema) => {
                let instance = Value::Object(input.clone());
                match schema.validate(&instance) {
                    Ok(()) => Vec::new(),
                    Err(errors) => errors
                        .map(|e| {
                            let path = e.instance_path.to_string();
                            if path.is_empty() {
                                e.to_string()
                            } else {
                                format!("{path}: {e}")
                            }
                        })
                        .collect(),
                }
            }
            None => entry
                .definition
                .required_params
                .iter()
                .filter(|p| !input.contains_key(*p))
                .map(|p| format!("missing required parameter {p:?}"))
                .collect(),
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self
            .services
            .iter()
            .flat_map(|(service, commands)| {
                commands.keys().map(move |c| format!("{service}.{c}"))
            })
            .collect();
        f.debug_struct("HandlerRegistry")
            .field("operations", &keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::model::Task;
    use crate::orchestrator::JobContext;

    /// Minimal test handler.
    struct NoopHandler;

    #[async_trait]
    impl Handler for NoopHandler {
        async fn call(&self, _task: &Task, _ctx: &JobContext) -> Result<Value> {
            Ok(json!({}))
        }
    }

    fn definition(service: &str, command: &str) -> HandlerDefinition {
        HandlerDefinition {
            service: service.into(),
            command: command.into(),
            description: format!("{service} {command}"),
            required_params: vec![],
            optional_params: vec![],
            input_schema: None,
            allow_in_plan_mode: false,
            examples: vec![],
        }
    }

    #[test]
    fn registry_starts_empty() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.catalog().is_empty());
    }

    #[test]
    fn register_and_get() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(definition("docs", "read"), NoopHandler)
            .unwrap();

        assert!(registry.has("docs", "read"));
        assert!(registry.get("docs", "read").is_some());
        assert_eq!(
            registry.get_definition("docs", "read").unwrap().description,
            "docs read"
        );
        assert!(!registry.has("docs", "write"));
        assert!(registry.get("blob", "read").is_none());
    }

    #[test]
    fn enumeration_is_sorted() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(definition("users", "lookup"), NoopHandler)
            .unwrap();
        registry
            .register(definition("docs", "write"), NoopHandler)
            .unwrap();
        registry
            .register(definition("docs", "read"), NoopHandler)
            .unwrap();

        assert_eq!(registry.available_services(), ["docs", "users"]);
        assert_eq!(registry.commands("docs"), ["read", "write"]);
        assert!(registry.commands("nope").is_empty());
    }

    #[test]
    fn catalog_registry_bijection() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(definition("docs", "read"), NoopHandler)
            .unwrap();
        registry
            .register(definition("docs", "write"), NoopHandler)
            .unwrap();
        registry
            .register(definition("ai", "orchestrate"), NoopHandler)
            .unwrap();

        let catalog = registry.catalog();
        assert_eq!(catalog.len(), registry.len());
        for capability in &catalog {
            let def = registry
                .get_definition(&capability.service, &capability.command)
                .expect("catalog entry must resolve in the registry");
            assert_eq!(def.description, capability.description);
            assert_eq!(def.allow_in_plan_mode, capability.allow_in_plan_mode);
        }
    }

    #[test]
    fn register_replaces_existing() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(definition("docs", "read"), NoopHandler)
            .unwrap();
        let mut replacement = definition("docs", "read");
        replacement.description = "updated".into();
        registry.register(replacement, NoopHandler).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get_definition("docs", "read").unwrap().description,
            "updated"
        );
    }

    #[test]
    fn register_rejects_invalid_schema() {
        let mut registry = HandlerRegistry::new();
        let mut def = definition("docs", "read");
        def.input_schema = Some(json!({"type": "not-a-type"}));
        let err = registry.register(def, NoopHandler).unwrap_err();
        assert!(err.to_string().contains("docs.read"));
    }

    #[test]
    fn validate_input_with_schema_collects_all_errors() {
        let mut registry = HandlerRegistry::new();
        let mut def = definition("docs", "write");
        def.input_schema = Some(json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "count": {"type": "integer"}
            },
            "required": ["path", "count"]
        }));
        registry.register(def, NoopHandler).unwrap();

        let input: Map<String, Value> =
            serde_json::from_value(json!({"count": "three"})).unwrap();
        let errors = registry.validate_input("docs", "write", &input);
        // Missing "path" plus wrong type for "count".
        assert_eq!(errors.len(), 2, "errors: {errors:?}");
    }

    #[test]
    fn validate_input_without_schema_checks_required_names() {
        let mut registry = HandlerRegistry::new();
        let mut def = definition("docs", "read");
        def.required_params = vec!["path".into(), "revision".into()];
        registry.register(def, NoopHandler).unwrap();

        let input: Map<String, Value> = serde_json::from_value(json!({"path": "x"})).unwrap();
        let errors = registry.validate_input("docs", "read", &input);
        assert_eq!(errors, vec!["missing required parameter \"revision\""]);
    }

    #[test]
    fn validate_input_unknown_operation() {
        let registry = HandlerRegistry::new();
        let errors = registry.validate_input("docs", "read", &Map::new());
        assert_eq!(errors, vec!["unknown operation docs.read"]);
    }
}
