use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::WorkflowId;

/// Shared state threaded through one workflow run.
///
/// Holds the caller's initial parameters, the run's workflow id, and the
/// outputs of every task completed so far, keyed by task name. Handlers and
/// agents read it; only the orchestrator writes to it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    workflow_id: Option<WorkflowId>,
    #[serde(default)]
    params: HashMap<String, serde_json::Value>,
    #[serde(default)]
    outputs: HashMap<String, serde_json::Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a Context from initial parameters.
    pub fn from_map(params: HashMap<String, serde_json::Value>) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    /// Create a Context from a JSON object. Non-object values yield an empty context.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(obj) => Self::from_map(obj.into_iter().collect()),
            _ => Self::default(),
        }
    }

    /// Get an initial parameter by key.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.params.get(key)
    }

    /// Get a parameter as a string, if it's a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// Set a parameter.
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.params.insert(key.into(), value);
    }

    pub fn workflow_id(&self) -> Option<&WorkflowId> {
        self.workflow_id.as_ref()
    }

    /// Output of a completed task.
    pub fn output(&self, task: &str) -> Option<&serde_json::Value> {
        self.outputs.get(task)
    }

    /// Output of a completed task as a string, if it's a string.
    pub fn output_str(&self, task: &str) -> Option<&str> {
        self.outputs.get(task).and_then(|v| v.as_str())
    }

    pub fn outputs(&self) -> &HashMap<String, serde_json::Value> {
        &self.outputs
    }

    /// Bind this context to a run: stamp the workflow id and clear any outputs.
    pub fn begin_run(&mut self, workflow_id: WorkflowId) {
        self.workflow_id = Some(workflow_id);
        self.outputs.clear();
    }

    /// Record a task's output (overwrites on conflict).
    pub fn record_output(&mut self, task: impl Into<String>, value: serde_json::Value) {
        self.outputs.insert(task.into(), value);
    }

    /// Flatten into the JSON shape guardrails see: parameters at the top level,
    /// plus `workflow_id` and `outputs`.
    pub fn to_value(&self) -> serde_json::Value {
        let mut obj: serde_json::Map<String, serde_json::Value> = self
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(ref id) = self.workflow_id {
            obj.insert("workflow_id".into(), serde_json::Value::String(id.0.clone()));
        }
        let outputs: serde_json::Map<String, serde_json::Value> = self
            .outputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        obj.insert("outputs".into(), serde_json::Value::Object(outputs));
        serde_json::Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let mut ctx = Context::new();
        ctx.set("name", serde_json::json!("Alice"));
        ctx.set("count", serde_json::json!(42));

        assert_eq!(ctx.get_str("name"), Some("Alice"));
        assert_eq!(ctx.get("count"), Some(&serde_json::json!(42)));
        assert_eq!(ctx.get("missing"), None);
    }

    #[test]
    fn test_begin_run_resets_outputs() {
        let mut ctx = Context::new();
        ctx.record_output("stale", serde_json::json!("old"));
        ctx.begin_run(WorkflowId::from("wf-1"));

        assert!(ctx.outputs().is_empty());
        assert_eq!(ctx.workflow_id().map(|id| id.as_str()), Some("wf-1"));
    }

    #[test]
    fn test_to_value_shape() {
        let mut ctx = Context::from_json(serde_json::json!({"amount": 10}));
        ctx.begin_run(WorkflowId::from("wf-2"));
        ctx.record_output("a", serde_json::json!("A"));

        let value = ctx.to_value();
        assert_eq!(value["amount"], 10);
        assert_eq!(value["workflow_id"], "wf-2");
        assert_eq!(value["outputs"]["a"], "A");
    }

    #[test]
    fn test_from_json_non_object() {
        let ctx = Context::from_json(serde_json::json!([1, 2, 3]));
        assert!(ctx.get("0").is_none());
        assert!(ctx.outputs().is_empty());
    }
}
