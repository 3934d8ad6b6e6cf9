use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

use aiwork_core::context::Context;
use aiwork_core::error::{AiworkError, Result};

use crate::flow::Flow;
use crate::task::{Task, TaskHandler, TaskOutput};

const MISSING_FIELDS: &str = "Invalid request. 'name' and 'tasks' are required.";
const MISSING_TASK_NAME: &str = "Each task must have a 'name' field.";

/// One task entry in a declarative flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

/// Declarative flow, as submitted over REST or read from a TOML/JSON file.
///
/// ```toml
/// name = "report"
///
/// [context]
/// region = "eu"
///
/// [[tasks]]
/// name = "fetch"
///
/// [[tasks]]
/// name = "summarize"
/// depends_on = ["fetch"]
/// retries = 1
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub name: String,
    pub tasks: Vec<TaskDefinition>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub context: serde_json::Map<String, serde_json::Value>,
}

/// `"context": null` reads as no initial context.
fn null_as_empty<'de, D>(
    deserializer: D,
) -> std::result::Result<serde_json::Map<String, serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

impl FlowDefinition {
    /// Parse a request body, rejecting a missing `name`/`tasks` or an
    /// unnamed task with [`AiworkError::InvalidDefinition`].
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| AiworkError::InvalidDefinition(MISSING_FIELDS.into()))?;
        if !obj.contains_key("name") || !obj.contains_key("tasks") {
            return Err(AiworkError::InvalidDefinition(MISSING_FIELDS.into()));
        }
        if let Some(tasks) = obj.get("tasks").and_then(|t| t.as_array()) {
            let unnamed = tasks.iter().any(|t| {
                t.get("name")
                    .and_then(|n| n.as_str())
                    .map_or(true, str::is_empty)
            });
            if unnamed {
                return Err(AiworkError::InvalidDefinition(MISSING_TASK_NAME.into()));
            }
        }
        let def: Self = serde_json::from_value(value)
            .map_err(|e| AiworkError::InvalidDefinition(e.to_string()))?;
        def.check_names()?;
        Ok(def)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(s)?)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let def: Self =
            toml::from_str(s).map_err(|e| AiworkError::InvalidDefinition(e.to_string()))?;
        def.check_names()?;
        Ok(def)
    }

    /// Load from a file; `.json` files are parsed as JSON, anything else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    fn check_names(&self) -> Result<()> {
        if self.tasks.iter().any(|t| t.name.is_empty()) {
            return Err(AiworkError::InvalidDefinition(MISSING_TASK_NAME.into()));
        }
        Ok(())
    }

    /// Initial context for a run of this flow.
    pub fn context(&self) -> Context {
        Context::from_map(self.context.clone().into_iter().collect())
    }

    /// Build a [`Flow`], asking `make_handler` for each task's handler.
    pub fn build_flow<F>(&self, make_handler: F) -> Result<Flow>
    where
        F: Fn(&TaskDefinition) -> Arc<dyn TaskHandler>,
    {
        let mut flow = Flow::new(self.name.clone());
        for def in &self.tasks {
            let mut task = Task::new(def.name.clone()).with_task_handler(make_handler(def));
            if let Some(ref description) = def.description {
                task = task.with_description(description.clone());
            }
            if let Some(retries) = def.retries {
                task = task.with_retries(retries);
            }
            let deps: Vec<&str> = def.depends_on.iter().map(String::as_str).collect();
            flow.add_task(task, &deps)?;
        }
        Ok(flow)
    }

    /// Build a [`Flow`] whose tasks all run [`placeholder_handler`].
    pub fn placeholder_flow(&self) -> Result<Flow> {
        self.build_flow(|_| placeholder_handler())
    }
}

fn placeholder(_context: &Context) -> Result<TaskOutput> {
    Ok(serde_json::json!({"status": "executed"}).into())
}

/// Generic handler for declaratively submitted tasks.
pub fn placeholder_handler() -> Arc<dyn TaskHandler> {
    Arc::new(placeholder)
}
