use std::sync::Arc;

use futures::future::BoxFuture;
use uuid::Uuid;

use aiwork_core::context::Context;
use aiwork_core::error::{AiworkError, Result};
use aiwork_core::types::Status;

use crate::executor::{Executor, LocalExecutor};
use crate::flow::Flow;
use crate::guardrail::Guardrail;

/// Default number of additional attempts after the first.
pub const DEFAULT_RETRIES: u32 = 3;

/// Function-style unit of work behind a task.
///
/// Any `Fn(&Context) -> Result<TaskOutput>` closure is a handler; implement
/// the trait directly for handlers that need to await.
pub trait TaskHandler: Send + Sync + 'static {
    fn call<'a>(&'a self, context: &'a Context) -> BoxFuture<'a, Result<TaskOutput>>;
}

impl<F> TaskHandler for F
where
    F: Fn(&Context) -> Result<TaskOutput> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, context: &'a Context) -> BoxFuture<'a, Result<TaskOutput>> {
        let result = self(context);
        Box::pin(async move { result })
    }
}

/// Executable unit that works from a task's description.
pub trait Agent: Send + Sync + 'static {
    /// Role name, used in logs.
    fn role(&self) -> &str;

    /// Carry out the described work against the current context.
    fn execute_task<'a>(
        &'a self,
        description: &'a str,
        context: &'a Context,
    ) -> BoxFuture<'a, Result<TaskOutput>>;
}

/// What a task runs. Resolved when the task is built; a handler always wins
/// over an agent when both are assigned.
#[derive(Clone)]
pub enum ExecutableUnit {
    Handler(Arc<dyn TaskHandler>),
    Agent(Arc<dyn Agent>),
    AgentWithHandler {
        agent: Arc<dyn Agent>,
        handler: Arc<dyn TaskHandler>,
    },
}

impl ExecutableUnit {
    /// The assigned agent, if any.
    pub fn agent(&self) -> Option<&Arc<dyn Agent>> {
        match self {
            ExecutableUnit::Handler(_) => None,
            ExecutableUnit::Agent(agent) | ExecutableUnit::AgentWithHandler { agent, .. } => {
                Some(agent)
            }
        }
    }
}

/// Result of one task run.
///
/// Besides a plain value, a task may ask the orchestrator to append more work
/// to the run in progress, either as a list of tasks or as a whole sub-flow.
/// Appended work is not dependency-gated.
#[derive(Debug, Clone)]
pub enum TaskOutput {
    Value(serde_json::Value),
    Inject {
        value: serde_json::Value,
        next_tasks: Vec<Task>,
    },
    SubFlow(Flow),
}

impl TaskOutput {
    /// Append `tasks` to the run after this output is recorded.
    pub fn inject(value: impl Into<serde_json::Value>, next_tasks: Vec<Task>) -> Self {
        TaskOutput::Inject {
            value: value.into(),
            next_tasks,
        }
    }

    /// The value recorded as this task's output and checked by output guardrails.
    ///
    /// A sub-flow is recorded as `{"flow": name, "tasks": [names...]}`.
    pub fn value(&self) -> serde_json::Value {
        match self {
            TaskOutput::Value(v) | TaskOutput::Inject { value: v, .. } => v.clone(),
            TaskOutput::SubFlow(flow) => serde_json::json!({
                "flow": flow.name,
                "tasks": flow.task_names(),
            }),
        }
    }

    /// Split into the recorded value and the tasks to append to the queue.
    pub fn into_parts(self) -> (serde_json::Value, Vec<Task>) {
        match self {
            TaskOutput::Value(v) => (v, vec![]),
            TaskOutput::Inject { value, next_tasks } => (value, next_tasks),
            TaskOutput::SubFlow(flow) => {
                let value = TaskOutput::SubFlow(flow.clone()).value();
                (value, flow.into_tasks())
            }
        }
    }
}

impl From<serde_json::Value> for TaskOutput {
    fn from(v: serde_json::Value) -> Self {
        TaskOutput::Value(v)
    }
}

impl From<&str> for TaskOutput {
    fn from(s: &str) -> Self {
        TaskOutput::Value(serde_json::Value::String(s.to_string()))
    }
}

impl From<String> for TaskOutput {
    fn from(s: String) -> Self {
        TaskOutput::Value(serde_json::Value::String(s))
    }
}

impl From<Flow> for TaskOutput {
    fn from(flow: Flow) -> Self {
        TaskOutput::SubFlow(flow)
    }
}

/// Atomic unit of work.
///
/// A task describes *what* to do. Retries, guardrails, and metrics are applied
/// by an [`Executor`]; status, output, and error are only written there.
#[derive(Clone)]
pub struct Task {
    /// Process-unique identifier.
    pub id: String,
    /// Unique within a flow; the key for dependency edges and context outputs.
    pub name: String,
    pub description: String,
    unit: Option<ExecutableUnit>,
    /// Additional attempts after the first.
    pub retries: u32,
    pub input_guardrails: Vec<Guardrail>,
    pub output_guardrails: Vec<Guardrail>,
    pub status: Status,
    /// Last successful output.
    pub output: Option<serde_json::Value>,
    /// Last failure message.
    pub error: Option<String>,
}

impl Task {
    /// Create a task with no executable unit, 3 retries, and no guardrails.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: Uuid::new_v4().to_string(),
            description: name.clone(),
            name,
            unit: None,
            retries: DEFAULT_RETRIES,
            input_guardrails: vec![],
            output_guardrails: vec![],
            status: Status::Pending,
            output: None,
            error: None,
        }
    }

    /// Set the description handed to agents.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Assign a closure handler.
    pub fn with_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&Context) -> Result<TaskOutput> + Send + Sync + 'static,
    {
        self.with_task_handler(Arc::new(handler))
    }

    /// Assign a handler object.
    pub fn with_task_handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.unit = Some(match self.unit.take() {
            Some(ExecutableUnit::Agent(agent))
            | Some(ExecutableUnit::AgentWithHandler { agent, .. }) => {
                ExecutableUnit::AgentWithHandler { agent, handler }
            }
            Some(ExecutableUnit::Handler(_)) | None => ExecutableUnit::Handler(handler),
        });
        self
    }

    /// Assign an agent. An already-assigned handler keeps precedence.
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.unit = Some(match self.unit.take() {
            Some(ExecutableUnit::Handler(handler))
            | Some(ExecutableUnit::AgentWithHandler { handler, .. }) => {
                ExecutableUnit::AgentWithHandler { agent, handler }
            }
            Some(ExecutableUnit::Agent(_)) | None => ExecutableUnit::Agent(agent),
        });
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_input_guardrail(mut self, guardrail: Guardrail) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    pub fn with_output_guardrail(mut self, guardrail: Guardrail) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    pub fn unit(&self) -> Option<&ExecutableUnit> {
        self.unit.as_ref()
    }

    /// Role of the assigned agent, if any.
    pub fn agent_role(&self) -> Option<&str> {
        self.unit.as_ref().and_then(|u| u.agent()).map(|a| a.role())
    }

    /// Run the unit of work once, without retries or guardrails.
    ///
    /// Executors call this; a missing unit is a non-retryable
    /// [`AiworkError::NoExecutableUnit`].
    pub async fn run(&self, context: &Context) -> Result<TaskOutput> {
        match &self.unit {
            Some(ExecutableUnit::Handler(handler))
            | Some(ExecutableUnit::AgentWithHandler { handler, .. }) => {
                handler.call(context).await
            }
            Some(ExecutableUnit::Agent(agent)) => {
                agent.execute_task(&self.description, context).await
            }
            None => Err(AiworkError::NoExecutableUnit(self.name.clone())),
        }
    }

    /// Execute through a default [`LocalExecutor`].
    pub async fn execute(&mut self, context: &Context) -> Result<TaskOutput> {
        LocalExecutor::default().execute(self, context).await
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("agent", &self.agent_role())
            .field("retries", &self.retries)
            .field("status", &self.status)
            .field("output", &self.output)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}
