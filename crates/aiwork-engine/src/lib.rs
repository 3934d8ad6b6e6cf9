pub mod definition;
pub mod executor;
pub mod flow;
pub mod guardrail;
pub mod metrics;
pub mod orchestrator;
pub mod state;
pub mod task;

pub use definition::{placeholder_handler, FlowDefinition, TaskDefinition};
pub use executor::{Executor, LocalExecutor};
pub use flow::Flow;
pub use guardrail::Guardrail;
pub use metrics::{MetricEntry, MetricsRegistry, NoopMetrics, TASK_DURATION_METRIC};
pub use orchestrator::Orchestrator;
pub use state::{StateManager, TaskRecord, WorkflowState};
pub use task::{Agent, ExecutableUnit, Task, TaskHandler, TaskOutput, DEFAULT_RETRIES};
