use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, warn};

use aiwork_core::config::ExecutorConfig;
use aiwork_core::context::Context;
use aiwork_core::error::{AiworkError, Result};
use aiwork_core::traits::MetricsSink;
use aiwork_core::types::Status;

use crate::guardrail::panic_message;
use crate::metrics::{NoopMetrics, TASK_DURATION_METRIC};
use crate::task::{Task, TaskOutput};

/// Decides how a task runs.
///
/// One call is one execution cycle: the task moves to RUNNING and ends in
/// exactly one of COMPLETED or FAILED.
pub trait Executor: Send + Sync + 'static {
    fn execute<'a>(
        &'a self,
        task: &'a mut Task,
        context: &'a Context,
    ) -> BoxFuture<'a, Result<TaskOutput>>;
}

/// Runs tasks in-process with guardrails, retries, and timing metrics.
pub struct LocalExecutor {
    config: ExecutorConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl LocalExecutor {
    pub fn new(config: ExecutorConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { config, metrics }
    }

    async fn run(&self, task: &mut Task, context: &Context) -> Result<TaskOutput> {
        task.status = Status::Running;
        let start = Instant::now();
        let max_attempts = task.retries.saturating_add(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.attempt(task, context).await {
                Ok(output) => {
                    task.output = Some(output.value());
                    task.error = None;
                    task.status = Status::Completed;
                    self.metrics.record(
                        TASK_DURATION_METRIC,
                        start.elapsed().as_secs_f64(),
                        &[("task", task.name.as_str()), ("status", "success")],
                    );
                    debug!(task = %task.name, attempt, "Task completed");
                    return Ok(output);
                }
                Err(e) => {
                    warn!(
                        task = %task.name,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Task attempt failed"
                    );
                    if e.is_retryable() && attempt < max_attempts {
                        let backoff = calculate_backoff(attempt - 1, &self.config);
                        if !backoff.is_zero() {
                            tokio::time::sleep(backoff).await;
                        }
                        continue;
                    }

                    task.error = Some(e.to_string());
                    task.status = Status::Failed;
                    self.metrics.record(
                        TASK_DURATION_METRIC,
                        start.elapsed().as_secs_f64(),
                        &[("task", task.name.as_str()), ("status", "failed")],
                    );
                    return Err(e);
                }
            }
        }
    }

    /// One attempt: input guardrails, the unit of work, output guardrails.
    async fn attempt(&self, task: &Task, context: &Context) -> Result<TaskOutput> {
        if !task.input_guardrails.is_empty() {
            let input = context.to_value();
            if let Some(guard) = task.input_guardrails.iter().find(|g| !g.validate(&input)) {
                return Err(AiworkError::InputGuardrailViolation {
                    guardrail: guard.name.clone(),
                });
            }
        }

        let output = match self.config.attempt_timeout_secs {
            Some(timeout_secs) => {
                tokio::time::timeout(Duration::from_secs(timeout_secs), run_unit(task, context))
                    .await
                    .map_err(|_| AiworkError::TaskTimeout {
                        task: task.name.clone(),
                        timeout_secs,
                    })??
            }
            None => run_unit(task, context).await?,
        };

        if !task.output_guardrails.is_empty() {
            let value = output.value();
            if let Some(guard) = task.output_guardrails.iter().find(|g| !g.validate(&value)) {
                return Err(AiworkError::OutputGuardrailViolation {
                    guardrail: guard.name.clone(),
                });
            }
        }

        Ok(output)
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default(), Arc::new(NoopMetrics))
    }
}

impl Executor for LocalExecutor {
    fn execute<'a>(
        &'a self,
        task: &'a mut Task,
        context: &'a Context,
    ) -> BoxFuture<'a, Result<TaskOutput>> {
        Box::pin(self.run(task, context))
    }
}

/// Run the task's unit, turning a panic into a handler failure.
async fn run_unit(task: &Task, context: &Context) -> Result<TaskOutput> {
    match AssertUnwindSafe(task.run(context)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(AiworkError::handler(format!(
            "Task {} panicked: {}",
            task.name,
            panic_message(panic.as_ref())
        ))),
    }
}

fn calculate_backoff(retry: u32, config: &ExecutorConfig) -> Duration {
    if config.initial_backoff_ms == 0 {
        return Duration::ZERO;
    }
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(retry))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}
