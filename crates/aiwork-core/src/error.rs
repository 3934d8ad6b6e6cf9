use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiworkError {
    // Flow construction errors
    #[error("Task with name {0} already exists in flow")]
    DuplicateTask(String),

    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("Cycle detected in Flow DAG at task {0}")]
    CycleDetected(String),

    #[error("{0}")]
    InvalidDefinition(String),

    // Task errors
    #[error("Task {0} has no Agent and no Handler")]
    NoExecutableUnit(String),

    #[error("Input guardrail '{guardrail}' failed validation")]
    InputGuardrailViolation { guardrail: String },

    #[error("Guardrail '{guardrail}' failed validation")]
    OutputGuardrailViolation { guardrail: String },

    /// Failure raised by user handler or agent code. Displayed verbatim.
    #[error("{0}")]
    Handler(String),

    #[error("Task timeout after {timeout_secs}s: {task}")]
    TaskTimeout { task: String, timeout_secs: u64 },

    // State lookup errors
    #[error("Workflow {0} not found")]
    WorkflowNotFound(String),

    #[error("Task {task} not found in workflow {workflow_id}")]
    TaskNotFound { workflow_id: String, task: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Gateway errors
    #[error("Gateway error: {0}")]
    Gateway(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AiworkError {
    /// Build a handler failure from any displayable message.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Whether an executor may spend another attempt after this error.
    ///
    /// Guardrail violations count as ordinary attempt failures.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AiworkError::Handler(_)
                | AiworkError::InputGuardrailViolation { .. }
                | AiworkError::OutputGuardrailViolation { .. }
                | AiworkError::TaskTimeout { .. }
                | AiworkError::Io(_)
                | AiworkError::Json(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AiworkError>;
