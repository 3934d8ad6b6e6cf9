use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

type Validator = dyn Fn(&serde_json::Value) -> Result<bool, String> + Send + Sync;

/// A named predicate over a task's input context or output value.
///
/// Guardrails are immutable and cheap to clone; one guardrail may be attached
/// to any number of tasks.
#[derive(Clone)]
pub struct Guardrail {
    pub name: String,
    pub description: String,
    validator: Arc<Validator>,
}

impl Guardrail {
    /// Create a guardrail from an infallible predicate.
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&serde_json::Value) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            validator: Arc::new(move |v| Ok(predicate(v))),
        }
    }

    /// Create a guardrail whose predicate can itself fail.
    /// A failing predicate counts as a rejected value.
    pub fn fallible<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Result<bool, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            validator: Arc::new(predicate),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Run the predicate. Never fails and never panics: predicate errors and
    /// panics are logged and reported as `false`.
    pub fn validate(&self, value: &serde_json::Value) -> bool {
        match catch_unwind(AssertUnwindSafe(|| (self.validator)(value))) {
            Ok(Ok(valid)) => valid,
            Ok(Err(e)) => {
                warn!(guardrail = %self.name, error = %e, "Guardrail error");
                false
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                warn!(guardrail = %self.name, error = %msg, "Guardrail panicked");
                false
            }
        }
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

impl std::fmt::Debug for Guardrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guardrail")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
