//! Shared fixtures for AIWork integration tests.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;

use aiwork_core::context::Context;
use aiwork_core::error::{AiworkError, Result};
use aiwork_engine::{Agent, Flow, Task, TaskOutput};

/// Task whose handler returns `output` and counts its invocations.
pub fn counting_task(name: &str, output: &str) -> (Task, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let output = output.to_string();
    let task = Task::new(name).with_handler(move |_: &Context| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(output.clone().into())
    });
    (task, calls)
}

/// Task whose handler fails `failures` times before returning `output`.
pub fn flaky_task(name: &str, failures: usize, output: &str) -> (Task, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let output = output.to_string();
    let task = Task::new(name).with_handler(move |_: &Context| {
        if counter.fetch_add(1, Ordering::SeqCst) < failures {
            Err(AiworkError::handler("Temporary failure"))
        } else {
            Ok(output.clone().into())
        }
    });
    (task, calls)
}

/// Task whose handler always fails with `message`.
pub fn failing_task(name: &str, message: &str) -> Task {
    let message = message.to_string();
    Task::new(name).with_handler(move |_: &Context| Err(AiworkError::handler(message.clone())))
}

/// Agent that answers `"{role}:{description}"`.
pub struct StubAgent {
    role: String,
    calls: AtomicUsize,
}

impl StubAgent {
    pub fn new(role: &str) -> Self {
        Self {
            role: role.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Agent for StubAgent {
    fn role(&self) -> &str {
        &self.role
    }

    fn execute_task<'a>(
        &'a self,
        description: &'a str,
        _context: &'a Context,
    ) -> BoxFuture<'a, Result<TaskOutput>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let out = TaskOutput::from(format!("{}:{}", self.role, description));
        Box::pin(async move { Ok(out) })
    }
}

/// `first` -> `second`, where `second` appends to `first`'s output.
pub fn two_step_flow() -> Flow {
    let mut flow = Flow::new("two_step");
    let first = Task::new("first").with_handler(|_: &Context| Ok("data1".into()));
    let second = Task::new("second").with_handler(|ctx: &Context| {
        let first = ctx.output_str("first").unwrap_or_default();
        Ok(format!("{}_data2", first).into())
    });
    flow.add_task(first, &[]).expect("add first");
    flow.add_task(second, &["first"]).expect("add second");
    flow
}

/// Write `contents` to a temp file ending in `suffix`.
pub fn temp_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("create temp file");
    file.write_all(contents.as_bytes()).expect("write temp file");
    file
}
