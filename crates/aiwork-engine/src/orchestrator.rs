use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info};

use aiwork_core::context::Context;
use aiwork_core::event::EventBus;
use aiwork_core::types::{Status, WorkflowEvent, WorkflowId};

use crate::executor::{Executor, LocalExecutor};
use crate::flow::Flow;
use crate::state::StateManager;
use crate::task::Task;

/// A queued unit of work: either a task registered in the flow (looked up by
/// name) or one injected at runtime, which the queue owns.
enum Slot {
    Registered(String),
    Injected(Task),
}

/// Drives a [`Flow`] to completion.
///
/// Tasks run one at a time in topological order. A task may append work to
/// the run through its output; the first task that fails terminally fails
/// the whole workflow and nothing after it runs.
pub struct Orchestrator {
    executor: Arc<dyn Executor>,
    state: Arc<StateManager>,
    events: Option<Arc<EventBus>>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self {
            executor: Arc::new(LocalExecutor::default()),
            state: Arc::new(StateManager::new()),
            events: None,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_state_manager(mut self, state: Arc<StateManager>) -> Self {
        self.state = state;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state
    }

    fn publish(&self, event: WorkflowEvent) {
        if let Some(ref bus) = self.events {
            bus.publish(event);
        }
    }

    fn fail_workflow(&self, workflow_id: &WorkflowId, flow_name: &str, error: &str) {
        self.state.set_workflow_status(
            workflow_id.as_str(),
            Status::Failed,
            Some(flow_name),
            Some(error),
        );
        self.publish(WorkflowEvent::WorkflowFailed {
            workflow_id: workflow_id.clone(),
            error: error.to_string(),
        });
    }

    /// Run `flow` against `initial` and return the final context.
    ///
    /// A fresh workflow id is generated when none is given. Failures are not
    /// returned as errors: they are recorded in the state manager and the
    /// context holds the outputs of every task that did complete.
    pub async fn execute(
        &self,
        flow: &mut Flow,
        initial: Context,
        workflow_id: Option<WorkflowId>,
    ) -> Context {
        let workflow_id = workflow_id.unwrap_or_default();
        let id = workflow_id.as_str();
        let mut context = initial;
        context.begin_run(workflow_id.clone());

        self.state
            .set_workflow_status(id, Status::Running, Some(&flow.name), None);
        self.publish(WorkflowEvent::WorkflowStarted {
            workflow_id: workflow_id.clone(),
            name: flow.name.clone(),
        });
        info!(workflow_id = %id, flow = %flow.name, tasks = flow.len(), "Starting flow");

        let mut queue: Vec<Slot> = match flow.topological_order() {
            Ok(order) => order
                .into_iter()
                .map(|t| Slot::Registered(t.name.clone()))
                .collect(),
            Err(e) => {
                error!(workflow_id = %id, flow = %flow.name, error = %e, "Flow cannot be ordered");
                self.fail_workflow(&workflow_id, &flow.name, &e.to_string());
                return context;
            }
        };
        let mut processed: HashSet<String> = HashSet::new();
        let mut i = 0;

        while i < queue.len() {
            let task = match &mut queue[i] {
                Slot::Registered(name) => flow.get_mut(name),
                Slot::Injected(task) => Some(task),
            };
            i += 1;
            let Some(task) = task else { continue };

            if processed.contains(&task.name) {
                debug!(workflow_id = %id, task = %task.name, "Skipping already processed task");
                continue;
            }
            let name = task.name.clone();

            match task.agent_role() {
                Some(agent) => info!(workflow_id = %id, task = %name, agent, "Executing task"),
                None => info!(workflow_id = %id, task = %name, "Executing task"),
            }
            if let Err(e) = self.state.set_task_status(id, &name, Status::Running, None) {
                error!(workflow_id = %id, task = %name, error = %e, "State update failed");
            }
            self.publish(WorkflowEvent::TaskStarted {
                workflow_id: workflow_id.clone(),
                task: name.clone(),
            });

            let started = Instant::now();
            let result = self.executor.execute(task, &context).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    let (value, injected) = output.into_parts();
                    context.record_output(name.clone(), value.clone());
                    processed.insert(name.clone());

                    if let Err(e) = self
                        .state
                        .set_task_status(id, &name, Status::Completed, None)
                        .and_then(|_| self.state.update_task_output(id, &name, value))
                    {
                        error!(workflow_id = %id, task = %name, error = %e, "State update failed");
                    }
                    self.publish(WorkflowEvent::TaskCompleted {
                        workflow_id: workflow_id.clone(),
                        task: name.clone(),
                        elapsed_ms,
                    });
                    debug!(workflow_id = %id, task = %name, elapsed_ms, "Task completed");

                    if !injected.is_empty() {
                        let names: Vec<String> = injected.iter().map(|t| t.name.clone()).collect();
                        info!(
                            workflow_id = %id,
                            task = %name,
                            count = injected.len(),
                            "Task injected new tasks"
                        );
                        queue.extend(injected.into_iter().map(Slot::Injected));
                        self.publish(WorkflowEvent::TasksInjected {
                            workflow_id: workflow_id.clone(),
                            source: name,
                            tasks: names,
                        });
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    error!(workflow_id = %id, task = %name, error = %message, "Task failed");
                    if let Err(e) =
                        self.state
                            .set_task_status(id, &name, Status::Failed, Some(&message))
                    {
                        error!(workflow_id = %id, task = %name, error = %e, "State update failed");
                    }
                    self.publish(WorkflowEvent::TaskFailed {
                        workflow_id: workflow_id.clone(),
                        task: name,
                        error: message.clone(),
                    });
                    self.fail_workflow(&workflow_id, &flow.name, &message);
                    return context;
                }
            }
        }

        self.state
            .set_workflow_status(id, Status::Completed, Some(&flow.name), None);
        self.publish(WorkflowEvent::WorkflowCompleted {
            workflow_id: workflow_id.clone(),
        });
        info!(workflow_id = %id, flow = %flow.name, tasks = processed.len(), "Flow completed");
        context
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::BoxFuture;
    use serde_json::json;

    use aiwork_core::error::{AiworkError, Result};

    use crate::task::TaskOutput;

    fn counting(name: &str, calls: &Arc<AtomicUsize>) -> Task {
        let calls = calls.clone();
        let out = name.to_string();
        Task::new(name).with_handler(move |_: &Context| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(out.clone().into())
        })
    }

    #[tokio::test]
    async fn test_outputs_flow_downstream() {
        let mut flow = Flow::new("orch_flow");
        flow.add_task(Task::new("A").with_handler(|_: &Context| Ok("A".into())), &[])
            .unwrap();
        flow.add_task(
            Task::new("B").with_handler(|ctx: &Context| {
                let a = ctx.output_str("A").unwrap_or_default();
                Ok(format!("{}B", a).into())
            }),
            &["A"],
        )
        .unwrap();

        let ctx = Orchestrator::new().execute(&mut flow, Context::new(), None).await;
        assert_eq!(ctx.output("B"), Some(&json!("AB")));
        assert!(ctx.workflow_id().is_some());
    }

    #[tokio::test]
    async fn test_state_tracking() {
        let orchestrator = Orchestrator::new();
        let mut flow = Flow::new("state_flow");
        flow.add_task(Task::new("first").with_handler(|_: &Context| Ok("data1".into())), &[])
            .unwrap();
        flow.add_task(
            Task::new("second").with_handler(|ctx: &Context| {
                let first = ctx.output_str("first").unwrap_or_default();
                Ok(format!("{}_data2", first).into())
            }),
            &["first"],
        )
        .unwrap();

        let wf = WorkflowId::from("wf-state");
        orchestrator
            .execute(&mut flow, Context::new(), Some(wf.clone()))
            .await;

        let state = orchestrator.state_manager().get_workflow_state(wf.as_str()).unwrap();
        assert_eq!(state.status, Status::Completed);
        assert_eq!(state.name, "state_flow");
        assert_eq!(state.tasks["second"].output, Some(json!("data1_data2")));
        assert_eq!(state.tasks["first"].status, Status::Completed);
        assert_eq!(flow.get("second").unwrap().status, Status::Completed);
    }

    #[tokio::test]
    async fn test_failure_stops_workflow() {
        let calls = Arc::new(AtomicUsize::new(0));
        let orchestrator = Orchestrator::new();
        let mut flow = Flow::new("fail_flow");
        flow.add_task(
            Task::new("failing_task")
                .with_retries(0)
                .with_handler(|_: &Context| Err(AiworkError::handler("Intentional failure"))),
            &[],
        )
        .unwrap();
        flow.add_task(counting("after", &calls), &["failing_task"]).unwrap();

        let ctx = orchestrator.execute(&mut flow, Context::new(), None).await;
        let id = ctx.workflow_id().unwrap().as_str().to_string();
        let state = orchestrator.state_manager().get_workflow_state(&id).unwrap();

        assert_eq!(state.status, Status::Failed);
        assert_eq!(state.error.as_deref(), Some("Intentional failure"));
        assert_eq!(state.tasks["failing_task"].status, Status::Failed);
        assert_eq!(
            state.tasks["failing_task"].error.as_deref(),
            Some("Intentional failure")
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!state.tasks.contains_key("after"));
        assert!(ctx.output("after").is_none());
    }

    #[tokio::test]
    async fn test_cycle_fails_without_running() {
        let calls = Arc::new(AtomicUsize::new(0));
        let orchestrator = Orchestrator::new();
        let mut flow = Flow::new("cyclic");
        flow.add_task(counting("A", &calls), &["B"]).unwrap();
        flow.add_task(counting("B", &calls), &["A"]).unwrap();

        let wf = WorkflowId::from("wf-cycle");
        let ctx = orchestrator
            .execute(&mut flow, Context::new(), Some(wf.clone()))
            .await;

        let state = orchestrator.state_manager().get_workflow_state(wf.as_str()).unwrap();
        assert_eq!(state.status, Status::Failed);
        assert!(state.error.unwrap().contains("Cycle detected"));
        assert!(state.tasks.is_empty());
        assert!(ctx.outputs().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_dependency_fails_workflow() {
        let orchestrator = Orchestrator::new();
        let mut flow = Flow::new("dangling");
        flow.add_task(Task::new("a").with_handler(|_: &Context| Ok("a".into())), &["ghost"])
            .unwrap();

        let ctx = orchestrator.execute(&mut flow, Context::new(), None).await;
        let id = ctx.workflow_id().unwrap().as_str().to_string();
        let state = orchestrator.state_manager().get_workflow_state(&id).unwrap();
        assert_eq!(state.status, Status::Failed);
        assert!(state.error.unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_injected_tasks_run_after_queue() {
        let mut flow = Flow::new("dynamic");
        flow.add_task(
            Task::new("planner").with_handler(|_: &Context| {
                let extra = Task::new("extra").with_handler(|ctx: &Context| {
                    let plan = ctx.output_str("planner").unwrap_or_default();
                    Ok(format!("{}+extra", plan).into())
                });
                Ok(TaskOutput::inject("plan", vec![extra]))
            }),
            &[],
        )
        .unwrap();
        flow.add_task(Task::new("static").with_handler(|_: &Context| Ok("s".into())), &[])
            .unwrap();

        let orchestrator = Orchestrator::new();
        let ctx = orchestrator.execute(&mut flow, Context::new(), None).await;

        assert_eq!(ctx.output("planner"), Some(&json!("plan")));
        assert_eq!(ctx.output("static"), Some(&json!("s")));
        assert_eq!(ctx.output("extra"), Some(&json!("plan+extra")));
        // injected tasks are not added back to the flow
        assert!(flow.get("extra").is_none());

        let id = ctx.workflow_id().unwrap().as_str().to_string();
        let state = orchestrator.state_manager().get_workflow_state(&id).unwrap();
        assert_eq!(state.status, Status::Completed);
        assert_eq!(state.tasks["extra"].status, Status::Completed);
    }

    #[tokio::test]
    async fn test_reinjected_name_is_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let first_calls = calls.clone();
        let mut flow = Flow::new("requeue");
        flow.add_task(counting("A", &calls), &[]).unwrap();
        flow.add_task(
            Task::new("B").with_handler(move |_: &Context| {
                let again = counting("A", &first_calls);
                Ok(TaskOutput::inject("b", vec![again]))
            }),
            &["A"],
        )
        .unwrap();

        let ctx = Orchestrator::new().execute(&mut flow, Context::new(), None).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.outputs().len(), 2);
        assert_eq!(ctx.output("A"), Some(&json!("A")));
    }

    #[tokio::test]
    async fn test_sub_flow_output_appends_tasks() {
        let mut flow = Flow::new("parent");
        flow.add_task(
            Task::new("spawn").with_handler(|_: &Context| {
                let mut child = Flow::new("child");
                child.add_task(Task::new("c1").with_handler(|_: &Context| Ok("one".into())), &[])?;
                child.add_task(Task::new("c2").with_handler(|_: &Context| Ok("two".into())), &[])?;
                Ok(child.into())
            }),
            &[],
        )
        .unwrap();

        let ctx = Orchestrator::new().execute(&mut flow, Context::new(), None).await;
        assert_eq!(ctx.output("spawn"), Some(&json!({"flow": "child", "tasks": ["c1", "c2"]})));
        assert_eq!(ctx.output("c1"), Some(&json!("one")));
        assert_eq!(ctx.output("c2"), Some(&json!("two")));
    }

    #[tokio::test]
    async fn test_custom_executor() {
        struct Stamping;
        impl Executor for Stamping {
            fn execute<'a>(
                &'a self,
                task: &'a mut Task,
                _context: &'a Context,
            ) -> BoxFuture<'a, Result<TaskOutput>> {
                Box::pin(async move {
                    task.status = Status::Completed;
                    Ok(TaskOutput::from(format!("stamped:{}", task.name)))
                })
            }
        }

        let mut flow = Flow::new("custom");
        flow.add_task(Task::new("x"), &[]).unwrap();
        let ctx = Orchestrator::new()
            .with_executor(Arc::new(Stamping))
            .execute(&mut flow, Context::new(), None)
            .await;
        assert_eq!(ctx.output("x"), Some(&json!("stamped:x")));
    }

    #[tokio::test]
    async fn test_events_published_in_order() {
        let bus = Arc::new(EventBus::new(64));
        let mut rx = bus.subscribe();
        let mut flow = Flow::new("evented");
        flow.add_task(Task::new("only").with_handler(|_: &Context| Ok("x".into())), &[])
            .unwrap();

        Orchestrator::new()
            .with_event_bus(bus.clone())
            .execute(&mut flow, Context::new(), Some(WorkflowId::from("wf-ev")))
            .await;

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.workflow_id().as_str(), "wf-ev");
            kinds.push(serde_json::to_value(&event).unwrap()["type"].as_str().unwrap().to_string());
        }
        assert_eq!(
            kinds,
            vec!["workflow_started", "task_started", "task_completed", "workflow_completed"]
        );
    }

    #[tokio::test]
    async fn test_initial_context_visible_to_tasks() {
        let mut flow = Flow::new("params");
        flow.add_task(
            Task::new("greet").with_handler(|ctx: &Context| {
                Ok(format!("hello {}", ctx.get_str("who").unwrap_or("nobody")).into())
            }),
            &[],
        )
        .unwrap();

        let ctx = Orchestrator::new()
            .execute(&mut flow, Context::from_json(json!({"who": "ops"})), None)
            .await;
        assert_eq!(ctx.output_str("greet"), Some("hello ops"));
        assert_eq!(ctx.get_str("who"), Some("ops"));
    }
}
