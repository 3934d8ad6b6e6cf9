use tokio::sync::broadcast::{self, error::RecvError};

use crate::types::{WorkflowEvent, WorkflowId};

/// Broadcast bus for workflow progress. Every subscriber sees every event;
/// use [`EventBus::subscribe_workflow`] to follow a single run.
pub struct EventBus {
    tx: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishing with no subscribers drops the event.
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }

    /// Events for one workflow, ending after its terminal event.
    pub fn subscribe_workflow(&self, workflow_id: WorkflowId) -> WorkflowSubscription {
        WorkflowSubscription {
            rx: self.tx.subscribe(),
            workflow_id,
            finished: false,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

pub struct WorkflowSubscription {
    rx: broadcast::Receiver<WorkflowEvent>,
    workflow_id: WorkflowId,
    finished: bool,
}

impl WorkflowSubscription {
    /// Next event for the watched workflow. `None` once the workflow has
    /// completed or failed, or the bus is gone. Lagged events are skipped.
    pub async fn next(&mut self) -> Option<WorkflowEvent> {
        if self.finished {
            return None;
        }
        loop {
            match self.rx.recv().await {
                Ok(event) if event.workflow_id() == &self.workflow_id => {
                    self.finished = event.is_terminal();
                    return Some(event);
                }
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }
}
