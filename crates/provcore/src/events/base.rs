use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Events emitted while workflows and chains execute
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    WorkflowStarted {
        execution_id: ExecutionId,
        workflow: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        execution_id: ExecutionId,
        workflow: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        execution_id: ExecutionId,
        step: String,
        step_type: String,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        execution_id: ExecutionId,
        step: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StepFailed {
        execution_id: ExecutionId,
        step: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    StepEvent {
        execution_id: ExecutionId,
        step: String,
        event: StepEvent,
        timestamp: DateTime<Utc>,
    },
    LinkStarted {
        chain: String,
        link: String,
        timestamp: DateTime<Utc>,
    },
    LinkCompleted {
        chain: String,
        link: String,
        success: bool,
        timestamp: DateTime<Utc>,
    },
}

/// Messages a step reports about its own progress
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum StepEvent {
    Info { step_type: String, message: String },
    Warning { step_type: String, message: String },
}

/// Event emitter bound to one step of one execution
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    step: String,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(
        execution_id: ExecutionId,
        step: impl Into<String>,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            execution_id,
            step: step.into(),
            sender,
        }
    }

    pub fn emit(&self, event: StepEvent) {
        let _ = self.sender.send(ExecutionEvent::StepEvent {
            execution_id: self.execution_id,
            step: self.step.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, step_type: &str, message: impl Into<String>) {
        self.emit(StepEvent::Info {
            step_type: step_type.to_string(),
            message: message.into(),
        });
    }

    pub fn warn(&self, step_type: &str, message: impl Into<String>) {
        self.emit(StepEvent::Warning {
            step_type: step_type.to_string(),
            message: message.into(),
        });
    }
}

/// Broadcast bus shared by every workflow of a runtime
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, execution_id: ExecutionId, step: &str) -> EventEmitter {
        EventEmitter::new(execution_id, step, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
