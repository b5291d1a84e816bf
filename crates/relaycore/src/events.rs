//! Execution events
//!
//! The executor broadcasts one event per lifecycle milestone so callers
//! can observe retries, fallbacks, and routing without instrumenting
//! their nodes. Delivery is lossy: emitting never blocks, and a send
//! error from having no subscribers is ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Events emitted during a flow run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    FlowStarted {
        execution_id: ExecutionId,
        flow: String,
        timestamp: DateTime<Utc>,
    },
    FlowCompleted {
        execution_id: ExecutionId,
        flow: String,
        success: bool,
        steps: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        execution_id: ExecutionId,
        node: String,
        timestamp: DateTime<Utc>,
    },
    /// An execute attempt failed and another attempt will follow
    NodeRetrying {
        execution_id: ExecutionId,
        node: String,
        attempt: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// Every attempt failed and the fallback produced a result
    NodeFellBack {
        execution_id: ExecutionId,
        node: String,
        attempts: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: ExecutionId,
        node: String,
        action: Option<String>,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        execution_id: ExecutionId,
        node: String,
        attempts: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// One iteration of a batch flow run failed (continue-and-record
    /// policy keeps the remaining iterations running)
    IterationFailed {
        execution_id: ExecutionId,
        flow: String,
        iteration: usize,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for execution events
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(ExecutionEvent::FlowStarted {
            execution_id: ExecutionId::new_v4(),
            flow: "demo".to_string(),
            timestamp: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            ExecutionEvent::FlowStarted { flow, .. } => assert_eq!(flow, "demo"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.emit(ExecutionEvent::NodeStarted {
            execution_id: ExecutionId::new_v4(),
            node: "n".to_string(),
            timestamp: Utc::now(),
        });
    }
}
