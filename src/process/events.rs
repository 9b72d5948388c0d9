use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle notifications published by the handler and dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessEvent {
    Started {
        process_id: String,
        phase: String,
    },
    TurnScheduled {
        process_id: String,
        phase: String,
    },
    ToolExecuted {
        process_id: String,
        tool_name: String,
        success: bool,
    },
    Suspended {
        process_id: String,
        request_id: String,
    },
    Resumed {
        process_id: String,
        request_id: String,
    },
    WentIdle {
        process_id: String,
    },
    Finished {
        process_id: String,
    },
    DeliverySkipped {
        process_id: String,
        reason: String,
    },
    WindowFlushed {
        process_id: String,
        archived_messages: usize,
    },
    Error {
        process_id: Option<String>,
        message: String,
    },
}

pub type EventSender = broadcast::Sender<ProcessEvent>;
pub type EventReceiver = broadcast::Receiver<ProcessEvent>;

/// Create a broadcast event bus with the given capacity.
pub fn event_bus(capacity: usize) -> (EventSender, EventReceiver) {
    broadcast::channel(capacity)
}
