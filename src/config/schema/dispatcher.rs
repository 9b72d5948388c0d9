use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Deliver action feedback to the client as a message and wake it
    #[serde(default = "default_notify_action_feedback")]
    pub notify_action_feedback: bool,
    /// Capacity of the process lifecycle broadcast bus
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

fn default_notify_action_feedback() -> bool {
    true
}
fn default_event_bus_capacity() -> usize {
    256
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            notify_action_feedback: default_notify_action_feedback(),
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}
