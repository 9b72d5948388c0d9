use super::render_payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Notification fanned out to every subscriber of `event_type`.
///
/// Immutable once published; completion is tracked per subscriber by
/// [`EventDelivery`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub event_type: String,
    pub publisher_process_id: Option<String>,
    pub payload: Value,
    #[serde(default)]
    pub priority: i64,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        publisher_process_id: Option<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: format!("evt_{}", Uuid::new_v4().simple()),
            event_type: event_type.into(),
            publisher_process_id,
            payload,
            priority: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn render(&self) -> String {
        let source = self.publisher_process_id.as_deref().unwrap_or("external");
        format!(
            "Event {} ({}) from {source}:\n{}",
            self.id,
            self.event_type,
            render_payload(&self.payload)
        )
    }
}

/// One subscriber's view of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDelivery {
    pub event_id: String,
    pub event_type: String,
    pub subscriber_process_id: String,
    pub completed: bool,
    pub delivered_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl EventDelivery {
    pub fn new(event: &Event, subscriber_process_id: impl Into<String>) -> Self {
        Self {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            subscriber_process_id: subscriber_process_id.into(),
            completed: false,
            delivered_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn complete(&mut self) -> bool {
        if self.completed {
            return false;
        }
        self.completed = true;
        self.completed_at = Some(Utc::now());
        true
    }
}
