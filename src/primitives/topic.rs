use super::render_payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Last-value cell. Publishing overwrites; there is no history and no completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    #[serde(default)]
    pub latest_message: Option<Value>,
    #[serde(default)]
    pub publisher_process_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Topic {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            latest_message: None,
            publisher_process_id: None,
            timestamp: None,
        }
    }

    pub fn publish(&mut self, publisher_process_id: &str, message: Value) {
        self.latest_message = Some(message);
        self.publisher_process_id = Some(publisher_process_id.to_string());
        self.timestamp = Some(Utc::now());
    }

    pub fn render(&self) -> String {
        match (&self.latest_message, self.timestamp) {
            (Some(message), Some(at)) => format!(
                "Topic {} (updated {}):\n{}",
                self.id,
                at.to_rfc3339(),
                render_payload(message)
            ),
            _ => format!("Topic {} has no value yet", self.id),
        }
    }
}
