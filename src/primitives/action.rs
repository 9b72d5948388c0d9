use super::{PrimitiveStatus, render_payload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Long-running asynchronous call with intermediate feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub action_type: String,
    pub client_process_id: String,
    pub service_process_id: String,
    pub request_payload: Value,
    #[serde(default)]
    pub feedback_payload: Option<Value>,
    #[serde(default)]
    pub feedback_count: u32,
    #[serde(default)]
    pub response_payload: Option<Value>,
    pub priority: i64,
    pub status: PrimitiveStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Action {
    pub fn new(
        action_type: impl Into<String>,
        client_process_id: impl Into<String>,
        service_process_id: impl Into<String>,
        request_payload: Value,
        priority: i64,
    ) -> Self {
        Self {
            id: format!("act_{}", Uuid::new_v4().simple()),
            action_type: action_type.into(),
            client_process_id: client_process_id.into(),
            service_process_id: service_process_id.into(),
            request_payload,
            feedback_payload: None,
            feedback_count: 0,
            response_payload: None,
            priority,
            status: PrimitiveStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status.is_terminal()
    }

    /// Overwrite the latest feedback. Status is left untouched.
    pub fn record_feedback(&mut self, feedback: Value) -> bool {
        if self.is_resolved() {
            return false;
        }
        self.feedback_payload = Some(feedback);
        self.feedback_count += 1;
        true
    }

    pub fn resolve(&mut self, response: Value, success: bool) -> bool {
        if self.is_resolved() {
            return false;
        }
        self.response_payload = Some(response);
        self.status = if success {
            PrimitiveStatus::Success
        } else {
            PrimitiveStatus::Failure
        };
        self.resolved_at = Some(Utc::now());
        true
    }

    pub fn render(&self) -> String {
        format!(
            "Action {} ({}) from {} [priority {}]:\n{}",
            self.id,
            self.action_type,
            self.client_process_id,
            self.priority,
            render_payload(&self.request_payload)
        )
    }

    pub fn render_feedback(&self) -> String {
        let body = self
            .feedback_payload
            .as_ref()
            .map_or_else(String::new, render_payload);
        format!(
            "Feedback #{} on {} action {}:\n{}",
            self.feedback_count, self.action_type, self.id, body
        )
    }

    pub fn render_response(&self) -> String {
        let body = self
            .response_payload
            .as_ref()
            .map_or_else(String::new, render_payload);
        format!(
            "Result of {} action {} ({}):\n{}",
            self.action_type, self.id, self.status, body
        )
    }
}
