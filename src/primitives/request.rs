use super::{PrimitiveStatus, render_payload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// RPC-style call from a client process to the service bound for `request_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub request_type: String,
    pub client_process_id: String,
    pub service_process_id: String,
    /// Tool call that issued the request; synchronous responses are written back into it.
    pub tool_call_id: Option<String>,
    pub request_payload: Value,
    #[serde(default)]
    pub response_payload: Option<Value>,
    pub is_async: bool,
    pub priority: i64,
    pub status: PrimitiveStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Request {
    pub fn new(
        request_type: impl Into<String>,
        client_process_id: impl Into<String>,
        service_process_id: impl Into<String>,
        request_payload: Value,
        is_async: bool,
        priority: i64,
    ) -> Self {
        Self {
            id: format!("req_{}", Uuid::new_v4().simple()),
            request_type: request_type.into(),
            client_process_id: client_process_id.into(),
            service_process_id: service_process_id.into(),
            tool_call_id: None,
            request_payload,
            response_payload: None,
            is_async,
            priority,
            status: PrimitiveStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn with_tool_call(mut self, tool_call_id: impl Into<String>) -> Self {
        self.tool_call_id = Some(tool_call_id.into());
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.status.is_terminal()
    }

    /// Resolve with the service's response. Resolving twice keeps the first answer.
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

    /// Prompt text shown to the service process.
    pub fn render(&self) -> String {
        format!(
            "Request {} ({}) from {} [priority {}]:\n{}",
            self.id,
            self.request_type,
            self.client_process_id,
            self.priority,
            render_payload(&self.request_payload)
        )
    }

    /// Prompt text shown to the client process once resolved.
    pub fn render_response(&self) -> String {
        let body = self
            .response_payload
            .as_ref()
            .map_or_else(String::new, render_payload);
        format!(
            "Response to {} request {} ({}):\n{}",
            self.request_type, self.id, self.status, body
        )
    }
}
