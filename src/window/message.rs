use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single function invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One entry of a process conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ConversationMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
    },
    /// Assistant message carrying one or more tool calls.
    ToolCalls {
        calls: Vec<ToolCall>,
    },
    ToolResponse {
        tool_call_id: String,
        content: String,
        /// Placeholder for a synchronous request still waiting on its service.
        #[serde(default)]
        pending: bool,
    },
}

impl ConversationMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self::ToolCalls { calls }
    }

    pub fn tool_response(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResponse {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            pending: false,
        }
    }

    pub fn pending_tool_response(tool_call_id: impl Into<String>) -> Self {
        Self::ToolResponse {
            tool_call_id: tool_call_id.into(),
            content: String::new(),
            pending: true,
        }
    }

    pub fn role_label(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::ToolCalls { .. } => "tool_call",
            Self::ToolResponse { .. } => "tool_response",
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }

    /// Ids of the calls carried by a `ToolCalls` message.
    pub fn call_ids(&self) -> Vec<&str> {
        match self {
            Self::ToolCalls { calls } => calls.iter().map(|call| call.id.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// Id of the call a `ToolResponse` answers.
    pub fn responds_to(&self) -> Option<&str> {
        match self {
            Self::ToolResponse { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    /// Text the token counter and renderer see.
    pub fn text(&self) -> String {
        match self {
            Self::System { content } | Self::User { content } | Self::Assistant { content } => {
                content.clone()
            }
            Self::ToolCalls { calls } => calls
                .iter()
                .map(|call| format!("{}({})", call.name, call.arguments))
                .collect::<Vec<_>>()
                .join("\n"),
            Self::ToolResponse { content, .. } => content.clone(),
        }
    }

    pub fn render(&self) -> String {
        match self {
            Self::ToolCalls { calls } => calls
                .iter()
                .map(|call| format!("[tool_call {}] {}({})", call.id, call.name, call.arguments))
                .collect::<Vec<_>>()
                .join("\n"),
            Self::ToolResponse {
                tool_call_id,
                content,
                pending,
            } => {
                if *pending {
                    format!("[tool_response {tool_call_id}] (waiting for response)")
                } else {
                    format!("[tool_response {tool_call_id}] {content}")
                }
            }
            other => format!("[{}] {}", other.role_label(), other.text()),
        }
    }
}
