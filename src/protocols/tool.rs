use crate::dispatch::{BindingIndex, Lifecycle};
use crate::error::ProtocolError;
use crate::store::PrimitiveStore;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Description of a tool handed to the model-calling side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Everything a tool call may touch.
pub struct ToolContext<'a> {
    pub process_id: &'a str,
    pub tool_call_id: &'a str,
    pub store: &'a PrimitiveStore,
    pub index: &'a BindingIndex,
}

/// Result of one tool call.
///
/// Protocol violations come back as `success: false` with the reason in
/// `content`, so the calling process sees them in its conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub success: bool,
    pub content: String,
    /// Request id the caller must wait for before its next turn.
    pub suspend: Option<String>,
    pub lifecycle: Vec<Lifecycle>,
}

impl ToolOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            suspend: None,
            lifecycle: Vec::new(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            success: false,
            content: content.into(),
            suspend: None,
            lifecycle: Vec::new(),
        }
    }

    pub fn suspended(request_id: impl Into<String>) -> Self {
        Self {
            success: true,
            content: String::new(),
            suspend: Some(request_id.into()),
            lifecycle: Vec::new(),
        }
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle.push(lifecycle);
        self
    }
}

impl From<ProtocolError> for ToolOutcome {
    fn from(error: ProtocolError) -> Self {
        Self::error(format!("Error: {error}"))
    }
}

pub(crate) fn required(tool: &str, args: &Value, field: &str) -> Result<Value, ProtocolError> {
    match args.get(field) {
        Some(Value::Null) | None => Err(ProtocolError::InvalidArguments {
            tool: tool.to_string(),
            message: format!("missing required field '{field}'"),
        }),
        Some(value) => Ok(value.clone()),
    }
}

pub(crate) fn priority(args: &Value) -> i64 {
    args.get("priority").and_then(Value::as_i64).unwrap_or(0)
}

pub(crate) fn success_flag(args: &Value) -> bool {
    args.get("success").and_then(Value::as_bool).unwrap_or(true)
}

pub(crate) fn payload_schema(field: &str, description: &str, with_priority: bool) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert(field.into(), json!({ "description": description }));
    if with_priority {
        properties.insert(
            "priority".into(),
            json!({
                "type": "integer",
                "description": "Higher values are handled first. Defaults to 0."
            }),
        );
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": [field]
    })
}

pub(crate) fn completion_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "response": { "description": "Result handed back to the caller." },
            "success": {
                "type": "boolean",
                "description": "Whether the work succeeded. Defaults to true."
            }
        },
        "required": ["response"]
    })
}
