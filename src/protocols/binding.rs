use super::action::{ActionClient, ActionService};
use super::event::{EventPublisher, EventSubscriber};
use super::request::{RequestClient, RequestService};
use super::tool::{ToolContext, ToolOutcome, ToolSpec};
use super::topic::{TopicPublisher, TopicSubscriber};
use crate::error::{ConfigError, ProtocolError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use strum::{AsRefStr, Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BindingRole {
    RequestClient,
    RequestService,
    ActionClient,
    ActionService,
    TopicPublisher,
    TopicSubscriber,
    EventPublisher,
    EventSubscriber,
}

/// Declared association between an agent type and one primitive type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSpec {
    pub role: BindingRole,
    pub type_id: String,
    /// Only meaningful for request clients.
    #[serde(default)]
    pub is_async: bool,
}

impl BindingSpec {
    pub fn new(role: BindingRole, type_id: impl Into<String>) -> Self {
        Self {
            role,
            type_id: type_id.into(),
            is_async: false,
        }
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    /// Names of the tools this binding exposes.
    pub fn tool_names(&self) -> Vec<String> {
        let t = self.type_id.as_str();
        match self.role {
            BindingRole::RequestClient => vec![RequestClient::tool_name(t)],
            BindingRole::RequestService => vec![RequestService::tool_name(t)],
            BindingRole::ActionClient => vec![ActionClient::tool_name(t)],
            BindingRole::ActionService => vec![
                ActionService::feedback_tool_name(t),
                ActionService::tool_name(t),
            ],
            BindingRole::TopicPublisher => vec![TopicPublisher::tool_name(t)],
            BindingRole::TopicSubscriber => vec![TopicSubscriber::tool_name(t)],
            BindingRole::EventPublisher => vec![EventPublisher::tool_name(t)],
            BindingRole::EventSubscriber => vec![EventSubscriber::tool_name(t)],
        }
    }
}

/// A process's handle on one primitive type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolBinding {
    pub process_id: String,
    pub primitive_type_id: String,
    pub tool_name: String,
}

/// One protocol object owned by a process.
#[derive(Debug, Clone)]
pub enum Binding {
    RequestClient(RequestClient),
    RequestService(RequestService),
    ActionClient(ActionClient),
    ActionService(ActionService),
    TopicPublisher(TopicPublisher),
    TopicSubscriber(TopicSubscriber),
    EventPublisher(EventPublisher),
    EventSubscriber(EventSubscriber),
}

impl Binding {
    pub fn from_spec(process_id: &str, spec: &BindingSpec) -> Self {
        let t = spec.type_id.as_str();
        let binding = |tool_name: String| ProtocolBinding {
            process_id: process_id.to_string(),
            primitive_type_id: spec.type_id.clone(),
            tool_name,
        };
        match spec.role {
            BindingRole::RequestClient => Self::RequestClient(RequestClient {
                binding: binding(RequestClient::tool_name(t)),
                is_async: spec.is_async,
            }),
            BindingRole::RequestService => Self::RequestService(RequestService {
                binding: binding(RequestService::tool_name(t)),
            }),
            BindingRole::ActionClient => Self::ActionClient(ActionClient {
                binding: binding(ActionClient::tool_name(t)),
            }),
            BindingRole::ActionService => Self::ActionService(ActionService {
                binding: binding(ActionService::tool_name(t)),
                feedback_tool: ActionService::feedback_tool_name(t),
            }),
            BindingRole::TopicPublisher => Self::TopicPublisher(TopicPublisher {
                binding: binding(TopicPublisher::tool_name(t)),
            }),
            BindingRole::TopicSubscriber => Self::TopicSubscriber(TopicSubscriber {
                binding: binding(TopicSubscriber::tool_name(t)),
            }),
            BindingRole::EventPublisher => Self::EventPublisher(EventPublisher {
                binding: binding(EventPublisher::tool_name(t)),
            }),
            BindingRole::EventSubscriber => Self::EventSubscriber(EventSubscriber {
                binding: binding(EventSubscriber::tool_name(t)),
            }),
        }
    }

    pub fn role(&self) -> BindingRole {
        match self {
            Self::RequestClient(_) => BindingRole::RequestClient,
            Self::RequestService(_) => BindingRole::RequestService,
            Self::ActionClient(_) => BindingRole::ActionClient,
            Self::ActionService(_) => BindingRole::ActionService,
            Self::TopicPublisher(_) => BindingRole::TopicPublisher,
            Self::TopicSubscriber(_) => BindingRole::TopicSubscriber,
            Self::EventPublisher(_) => BindingRole::EventPublisher,
            Self::EventSubscriber(_) => BindingRole::EventSubscriber,
        }
    }

    pub fn protocol(&self) -> &ProtocolBinding {
        match self {
            Self::RequestClient(p) => &p.binding,
            Self::RequestService(p) => &p.binding,
            Self::ActionClient(p) => &p.binding,
            Self::ActionService(p) => &p.binding,
            Self::TopicPublisher(p) => &p.binding,
            Self::TopicSubscriber(p) => &p.binding,
            Self::EventPublisher(p) => &p.binding,
            Self::EventSubscriber(p) => &p.binding,
        }
    }

    pub fn tools(&self) -> Vec<ToolSpec> {
        match self {
            Self::RequestClient(p) => p.tools(),
            Self::RequestService(p) => p.tools(),
            Self::ActionClient(p) => p.tools(),
            Self::ActionService(p) => p.tools(),
            Self::TopicPublisher(p) => p.tools(),
            Self::TopicSubscriber(p) => p.tools(),
            Self::EventPublisher(p) => p.tools(),
            Self::EventSubscriber(p) => p.tools(),
        }
    }

    async fn call(&self, op: ToolOp, args: &Value, ctx: &ToolContext<'_>) -> anyhow::Result<ToolOutcome> {
        match (self, op) {
            (Self::RequestClient(p), ToolOp::Invoke) => p.invoke(args, ctx).await,
            (Self::RequestService(p), ToolOp::Complete) => p.complete(args, ctx).await,
            (Self::ActionClient(p), ToolOp::Invoke) => p.invoke(args, ctx).await,
            (Self::ActionService(p), ToolOp::Feedback) => p.send_feedback(args, ctx).await,
            (Self::ActionService(p), ToolOp::Complete) => p.complete(args, ctx).await,
            (Self::TopicPublisher(p), ToolOp::Invoke) => p.publish(args, ctx).await,
            (Self::TopicSubscriber(p), ToolOp::Invoke) => p.read(ctx).await,
            (Self::EventPublisher(p), ToolOp::Invoke) => p.emit(args, ctx).await,
            (Self::EventSubscriber(p), ToolOp::Complete) => p.complete(args, ctx).await,
            (binding, _) => {
                Ok(ProtocolError::UnknownTool(binding.protocol().tool_name.clone()).into())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolOp {
    Invoke,
    Complete,
    Feedback,
}

fn ops_for(binding: &Binding) -> Vec<(String, ToolOp)> {
    let primary = binding.protocol().tool_name.clone();
    match binding {
        Binding::RequestService(_) | Binding::EventSubscriber(_) => {
            vec![(primary, ToolOp::Complete)]
        }
        Binding::ActionService(service) => vec![
            (service.feedback_tool.clone(), ToolOp::Feedback),
            (primary, ToolOp::Complete),
        ],
        _ => vec![(primary, ToolOp::Invoke)],
    }
}

/// Registration table built once per process: tool name to binding and operation.
#[derive(Debug, Clone)]
pub struct BindingTable {
    process_id: String,
    bindings: Vec<Binding>,
    routes: HashMap<String, (usize, ToolOp)>,
}

impl BindingTable {
    /// Build the table. Two bindings exposing the same tool name is a
    /// configuration error.
    pub fn new(process_id: &str, specs: &[BindingSpec]) -> Result<Self, ConfigError> {
        let bindings: Vec<Binding> = specs
            .iter()
            .map(|spec| Binding::from_spec(process_id, spec))
            .collect();
        let mut routes = HashMap::new();
        for (index, binding) in bindings.iter().enumerate() {
            for (name, op) in ops_for(binding) {
                if routes.insert(name.clone(), (index, op)).is_some() {
                    return Err(ConfigError::DuplicateTool {
                        process_id: process_id.to_string(),
                        tool: name,
                    });
                }
            }
        }
        Ok(Self {
            process_id: process_id.to_string(),
            bindings,
            routes,
        })
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Every tool spec, in binding order.
    pub fn tools(&self) -> Vec<ToolSpec> {
        self.bindings.iter().flat_map(Binding::tools).collect()
    }

    /// Tool specs restricted to `names`.
    pub fn tools_named(&self, names: &[&str]) -> Vec<ToolSpec> {
        self.tools()
            .into_iter()
            .filter(|spec| names.contains(&spec.name.as_str()))
            .collect()
    }

    pub fn function_exists(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    /// Run a tool. Unknown names and bad arguments come back as failed
    /// outcomes; only storage failures are errors.
    pub async fn call_function(
        &self,
        name: &str,
        args: &Value,
        ctx: &ToolContext<'_>,
    ) -> anyhow::Result<ToolOutcome> {
        let Some(&(index, op)) = self.routes.get(name) else {
            return Ok(ProtocolError::UnknownTool(name.to_string()).into());
        };
        self.bindings[index].call(op, args, ctx).await
    }

    /// Type ids this process serves for `role`.
    pub fn type_ids(&self, role: BindingRole) -> Vec<String> {
        self.bindings
            .iter()
            .filter(|b| b.role() == role)
            .map(|b| b.protocol().primitive_type_id.clone())
            .collect()
    }
}
