//! Protocol bindings: the tools a process gets for each primitive type it
//! participates in.

pub mod action;
pub mod binding;
pub mod event;
pub mod request;
pub mod tool;
pub mod topic;

pub use action::{ActionClient, ActionService};
pub use binding::{Binding, BindingRole, BindingSpec, BindingTable, ProtocolBinding};
pub use event::{EventPublisher, EventSubscriber};
pub use request::{RequestClient, RequestService};
pub use tool::{ToolContext, ToolOutcome, ToolSpec};
pub use topic::{TopicPublisher, TopicSubscriber};
