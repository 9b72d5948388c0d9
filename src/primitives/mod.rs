//! Communication primitives exchanged between processes.
//!
//! Primitives are plain values. All mutation goes through
//! [`crate::store::PrimitiveStore`] so that the "one current request per
//! service" rule lives in a single place.

pub mod action;
pub mod event;
pub mod request;
pub mod topic;

pub use action::Action;
pub use event::{Event, EventDelivery};
pub use request::Request;
pub use topic::Topic;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PrimitiveStatus {
    Pending,
    InProgress,
    Success,
    Failure,
}

impl PrimitiveStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    pub fn is_outstanding(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PrimitiveKind {
    Request,
    Action,
    Event,
    Topic,
}

/// Any first-class communication object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Primitive {
    Request(Request),
    Action(Action),
    Event(Event),
    Topic(Topic),
}

impl Primitive {
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Self::Request(_) => PrimitiveKind::Request,
            Self::Action(_) => PrimitiveKind::Action,
            Self::Event(_) => PrimitiveKind::Event,
            Self::Topic(_) => PrimitiveKind::Topic,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Request(r) => &r.id,
            Self::Action(a) => &a.id,
            Self::Event(e) => &e.id,
            Self::Topic(t) => &t.id,
        }
    }

    /// Type identifier the primitive is routed by (request type, event type, topic id).
    pub fn type_id(&self) -> &str {
        match self {
            Self::Request(r) => &r.request_type,
            Self::Action(a) => &a.action_type,
            Self::Event(e) => &e.event_type,
            Self::Topic(t) => &t.id,
        }
    }

    pub fn priority(&self) -> i64 {
        match self {
            Self::Request(r) => r.priority,
            Self::Action(a) => a.priority,
            Self::Event(e) => e.priority,
            Self::Topic(_) => 0,
        }
    }

    /// When the primitive entered the system. A topic that was never
    /// published sorts first.
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Request(r) => r.created_at,
            Self::Action(a) => a.created_at,
            Self::Event(e) => e.timestamp,
            Self::Topic(t) => t.timestamp.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        }
    }

    /// Shared status. Events and topics have none.
    pub fn status(&self) -> Option<PrimitiveStatus> {
        match self {
            Self::Request(r) => Some(r.status),
            Self::Action(a) => Some(a.status),
            Self::Event(_) | Self::Topic(_) => None,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Self::Request(r) => r.render(),
            Self::Action(a) => a.render(),
            Self::Event(e) => e.render(),
            Self::Topic(t) => t.render(),
        }
    }
}

/// Something a service works through one at a time.
pub trait Queued {
    fn queue_id(&self) -> &str;
    fn queue_priority(&self) -> i64;
    fn queued_at(&self) -> DateTime<Utc>;
    fn queue_status(&self) -> PrimitiveStatus;
}

impl Queued for Request {
    fn queue_id(&self) -> &str {
        &self.id
    }
    fn queue_priority(&self) -> i64 {
        self.priority
    }
    fn queued_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn queue_status(&self) -> PrimitiveStatus {
        self.status
    }
}

impl Queued for Action {
    fn queue_id(&self) -> &str {
        &self.id
    }
    fn queue_priority(&self) -> i64 {
        self.priority
    }
    fn queued_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn queue_status(&self) -> PrimitiveStatus {
        self.status
    }
}

/// Pick the item a service should be working on.
///
/// An in-progress item stays current until it is resolved. Otherwise the
/// highest-priority pending item wins, ties going to the earliest `queued_at`
/// and then to the smallest id.
pub fn select_current<T: Queued>(items: &[T]) -> Option<&T> {
    if let Some(active) = items
        .iter()
        .filter(|item| item.queue_status() == PrimitiveStatus::InProgress)
        .min_by(|a, b| a.queued_at().cmp(&b.queued_at()))
    {
        return Some(active);
    }

    items
        .iter()
        .filter(|item| item.queue_status() == PrimitiveStatus::Pending)
        .min_by(|a, b| {
            b.queue_priority()
                .cmp(&a.queue_priority())
                .then_with(|| a.queued_at().cmp(&b.queued_at()))
                .then_with(|| a.queue_id().cmp(b.queue_id()))
        })
}

/// Render a JSON payload for prompt text: bare strings stay unquoted.
pub fn render_payload(payload: &Value) -> String {
    match payload {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
