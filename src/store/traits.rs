use crate::primitives::{EventDelivery, Primitive, PrimitiveKind};
use crate::process::{AgentDefinition, ProcessRecord};
use crate::window::ArchivedConversation;
use anyhow::Result;
use futures_util::future::BoxFuture;

/// Low-latency cache with string values, sets and score-ordered sets.
///
/// Failures are treated as transient: callers fall back to the
/// [`DurableStore`] rather than surfacing them.
pub trait KeyValueStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>>;

    /// Returns whether a value was present.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Conditional insert. Returns `true` only for the caller that added the member.
    fn set_add<'a>(&'a self, key: &'a str, member: &'a str) -> BoxFuture<'a, Result<bool>>;

    fn set_remove<'a>(&'a self, key: &'a str, member: &'a str) -> BoxFuture<'a, Result<bool>>;

    fn set_contains<'a>(&'a self, key: &'a str, member: &'a str) -> BoxFuture<'a, Result<bool>>;

    fn set_members<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<String>>>;

    fn zadd<'a>(&'a self, key: &'a str, score: f64, member: String) -> BoxFuture<'a, Result<()>>;

    /// Members in ascending score order. Equal scores keep insertion order.
    fn zrange<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<String>>>;

    fn zclear<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Authoritative persistence for primitives, definitions, process records and
/// archived conversations.
pub trait DurableStore: Send + Sync {
    /// Insert or replace by id.
    fn save_primitive<'a>(&'a self, primitive: &'a Primitive) -> BoxFuture<'a, Result<()>>;

    fn load_primitive<'a>(
        &'a self,
        kind: PrimitiveKind,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Primitive>>>;

    /// Primitives of `kind` routed by `type_id`, oldest first. With
    /// `outstanding_only`, resolved requests and actions are skipped.
    fn list_primitives<'a>(
        &'a self,
        kind: PrimitiveKind,
        type_id: &'a str,
        outstanding_only: bool,
    ) -> BoxFuture<'a, Result<Vec<Primitive>>>;

    fn save_delivery<'a>(&'a self, delivery: &'a EventDelivery) -> BoxFuture<'a, Result<()>>;

    /// Deliveries for one subscriber, oldest first.
    fn list_deliveries<'a>(
        &'a self,
        subscriber_process_id: &'a str,
        pending_only: bool,
    ) -> BoxFuture<'a, Result<Vec<EventDelivery>>>;

    fn save_agent_definition<'a>(
        &'a self,
        definition: &'a AgentDefinition,
    ) -> BoxFuture<'a, Result<()>>;

    fn load_agent_definition<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<AgentDefinition>>>;

    fn save_process<'a>(&'a self, record: &'a ProcessRecord) -> BoxFuture<'a, Result<()>>;

    fn load_process<'a>(
        &'a self,
        process_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<ProcessRecord>>>;

    fn archive_conversation<'a>(
        &'a self,
        archive: &'a ArchivedConversation,
    ) -> BoxFuture<'a, Result<()>>;

    /// Archives for one process, oldest first.
    fn load_archives<'a>(
        &'a self,
        process_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ArchivedConversation>>>;
}
