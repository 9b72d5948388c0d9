use super::traits::{DurableStore, KeyValueStore};
use crate::primitives::{EventDelivery, Primitive, PrimitiveKind};
use crate::process::{AgentDefinition, ProcessRecord};
use crate::window::ArchivedConversation;
use anyhow::Result;
use futures_util::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct KvState {
    values: HashMap<String, String>,
    sets: HashMap<String, HashSet<String>>,
    sorted: HashMap<String, Vec<(f64, String)>>,
}

/// Process-local [`KeyValueStore`]. Every operation is atomic under one mutex,
/// which is what makes `set_add` usable as a compare-and-swap.
#[derive(Default)]
pub struct InMemoryKeyValueStore {
    state: Mutex<KvState>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move { Ok(lock(&self.state).values.get(key).cloned()) })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            lock(&self.state).values.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(lock(&self.state).values.remove(key).is_some()) })
    }

    fn set_add<'a>(&'a self, key: &'a str, member: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            Ok(lock(&self.state)
                .sets
                .entry(key.to_string())
                .or_default()
                .insert(member.to_string()))
        })
    }

    fn set_remove<'a>(&'a self, key: &'a str, member: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let removed = state
                .sets
                .get_mut(key)
                .is_some_and(|set| set.remove(member));
            if state.sets.get(key).is_some_and(HashSet::is_empty) {
                state.sets.remove(key);
            }
            Ok(removed)
        })
    }

    fn set_contains<'a>(&'a self, key: &'a str, member: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            Ok(lock(&self.state)
                .sets
                .get(key)
                .is_some_and(|set| set.contains(member)))
        })
    }

    fn set_members<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let mut members: Vec<String> = lock(&self.state)
                .sets
                .get(key)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default();
            members.sort_unstable();
            Ok(members)
        })
    }

    fn zadd<'a>(&'a self, key: &'a str, score: f64, member: String) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let entries = state.sorted.entry(key.to_string()).or_default();
            entries.retain(|(_, existing)| *existing != member);
            let position = entries.partition_point(|(existing, _)| *existing <= score);
            entries.insert(position, (score, member));
            Ok(())
        })
    }

    fn zrange<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            Ok(lock(&self.state)
                .sorted
                .get(key)
                .map(|entries| entries.iter().map(|(_, member)| member.clone()).collect())
                .unwrap_or_default())
        })
    }

    fn zclear<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            lock(&self.state).sorted.remove(key);
            Ok(())
        })
    }
}

#[derive(Default)]
struct DurableState {
    primitives: HashMap<(PrimitiveKind, String), Primitive>,
    deliveries: HashMap<(String, String), EventDelivery>,
    definitions: HashMap<String, AgentDefinition>,
    processes: HashMap<String, ProcessRecord>,
    archives: Vec<ArchivedConversation>,
}

/// [`DurableStore`] kept in memory. Used by tests and by embedders that do not
/// need persistence across restarts.
#[derive(Default)]
pub struct InMemoryDurableStore {
    state: Mutex<DurableState>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for InMemoryDurableStore {
    fn save_primitive<'a>(&'a self, primitive: &'a Primitive) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            lock(&self.state).primitives.insert(
                (primitive.kind(), primitive.id().to_string()),
                primitive.clone(),
            );
            Ok(())
        })
    }

    fn load_primitive<'a>(
        &'a self,
        kind: PrimitiveKind,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Primitive>>> {
        Box::pin(async move {
            Ok(lock(&self.state)
                .primitives
                .get(&(kind, id.to_string()))
                .cloned())
        })
    }

    fn list_primitives<'a>(
        &'a self,
        kind: PrimitiveKind,
        type_id: &'a str,
        outstanding_only: bool,
    ) -> BoxFuture<'a, Result<Vec<Primitive>>> {
        Box::pin(async move {
            let state = lock(&self.state);
            let mut matches: Vec<Primitive> = state
                .primitives
                .values()
                .filter(|p| p.kind() == kind && p.type_id() == type_id)
                .filter(|p| !outstanding_only || p.status().is_none_or(|s| s.is_outstanding()))
                .cloned()
                .collect();
            matches.sort_by(|a, b| {
                a.created_at()
                    .cmp(&b.created_at())
                    .then_with(|| a.id().cmp(b.id()))
            });
            Ok(matches)
        })
    }

    fn save_delivery<'a>(&'a self, delivery: &'a EventDelivery) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            lock(&self.state).deliveries.insert(
                (
                    delivery.event_id.clone(),
                    delivery.subscriber_process_id.clone(),
                ),
                delivery.clone(),
            );
            Ok(())
        })
    }

    fn list_deliveries<'a>(
        &'a self,
        subscriber_process_id: &'a str,
        pending_only: bool,
    ) -> BoxFuture<'a, Result<Vec<EventDelivery>>> {
        Box::pin(async move {
            let state = lock(&self.state);
            let mut matches: Vec<EventDelivery> = state
                .deliveries
                .values()
                .filter(|d| d.subscriber_process_id == subscriber_process_id)
                .filter(|d| !pending_only || !d.completed)
                .cloned()
                .collect();
            matches.sort_by(|a, b| {
                a.delivered_at
                    .cmp(&b.delivered_at)
                    .then_with(|| a.event_id.cmp(&b.event_id))
            });
            Ok(matches)
        })
    }

    fn save_agent_definition<'a>(
        &'a self,
        definition: &'a AgentDefinition,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            lock(&self.state)
                .definitions
                .insert(definition.name.clone(), definition.clone());
            Ok(())
        })
    }

    fn load_agent_definition<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<AgentDefinition>>> {
        Box::pin(async move { Ok(lock(&self.state).definitions.get(name).cloned()) })
    }

    fn save_process<'a>(&'a self, record: &'a ProcessRecord) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            lock(&self.state)
                .processes
                .insert(record.process_id.clone(), record.clone());
            Ok(())
        })
    }

    fn load_process<'a>(
        &'a self,
        process_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<ProcessRecord>>> {
        Box::pin(async move { Ok(lock(&self.state).processes.get(process_id).cloned()) })
    }

    fn archive_conversation<'a>(
        &'a self,
        archive: &'a ArchivedConversation,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            lock(&self.state).archives.push(archive.clone());
            Ok(())
        })
    }

    fn load_archives<'a>(
        &'a self,
        process_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ArchivedConversation>>> {
        Box::pin(async move {
            Ok(lock(&self.state)
                .archives
                .iter()
                .filter(|a| a.process_id == process_id)
                .cloned()
                .collect())
        })
    }
}
