use super::traits::{DurableStore, KeyValueStore};
use crate::primitives::{
    Action, Event, EventDelivery, Primitive, PrimitiveKind, PrimitiveStatus, Request, Topic,
    select_current,
};
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

fn cache_key(kind: PrimitiveKind, id: &str) -> String {
    format!("conclave:primitive:{kind}:{id}")
}

/// Single mutation path for primitives.
///
/// Reads go through the key-value cache and fall back to the durable store on
/// a miss or a cache failure; writes go to the durable store first and then
/// refresh the cache. Selection of the current request or action for a
/// service, and its completion, happen under one lock so a service can never
/// resolve anything but the item it was shown.
#[derive(Clone)]
pub struct PrimitiveStore {
    kv: Arc<dyn KeyValueStore>,
    durable: Arc<dyn DurableStore>,
    selection: Arc<Mutex<()>>,
}

impl PrimitiveStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, durable: Arc<dyn DurableStore>) -> Self {
        Self {
            kv,
            durable,
            selection: Arc::new(Mutex::new(())),
        }
    }

    pub fn kv(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.durable
    }

    /// Write-through save.
    pub async fn save(&self, primitive: &Primitive) -> Result<()> {
        self.durable.save_primitive(primitive).await?;
        self.cache(primitive).await;
        Ok(())
    }

    async fn cache(&self, primitive: &Primitive) {
        let key = cache_key(primitive.kind(), primitive.id());
        match serde_json::to_string(primitive) {
            Ok(body) => {
                if let Err(error) = self.kv.set(&key, body).await {
                    tracing::warn!(%key, %error, "primitive cache write failed");
                }
            }
            Err(error) => tracing::warn!(%key, %error, "primitive cache encode failed"),
        }
    }

    /// Cache-aside read.
    pub async fn load(&self, kind: PrimitiveKind, id: &str) -> Result<Option<Primitive>> {
        let key = cache_key(kind, id);
        match self.kv.get(&key).await {
            Ok(Some(body)) => match serde_json::from_str::<Primitive>(&body) {
                Ok(primitive) => return Ok(Some(primitive)),
                Err(error) => tracing::warn!(%key, %error, "dropping undecodable cache entry"),
            },
            Ok(None) => {}
            Err(error) => tracing::warn!(%key, %error, "primitive cache read failed"),
        }

        let loaded = self.durable.load_primitive(kind, id).await?;
        if let Some(primitive) = &loaded {
            self.cache(primitive).await;
        }
        Ok(loaded)
    }

    pub async fn request(&self, id: &str) -> Result<Option<Request>> {
        Ok(match self.load(PrimitiveKind::Request, id).await? {
            Some(Primitive::Request(request)) => Some(request),
            _ => None,
        })
    }

    pub async fn action(&self, id: &str) -> Result<Option<Action>> {
        Ok(match self.load(PrimitiveKind::Action, id).await? {
            Some(Primitive::Action(action)) => Some(action),
            _ => None,
        })
    }

    pub async fn event(&self, id: &str) -> Result<Option<Event>> {
        Ok(match self.load(PrimitiveKind::Event, id).await? {
            Some(Primitive::Event(event)) => Some(event),
            _ => None,
        })
    }

    pub async fn topic(&self, id: &str) -> Result<Option<Topic>> {
        Ok(match self.load(PrimitiveKind::Topic, id).await? {
            Some(Primitive::Topic(topic)) => Some(topic),
            _ => None,
        })
    }

    // ── Requests ─────────────────────────────────────────────────────────

    pub async fn create_request(&self, request: Request) -> Result<Request> {
        self.save(&Primitive::Request(request.clone())).await?;
        tracing::debug!(
            request_id = %request.id,
            request_type = %request.request_type,
            service = %request.service_process_id,
            "request created"
        );
        Ok(request)
    }

    async fn outstanding_requests(&self, request_type: &str, service: &str) -> Result<Vec<Request>> {
        let listed = self
            .durable
            .list_primitives(PrimitiveKind::Request, request_type, true)
            .await?;
        Ok(listed
            .into_iter()
            .filter_map(|p| match p {
                Primitive::Request(r) if r.service_process_id == service => Some(r),
                _ => None,
            })
            .collect())
    }

    /// The request `service` should be answering, without changing it.
    pub async fn current_request(&self, request_type: &str, service: &str) -> Result<Option<Request>> {
        let requests = self.outstanding_requests(request_type, service).await?;
        Ok(select_current(&requests).cloned())
    }

    /// Move the current request from pending to in progress. `None` when
    /// nothing is pending or the current request was already acquired.
    pub async fn acquire_request(&self, request_type: &str, service: &str) -> Result<Option<Request>> {
        let _guard = self.selection.lock().await;
        let requests = self.outstanding_requests(request_type, service).await?;
        let Some(mut current) = select_current(&requests).cloned() else {
            return Ok(None);
        };
        if current.status != PrimitiveStatus::Pending {
            return Ok(None);
        }
        current.status = PrimitiveStatus::InProgress;
        self.save(&Primitive::Request(current.clone())).await?;
        Ok(Some(current))
    }

    /// Resolve exactly the current request. `None` when nothing is outstanding.
    pub async fn complete_request(
        &self,
        request_type: &str,
        service: &str,
        response: Value,
        success: bool,
    ) -> Result<Option<Request>> {
        let _guard = self.selection.lock().await;
        let requests = self.outstanding_requests(request_type, service).await?;
        let Some(mut current) = select_current(&requests).cloned() else {
            return Ok(None);
        };
        current.resolve(response, success);
        self.save(&Primitive::Request(current.clone())).await?;
        Ok(Some(current))
    }

    /// Whether any request or action is still pending for `service`.
    pub async fn has_pending_work(
        &self,
        service: &str,
        request_types: &[String],
        action_types: &[String],
    ) -> Result<bool> {
        for request_type in request_types {
            if self
                .outstanding_requests(request_type, service)
                .await?
                .iter()
                .any(|r| r.status == PrimitiveStatus::Pending)
            {
                return Ok(true);
            }
        }
        for action_type in action_types {
            if self
                .outstanding_actions(action_type, service)
                .await?
                .iter()
                .any(|a| a.status == PrimitiveStatus::Pending)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ── Actions ──────────────────────────────────────────────────────────

    pub async fn create_action(&self, action: Action) -> Result<Action> {
        self.save(&Primitive::Action(action.clone())).await?;
        tracing::debug!(
            action_id = %action.id,
            action_type = %action.action_type,
            service = %action.service_process_id,
            "action created"
        );
        Ok(action)
    }

    async fn outstanding_actions(&self, action_type: &str, service: &str) -> Result<Vec<Action>> {
        let listed = self
            .durable
            .list_primitives(PrimitiveKind::Action, action_type, true)
            .await?;
        Ok(listed
            .into_iter()
            .filter_map(|p| match p {
                Primitive::Action(a) if a.service_process_id == service => Some(a),
                _ => None,
            })
            .collect())
    }

    pub async fn current_action(&self, action_type: &str, service: &str) -> Result<Option<Action>> {
        let actions = self.outstanding_actions(action_type, service).await?;
        Ok(select_current(&actions).cloned())
    }

    /// Like [`Self::acquire_request`] for actions.
    pub async fn acquire_action(&self, action_type: &str, service: &str) -> Result<Option<Action>> {
        let _guard = self.selection.lock().await;
        let actions = self.outstanding_actions(action_type, service).await?;
        let Some(mut current) = select_current(&actions).cloned() else {
            return Ok(None);
        };
        if current.status != PrimitiveStatus::Pending {
            return Ok(None);
        }
        current.status = PrimitiveStatus::InProgress;
        self.save(&Primitive::Action(current.clone())).await?;
        Ok(Some(current))
    }

    /// Record feedback on the current action. Its status is not changed.
    pub async fn action_feedback(
        &self,
        action_type: &str,
        service: &str,
        feedback: Value,
    ) -> Result<Option<Action>> {
        let _guard = self.selection.lock().await;
        let actions = self.outstanding_actions(action_type, service).await?;
        let Some(mut current) = select_current(&actions).cloned() else {
            return Ok(None);
        };
        current.record_feedback(feedback);
        self.save(&Primitive::Action(current.clone())).await?;
        Ok(Some(current))
    }

    pub async fn complete_action(
        &self,
        action_type: &str,
        service: &str,
        response: Value,
        success: bool,
    ) -> Result<Option<Action>> {
        let _guard = self.selection.lock().await;
        let actions = self.outstanding_actions(action_type, service).await?;
        let Some(mut current) = select_current(&actions).cloned() else {
            return Ok(None);
        };
        current.resolve(response, success);
        self.save(&Primitive::Action(current.clone())).await?;
        Ok(Some(current))
    }

    // ── Topics ───────────────────────────────────────────────────────────

    /// Overwrite the topic's last value, creating the topic on first publish.
    pub async fn publish_topic(&self, topic_id: &str, publisher: &str, message: Value) -> Result<Topic> {
        let mut topic = self
            .topic(topic_id)
            .await?
            .unwrap_or_else(|| Topic::new(topic_id));
        topic.publish(publisher, message);
        self.save(&Primitive::Topic(topic.clone())).await?;
        Ok(topic)
    }

    // ── Events ───────────────────────────────────────────────────────────

    pub async fn create_event(&self, event: Event) -> Result<Event> {
        self.save(&Primitive::Event(event.clone())).await?;
        tracing::debug!(event_id = %event.id, event_type = %event.event_type, "event created");
        Ok(event)
    }

    pub async fn save_delivery(&self, delivery: &EventDelivery) -> Result<()> {
        self.durable.save_delivery(delivery).await
    }

    /// Undelivered-or-unhandled events of `event_type` for one subscriber, oldest first.
    pub async fn pending_deliveries(
        &self,
        subscriber: &str,
        event_type: &str,
    ) -> Result<Vec<EventDelivery>> {
        Ok(self
            .durable
            .list_deliveries(subscriber, true)
            .await?
            .into_iter()
            .filter(|d| d.event_type == event_type)
            .collect())
    }

    /// Mark one delivery handled: `event_id` when given, otherwise the oldest
    /// pending one. Other subscribers' deliveries are untouched.
    pub async fn complete_delivery(
        &self,
        subscriber: &str,
        event_type: &str,
        event_id: Option<&str>,
    ) -> Result<Option<EventDelivery>> {
        let pending = self.pending_deliveries(subscriber, event_type).await?;
        let target = match event_id {
            Some(id) => pending.into_iter().find(|d| d.event_id == id),
            None => pending.into_iter().next(),
        };
        let Some(mut delivery) = target else {
            return Ok(None);
        };
        delivery.complete();
        self.durable.save_delivery(&delivery).await?;
        Ok(Some(delivery))
    }
}
