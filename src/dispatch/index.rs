use crate::protocols::{BindingRole, BindingSpec};
use std::collections::{BTreeSet, HashMap};

/// Who serves and who subscribes to each primitive type.
///
/// Immutable once published; the dispatcher swaps in a new copy on every
/// registration change.
#[derive(Debug, Clone, Default)]
pub struct BindingIndex {
    request_services: HashMap<String, String>,
    action_services: HashMap<String, String>,
    event_subscribers: HashMap<String, BTreeSet<String>>,
    topic_subscribers: HashMap<String, BTreeSet<String>>,
}

impl BindingIndex {
    /// Add every service and subscriber binding of `process_id`. A second
    /// service for the same type replaces the first.
    pub fn register(&mut self, process_id: &str, specs: &[BindingSpec]) {
        for spec in specs {
            let type_id = spec.type_id.clone();
            match spec.role {
                BindingRole::RequestService => {
                    if let Some(previous) = self
                        .request_services
                        .insert(type_id, process_id.to_string())
                        .filter(|previous| previous != process_id)
                    {
                        tracing::warn!(
                            request_type = %spec.type_id,
                            %previous,
                            replacement = %process_id,
                            "request service rebound"
                        );
                    }
                }
                BindingRole::ActionService => {
                    if let Some(previous) = self
                        .action_services
                        .insert(type_id, process_id.to_string())
                        .filter(|previous| previous != process_id)
                    {
                        tracing::warn!(
                            action_type = %spec.type_id,
                            %previous,
                            replacement = %process_id,
                            "action service rebound"
                        );
                    }
                }
                BindingRole::EventSubscriber => {
                    self.event_subscribers
                        .entry(type_id)
                        .or_default()
                        .insert(process_id.to_string());
                }
                BindingRole::TopicSubscriber => {
                    self.topic_subscribers
                        .entry(type_id)
                        .or_default()
                        .insert(process_id.to_string());
                }
                BindingRole::RequestClient
                | BindingRole::ActionClient
                | BindingRole::TopicPublisher
                | BindingRole::EventPublisher => {}
            }
        }
    }

    /// Drop every binding that points at `process_id`.
    pub fn unregister(&mut self, process_id: &str) {
        self.request_services.retain(|_, pid| pid != process_id);
        self.action_services.retain(|_, pid| pid != process_id);
        for subscribers in self
            .event_subscribers
            .values_mut()
            .chain(self.topic_subscribers.values_mut())
        {
            subscribers.remove(process_id);
        }
        self.event_subscribers.retain(|_, s| !s.is_empty());
        self.topic_subscribers.retain(|_, s| !s.is_empty());
    }

    pub fn request_service(&self, request_type: &str) -> Option<&str> {
        self.request_services.get(request_type).map(String::as_str)
    }

    pub fn action_service(&self, action_type: &str) -> Option<&str> {
        self.action_services.get(action_type).map(String::as_str)
    }

    /// Subscribers in a stable order.
    pub fn event_subscribers(&self, event_type: &str) -> Vec<&str> {
        self.event_subscribers
            .get(event_type)
            .map(|s| s.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn topic_subscribers(&self, topic_id: &str) -> Vec<&str> {
        self.topic_subscribers
            .get(topic_id)
            .map(|s| s.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}
