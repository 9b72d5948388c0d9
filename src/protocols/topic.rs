use super::binding::ProtocolBinding;
use super::tool::{ToolContext, ToolOutcome, ToolSpec, payload_schema, required};
use crate::dispatch::Lifecycle;
use anyhow::Result;
use serde_json::{Value, json};

/// Writes a topic's last value. Publishing never wakes anyone.
#[derive(Debug, Clone)]
pub struct TopicPublisher {
    pub binding: ProtocolBinding,
}

impl TopicPublisher {
    pub fn tool_name(topic_id: &str) -> String {
        format!("publish_{topic_id}")
    }

    pub fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec::new(
            &self.binding.tool_name,
            format!(
                "Overwrite the current value of the {} topic.",
                self.binding.primitive_type_id
            ),
            payload_schema("message", "New value for the topic.", false),
        )]
    }

    pub async fn publish(&self, args: &Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome> {
        let message = match required(&self.binding.tool_name, args, "message") {
            Ok(message) => message,
            Err(error) => return Ok(error.into()),
        };
        let topic = ctx
            .store
            .publish_topic(&self.binding.primitive_type_id, ctx.process_id, message)
            .await?;
        Ok(ToolOutcome::ok(format!("Published to {}.", topic.id))
            .with_lifecycle(Lifecycle::TopicUpdated(topic)))
    }
}

/// Reads a topic's last value.
#[derive(Debug, Clone)]
pub struct TopicSubscriber {
    pub binding: ProtocolBinding,
}

impl TopicSubscriber {
    pub fn tool_name(topic_id: &str) -> String {
        format!("read_{topic_id}")
    }

    pub fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec::new(
            &self.binding.tool_name,
            format!(
                "Read the latest value of the {} topic.",
                self.binding.primitive_type_id
            ),
            json!({ "type": "object", "properties": {} }),
        )]
    }

    pub async fn read(&self, ctx: &ToolContext<'_>) -> Result<ToolOutcome> {
        let topic_id = &self.binding.primitive_type_id;
        Ok(match ctx.store.topic(topic_id).await? {
            Some(topic) => ToolOutcome::ok(topic.render()),
            None => ToolOutcome::ok(format!("Topic {topic_id} has no value yet")),
        })
    }
}
