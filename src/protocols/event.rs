use super::binding::ProtocolBinding;
use super::tool::{ToolContext, ToolOutcome, ToolSpec, payload_schema, priority, required};
use crate::dispatch::Lifecycle;
use crate::error::ProtocolError;
use crate::primitives::{Event, EventDelivery};
use anyhow::Result;
use serde_json::{Value, json};

/// Emits events of one type to every subscriber.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    pub binding: ProtocolBinding,
}

impl EventPublisher {
    pub fn tool_name(event_type: &str) -> String {
        format!("emit_{event_type}")
    }

    pub fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec::new(
            &self.binding.tool_name,
            format!(
                "Emit a {} event to every subscribed process.",
                self.binding.primitive_type_id
            ),
            payload_schema("payload", "Event body.", true),
        )]
    }

    pub async fn emit(&self, args: &Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome> {
        let payload = match required(&self.binding.tool_name, args, "payload") {
            Ok(payload) => payload,
            Err(error) => return Ok(error.into()),
        };
        let event = Event::new(
            self.binding.primitive_type_id.as_str(),
            Some(ctx.process_id.to_string()),
            payload,
        )
        .with_priority(priority(args));
        let event = ctx.store.create_event(event).await?;
        Ok(ToolOutcome::ok(format!("Emitted event {}.", event.id))
            .with_lifecycle(Lifecycle::EventCreated(event)))
    }
}

/// Receives events of one type and marks its own copy handled.
#[derive(Debug, Clone)]
pub struct EventSubscriber {
    pub binding: ProtocolBinding,
}

impl EventSubscriber {
    pub fn tool_name(event_type: &str) -> String {
        format!("complete_event_{event_type}")
    }

    pub fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec::new(
            &self.binding.tool_name,
            format!(
                "Mark a {} event as handled. Defaults to the oldest unhandled one.",
                self.binding.primitive_type_id
            ),
            json!({
                "type": "object",
                "properties": {
                    "event_id": {
                        "type": "string",
                        "description": "Event to mark handled."
                    }
                }
            }),
        )]
    }

    /// Deliveries this subscriber has not handled yet, oldest first.
    pub async fn pending(&self, ctx: &ToolContext<'_>) -> Result<Vec<EventDelivery>> {
        Ok(ctx
            .store
            .pending_deliveries(&self.binding.process_id, &self.binding.primitive_type_id)
            .await?)
    }

    pub async fn complete(&self, args: &Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome> {
        let event_id = args.get("event_id").and_then(Value::as_str);
        let completed = ctx
            .store
            .complete_delivery(
                &self.binding.process_id,
                &self.binding.primitive_type_id,
                event_id,
            )
            .await?;

        Ok(match completed {
            Some(delivery) => ToolOutcome::ok(format!("Event {} handled.", delivery.event_id)),
            None => ProtocolError::NoPendingEvent(
                event_id.map_or_else(|| self.binding.primitive_type_id.clone(), str::to_string),
            )
            .into(),
        })
    }
}
