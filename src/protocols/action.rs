use super::binding::ProtocolBinding;
use super::tool::{
    ToolContext, ToolOutcome, ToolSpec, completion_schema, payload_schema, priority, required,
    success_flag,
};
use crate::dispatch::Lifecycle;
use crate::error::{DispatchError, ProtocolError};
use crate::primitives::Action;
use anyhow::Result;
use serde_json::Value;

/// Client side of an action type. Actions are always asynchronous.
#[derive(Debug, Clone)]
pub struct ActionClient {
    pub binding: ProtocolBinding,
}

impl ActionClient {
    pub fn tool_name(action_type: &str) -> String {
        format!("start_action_{action_type}")
    }

    pub fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec::new(
            &self.binding.tool_name,
            format!(
                "Start a {} action. Progress feedback and the final result arrive as messages.",
                self.binding.primitive_type_id
            ),
            payload_schema("payload", "Input for the action.", true),
        )]
    }

    pub async fn invoke(&self, args: &Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome> {
        let action_type = &self.binding.primitive_type_id;
        let payload = match required(&self.binding.tool_name, args, "payload") {
            Ok(payload) => payload,
            Err(error) => return Ok(error.into()),
        };
        let Some(service) = ctx.index.action_service(action_type) else {
            return Ok(ToolOutcome::error(format!(
                "Error: {}",
                DispatchError::UnboundService(action_type.clone())
            )));
        };

        let action = Action::new(
            action_type.as_str(),
            ctx.process_id,
            service,
            payload,
            priority(args),
        );
        let action = ctx.store.create_action(action).await?;
        Ok(ToolOutcome::ok(format!(
            "Action {} started on {}. Feedback and the result will arrive as messages.",
            action.id, action.service_process_id
        ))
        .with_lifecycle(Lifecycle::ActionCreated(action)))
    }
}

/// Service side of an action type: feedback plus completion.
#[derive(Debug, Clone)]
pub struct ActionService {
    pub binding: ProtocolBinding,
    pub feedback_tool: String,
}

impl ActionService {
    pub fn tool_name(action_type: &str) -> String {
        format!("complete_action_{action_type}")
    }

    pub fn feedback_tool_name(action_type: &str) -> String {
        format!("send_feedback_{action_type}")
    }

    pub fn tools(&self) -> Vec<ToolSpec> {
        let action_type = &self.binding.primitive_type_id;
        vec![
            ToolSpec::new(
                &self.feedback_tool,
                format!("Report progress on the current {action_type} action."),
                payload_schema("feedback", "Progress update for the caller.", false),
            ),
            ToolSpec::new(
                &self.binding.tool_name,
                format!("Finish the current {action_type} action."),
                completion_schema(),
            ),
        ]
    }

    pub async fn current(&self, ctx: &ToolContext<'_>) -> Result<Option<Action>> {
        Ok(ctx
            .store
            .current_action(&self.binding.primitive_type_id, &self.binding.process_id)
            .await?)
    }

    fn nothing_outstanding(&self) -> ToolOutcome {
        ProtocolError::NoOutstandingRequest {
            kind: "action".into(),
            type_id: self.binding.primitive_type_id.clone(),
        }
        .into()
    }

    /// Update the action's feedback. Callable any number of times before completion.
    pub async fn send_feedback(&self, args: &Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome> {
        let feedback = match required(&self.feedback_tool, args, "feedback") {
            Ok(feedback) => feedback,
            Err(error) => return Ok(error.into()),
        };
        let updated = ctx
            .store
            .action_feedback(
                &self.binding.primitive_type_id,
                &self.binding.process_id,
                feedback,
            )
            .await?;

        Ok(match updated {
            Some(action) => ToolOutcome::ok(format!(
                "Feedback #{} sent for action {}.",
                action.feedback_count, action.id
            ))
            .with_lifecycle(Lifecycle::ActionFeedback(action)),
            None => self.nothing_outstanding(),
        })
    }

    pub async fn complete(&self, args: &Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome> {
        let response = match required(&self.binding.tool_name, args, "response") {
            Ok(response) => response,
            Err(error) => return Ok(error.into()),
        };
        let completed = ctx
            .store
            .complete_action(
                &self.binding.primitive_type_id,
                &self.binding.process_id,
                response,
                success_flag(args),
            )
            .await?;

        Ok(match completed {
            Some(action) => ToolOutcome::ok(format!(
                "Completed action {} for {}.",
                action.id, action.client_process_id
            ))
            .with_lifecycle(Lifecycle::ActionCompleted(action)),
            None => self.nothing_outstanding(),
        })
    }
}
