use super::binding::ProtocolBinding;
use super::tool::{
    ToolContext, ToolOutcome, ToolSpec, completion_schema, payload_schema, priority, required,
    success_flag,
};
use crate::dispatch::Lifecycle;
use crate::error::{DispatchError, ProtocolError};
use crate::primitives::Request;
use anyhow::Result;
use serde_json::Value;

/// Client side of a request type: one `request_<type>` tool.
#[derive(Debug, Clone)]
pub struct RequestClient {
    pub binding: ProtocolBinding,
    pub is_async: bool,
}

impl RequestClient {
    pub fn tool_name(request_type: &str) -> String {
        format!("request_{request_type}")
    }

    pub fn tools(&self) -> Vec<ToolSpec> {
        let mode = if self.is_async {
            "The response arrives later as a message; keep working meanwhile."
        } else {
            "You will wait until the service responds; the response becomes this tool's result."
        };
        vec![ToolSpec::new(
            &self.binding.tool_name,
            format!(
                "Send a {} request to the process that serves it. {mode}",
                self.binding.primitive_type_id
            ),
            payload_schema("payload", "Request body for the service.", true),
        )]
    }

    /// Queue a request at the bound service. Synchronous requests suspend the caller.
    pub async fn invoke(&self, args: &Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome> {
        let request_type = &self.binding.primitive_type_id;
        let payload = match required(&self.binding.tool_name, args, "payload") {
            Ok(payload) => payload,
            Err(error) => return Ok(error.into()),
        };
        let Some(service) = ctx.index.request_service(request_type) else {
            return Ok(ToolOutcome::error(format!(
                "Error: {}",
                DispatchError::UnboundService(request_type.clone())
            )));
        };

        let request = Request::new(
            request_type.as_str(),
            ctx.process_id,
            service,
            payload,
            self.is_async,
            priority(args),
        )
        .with_tool_call(ctx.tool_call_id);
        let request = ctx.store.create_request(request).await?;

        let outcome = if self.is_async {
            ToolOutcome::ok(format!(
                "Request {} sent to {}. The response will arrive as a message.",
                request.id, request.service_process_id
            ))
        } else {
            ToolOutcome::suspended(request.id.clone())
        };
        Ok(outcome.with_lifecycle(Lifecycle::RequestCreated(request)))
    }
}

/// Service side of a request type: one `complete_request_<type>` tool.
#[derive(Debug, Clone)]
pub struct RequestService {
    pub binding: ProtocolBinding,
}

impl RequestService {
    pub fn tool_name(request_type: &str) -> String {
        format!("complete_request_{request_type}")
    }

    pub fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec::new(
            &self.binding.tool_name,
            format!(
                "Answer the current {} request shown in the conversation.",
                self.binding.primitive_type_id
            ),
            completion_schema(),
        )]
    }

    /// The request this service should be answering.
    pub async fn current(&self, ctx: &ToolContext<'_>) -> Result<Option<Request>> {
        Ok(ctx
            .store
            .current_request(&self.binding.primitive_type_id, &self.binding.process_id)
            .await?)
    }

    /// Resolve exactly the current request.
    pub async fn complete(&self, args: &Value, ctx: &ToolContext<'_>) -> Result<ToolOutcome> {
        let response = match required(&self.binding.tool_name, args, "response") {
            Ok(response) => response,
            Err(error) => return Ok(error.into()),
        };
        let completed = ctx
            .store
            .complete_request(
                &self.binding.primitive_type_id,
                &self.binding.process_id,
                response,
                success_flag(args),
            )
            .await?;

        Ok(match completed {
            Some(request) => ToolOutcome::ok(format!(
                "Completed request {} from {}.",
                request.id, request.client_process_id
            ))
            .with_lifecycle(Lifecycle::RequestCompleted(request)),
            None => ProtocolError::NoOutstandingRequest {
                kind: "request".into(),
                type_id: self.binding.primitive_type_id.clone(),
            }
            .into(),
        })
    }
}
