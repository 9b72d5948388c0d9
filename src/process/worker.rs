use super::handler::{ModelTurn, ProcessHandler, StepOutcome, TurnContext};
use crate::error::Result;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

/// The language-model side of a turn: prompt in, text and tool calls out.
pub trait TurnModel: Send + Sync {
    fn complete<'a>(&'a self, turn: &'a TurnContext) -> BoxFuture<'a, anyhow::Result<ModelTurn>>;
}

/// Run one scheduled turn end to end. A model failure abandons the turn so
/// the process goes idle instead of staying active forever.
pub async fn run_turn(
    handler: &ProcessHandler,
    model: &dyn TurnModel,
    process_id: &str,
) -> Result<StepOutcome> {
    let context = handler.prepare_turn(process_id).await?;
    let turn = match model.complete(&context).await {
        Ok(turn) => turn,
        Err(error) => {
            handler
                .abandon_turn(process_id, &format!("model call failed: {error}"))
                .await?;
            return Err(error.into());
        }
    };
    handler.step(process_id, turn).await
}

/// Drain the turn queue until it closes or `cancel` fires. Turns run one at
/// a time; start several workers on clones of the handler for parallelism.
pub async fn run_worker(
    handler: ProcessHandler,
    mut queue: UnboundedReceiver<String>,
    model: Arc<dyn TurnModel>,
    cancel: CancellationToken,
) {
    loop {
        let process_id = tokio::select! {
            () = cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(process_id) => process_id,
                None => break,
            },
        };

        match run_turn(&handler, model.as_ref(), &process_id).await {
            Ok(outcome) => {
                tracing::debug!(%process_id, phase = outcome.phase.label(), "turn finished");
            }
            Err(error) => {
                tracing::warn!(%process_id, %error, "turn failed");
            }
        }
    }
    tracing::debug!("worker stopped");
}
