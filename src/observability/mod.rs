use crate::config::ObservabilityConfig;
use crate::process::{EventReceiver, ProcessEvent};
use anyhow::{Context, Result};
use std::str::FromStr;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Parse a configured log level. Accepts the `tracing` level names in any case.
pub fn parse_level(level: &str) -> Result<Level> {
    Level::from_str(level.trim()).map_err(|_| anyhow::anyhow!("unknown log level '{level}'"))
}

/// Install the global fmt subscriber at the configured level.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&config.log_level)?)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")
}

/// Write one lifecycle event to the log.
pub fn log_event(event: &ProcessEvent) {
    match event {
        ProcessEvent::Started { process_id, phase } => {
            tracing::info!(%process_id, %phase, "process.started");
        }
        ProcessEvent::TurnScheduled { process_id, phase } => {
            tracing::debug!(%process_id, %phase, "process.turn_scheduled");
        }
        ProcessEvent::ToolExecuted {
            process_id,
            tool_name,
            success,
        } => {
            tracing::info!(%process_id, tool = %tool_name, success, "process.tool_executed");
        }
        ProcessEvent::Suspended {
            process_id,
            request_id,
        } => {
            tracing::info!(%process_id, %request_id, "process.suspended");
        }
        ProcessEvent::Resumed {
            process_id,
            request_id,
        } => {
            tracing::info!(%process_id, %request_id, "process.resumed");
        }
        ProcessEvent::WentIdle { process_id } => {
            tracing::info!(%process_id, "process.idle");
        }
        ProcessEvent::Finished { process_id } => {
            tracing::info!(%process_id, "process.finished");
        }
        ProcessEvent::DeliverySkipped { process_id, reason } => {
            tracing::warn!(%process_id, %reason, "dispatch.delivery_skipped");
        }
        ProcessEvent::WindowFlushed {
            process_id,
            archived_messages,
        } => {
            tracing::info!(%process_id, archived_messages, "window.flushed");
        }
        ProcessEvent::Error {
            process_id,
            message,
        } => {
            tracing::error!(process_id = process_id.as_deref().unwrap_or("-"), %message, "process.error");
        }
    }
}

/// Log every event from the bus until `cancel` fires or the bus closes.
pub fn spawn_event_logger(mut events: EventReceiver, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event logger lagged behind the bus");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}
