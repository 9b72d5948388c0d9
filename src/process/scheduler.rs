use tokio::sync::mpsc;

/// Hands a process's next turn to whatever runs model calls.
///
/// `schedule` must not block; the turn itself runs elsewhere.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, process_id: &str) -> anyhow::Result<()>;
}

/// Task-queue scheduler: process ids go onto an unbounded channel that
/// workers drain.
#[derive(Clone)]
pub struct QueueScheduler {
    tx: mpsc::UnboundedSender<String>,
}

impl QueueScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Scheduler for QueueScheduler {
    fn schedule(&self, process_id: &str) -> anyhow::Result<()> {
        self.tx
            .send(process_id.to_string())
            .map_err(|_| anyhow::anyhow!("turn queue closed; cannot schedule {process_id}"))
    }
}
