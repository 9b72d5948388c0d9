use super::message::ConversationMessage;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Conversation history moved out of the live window into durable storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedConversation {
    pub process_id: String,
    pub messages: Vec<ConversationMessage>,
    #[serde(default)]
    pub summary: Option<String>,
    pub archived_at: DateTime<Utc>,
}

/// Condenses a conversation before it is archived. Implemented by the
/// model-calling side; a failure aborts the flush and leaves the window intact.
pub trait Summarizer: Send + Sync {
    fn summarize<'a>(
        &'a self,
        process_id: &'a str,
        messages: &'a [ConversationMessage],
    ) -> BoxFuture<'a, anyhow::Result<String>>;
}

/// Per-key idle timer. Every `touch` cancels the previous timer for the key and
/// arms a new one; the task only runs if the key stays quiet for `delay`.
#[derive(Clone)]
pub struct Debouncer {
    delay: Duration,
    timers: Arc<Mutex<HashMap<String, (u64, CancellationToken)>>>,
    generation: Arc<Mutex<u64>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(Mutex::new(0)),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Re-arm the timer for `key`. Must be called from inside a tokio runtime.
    pub fn touch<F>(&self, key: &str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let generation = {
            let mut counter = self
                .generation
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *counter += 1;
            *counter
        };

        {
            let mut timers = self
                .timers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some((_, previous)) = timers.insert(key.to_string(), (generation, token.clone()))
            {
                previous.cancel();
            }
        }

        let delay = self.delay;
        let timers = Arc::clone(&self.timers);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    {
                        let mut timers = timers
                            .lock()
                            .unwrap_or_else(std::sync::PoisonError::into_inner);
                        if timers.get(&key).is_some_and(|(current, _)| *current == generation) {
                            timers.remove(&key);
                        }
                    }
                    task.await;
                }
            }
        });
    }

    /// Cancel a pending timer. Returns whether one was armed.
    pub fn cancel(&self, key: &str) -> bool {
        let mut timers = self
            .timers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some((_, token)) = timers.remove(key) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self, key: &str) -> bool {
        self.timers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(key)
    }
}
