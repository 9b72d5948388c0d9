//! Token-budgeted conversation log for one process.
//!
//! Index 0 always holds the system message. Eviction walks forward from
//! index 1 and removes a tool-call message together with every response to
//! it, so the next model call never sees an orphaned tool response.

pub mod flush;
pub mod message;
pub mod tokens;

pub use flush::{ArchivedConversation, Debouncer, Summarizer};
pub use message::{ConversationMessage, ToolCall};
pub use tokens::{EstimateTokenCounter, TokenCounter, estimate_tokens};

use crate::config::WindowConfig;
use crate::error::WindowError;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Entry {
    message: ConversationMessage,
    tokens: u64,
}

pub struct ConversationWindow {
    entries: Vec<Entry>,
    total: u64,
    budget: u64,
    warn_threshold: f64,
    counter: Arc<dyn TokenCounter>,
}

impl std::fmt::Debug for ConversationWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationWindow")
            .field("messages", &self.entries.len())
            .field("total", &self.total)
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl ConversationWindow {
    pub fn new(
        system_prompt: impl Into<String>,
        config: &WindowConfig,
        counter: Arc<dyn TokenCounter>,
    ) -> Result<Self, WindowError> {
        let system = ConversationMessage::system(system_prompt);
        let tokens = counter.count(&system);
        if tokens > config.token_budget {
            return Err(WindowError::BudgetTooSmall {
                budget: config.token_budget,
                required: tokens,
            });
        }
        Ok(Self {
            entries: vec![Entry {
                message: system,
                tokens,
            }],
            total: tokens,
            budget: config.token_budget,
            warn_threshold: config.warn_threshold,
            counter,
        })
    }

    /// Append a message, evicting the oldest non-system history to stay in budget.
    ///
    /// Returns how many messages were evicted.
    pub fn append(&mut self, message: ConversationMessage) -> Result<usize, WindowError> {
        if message.is_system() {
            return Err(WindowError::SystemAppend);
        }
        let protected = message.responds_to().map(str::to_string);
        if let Some(call_id) = protected.as_deref()
            && self.group_start(call_id).is_none()
        {
            return Err(WindowError::OrphanToolResponse(call_id.to_string()));
        }

        let tokens = self.counter.count(&message);
        let evicted = self.evict_for(tokens, protected.as_deref())?;
        self.entries.push(Entry { message, tokens });
        self.total += tokens;
        Ok(evicted)
    }

    pub fn current_tokens(&self) -> u64 {
        self.total
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// True once usage reaches the configured fraction of the budget.
    pub fn should_warn(&self) -> bool {
        #[allow(clippy::cast_precision_loss)]
        let used = self.total as f64;
        #[allow(clippy::cast_precision_loss)]
        let limit = self.budget as f64 * self.warn_threshold;
        used >= limit
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|entry| entry.message.render())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn messages(&self) -> Vec<ConversationMessage> {
        self.entries
            .iter()
            .map(|entry| entry.message.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Overwrite a pending tool response in place.
    ///
    /// Returns `false` when the response is no longer in the window (its call
    /// group was evicted or the window was flushed).
    pub fn fill_tool_response(
        &mut self,
        tool_call_id: &str,
        content: impl Into<String>,
    ) -> Result<bool, WindowError> {
        let Some(index) = self.entries.iter().rposition(|entry| {
            matches!(
                &entry.message,
                ConversationMessage::ToolResponse { tool_call_id: id, .. } if id == tool_call_id
            )
        }) else {
            return Ok(false);
        };

        let filled = ConversationMessage::tool_response(tool_call_id, content);
        let new_tokens = self.counter.count(&filled);
        let saved = (self.entries.clone(), self.total);
        let old_tokens = self.entries[index].tokens;
        self.entries[index] = Entry {
            message: filled,
            tokens: new_tokens,
        };
        self.total = self.total - old_tokens + new_tokens;
        if let Err(error) = self.evict_for(0, Some(tool_call_id)) {
            (self.entries, self.total) = saved;
            return Err(error);
        }
        Ok(true)
    }

    /// Drop everything except the system message.
    pub fn reset(&mut self) {
        self.entries.truncate(1);
        self.total = self.entries.first().map_or(0, |entry| entry.tokens);
    }

    fn group_start(&self, call_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.message.call_ids().contains(&call_id))
    }

    fn evict_for(&mut self, incoming: u64, protected: Option<&str>) -> Result<usize, WindowError> {
        // Every call id sharing a message with the protected call stays, and so
        // do all of their responses wherever they sit.
        let shielded: HashSet<String> = protected
            .and_then(|call_id| self.group_start(call_id))
            .map(|index| {
                self.entries[index]
                    .message
                    .call_ids()
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut evicted = 0;
        let mut cursor = 1;
        while self.total + incoming > self.budget {
            if cursor >= self.entries.len() {
                let system = self.entries.first().map_or(0, |entry| entry.tokens);
                return Err(WindowError::BudgetTooSmall {
                    budget: self.budget,
                    required: self.total - system + incoming,
                });
            }

            let message = &self.entries[cursor].message;
            let ids: HashSet<String> = message
                .call_ids()
                .into_iter()
                .map(str::to_string)
                .collect();

            let is_shielded = if ids.is_empty() {
                message
                    .responds_to()
                    .is_some_and(|id| shielded.contains(id))
            } else {
                ids.iter().any(|id| shielded.contains(id))
            };
            if is_shielded {
                cursor += 1;
                continue;
            }

            let removed = self.entries.remove(cursor);
            self.total -= removed.tokens;
            evicted += 1;

            let mut index = cursor;
            while index < self.entries.len() {
                if self.entries[index]
                    .message
                    .responds_to()
                    .is_some_and(|id| ids.contains(id))
                {
                    let removed = self.entries.remove(index);
                    self.total -= removed.tokens;
                    evicted += 1;
                } else {
                    index += 1;
                }
            }
        }
        Ok(evicted)
    }
}
