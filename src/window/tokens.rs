use super::message::ConversationMessage;

/// Token accounting for window budgeting. The real tokenizer lives with the
/// model client; the window only needs a consistent cost per message.
pub trait TokenCounter: Send + Sync {
    fn count(&self, message: &ConversationMessage) -> u64;
}

/// Estimate token count from text using the chars/4 heuristic.
///
/// Uses ceiling division to avoid underestimating by a fraction.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}

/// chars/4 estimate plus a small per-message framing overhead.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimateTokenCounter;

impl EstimateTokenCounter {
    pub const PER_MESSAGE_OVERHEAD: u64 = 4;
}

impl TokenCounter for EstimateTokenCounter {
    fn count(&self, message: &ConversationMessage) -> u64 {
        estimate_tokens(&message.text()) + Self::PER_MESSAGE_OVERHEAD
    }
}
