use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Token budget for a single process conversation, system message included
    #[serde(default = "default_token_budget")]
    pub token_budget: u64,
    /// Fraction of the budget at which the window asks for a durable flush
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: f64,
    /// Flush after this many idle seconds without a new message (0 disables)
    #[serde(default = "default_flush_idle_secs")]
    pub flush_idle_secs: u64,
}

fn default_token_budget() -> u64 {
    8_000
}
fn default_warn_threshold() -> f64 {
    0.3
}
fn default_flush_idle_secs() -> u64 {
    120
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            warn_threshold: default_warn_threshold(),
            flush_idle_secs: default_flush_idle_secs(),
        }
    }
}
