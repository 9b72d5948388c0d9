use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `conclave`.
///
/// Each subsystem defines its own error variant. Callers can match on these
/// to decide recovery strategy; storage plumbing continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum ConclaveError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Conversation window ─────────────────────────────────────────────
    #[error("window: {0}")]
    Window(#[from] WindowError),

    // ── State machine ───────────────────────────────────────────────────
    #[error("transition: {0}")]
    Transition(#[from] TransitionError),

    // ── Protocol layer ──────────────────────────────────────────────────
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    // ── Storage ─────────────────────────────────────────────────────────
    #[error("store: {0}")]
    Store(#[from] StoreError),

    // ── Dispatcher ──────────────────────────────────────────────────────
    #[error("dispatch: {0}")]
    Dispatch(#[from] DispatchError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConclaveError {
    /// Configuration errors abort the affected turn and are never retried.
    pub fn is_fatal_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Window(WindowError::BudgetTooSmall { .. })
                | Self::Transition(TransitionError::InvalidTransition { .. })
                | Self::Transition(TransitionError::UnknownState { .. })
        )
    }
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("agent definition {agent} is invalid: {message}")]
    Definition { agent: String, message: String },

    #[error("duplicate tool {tool} on process {process_id}")]
    DuplicateTool { process_id: String, tool: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Window errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("token budget {budget} cannot hold the system message plus {required} more tokens")]
    BudgetTooSmall { budget: u64, required: u64 },

    #[error("system message can only be the first entry")]
    SystemAppend,

    #[error("tool response {0} has no matching tool call in the window")]
    OrphanToolResponse(String),
}

// ─── Transition errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("tool {tool} has no transition in state {state}")]
    InvalidTransition { state: String, tool: String },

    #[error("unknown state {state}")]
    UnknownState { state: String },

    #[error("process {0} is not waiting for a response")]
    NotWaiting(String),

    #[error("process {0} cannot run a turn while {1}")]
    NotRunnable(String, String),
}

// ─── Protocol errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("no outstanding {kind} for {type_id}")]
    NoOutstandingRequest { kind: String, type_id: String },

    #[error("tool {0} is not exposed by this process")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("no pending event delivery for {0}")]
    NoPendingEvent(String),
}

// ─── Store errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization: {0}")]
    Serialization(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: String, id: String },
}

// ─── Dispatch errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("process {0} not found")]
    UnknownProcess(String),

    #[error("no service bound for {0}")]
    UnboundService(String),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, ConclaveError>;
