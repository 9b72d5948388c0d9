use super::machine::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted state of one running process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub process_id: String,
    pub agent_id: String,
    pub phase: Phase,
    /// A message arrived after the current turn's prompt was built.
    #[serde(default)]
    pub wake_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessRecord {
    pub fn new(process_id: Option<String>, agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            process_id: process_id.unwrap_or_else(|| format!("proc_{}", Uuid::new_v4().simple())),
            agent_id: agent_id.into(),
            phase: Phase::Idle,
            wake_requested: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.updated_at = Utc::now();
    }

    /// Current state name, if the phase is inside a main turn.
    pub fn current_state_name(&self) -> Option<&str> {
        match &self.phase {
            Phase::MainTurn { state } => Some(state),
            Phase::WaitingForResponse { resume, .. } => match resume.as_ref() {
                Phase::MainTurn { state } => Some(state),
                _ => None,
            },
            _ => None,
        }
    }
}
