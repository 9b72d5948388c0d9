use super::definition::{AgentDefinition, AuxiliaryPass, ProcessState, Transition};
use crate::error::TransitionError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where a process is in its turn-taking loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    Idle,
    MainTurn {
        state: String,
    },
    AuxiliaryTurn {
        pass: AuxiliaryPass,
    },
    /// Suspended on a synchronous request; `resume` is the phase that issued it.
    WaitingForResponse {
        request_id: String,
        tool_call_id: String,
        resume: Box<Phase>,
    },
    Finished,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::MainTurn { .. } => "main_turn",
            Self::AuxiliaryTurn { .. } => "auxiliary_turn",
            Self::WaitingForResponse { .. } => "waiting_for_response",
            Self::Finished => "finished",
        }
    }

    /// A turn can be prepared and stepped.
    pub fn is_runnable(&self) -> bool {
        matches!(self, Self::MainTurn { .. } | Self::AuxiliaryTurn { .. })
    }
}

/// Transition rules for one agent definition.
#[derive(Debug, Clone)]
pub struct StateMachine {
    definition: Arc<AgentDefinition>,
}

impl StateMachine {
    pub fn new(definition: Arc<AgentDefinition>) -> Self {
        Self { definition }
    }

    pub fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    /// `Idle --start-->`: the pre-pass if one is configured, else the initial state.
    pub fn start(&self) -> Phase {
        match &self.definition.auxiliary {
            Some(aux) if aux.pass == AuxiliaryPass::PrePass => Phase::AuxiliaryTurn {
                pass: AuxiliaryPass::PrePass,
            },
            _ => Phase::MainTurn {
                state: self.definition.initial_state.clone(),
            },
        }
    }

    fn state(&self, name: &str) -> Result<&ProcessState, TransitionError> {
        self.definition
            .state(name)
            .ok_or_else(|| TransitionError::UnknownState {
                state: name.to_string(),
            })
    }

    /// The configured state a runnable (or suspended) phase is executing.
    pub fn active_state(&self, phase: &Phase) -> Result<&ProcessState, TransitionError> {
        match phase {
            Phase::MainTurn { state } => self.state(state),
            Phase::AuxiliaryTurn { .. } => match &self.definition.auxiliary {
                Some(aux) => self.state(&aux.state),
                None => Err(TransitionError::UnknownState {
                    state: "auxiliary".into(),
                }),
            },
            Phase::WaitingForResponse { resume, .. } => self.active_state(resume),
            Phase::Idle | Phase::Finished => Err(TransitionError::NotRunnable(
                self.definition.name.clone(),
                phase.label().into(),
            )),
        }
    }

    /// Look up the transition for `tool` in the active state. A tool with no
    /// entry means the exposed toolset and the table have drifted apart.
    pub fn transition_for(&self, phase: &Phase, tool: &str) -> Result<Transition, TransitionError> {
        let state = self.active_state(phase)?;
        state
            .transition(tool)
            .cloned()
            .ok_or_else(|| TransitionError::InvalidTransition {
                state: state.name.clone(),
                tool: tool.to_string(),
            })
    }

    /// Next phase after a turn whose tools resolved to `transition`.
    pub fn step(
        &self,
        phase: &Phase,
        transition: &Transition,
        has_pending: bool,
    ) -> Result<Phase, TransitionError> {
        match (phase, transition) {
            (Phase::MainTurn { .. } | Phase::AuxiliaryTurn { .. }, Transition::Continue) => {
                Ok(phase.clone())
            }
            (Phase::MainTurn { .. } | Phase::AuxiliaryTurn { .. }, Transition::GoTo(target)) => {
                self.state(target)?;
                Ok(Phase::MainTurn {
                    state: target.clone(),
                })
            }
            (Phase::MainTurn { .. } | Phase::AuxiliaryTurn { .. }, Transition::Finish) => {
                Ok(Phase::Finished)
            }
            (Phase::MainTurn { .. }, Transition::End) => match &self.definition.auxiliary {
                Some(aux) if aux.pass == AuxiliaryPass::PostPass => Ok(Phase::AuxiliaryTurn {
                    pass: AuxiliaryPass::PostPass,
                }),
                _ => Ok(self.rest(has_pending)),
            },
            (Phase::AuxiliaryTurn { pass }, Transition::End) => match pass {
                AuxiliaryPass::PrePass => Ok(Phase::MainTurn {
                    state: self.definition.initial_state.clone(),
                }),
                AuxiliaryPass::PostPass => Ok(self.rest(has_pending)),
            },
            (Phase::Idle | Phase::WaitingForResponse { .. } | Phase::Finished, _) => Err(
                TransitionError::NotRunnable(self.definition.name.clone(), phase.label().into()),
            ),
        }
    }

    fn rest(&self, has_pending: bool) -> Phase {
        if has_pending {
            self.start()
        } else {
            Phase::Idle
        }
    }

    /// Park a runnable phase until the request resolves.
    pub fn suspend(
        &self,
        phase: &Phase,
        request_id: impl Into<String>,
        tool_call_id: impl Into<String>,
    ) -> Result<Phase, TransitionError> {
        if !phase.is_runnable() {
            return Err(TransitionError::NotRunnable(
                self.definition.name.clone(),
                phase.label().into(),
            ));
        }
        Ok(Phase::WaitingForResponse {
            request_id: request_id.into(),
            tool_call_id: tool_call_id.into(),
            resume: Box::new(phase.clone()),
        })
    }

    /// The only exit from `WaitingForResponse`: back into the issuing phase.
    pub fn resume(&self, phase: &Phase) -> Result<Phase, TransitionError> {
        match phase {
            Phase::WaitingForResponse { resume, .. } => Ok((**resume).clone()),
            other => Err(TransitionError::NotWaiting(format!(
                "{} ({})",
                self.definition.name,
                other.label()
            ))),
        }
    }
}
