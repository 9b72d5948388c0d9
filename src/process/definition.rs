use crate::error::ConfigError;
use anyhow::Context;
use crate::protocols::BindingSpec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use strum::{AsRefStr, Display, EnumString};

/// What happens after a tool call completes.
///
/// Serialized as `"continue"`, `"end"`, `"finish"` or `"goto:<state>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Transition {
    /// Stay in the current state and run another turn.
    Continue,
    /// Hand control back to the initial state and go idle.
    End,
    /// Move to another named state.
    GoTo(String),
    /// Stop the process for good.
    Finish,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => f.write_str("continue"),
            Self::End => f.write_str("end"),
            Self::GoTo(state) => write!(f, "goto:{state}"),
            Self::Finish => f.write_str("finish"),
        }
    }
}

impl TryFrom<String> for Transition {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "continue" => return Ok(Self::Continue),
            "end" => return Ok(Self::End),
            "finish" => return Ok(Self::Finish),
            _ => {}
        }
        match trimmed.split_once(':') {
            Some((prefix, state)) if prefix.eq_ignore_ascii_case("goto") && !state.trim().is_empty() => {
                Ok(Self::GoTo(state.trim().to_string()))
            }
            _ => Err(format!(
                "unknown transition '{value}' (expected continue, end, finish or goto:<state>)"
            )),
        }
    }
}

impl From<Transition> for String {
    fn from(value: Transition) -> Self {
        value.to_string()
    }
}

/// Named configuration a process can be in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessState {
    pub name: String,
    pub task: String,
    pub instructions: String,
    /// Tools exposed in this state. Empty exposes every tool the process has.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub tool_transitions: BTreeMap<String, Transition>,
}

impl ProcessState {
    /// Tool names visible in this state, given everything the process exposes.
    pub fn exposed<'a>(&'a self, all: &'a [String]) -> Vec<&'a str> {
        if self.tools.is_empty() {
            all.iter().map(String::as_str).collect()
        } else {
            all.iter()
                .map(String::as_str)
                .filter(|name| self.tools.iter().any(|t| t == name))
                .collect()
        }
    }

    pub fn transition(&self, tool: &str) -> Option<&Transition> {
        self.tool_transitions.get(tool)
    }

    /// Header shown to the model for a turn in this state.
    pub fn render(&self) -> String {
        format!(
            "## Current state: {}\nTask: {}\n\n{}",
            self.name, self.task, self.instructions
        )
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuxiliaryPass {
    /// Runs before every main pass.
    PrePass,
    /// Runs after the main pass ends.
    PostPass,
}

/// A secondary turn (for example a reflection step) run around the main pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxiliaryConfig {
    pub state: String,
    pub pass: AuxiliaryPass,
}

/// Immutable configuration shared by every process of one agent type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    pub system_prompt: String,
    pub initial_state: String,
    pub states: Vec<ProcessState>,
    #[serde(default)]
    pub auxiliary: Option<AuxiliaryConfig>,
    #[serde(default)]
    pub bindings: Vec<BindingSpec>,
}

impl AgentDefinition {
    pub fn state(&self, name: &str) -> Option<&ProcessState> {
        self.states.iter().find(|s| s.name == name)
    }

    /// Every tool name the bindings expose, in binding order.
    pub fn tool_names(&self) -> Vec<String> {
        self.bindings
            .iter()
            .flat_map(BindingSpec::tool_names)
            .collect()
    }

    /// Check the transition table against the exposed toolset.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::Definition {
            agent: self.name.clone(),
            message,
        };

        if self.states.is_empty() {
            return Err(invalid("no states defined".into()));
        }

        let mut names = BTreeSet::new();
        for state in &self.states {
            if !names.insert(state.name.as_str()) {
                return Err(invalid(format!("state {} is defined twice", state.name)));
            }
        }

        if self.state(&self.initial_state).is_none() {
            return Err(invalid(format!(
                "initial state {} does not exist",
                self.initial_state
            )));
        }

        if let Some(aux) = &self.auxiliary
            && self.state(&aux.state).is_none()
        {
            return Err(invalid(format!(
                "auxiliary state {} does not exist",
                aux.state
            )));
        }

        let all_tools = self.tool_names();
        let mut seen = BTreeSet::new();
        for tool in &all_tools {
            if !seen.insert(tool.as_str()) {
                return Err(invalid(format!("tool {tool} is exposed twice")));
            }
        }

        for state in &self.states {
            for tool in &state.tools {
                if !seen.contains(tool.as_str()) {
                    return Err(invalid(format!(
                        "state {} lists tool {tool} which no binding exposes",
                        state.name
                    )));
                }
            }

            for tool in state.exposed(&all_tools) {
                if state.transition(tool).is_none() {
                    return Err(invalid(format!(
                        "state {} exposes {tool} without a transition",
                        state.name
                    )));
                }
            }

            for (tool, transition) in &state.tool_transitions {
                if let Transition::GoTo(target) = transition
                    && self.state(target).is_none()
                {
                    return Err(invalid(format!(
                        "state {} maps {tool} to unknown state {target}",
                        state.name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Read an agent definition from a TOML or JSON file, chosen by extension.
pub fn load_definition(path: &Path) -> anyhow::Result<AgentDefinition> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read agent definition {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&contents).context("Failed to parse agent definition JSON")
    } else {
        toml::from_str(&contents).context("Failed to parse agent definition TOML")
    }
}
