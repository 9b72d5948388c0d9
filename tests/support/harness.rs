#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use conclave::config::WindowConfig;
use conclave::process::{
    AgentDefinition, AuxiliaryConfig, AuxiliaryPass, ModelTurn, ProcessHandler, ProcessState,
    QueueScheduler, Transition,
};
use conclave::protocols::{BindingRole, BindingSpec};
use conclave::store::{DurableStore, InMemoryDurableStore, InMemoryKeyValueStore, KeyValueStore, PrimitiveStore};
use conclave::window::ToolCall;

pub struct Harness {
    pub handler: ProcessHandler,
    pub queue: UnboundedReceiver<String>,
}

impl Harness {
    /// Process ids scheduled since the last drain, in order.
    pub fn drain(&mut self) -> Vec<String> {
        let mut scheduled = Vec::new();
        while let Ok(process_id) = self.queue.try_recv() {
            scheduled.push(process_id);
        }
        scheduled
    }

    /// Prepare and run one turn with the given tool calls.
    pub async fn turn(&self, process_id: &str, calls: Vec<(&str, &str, Value)>) -> conclave::process::StepOutcome {
        self.handler.prepare_turn(process_id).await.expect("prepare turn");
        let calls = calls
            .into_iter()
            .map(|(id, name, args)| ToolCall::new(id, name, args))
            .collect();
        self.handler
            .step(process_id, ModelTurn::calls(calls))
            .await
            .expect("step")
    }
}

pub fn memory_store() -> PrimitiveStore {
    PrimitiveStore::new(
        Arc::new(InMemoryKeyValueStore::new()),
        Arc::new(InMemoryDurableStore::new()),
    )
}

pub fn store_over(kv: Arc<dyn KeyValueStore>, durable: Arc<dyn DurableStore>) -> PrimitiveStore {
    PrimitiveStore::new(kv, durable)
}

pub fn harness_with(store: PrimitiveStore, window: WindowConfig) -> Harness {
    let (scheduler, queue) = QueueScheduler::new();
    let handler = ProcessHandler::builder(store, Arc::new(scheduler))
        .window(window)
        .build();
    Harness { handler, queue }
}

pub fn quiet_window() -> WindowConfig {
    WindowConfig {
        flush_idle_secs: 0,
        ..WindowConfig::default()
    }
}

pub async fn harness(definitions: Vec<AgentDefinition>, processes: &[(&str, &str)]) -> Harness {
    let harness = harness_with(memory_store(), quiet_window());
    for definition in definitions {
        harness
            .handler
            .register_agent(definition)
            .await
            .expect("register agent");
    }
    for (agent, process_id) in processes {
        harness
            .handler
            .spawn_process(agent, Some((*process_id).to_string()))
            .await
            .expect("spawn process");
    }
    harness
}

pub fn state(name: &str, transitions: &[(&str, Transition)]) -> ProcessState {
    ProcessState {
        name: name.into(),
        task: format!("{name} task"),
        instructions: format!("Instructions for {name}."),
        tools: Vec::new(),
        tool_transitions: transitions
            .iter()
            .map(|(tool, transition)| ((*tool).to_string(), transition.clone()))
            .collect::<BTreeMap<_, _>>(),
    }
}

pub fn goto(state: &str) -> Transition {
    Transition::GoTo(state.into())
}

/// Drafts, asks a reviewer synchronously, then publishes.
pub fn writer() -> AgentDefinition {
    let mut review = state(
        "ReviewState",
        &[
            ("request_review", Transition::Continue),
            ("publish_status", Transition::End),
        ],
    );
    review.tools = vec!["publish_status".into()];
    AgentDefinition {
        name: "writer".into(),
        system_prompt: "You write documents.".into(),
        initial_state: "Draft".into(),
        states: vec![
            state(
                "Draft",
                &[
                    ("request_review", Transition::Continue),
                    ("publish_status", goto("ReviewState")),
                ],
            ),
            review,
        ],
        auxiliary: None,
        bindings: vec![
            BindingSpec::new(BindingRole::RequestClient, "review"),
            BindingSpec::new(BindingRole::TopicPublisher, "status"),
        ],
    }
}

/// Same as [`writer`] but its review requests do not block.
pub fn async_writer() -> AgentDefinition {
    let mut definition = writer();
    definition.name = "async_writer".into();
    definition.bindings[0] = BindingSpec::new(BindingRole::RequestClient, "review").asynchronous();
    definition
}

pub fn reviewer() -> AgentDefinition {
    AgentDefinition {
        name: "reviewer".into(),
        system_prompt: "You review documents.".into(),
        initial_state: "Serve".into(),
        states: vec![state("Serve", &[("complete_request_review", Transition::End)])],
        auxiliary: None,
        bindings: vec![BindingSpec::new(BindingRole::RequestService, "review")],
    }
}

/// Subscribes to deploy events and reads the status topic.
pub fn watcher() -> AgentDefinition {
    AgentDefinition {
        name: "watcher".into(),
        system_prompt: "You watch deployments.".into(),
        initial_state: "Watch".into(),
        states: vec![state(
            "Watch",
            &[
                ("complete_event_deploy", Transition::End),
                ("read_status", Transition::Continue),
            ],
        )],
        auxiliary: None,
        bindings: vec![
            BindingSpec::new(BindingRole::EventSubscriber, "deploy"),
            BindingSpec::new(BindingRole::TopicSubscriber, "status"),
        ],
    }
}

pub fn deployer() -> AgentDefinition {
    AgentDefinition {
        name: "deployer".into(),
        system_prompt: "You deploy.".into(),
        initial_state: "Ship".into(),
        states: vec![state(
            "Ship",
            &[
                ("emit_deploy", Transition::End),
                ("start_action_build", Transition::Continue),
            ],
        )],
        auxiliary: None,
        bindings: vec![
            BindingSpec::new(BindingRole::EventPublisher, "deploy"),
            BindingSpec::new(BindingRole::ActionClient, "build"),
        ],
    }
}

pub fn builder_agent() -> AgentDefinition {
    AgentDefinition {
        name: "builder".into(),
        system_prompt: "You build.".into(),
        initial_state: "Build".into(),
        states: vec![state(
            "Build",
            &[
                ("send_feedback_build", Transition::Continue),
                ("complete_action_build", Transition::End),
            ],
        )],
        auxiliary: None,
        bindings: vec![BindingSpec::new(BindingRole::ActionService, "build")],
    }
}

/// Planner with a reflection pass around its main state.
pub fn reflective(pass: AuxiliaryPass) -> AgentDefinition {
    AgentDefinition {
        name: format!("reflective_{pass}"),
        system_prompt: "You plan carefully.".into(),
        initial_state: "Plan".into(),
        states: vec![
            state(
                "Plan",
                &[
                    ("publish_plan", Transition::End),
                    ("read_plan", Transition::Continue),
                ],
            ),
            state(
                "Reflect",
                &[
                    ("publish_plan", Transition::End),
                    ("read_plan", Transition::Finish),
                ],
            ),
        ],
        auxiliary: Some(AuxiliaryConfig {
            state: "Reflect".into(),
            pass,
        }),
        bindings: vec![
            BindingSpec::new(BindingRole::TopicPublisher, "plan"),
            BindingSpec::new(BindingRole::TopicSubscriber, "plan"),
        ],
    }
}
