use super::definition::{AgentDefinition, Transition};
use super::events::{EventReceiver, EventSender, ProcessEvent, event_bus};
use super::machine::{Phase, StateMachine};
use super::record::ProcessRecord;
use super::scheduler::Scheduler;
use crate::config::{Config, DispatcherConfig, WindowConfig};
use crate::dispatch::{DispatchReport, Dispatcher, Lifecycle, ProcessControl};
use crate::error::{ConclaveError, ConfigError, DispatchError, Result, TransitionError};
use crate::protocols::{BindingRole, BindingTable, ToolContext, ToolOutcome, ToolSpec};
use crate::store::{ACTIVE_PROCESSES_KEY, PrimitiveStore, conversation_key};
use crate::window::{
    ArchivedConversation, ConversationMessage, ConversationWindow, Debouncer,
    EstimateTokenCounter, Summarizer, TokenCounter, ToolCall,
};
use chrono::Utc;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

const SKIPPED_AFTER_SUSPEND: &str =
    "Error: skipped because an earlier call in this turn is waiting for a response";

/// Result of [`ProcessHandler::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    /// The process left `Idle` and its first turn was scheduled.
    Started,
    /// Already running or waiting; nothing was scheduled.
    AlreadyActive,
    Finished,
}

/// Everything the model-calling side needs for one turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnContext {
    pub process_id: String,
    pub phase: Phase,
    pub state: String,
    /// Header describing the active state.
    pub prompt: String,
    pub messages: Vec<ConversationMessage>,
    pub tools: Vec<ToolSpec>,
}

/// What the model answered for one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl ModelTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: None,
            tool_calls,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub success: bool,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub phase: Phase,
    pub tool_results: Vec<ToolResult>,
    #[serde(skip)]
    pub dispatch: DispatchReport,
}

/// Point-in-time view of one process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSnapshot {
    pub record: ProcessRecord,
    pub active: bool,
    pub messages: Vec<ConversationMessage>,
    pub tokens: u64,
}

struct ProcessRuntime {
    record: ProcessRecord,
    machine: StateMachine,
    bindings: BindingTable,
    window: ConversationWindow,
}

struct HandlerInner {
    store: PrimitiveStore,
    dispatcher: Dispatcher,
    scheduler: Arc<dyn Scheduler>,
    counter: Arc<dyn TokenCounter>,
    summarizer: Option<Arc<dyn Summarizer>>,
    window_config: WindowConfig,
    definitions: RwLock<HashMap<String, Arc<AgentDefinition>>>,
    processes: Mutex<HashMap<String, Arc<AsyncMutex<ProcessRuntime>>>>,
    events: EventSender,
    debouncer: Option<Debouncer>,
}

/// Entry point for external schedulers.
///
/// `start` and `step` may be called from any worker any number of times.
/// Every mutation of one process happens under that process's lock, and the
/// active flag in the key-value store is set with a conditional add.
#[derive(Clone)]
pub struct ProcessHandler {
    inner: Arc<HandlerInner>,
}

pub struct ProcessHandlerBuilder {
    store: PrimitiveStore,
    scheduler: Arc<dyn Scheduler>,
    window: WindowConfig,
    dispatcher: DispatcherConfig,
    counter: Arc<dyn TokenCounter>,
    summarizer: Option<Arc<dyn Summarizer>>,
    events: Option<EventSender>,
}

impl ProcessHandlerBuilder {
    pub fn config(mut self, config: &Config) -> Self {
        self.window = config.window.clone();
        self.dispatcher = config.dispatcher.clone();
        self
    }

    pub fn window(mut self, window: WindowConfig) -> Self {
        self.window = window;
        self
    }

    pub fn dispatcher(mut self, dispatcher: DispatcherConfig) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> ProcessHandler {
        let events = self
            .events
            .unwrap_or_else(|| event_bus(self.dispatcher.event_bus_capacity.max(1)).0);
        let debouncer = (self.window.flush_idle_secs > 0)
            .then(|| Debouncer::new(Duration::from_secs(self.window.flush_idle_secs)));
        let dispatcher = Dispatcher::new(self.store.clone(), events.clone(), self.dispatcher);

        ProcessHandler {
            inner: Arc::new(HandlerInner {
                store: self.store,
                dispatcher,
                scheduler: self.scheduler,
                counter: self.counter,
                summarizer: self.summarizer,
                window_config: self.window,
                definitions: RwLock::new(HashMap::new()),
                processes: Mutex::new(HashMap::new()),
                events,
                debouncer,
            }),
        }
    }
}

impl ProcessHandler {
    pub fn builder(store: PrimitiveStore, scheduler: Arc<dyn Scheduler>) -> ProcessHandlerBuilder {
        ProcessHandlerBuilder {
            store,
            scheduler,
            window: WindowConfig::default(),
            dispatcher: DispatcherConfig::default(),
            counter: Arc::new(EstimateTokenCounter),
            summarizer: None,
            events: None,
        }
    }

    pub fn store(&self) -> &PrimitiveStore {
        &self.inner.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn subscribe_events(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    // ── Definitions and processes ────────────────────────────────────────

    /// Validate and persist an agent definition.
    pub async fn register_agent(&self, definition: AgentDefinition) -> Result<Arc<AgentDefinition>> {
        definition.validate()?;
        self.inner
            .store
            .durable()
            .save_agent_definition(&definition)
            .await?;
        let definition = Arc::new(definition);
        self.inner
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(definition.name.clone(), Arc::clone(&definition));
        tracing::info!(agent = %definition.name, states = definition.states.len(), "agent registered");
        Ok(definition)
    }

    pub async fn definition(&self, name: &str) -> Result<Arc<AgentDefinition>> {
        let cached = self
            .inner
            .definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        if let Some(definition) = cached {
            return Ok(definition);
        }

        let Some(definition) = self
            .inner
            .store
            .durable()
            .load_agent_definition(name)
            .await?
        else {
            return Err(ConfigError::Definition {
                agent: name.to_string(),
                message: "not registered".into(),
            }
            .into());
        };
        definition.validate()?;
        let definition = Arc::new(definition);
        self.inner
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::clone(&definition));
        Ok(definition)
    }

    /// Create an idle process of a registered agent type and bind its tools.
    pub async fn spawn_process(&self, agent: &str, process_id: Option<String>) -> Result<ProcessRecord> {
        let definition = self.definition(agent).await?;
        let record = ProcessRecord::new(process_id, agent);
        if self
            .inner
            .store
            .durable()
            .load_process(&record.process_id)
            .await?
            .is_some()
        {
            return Err(ConfigError::Validation(format!(
                "process {} already exists",
                record.process_id
            ))
            .into());
        }

        let runtime = self.build_runtime(record.clone(), Arc::clone(&definition))?;
        self.persist(&record).await?;
        self.inner
            .dispatcher
            .register(&record.process_id, &definition.bindings);
        self.inner
            .processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.process_id.clone(), Arc::new(AsyncMutex::new(runtime)));

        tracing::info!(process_id = %record.process_id, %agent, "process spawned");
        Ok(record)
    }

    fn build_runtime(
        &self,
        record: ProcessRecord,
        definition: Arc<AgentDefinition>,
    ) -> Result<ProcessRuntime> {
        let bindings = BindingTable::new(&record.process_id, &definition.bindings)?;
        let window = ConversationWindow::new(
            definition.system_prompt.clone(),
            &self.inner.window_config,
            Arc::clone(&self.inner.counter),
        )?;
        Ok(ProcessRuntime {
            record,
            machine: StateMachine::new(definition),
            bindings,
            window,
        })
    }

    async fn runtime(&self, process_id: &str) -> Result<Arc<AsyncMutex<ProcessRuntime>>> {
        let cached = self
            .inner
            .processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(process_id)
            .cloned();
        if let Some(runtime) = cached {
            return Ok(runtime);
        }

        let loaded = self.load_runtime(process_id).await?;
        let mut processes = self
            .inner
            .processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(
            processes
                .entry(process_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(loaded))),
        ))
    }

    /// Rebuild a process that is not in memory from its durable record and
    /// the buffered conversation.
    async fn load_runtime(&self, process_id: &str) -> Result<ProcessRuntime> {
        let Some(record) = self.inner.store.durable().load_process(process_id).await? else {
            return Err(DispatchError::UnknownProcess(process_id.to_string()).into());
        };
        let definition = self.definition(&record.agent_id).await?;
        let mut runtime = self.build_runtime(record, Arc::clone(&definition))?;

        let key = conversation_key(process_id);
        match self.inner.store.kv().zrange(&key).await {
            Ok(buffered) => {
                for message in decode_buffer(&buffered) {
                    if let Err(error) = replay(&mut runtime.window, message) {
                        tracing::warn!(%process_id, %error, "skipping buffered message");
                    }
                }
            }
            Err(error) => {
                tracing::warn!(%process_id, %error, "conversation buffer unavailable; starting from system prompt");
            }
        }

        if runtime.record.phase != Phase::Finished {
            self.inner.dispatcher.register(process_id, &definition.bindings);
        }
        tracing::debug!(%process_id, messages = runtime.window.len(), "process loaded");
        Ok(runtime)
    }

    // ── Scheduling entry points ──────────────────────────────────────────

    /// Leave `Idle` and schedule the first turn. A no-op for any process that
    /// is already running, waiting, or finished.
    pub async fn start(&self, process_id: &str) -> Result<StartOutcome> {
        let runtime = self.runtime(process_id).await?;
        let mut rt = runtime.lock().await;
        self.refresh_record(&mut rt).await?;
        if let Some(outcome) = inactive_outcome(&rt.record.phase) {
            return Ok(outcome);
        }

        match self
            .inner
            .store
            .kv()
            .set_add(ACTIVE_PROCESSES_KEY, process_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // Another handler may have claimed it; its record is the tiebreaker.
                if let Some(durable) = self.inner.store.durable().load_process(process_id).await? {
                    if durable.phase != Phase::Idle {
                        rt.record = durable;
                        let outcome = inactive_outcome(&rt.record.phase);
                        return Ok(outcome.unwrap_or(StartOutcome::AlreadyActive));
                    }
                }
                tracing::warn!(%process_id, "active flag already set on an idle process; taking it over");
            }
            Err(error) => {
                tracing::warn!(%process_id, %error, "active flag unavailable; relying on process lock");
            }
        }

        let phase = rt.machine.start();
        rt.record.set_phase(phase.clone());
        self.persist(&rt.record).await?;
        self.emit(ProcessEvent::Started {
            process_id: process_id.to_string(),
            phase: phase.label().to_string(),
        });
        self.schedule(&mut rt).await?;
        tracing::info!(%process_id, phase = phase.label(), "process started");
        Ok(StartOutcome::Started)
    }

    /// Append a user message and make sure the process will see it.
    pub async fn add_message(&self, process_id: &str, content: impl Into<String>) -> Result<StartOutcome> {
        self.deliver_message(process_id, ConversationMessage::user(content))
            .await?;
        self.start(process_id).await
    }

    /// Build the prompt for the next turn. Newly current service work is
    /// acquired and shown to the process as a user message.
    pub async fn prepare_turn(&self, process_id: &str) -> Result<TurnContext> {
        let runtime = self.runtime(process_id).await?;
        let mut rt = runtime.lock().await;
        let phase = rt.record.phase.clone();
        if !phase.is_runnable() {
            return Err(TransitionError::NotRunnable(
                process_id.to_string(),
                phase.label().to_string(),
            )
            .into());
        }

        rt.record.wake_requested = false;
        self.inject_service_work(&mut rt).await?;

        let all = rt.machine.definition().tool_names();
        let state = rt.machine.active_state(&phase)?;
        let tools = rt.bindings.tools_named(&state.exposed(&all));
        let context = TurnContext {
            process_id: process_id.to_string(),
            phase: phase.clone(),
            state: state.name.clone(),
            prompt: state.render(),
            messages: rt.window.messages(),
            tools,
        };
        self.persist(&rt.record).await?;
        Ok(context)
    }

    async fn inject_service_work(&self, rt: &mut ProcessRuntime) -> Result<()> {
        let process_id = rt.record.process_id.clone();
        for request_type in rt.bindings.type_ids(BindingRole::RequestService) {
            if let Some(request) = self
                .inner
                .store
                .acquire_request(&request_type, &process_id)
                .await?
            {
                self.record_message(rt, ConversationMessage::user(request.render()))
                    .await?;
            }
        }
        for action_type in rt.bindings.type_ids(BindingRole::ActionService) {
            if let Some(action) = self
                .inner
                .store
                .acquire_action(&action_type, &process_id)
                .await?
            {
                self.record_message(rt, ConversationMessage::user(action.render()))
                    .await?;
            }
        }
        Ok(())
    }

    /// Apply the model's answer for the current turn.
    ///
    /// Every tool call is checked against the transition table before any of
    /// them runs; an unmapped tool aborts the turn and leaves the process idle.
    pub async fn step(&self, process_id: &str, turn: ModelTurn) -> Result<StepOutcome> {
        let runtime = self.runtime(process_id).await?;
        let (mut outcome, lifecycles) = {
            let mut rt = runtime.lock().await;
            let phase = rt.record.phase.clone();
            if !phase.is_runnable() {
                return Err(TransitionError::NotRunnable(
                    process_id.to_string(),
                    phase.label().to_string(),
                )
                .into());
            }

            let checked: std::result::Result<Vec<Transition>, TransitionError> = turn
                .tool_calls
                .iter()
                .map(|call| rt.machine.transition_for(&phase, &call.name))
                .collect();
            let transitions = match checked {
                Ok(transitions) => transitions,
                Err(error) => return Err(self.abort(&mut rt, error.into()).await),
            };

            match self.run_turn(&mut rt, &phase, turn, transitions).await {
                Ok(done) => done,
                Err(error) if error.is_fatal_config() => {
                    return Err(self.abort(&mut rt, error).await);
                }
                Err(error) => return Err(error),
            }
        };

        for lifecycle in &lifecycles {
            let report = self.inner.dispatcher.dispatch(lifecycle, self).await;
            outcome.dispatch.delivered += report.delivered;
            outcome.dispatch.skipped += report.skipped;
        }
        Ok(outcome)
    }

    async fn run_turn(
        &self,
        rt: &mut ProcessRuntime,
        phase: &Phase,
        turn: ModelTurn,
        transitions: Vec<Transition>,
    ) -> Result<(StepOutcome, Vec<Lifecycle>)> {
        let process_id = rt.record.process_id.clone();
        if let Some(text) = turn.text.filter(|text| !text.trim().is_empty()) {
            self.record_message(rt, ConversationMessage::assistant(text))
                .await?;
        }

        let mut combined = if turn.tool_calls.is_empty() {
            Transition::End
        } else {
            self.record_message(rt, ConversationMessage::tool_calls(turn.tool_calls.clone()))
                .await?;
            Transition::Continue
        };

        let index = self.inner.dispatcher.index();
        let mut tool_results = Vec::with_capacity(turn.tool_calls.len());
        let mut lifecycles = Vec::new();
        let mut suspend: Option<(String, String)> = None;

        for (call, transition) in turn.tool_calls.iter().zip(transitions) {
            let outcome = if suspend.is_some() {
                ToolOutcome::error(SKIPPED_AFTER_SUSPEND)
            } else {
                let ctx = ToolContext {
                    process_id: &process_id,
                    tool_call_id: &call.id,
                    store: &self.inner.store,
                    index: index.as_ref(),
                };
                match rt
                    .bindings
                    .call_function(&call.name, &call.arguments, &ctx)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(error) => {
                        tracing::warn!(%process_id, tool = %call.name, %error, "tool call failed");
                        ToolOutcome::error(format!("Error: {error}"))
                    }
                }
            };

            self.emit(ProcessEvent::ToolExecuted {
                process_id: process_id.clone(),
                tool_name: call.name.clone(),
                success: outcome.success,
            });

            if let Some(request_id) = &outcome.suspend {
                self.record_message(rt, ConversationMessage::pending_tool_response(&call.id))
                    .await?;
                suspend = Some((request_id.clone(), call.id.clone()));
            } else {
                self.record_message(
                    rt,
                    ConversationMessage::tool_response(&call.id, outcome.content.clone()),
                )
                .await?;
                if outcome.success {
                    combined = combine(combined, transition);
                }
            }

            tool_results.push(ToolResult {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                success: outcome.success,
                content: outcome.content,
            });
            lifecycles.extend(outcome.lifecycle);
        }

        let next = if let Some((request_id, tool_call_id)) = suspend {
            let next = rt.machine.suspend(phase, request_id.clone(), tool_call_id)?;
            self.emit(ProcessEvent::Suspended {
                process_id: process_id.clone(),
                request_id,
            });
            next
        } else {
            let has_pending = rt.record.wake_requested || self.has_pending_work(rt).await;
            rt.record.wake_requested = false;
            rt.machine.step(phase, &combined, has_pending)?
        };

        tracing::debug!(
            %process_id,
            from = phase.label(),
            to = next.label(),
            transition = %combined,
            "turn applied"
        );
        rt.record.set_phase(next.clone());
        match &next {
            Phase::Idle => self.release(rt).await,
            Phase::Finished => {
                self.release(rt).await;
                self.inner.dispatcher.unregister(&process_id);
                self.emit(ProcessEvent::Finished {
                    process_id: process_id.clone(),
                });
            }
            runnable if runnable.is_runnable() => self.schedule(rt).await?,
            _ => {}
        }
        self.persist(&rt.record).await?;

        if rt.window.should_warn() {
            if let Err(error) = self.flush_locked(rt).await {
                tracing::warn!(%process_id, %error, "flush failed; window kept");
            }
        }
        self.arm_idle_flush(&process_id);

        Ok((
            StepOutcome {
                phase: rt.record.phase.clone(),
                tool_results,
                dispatch: DispatchReport::default(),
            },
            lifecycles,
        ))
    }

    /// Leave `WaitingForResponse` for `request_id` and schedule the issuing
    /// phase again. Returns `false` when the process was not waiting on it.
    pub async fn resume(&self, process_id: &str, request_id: &str) -> Result<bool> {
        let runtime = self.runtime(process_id).await?;
        let mut rt = runtime.lock().await;
        self.refresh_record(&mut rt).await?;
        let waiting = matches!(
            &rt.record.phase,
            Phase::WaitingForResponse { request_id: pending, .. } if pending == request_id
        );
        if !waiting {
            tracing::debug!(%process_id, %request_id, phase = rt.record.phase.label(), "resume ignored");
            return Ok(false);
        }

        let next = rt.machine.resume(&rt.record.phase)?;
        rt.record.set_phase(next);
        self.emit(ProcessEvent::Resumed {
            process_id: process_id.to_string(),
            request_id: request_id.to_string(),
        });
        self.schedule(&mut rt).await?;
        self.persist(&rt.record).await?;
        Ok(true)
    }

    /// Give up on the current turn, for example when the model call failed.
    pub async fn abandon_turn(&self, process_id: &str, reason: &str) -> Result<()> {
        let runtime = self.runtime(process_id).await?;
        let mut rt = runtime.lock().await;
        if rt.record.phase.is_runnable() {
            tracing::warn!(%process_id, %reason, "turn abandoned");
            self.emit(ProcessEvent::Error {
                process_id: Some(process_id.to_string()),
                message: reason.to_string(),
            });
            self.go_idle(&mut rt).await;
        }
        Ok(())
    }

    /// Return a running or waiting process to `Idle`, reporting `reason`.
    /// Used when a sync response cannot be placed in the client's window.
    pub async fn abort_process(&self, process_id: &str, reason: &str) -> Result<()> {
        let runtime = self.runtime(process_id).await?;
        let mut rt = runtime.lock().await;
        let phase = &rt.record.phase;
        if phase.is_runnable() || matches!(phase, Phase::WaitingForResponse { .. }) {
            tracing::warn!(%process_id, phase = phase.label(), %reason, "process aborted");
            self.emit(ProcessEvent::Error {
                process_id: Some(process_id.to_string()),
                message: reason.to_string(),
            });
            self.go_idle(&mut rt).await;
        }
        Ok(())
    }

    // ── Conversation ─────────────────────────────────────────────────────

    /// Append a message. A process that is mid-turn is flagged so it runs
    /// again instead of going idle.
    pub async fn deliver_message(&self, process_id: &str, message: ConversationMessage) -> Result<()> {
        let runtime = self.runtime(process_id).await?;
        {
            let mut rt = runtime.lock().await;
            self.record_message(&mut rt, message).await?;
            if !matches!(rt.record.phase, Phase::Idle | Phase::Finished) {
                rt.record.wake_requested = true;
                self.persist(&rt.record).await?;
            }
        }
        self.arm_idle_flush(process_id);
        Ok(())
    }

    /// Fill a pending tool response in place.
    pub async fn fill_tool_response(
        &self,
        process_id: &str,
        tool_call_id: &str,
        content: String,
    ) -> Result<bool> {
        let runtime = self.runtime(process_id).await?;
        let mut rt = runtime.lock().await;
        let filled = rt.window.fill_tool_response(tool_call_id, content.clone())?;
        if filled {
            self.buffer(
                process_id,
                &ConversationMessage::tool_response(tool_call_id, content),
            )
            .await;
        }
        Ok(filled)
    }

    /// Archive the conversation and reset the window to the system message.
    /// Skipped while the process waits for a response.
    pub async fn flush(&self, process_id: &str) -> Result<Option<ArchivedConversation>> {
        let runtime = self.runtime(process_id).await?;
        let mut rt = runtime.lock().await;
        self.flush_locked(&mut rt).await
    }

    async fn flush_locked(&self, rt: &mut ProcessRuntime) -> Result<Option<ArchivedConversation>> {
        let process_id = rt.record.process_id.clone();
        if matches!(rt.record.phase, Phase::WaitingForResponse { .. }) {
            tracing::debug!(%process_id, "flush deferred while waiting for a response");
            return Ok(None);
        }
        if rt.window.is_empty() {
            return Ok(None);
        }

        let key = conversation_key(&process_id);
        let mut messages = rt.window.messages();
        match self.inner.store.kv().zrange(&key).await {
            Ok(buffered) if !buffered.is_empty() => {
                messages.truncate(1);
                messages.extend(collapse_filled(decode_buffer(&buffered)));
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(%process_id, %error, "conversation buffer unavailable; archiving window");
            }
        }

        let summary = match &self.inner.summarizer {
            Some(summarizer) => Some(summarizer.summarize(&process_id, &messages).await?),
            None => None,
        };
        let archive = ArchivedConversation {
            process_id: process_id.clone(),
            messages,
            summary,
            archived_at: Utc::now(),
        };
        self.inner
            .store
            .durable()
            .archive_conversation(&archive)
            .await?;
        if let Err(error) = self.inner.store.kv().zclear(&key).await {
            tracing::warn!(%process_id, %error, "failed to clear conversation buffer");
        }
        rt.window.reset();

        self.emit(ProcessEvent::WindowFlushed {
            process_id: process_id.clone(),
            archived_messages: archive.messages.len(),
        });
        tracing::info!(%process_id, messages = archive.messages.len(), "conversation flushed");
        Ok(Some(archive))
    }

    pub async fn snapshot(&self, process_id: &str) -> Result<ProcessSnapshot> {
        let runtime = self.runtime(process_id).await?;
        let rt = runtime.lock().await;
        let active = match self
            .inner
            .store
            .kv()
            .set_contains(ACTIVE_PROCESSES_KEY, process_id)
            .await
        {
            Ok(active) => active,
            Err(error) => {
                tracing::warn!(%process_id, %error, "active flag unavailable");
                !matches!(rt.record.phase, Phase::Idle | Phase::Finished)
            }
        };
        Ok(ProcessSnapshot {
            record: rt.record.clone(),
            active,
            messages: rt.window.messages(),
            tokens: rt.window.current_tokens(),
        })
    }

    // ── Internals ────────────────────────────────────────────────────────

    async fn record_message(&self, rt: &mut ProcessRuntime, message: ConversationMessage) -> Result<()> {
        let evicted = rt.window.append(message.clone())?;
        if evicted > 0 {
            tracing::debug!(process_id = %rt.record.process_id, evicted, "window evicted history");
        }
        self.buffer(&rt.record.process_id, &message).await;
        Ok(())
    }

    /// Mirror a message into the key-value buffer read back by flushes and
    /// lazy reloads.
    async fn buffer(&self, process_id: &str, message: &ConversationMessage) {
        let encoded = match serde_json::to_string(message) {
            Ok(encoded) => encoded,
            Err(error) => {
                tracing::warn!(%process_id, %error, "failed to encode message for buffer");
                return;
            }
        };
        #[allow(clippy::cast_precision_loss)]
        let score = Utc::now().timestamp_micros() as f64;
        if let Err(error) = self
            .inner
            .store
            .kv()
            .zadd(&conversation_key(process_id), score, encoded)
            .await
        {
            tracing::warn!(%process_id, %error, "failed to buffer message");
        }
    }

    async fn has_pending_work(&self, rt: &ProcessRuntime) -> bool {
        let request_types = rt.bindings.type_ids(BindingRole::RequestService);
        let action_types = rt.bindings.type_ids(BindingRole::ActionService);
        if request_types.is_empty() && action_types.is_empty() {
            return false;
        }
        self.inner
            .store
            .has_pending_work(&rt.record.process_id, &request_types, &action_types)
            .await
            .unwrap_or_else(|error| {
                tracing::warn!(process_id = %rt.record.process_id, %error, "pending work check failed");
                false
            })
    }

    async fn schedule(&self, rt: &mut ProcessRuntime) -> Result<()> {
        let process_id = rt.record.process_id.clone();
        if let Err(error) = self.inner.scheduler.schedule(&process_id) {
            tracing::error!(%process_id, %error, "failed to schedule turn");
            self.emit(ProcessEvent::Error {
                process_id: Some(process_id),
                message: error.to_string(),
            });
            self.go_idle(rt).await;
            return Err(error.into());
        }
        self.emit(ProcessEvent::TurnScheduled {
            process_id,
            phase: rt.record.phase.label().to_string(),
        });
        Ok(())
    }

    async fn abort(&self, rt: &mut ProcessRuntime, error: ConclaveError) -> ConclaveError {
        tracing::error!(process_id = %rt.record.process_id, %error, "turn aborted");
        self.emit(ProcessEvent::Error {
            process_id: Some(rt.record.process_id.clone()),
            message: error.to_string(),
        });
        self.go_idle(rt).await;
        error
    }

    async fn go_idle(&self, rt: &mut ProcessRuntime) {
        rt.record.set_phase(Phase::Idle);
        rt.record.wake_requested = false;
        if let Err(error) = self.persist(&rt.record).await {
            tracing::warn!(process_id = %rt.record.process_id, %error, "failed to persist idle record");
        }
        self.release(rt).await;
    }

    async fn release(&self, rt: &ProcessRuntime) {
        let process_id = rt.record.process_id.as_str();
        if let Err(error) = self
            .inner
            .store
            .kv()
            .set_remove(ACTIVE_PROCESSES_KEY, process_id)
            .await
        {
            tracing::warn!(%process_id, %error, "failed to clear active flag");
        }
        if rt.record.phase == Phase::Idle {
            self.emit(ProcessEvent::WentIdle {
                process_id: process_id.to_string(),
            });
        }
    }

    /// Adopt the durable record when another handler wrote a newer one.
    async fn refresh_record(&self, rt: &mut ProcessRuntime) -> Result<()> {
        let process_id = rt.record.process_id.clone();
        if let Some(durable) = self.inner.store.durable().load_process(&process_id).await? {
            if durable.updated_at > rt.record.updated_at {
                tracing::debug!(%process_id, phase = durable.phase.label(), "adopting newer durable record");
                rt.record = durable;
            }
        }
        Ok(())
    }

    async fn persist(&self, record: &ProcessRecord) -> Result<()> {
        self.inner.store.durable().save_process(record).await?;
        Ok(())
    }

    fn arm_idle_flush(&self, process_id: &str) {
        let Some(debouncer) = &self.inner.debouncer else {
            return;
        };
        let inner = Arc::downgrade(&self.inner);
        let target = process_id.to_string();
        debouncer.touch(process_id, async move {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let handler = ProcessHandler { inner };
            if let Err(error) = handler.flush(&target).await {
                tracing::warn!(process_id = %target, %error, "idle flush failed");
            }
        });
    }

    fn emit(&self, event: ProcessEvent) {
        let _ = self.inner.events.send(event);
    }
}

impl ProcessControl for ProcessHandler {
    fn deliver_message<'a>(
        &'a self,
        process_id: &'a str,
        message: ConversationMessage,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(ProcessHandler::deliver_message(self, process_id, message))
    }

    fn fill_tool_response<'a>(
        &'a self,
        process_id: &'a str,
        tool_call_id: &'a str,
        content: String,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(ProcessHandler::fill_tool_response(
            self,
            process_id,
            tool_call_id,
            content,
        ))
    }

    fn start<'a>(&'a self, process_id: &'a str) -> BoxFuture<'a, Result<StartOutcome>> {
        Box::pin(ProcessHandler::start(self, process_id))
    }

    fn resume<'a>(&'a self, process_id: &'a str, request_id: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(ProcessHandler::resume(self, process_id, request_id))
    }

    fn abort<'a>(&'a self, process_id: &'a str, reason: String) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.abort_process(process_id, &reason).await })
    }
}

/// `None` when an idle process may be started.
fn inactive_outcome(phase: &Phase) -> Option<StartOutcome> {
    match phase {
        Phase::Idle => None,
        Phase::Finished => Some(StartOutcome::Finished),
        _ => Some(StartOutcome::AlreadyActive),
    }
}

/// Later calls outrank earlier ones of the same kind; `Finish` beats `End`
/// beats `GoTo` beats `Continue`.
fn combine(current: Transition, next: Transition) -> Transition {
    fn rank(transition: &Transition) -> u8 {
        match transition {
            Transition::Continue => 0,
            Transition::GoTo(_) => 1,
            Transition::End => 2,
            Transition::Finish => 3,
        }
    }
    if rank(&next) >= rank(&current) {
        next
    } else {
        current
    }
}

fn decode_buffer(members: &[String]) -> Vec<ConversationMessage> {
    members
        .iter()
        .filter_map(|member| match serde_json::from_str(member) {
            Ok(message) => Some(message),
            Err(error) => {
                tracing::warn!(%error, "dropping undecodable buffered message");
                None
            }
        })
        .collect()
}

/// Apply one buffered message to a rebuilt window. A filled tool response
/// replaces its placeholder.
fn replay(
    window: &mut ConversationWindow,
    message: ConversationMessage,
) -> std::result::Result<(), crate::error::WindowError> {
    if let ConversationMessage::ToolResponse {
        tool_call_id,
        content,
        pending: false,
    } = &message
        && window.fill_tool_response(tool_call_id, content.clone())?
    {
        return Ok(());
    }
    window.append(message).map(|_| ())
}

/// Fold filled tool responses into their placeholders.
fn collapse_filled(messages: Vec<ConversationMessage>) -> Vec<ConversationMessage> {
    let mut collapsed: Vec<ConversationMessage> = Vec::with_capacity(messages.len());
    for message in messages {
        if let ConversationMessage::ToolResponse {
            tool_call_id,
            pending: false,
            ..
        } = &message
            && let Some(slot) = collapsed.iter_mut().rev().find(|earlier| {
                matches!(
                    earlier,
                    ConversationMessage::ToolResponse { tool_call_id: id, pending: true, .. }
                        if id == tool_call_id
                )
            })
        {
            *slot = message;
            continue;
        }
        collapsed.push(message);
    }
    collapsed
}
