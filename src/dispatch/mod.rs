//! Routes primitive lifecycle transitions to the processes that must wake up.

pub mod index;

pub use index::BindingIndex;

use crate::config::DispatcherConfig;
use crate::error::{ConclaveError, DispatchError, Result};
use crate::primitives::{Action, Event, EventDelivery, Request, Topic};
use crate::process::{EventSender, ProcessEvent, StartOutcome};
use crate::protocols::BindingSpec;
use crate::store::PrimitiveStore;
use crate::window::ConversationMessage;
use arc_swap::ArcSwap;
use futures_util::future::BoxFuture;
use std::sync::{Arc, Mutex, PoisonError};

/// A primitive changed state in a way other processes may care about.
#[derive(Debug, Clone, PartialEq)]
pub enum Lifecycle {
    RequestCreated(Request),
    RequestCompleted(Request),
    ActionCreated(Action),
    ActionFeedback(Action),
    ActionCompleted(Action),
    EventCreated(Event),
    TopicUpdated(Topic),
}

/// What the dispatcher needs from the process side.
pub trait ProcessControl: Send + Sync {
    /// Append a message to a process's conversation.
    fn deliver_message<'a>(
        &'a self,
        process_id: &'a str,
        message: ConversationMessage,
    ) -> BoxFuture<'a, Result<()>>;

    /// Fill a pending tool response in place. `false` when it is no longer in the window.
    fn fill_tool_response<'a>(
        &'a self,
        process_id: &'a str,
        tool_call_id: &'a str,
        content: String,
    ) -> BoxFuture<'a, Result<bool>>;

    /// Idempotent activation.
    fn start<'a>(&'a self, process_id: &'a str) -> BoxFuture<'a, Result<StartOutcome>>;

    /// Leave `WaitingForResponse` for `request_id`. `false` when the process
    /// was not waiting on it.
    fn resume<'a>(&'a self, process_id: &'a str, request_id: &'a str)
    -> BoxFuture<'a, Result<bool>>;

    /// Drop whatever the process was doing and return it to `Idle`.
    fn abort<'a>(&'a self, process_id: &'a str, reason: String) -> BoxFuture<'a, Result<()>>;
}

/// Per-dispatch tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub skipped: usize,
}

impl DispatchReport {
    fn record(&mut self, outcome: bool) {
        if outcome {
            self.delivered += 1;
        } else {
            self.skipped += 1;
        }
    }
}

/// Lifecycle router.
///
/// The binding index is read lock-free on every dispatch and replaced
/// wholesale when processes register or go away.
pub struct Dispatcher {
    index: ArcSwap<BindingIndex>,
    writer: Mutex<()>,
    store: PrimitiveStore,
    events: EventSender,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(store: PrimitiveStore, events: EventSender, config: DispatcherConfig) -> Self {
        Self {
            index: ArcSwap::from_pointee(BindingIndex::default()),
            writer: Mutex::new(()),
            store,
            events,
            config,
        }
    }

    pub fn index(&self) -> Arc<BindingIndex> {
        self.index.load_full()
    }

    pub fn register(&self, process_id: &str, specs: &[BindingSpec]) {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = BindingIndex::clone(&self.index.load());
        next.register(process_id, specs);
        self.index.store(Arc::new(next));
    }

    pub fn unregister(&self, process_id: &str) {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = BindingIndex::clone(&self.index.load());
        next.unregister(process_id);
        self.index.store(Arc::new(next));
    }

    /// React to one lifecycle transition. A target that cannot be reached is
    /// logged and skipped; the remaining targets are still served.
    pub async fn dispatch(&self, lifecycle: &Lifecycle, control: &dyn ProcessControl) -> DispatchReport {
        let mut report = DispatchReport::default();
        match lifecycle {
            Lifecycle::RequestCreated(request) => {
                report.record(self.activate(control, &request.service_process_id).await);
            }
            Lifecycle::ActionCreated(action) => {
                report.record(self.activate(control, &action.service_process_id).await);
            }
            Lifecycle::RequestCompleted(request) => {
                let delivered = if request.is_async {
                    self.notify(
                        control,
                        &request.client_process_id,
                        ConversationMessage::user(request.render_response()),
                    )
                    .await
                } else {
                    self.resume_sync_client(control, request).await
                };
                report.record(delivered);
            }
            Lifecycle::ActionFeedback(action) => {
                if self.config.notify_action_feedback {
                    report.record(
                        self.notify(
                            control,
                            &action.client_process_id,
                            ConversationMessage::user(action.render_feedback()),
                        )
                        .await,
                    );
                }
            }
            Lifecycle::ActionCompleted(action) => {
                report.record(
                    self.notify(
                        control,
                        &action.client_process_id,
                        ConversationMessage::user(action.render_response()),
                    )
                    .await,
                );
            }
            Lifecycle::EventCreated(event) => {
                let index = self.index();
                for subscriber in index.event_subscribers(&event.event_type) {
                    report.record(self.fan_out(control, event, subscriber).await);
                }
            }
            Lifecycle::TopicUpdated(topic) => {
                tracing::debug!(topic_id = %topic.id, "topic updated; no activation");
            }
        }
        report
    }

    async fn fan_out(&self, control: &dyn ProcessControl, event: &Event, subscriber: &str) -> bool {
        if let Err(error) = self
            .store
            .save_delivery(&EventDelivery::new(event, subscriber))
            .await
        {
            self.skip(subscriber, &format!("recording delivery failed: {error}"));
            return false;
        }
        self.notify(control, subscriber, ConversationMessage::user(event.render()))
            .await
    }

    /// Fill the client's pending tool response and resume it in the state it
    /// suspended from. If the placeholder is gone the response is appended as
    /// a message instead. A response that does not fit is replaced by an error
    /// notice; if even that fails the client is aborted to `Idle`.
    async fn resume_sync_client(&self, control: &dyn ProcessControl, request: &Request) -> bool {
        let client = &request.client_process_id;
        let content = request.render_response();

        let filled = match &request.tool_call_id {
            Some(tool_call_id) => {
                match control
                    .fill_tool_response(client, tool_call_id, content.clone())
                    .await
                {
                    Ok(filled) => filled,
                    Err(error @ ConclaveError::Dispatch(DispatchError::UnknownProcess(_))) => {
                        return self.skip_error(client, &error);
                    }
                    Err(error) => {
                        let notice = format!(
                            "Error: the response to request {} could not be shown: {error}",
                            request.id
                        );
                        match control.fill_tool_response(client, tool_call_id, notice).await {
                            Ok(filled) => filled,
                            Err(error) => {
                                if let Err(abort_error) =
                                    control.abort(client, error.to_string()).await
                                {
                                    tracing::warn!(
                                        process_id = %client,
                                        error = %abort_error,
                                        "abort after failed fill"
                                    );
                                }
                                return self.skip_error(client, &error);
                            }
                        }
                    }
                }
            }
            None => false,
        };
        if !filled {
            tracing::debug!(
                process_id = %client,
                request_id = %request.id,
                "pending tool response not in window; delivering as message"
            );
            if let Err(error) = control
                .deliver_message(client, ConversationMessage::user(content))
                .await
            {
                return self.skip_error(client, &error);
            }
        }

        match control.resume(client, &request.id).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!(
                    process_id = %client,
                    request_id = %request.id,
                    "client was not waiting; starting instead"
                );
                self.activate(control, client).await
            }
            Err(error) => self.skip_error(client, &error),
        }
    }

    async fn notify(
        &self,
        control: &dyn ProcessControl,
        process_id: &str,
        message: ConversationMessage,
    ) -> bool {
        if let Err(error) = control.deliver_message(process_id, message).await {
            return self.skip_error(process_id, &error);
        }
        self.activate(control, process_id).await
    }

    async fn activate(&self, control: &dyn ProcessControl, process_id: &str) -> bool {
        match control.start(process_id).await {
            Ok(outcome) => {
                tracing::debug!(%process_id, ?outcome, "activation");
                true
            }
            Err(error) => self.skip_error(process_id, &error),
        }
    }

    fn skip_error(&self, process_id: &str, error: &ConclaveError) -> bool {
        if matches!(error, ConclaveError::Dispatch(DispatchError::UnknownProcess(_))) {
            self.skip(process_id, "stale binding: process not found");
        } else {
            self.skip(process_id, &error.to_string());
        }
        false
    }

    fn skip(&self, process_id: &str, reason: &str) {
        tracing::warn!(%process_id, %reason, "delivery skipped");
        let _ = self.events.send(ProcessEvent::DeliverySkipped {
            process_id: process_id.to_string(),
            reason: reason.to_string(),
        });
    }
}
