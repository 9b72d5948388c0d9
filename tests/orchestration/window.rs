use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::json;

use conclave::config::WindowConfig;
use conclave::dispatch::Lifecycle;
use conclave::error::{ConclaveError, WindowError};
use conclave::process::{AuxiliaryPass, Phase, ProcessHandler, QueueScheduler};
use conclave::window::{
    ConversationMessage, ConversationWindow, Summarizer, TokenCounter, ToolCall,
};

use super::harness::{
    Harness, harness, harness_with, memory_store, quiet_window, reflective, reviewer, writer,
};

/// System message costs 5 tokens, everything else 10.
struct FixedCounter;

impl TokenCounter for FixedCounter {
    fn count(&self, message: &ConversationMessage) -> u64 {
        if message.is_system() { 5 } else { 10 }
    }
}

struct FailingSummarizer;

impl Summarizer for FailingSummarizer {
    fn summarize<'a>(
        &'a self,
        _process_id: &'a str,
        _messages: &'a [ConversationMessage],
    ) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(async { anyhow::bail!("summarizer offline") })
    }
}

fn budget(token_budget: u64) -> WindowConfig {
    WindowConfig {
        token_budget,
        warn_threshold: 0.8,
        flush_idle_secs: 0,
    }
}

fn fixed_window(token_budget: u64) -> ConversationWindow {
    ConversationWindow::new("system", &budget(token_budget), Arc::new(FixedCounter)).unwrap()
}

/// Every tool response must follow the call it answers.
fn assert_paired(window: &ConversationWindow) {
    let mut calls = HashSet::new();
    for message in window.messages() {
        for id in message.call_ids() {
            calls.insert(id.to_string());
        }
        if let Some(id) = message.responds_to() {
            assert!(calls.contains(id), "orphaned response {id}");
        }
    }
}

#[test]
fn eviction_begins_on_the_tenth_message() {
    let mut window = fixed_window(100);
    for n in 1..=9 {
        let evicted = window.append(ConversationMessage::user(format!("m{n}"))).unwrap();
        assert_eq!(evicted, 0, "message {n} should fit");
    }
    assert_eq!(window.current_tokens(), 95);

    let evicted = window.append(ConversationMessage::user("m10")).unwrap();
    assert_eq!(evicted, 1);
    let messages = window.messages();
    assert!(messages[0].is_system());
    assert_eq!(messages[1].text(), "m2");
    assert_eq!(messages.last().unwrap().text(), "m10");
    assert!(window.current_tokens() <= window.budget());
}

#[test]
fn interleaved_tool_traffic_never_orphans_a_response() {
    let mut window = fixed_window(75);
    for round in 0..12 {
        let a = format!("a{round}");
        let b = format!("b{round}");
        window
            .append(ConversationMessage::user(format!("turn {round}")))
            .unwrap();
        window
            .append(ConversationMessage::tool_calls(vec![
                ToolCall::new(&a, "read_plan", json!({})),
                ToolCall::new(&b, "publish_plan", json!({"message": round})),
            ]))
            .unwrap();
        window
            .append(ConversationMessage::tool_response(&a, "ok"))
            .unwrap();
        if round % 3 == 0 {
            window
                .append(ConversationMessage::pending_tool_response(&b))
                .unwrap();
            assert!(window.fill_tool_response(&b, "filled").unwrap());
        } else {
            window
                .append(ConversationMessage::tool_response(&b, "ok"))
                .unwrap();
        }
        assert_paired(&window);
        assert!(window.current_tokens() <= window.budget());
        assert!(window.messages()[0].is_system());
    }
}

#[test]
fn budget_below_system_message_is_rejected() {
    let error = ConversationWindow::new("system", &budget(3), Arc::new(FixedCounter)).unwrap_err();
    assert!(matches!(error, WindowError::BudgetTooSmall { budget: 3, .. }));
}

#[tokio::test]
async fn process_with_unusable_budget_cannot_spawn() {
    let h = harness_with(memory_store(), budget(1));
    h.handler.register_agent(writer()).await.unwrap();
    let error = h
        .handler
        .spawn_process("writer", Some("w".into()))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        ConclaveError::Window(WindowError::BudgetTooSmall { .. })
    ));
    assert!(error.is_fatal_config());
}

fn fixed_harness(token_budget: u64) -> Harness {
    let (scheduler, queue) = QueueScheduler::new();
    let handler = ProcessHandler::builder(memory_store(), Arc::new(scheduler))
        .window(budget(token_budget))
        .token_counter(Arc::new(FixedCounter))
        .build();
    Harness { handler, queue }
}

#[tokio::test]
async fn crossing_the_warning_threshold_flushes_after_the_turn() {
    let h = fixed_harness(100);
    let definition = reflective(AuxiliaryPass::PostPass);
    let agent = definition.name.clone();
    h.handler.register_agent(definition).await.unwrap();
    h.handler.spawn_process(&agent, Some("p".into())).await.unwrap();
    h.handler.add_message("p", "plan the release").await.unwrap();

    for (round, expected) in [(1, 35), (2, 55), (3, 75)] {
        let call_id = format!("r{round}");
        h.turn("p", vec![(call_id.as_str(), "read_plan", json!({}))])
            .await;
        let snapshot = h.handler.snapshot("p").await.unwrap();
        assert_eq!(snapshot.tokens, expected);
    }

    h.turn("p", vec![("r4", "read_plan", json!({}))]).await;
    let snapshot = h.handler.snapshot("p").await.unwrap();
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.tokens, 5);

    let archives = h.handler.store().durable().load_archives("p").await.unwrap();
    assert_eq!(archives.len(), 1);
    assert_eq!(archives[0].messages.len(), 10);
    assert!(archives[0].messages[0].is_system());
}

#[tokio::test]
async fn failed_summary_keeps_the_window() {
    let (scheduler, queue) = QueueScheduler::new();
    let handler = ProcessHandler::builder(memory_store(), Arc::new(scheduler))
        .window(quiet_window())
        .summarizer(Arc::new(FailingSummarizer))
        .build();
    let h = Harness { handler, queue };
    h.handler.register_agent(writer()).await.unwrap();
    h.handler.spawn_process("writer", Some("w".into())).await.unwrap();
    h.handler.add_message("w", "first").await.unwrap();
    h.handler.add_message("w", "second").await.unwrap();

    let error = h.handler.flush("w").await.unwrap_err();
    assert!(error.to_string().contains("summarizer offline"));

    let snapshot = h.handler.snapshot("w").await.unwrap();
    assert_eq!(snapshot.messages.len(), 3);
    assert!(
        h.handler
            .store()
            .durable()
            .load_archives("w")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn flush_waits_while_a_response_is_outstanding() {
    let h = harness(vec![writer(), reviewer()], &[("writer", "w"), ("reviewer", "r")]).await;
    h.handler.start("w").await.unwrap();
    h.turn("w", vec![("c", "request_review", json!({"payload": "v1"}))])
        .await;

    let snapshot = h.handler.snapshot("w").await.unwrap();
    assert!(h.handler.flush("w").await.unwrap().is_none());
    assert_eq!(h.handler.snapshot("w").await.unwrap().messages, snapshot.messages);
}

#[tokio::test(start_paused = true)]
async fn quiet_process_is_flushed_after_the_idle_delay() {
    let idle = WindowConfig {
        flush_idle_secs: 30,
        ..WindowConfig::default()
    };
    let h = harness_with(memory_store(), idle);
    h.handler.register_agent(writer()).await.unwrap();
    h.handler.spawn_process("writer", Some("w".into())).await.unwrap();

    h.handler.add_message("w", "one").await.unwrap();
    tokio::time::sleep(Duration::from_secs(20)).await;
    h.handler.add_message("w", "two").await.unwrap();
    tokio::time::sleep(Duration::from_secs(20)).await;
    let durable = h.handler.store().durable();
    assert!(durable.load_archives("w").await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_secs(15)).await;
    let archives = durable.load_archives("w").await.unwrap();
    assert_eq!(archives.len(), 1);
    let texts: Vec<_> = archives[0].messages.iter().map(ConversationMessage::text).collect();
    assert_eq!(texts[1..], ["one".to_string(), "two".to_string()]);
    assert_eq!(h.handler.snapshot("w").await.unwrap().messages.len(), 1);
}

#[tokio::test]
async fn oversized_sync_response_resumes_client_with_an_error() {
    let mut h = harness_with(memory_store(), budget(200));
    h.handler.register_agent(writer()).await.unwrap();
    h.handler.register_agent(reviewer()).await.unwrap();
    h.handler.spawn_process("writer", Some("w".into())).await.unwrap();
    h.handler.spawn_process("reviewer", Some("r".into())).await.unwrap();
    h.handler.start("w").await.unwrap();
    h.turn("w", vec![("call_1", "request_review", json!({"payload": "v1"}))])
        .await;
    h.drain();

    let request = h
        .handler
        .store()
        .complete_request("review", "r", json!("x".repeat(2000)), true)
        .await
        .unwrap()
        .unwrap();
    let report = h
        .handler
        .dispatcher()
        .dispatch(&Lifecycle::RequestCompleted(request), &h.handler)
        .await;
    assert_eq!(report.delivered, 1);
    assert_eq!(h.drain(), vec!["w".to_string()]);

    let snapshot = h.handler.snapshot("w").await.unwrap();
    assert_eq!(
        snapshot.record.phase,
        Phase::MainTurn {
            state: "Draft".into()
        }
    );
    assert!(snapshot.tokens <= 200);
    let response = snapshot
        .messages
        .iter()
        .find(|m| m.responds_to() == Some("call_1"))
        .unwrap();
    assert!(response.text().starts_with("Error:"));
}
