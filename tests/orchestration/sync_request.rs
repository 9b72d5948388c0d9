use serde_json::json;

use conclave::primitives::{PrimitiveKind, PrimitiveStatus};
use conclave::process::{ModelTurn, Phase, ProcessEvent};
use conclave::window::{ConversationMessage, ToolCall};

use super::harness::{async_writer, harness, reviewer, writer};

fn draft() -> Phase {
    Phase::MainTurn {
        state: "Draft".into(),
    }
}

#[tokio::test]
async fn sync_request_fills_placeholder_and_resumes_client_once() {
    let mut h = harness(vec![writer(), reviewer()], &[("writer", "w"), ("reviewer", "r")]).await;
    h.handler.add_message("w", "write the launch note").await.unwrap();

    let outcome = h
        .turn("w", vec![("call_1", "request_review", json!({"payload": "draft v1"}))])
        .await;
    assert!(matches!(
        &outcome.phase,
        Phase::WaitingForResponse { tool_call_id, resume, .. }
            if tool_call_id == "call_1" && **resume == draft()
    ));
    assert_eq!(outcome.dispatch.delivered, 1);
    assert_eq!(h.drain(), vec!["w".to_string(), "r".to_string()]);

    let context = h.handler.prepare_turn("r").await.unwrap();
    assert!(context.messages.iter().any(|m| m.text().contains("draft v1")));
    let served = h
        .turn(
            "r",
            vec![("call_2", "complete_request_review", json!({"response": "looks good"}))],
        )
        .await;
    assert_eq!(served.phase, Phase::Idle);
    assert_eq!(h.drain(), vec!["w".to_string()]);

    let snapshot = h.handler.snapshot("w").await.unwrap();
    assert_eq!(snapshot.record.phase, draft());
    let responses: Vec<_> = snapshot
        .messages
        .iter()
        .filter(|m| m.responds_to() == Some("call_1"))
        .collect();
    assert_eq!(responses.len(), 1);
    assert!(responses[0].text().contains("looks good"));
    assert!(matches!(
        snapshot.messages.last(),
        Some(ConversationMessage::ToolResponse { .. })
    ));
}

#[tokio::test]
async fn duplicate_resume_is_ignored() {
    let mut h = harness(vec![writer(), reviewer()], &[("writer", "w"), ("reviewer", "r")]).await;
    h.handler.start("w").await.unwrap();
    h.turn("w", vec![("call_1", "request_review", json!({"payload": "v1"}))])
        .await;
    h.turn(
        "r",
        vec![("call_2", "complete_request_review", json!({"response": "ok"}))],
    )
    .await;
    h.drain();

    let request_id = {
        let requests = h
            .handler
            .store()
            .durable()
            .list_primitives(PrimitiveKind::Request, "review", false)
            .await
            .unwrap();
        requests[0].id().to_string()
    };
    assert!(!h.handler.resume("w", &request_id).await.unwrap());
    assert!(h.drain().is_empty());
}

#[tokio::test]
async fn service_takes_highest_priority_first_in_either_order() {
    for priorities in [[5, 9], [9, 5]] {
        let mut h = harness(
            vec![async_writer(), reviewer()],
            &[("async_writer", "w"), ("reviewer", "r")],
        )
        .await;
        h.handler.start("w").await.unwrap();
        h.turn(
            "w",
            vec![
                (
                    "a",
                    "request_review",
                    json!({"payload": format!("p{}", priorities[0]), "priority": priorities[0]}),
                ),
                (
                    "b",
                    "request_review",
                    json!({"payload": format!("p{}", priorities[1]), "priority": priorities[1]}),
                ),
            ],
        )
        .await;

        let first = h.handler.prepare_turn("r").await.unwrap();
        let shown: Vec<_> = first
            .messages
            .iter()
            .filter(|m| m.text().starts_with("Request "))
            .collect();
        assert_eq!(shown.len(), 1);
        assert!(shown[0].text().contains("priority 9"));

        let outcome = h
            .handler
            .step(
                "r",
                ModelTurn::calls(vec![ToolCall::new(
                    "c1",
                    "complete_request_review",
                    json!({"response": "first"}),
                )]),
            )
            .await
            .unwrap();
        assert_eq!(
            outcome.phase,
            Phase::MainTurn {
                state: "Serve".into()
            }
        );

        let second = h.handler.prepare_turn("r").await.unwrap();
        assert!(
            second
                .messages
                .iter()
                .any(|m| m.text().starts_with("Request ") && m.text().contains("priority 5"))
        );
        h.drain();
    }
}

#[tokio::test]
async fn async_completion_is_delivered_as_a_message() {
    let h = harness(
        vec![async_writer(), reviewer()],
        &[("async_writer", "w"), ("reviewer", "r")],
    )
    .await;
    h.handler.start("w").await.unwrap();
    let outcome = h
        .turn("w", vec![("a", "request_review", json!({"payload": "v2"}))])
        .await;
    assert!(outcome.tool_results[0].success);
    assert_eq!(outcome.phase, Phase::MainTurn { state: "Draft".into() });

    h.turn("w", vec![("p", "publish_status", json!({"message": "waiting"}))])
        .await;
    h.turn(
        "r",
        vec![("c", "complete_request_review", json!({"response": "ship it", "success": true}))],
    )
    .await;

    let snapshot = h.handler.snapshot("w").await.unwrap();
    let last = snapshot.messages.last().unwrap();
    assert!(matches!(last, ConversationMessage::User { .. }));
    assert!(last.text().contains("ship it"));
    assert!(last.text().contains(PrimitiveStatus::Success.as_ref()));
}

#[tokio::test]
async fn request_without_service_reports_error_to_caller() {
    let h = harness(vec![writer()], &[("writer", "w")]).await;
    let mut events = h.handler.subscribe_events();
    h.handler.start("w").await.unwrap();
    let outcome = h
        .turn("w", vec![("call_1", "request_review", json!({"payload": "v1"}))])
        .await;

    assert!(!outcome.tool_results[0].success);
    assert!(outcome.tool_results[0].content.contains("no service bound for review"));
    assert_eq!(outcome.phase, Phase::MainTurn { state: "Draft".into() });
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, ProcessEvent::Suspended { .. }));
    }
}

#[tokio::test]
async fn completing_with_nothing_outstanding_is_a_tool_error() {
    let h = harness(vec![reviewer()], &[("reviewer", "r")]).await;
    h.handler.start("r").await.unwrap();
    let outcome = h
        .turn(
            "r",
            vec![("c", "complete_request_review", json!({"response": "nothing to do"}))],
        )
        .await;

    assert!(!outcome.tool_results[0].success);
    assert!(
        outcome.tool_results[0]
            .content
            .contains("no outstanding request for review")
    );
    assert_eq!(outcome.phase, Phase::MainTurn { state: "Serve".into() });
}
