use serde_json::json;

use conclave::process::{ModelTurn, Phase, ProcessEvent};
use conclave::protocols::{BindingRole, BindingSpec};

use super::harness::{builder_agent, deployer, harness, watcher, writer};

fn watch() -> Phase {
    Phase::MainTurn {
        state: "Watch".into(),
    }
}

#[tokio::test]
async fn event_reaches_every_live_subscriber_and_skips_stale_ones() {
    let mut h = harness(
        vec![deployer(), watcher()],
        &[("deployer", "d"), ("watcher", "w1"), ("watcher", "w2")],
    )
    .await;
    h.handler
        .dispatcher()
        .register("ghost", &[BindingSpec::new(BindingRole::EventSubscriber, "deploy")]);
    let mut events = h.handler.subscribe_events();

    h.handler.start("d").await.unwrap();
    let outcome = h
        .turn("d", vec![("e", "emit_deploy", json!({"payload": "v1.2.0"}))])
        .await;
    assert_eq!(outcome.phase, Phase::Idle);
    assert_eq!(outcome.dispatch.delivered, 2);
    assert_eq!(outcome.dispatch.skipped, 1);

    let mut scheduled = h.drain();
    scheduled.sort();
    assert_eq!(scheduled, vec!["d", "w1", "w2"]);

    let mut skipped = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ProcessEvent::DeliverySkipped { process_id, .. } = event {
            skipped.push(process_id);
        }
    }
    assert_eq!(skipped, vec!["ghost".to_string()]);

    for subscriber in ["w1", "w2"] {
        let snapshot = h.handler.snapshot(subscriber).await.unwrap();
        assert_eq!(snapshot.record.phase, watch());
        assert!(
            snapshot
                .messages
                .last()
                .is_some_and(|m| m.text().contains("v1.2.0"))
        );
        let pending = h
            .handler
            .store()
            .pending_deliveries(subscriber, "deploy")
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }
}

#[tokio::test]
async fn subscriber_completes_only_its_own_copy() {
    let h = harness(
        vec![deployer(), watcher()],
        &[("deployer", "d"), ("watcher", "w1"), ("watcher", "w2")],
    )
    .await;
    h.handler.start("d").await.unwrap();
    h.turn("d", vec![("e", "emit_deploy", json!({"payload": "v2"}))])
        .await;

    let outcome = h
        .turn("w1", vec![("c", "complete_event_deploy", json!({}))])
        .await;
    assert!(outcome.tool_results[0].success);
    assert_eq!(outcome.phase, Phase::Idle);

    let store = h.handler.store();
    assert!(store.pending_deliveries("w1", "deploy").await.unwrap().is_empty());
    assert_eq!(store.pending_deliveries("w2", "deploy").await.unwrap().len(), 1);

    h.handler.start("w1").await.unwrap();
    let again = h
        .turn("w1", vec![("c2", "complete_event_deploy", json!({}))])
        .await;
    assert!(!again.tool_results[0].success);
    assert!(
        again.tool_results[0]
            .content
            .contains("no pending event delivery for deploy")
    );
}

#[tokio::test]
async fn publishing_a_topic_wakes_nobody() {
    let mut h = harness(vec![writer(), watcher()], &[("writer", "w"), ("watcher", "sub")]).await;
    h.handler.start("w").await.unwrap();
    let outcome = h
        .turn("w", vec![("p", "publish_status", json!({"message": "halfway"}))])
        .await;
    assert_eq!(outcome.dispatch.delivered, 0);
    assert_eq!(h.drain(), vec!["w".to_string(), "w".to_string()]);

    let idle = h.handler.snapshot("sub").await.unwrap();
    assert_eq!(idle.record.phase, Phase::Idle);
    assert_eq!(idle.messages.len(), 1);

    let topic = h.handler.store().topic("status").await.unwrap().unwrap();
    assert_eq!(topic.latest_message, Some(json!("halfway")));
    assert_eq!(topic.publisher_process_id.as_deref(), Some("w"));

    h.handler.start("sub").await.unwrap();
    let read = h.turn("sub", vec![("r", "read_status", json!({}))]).await;
    assert!(read.tool_results[0].content.contains("halfway"));
    assert_eq!(read.phase, watch());
}

#[tokio::test]
async fn action_feedback_and_result_reach_the_client() {
    let mut h = harness(
        vec![deployer(), builder_agent()],
        &[("deployer", "d"), ("builder", "b")],
    )
    .await;
    h.handler.start("d").await.unwrap();
    let started = h
        .turn(
            "d",
            vec![("s", "start_action_build", json!({"payload": "main@abc123", "priority": 2}))],
        )
        .await;
    assert!(started.tool_results[0].success);
    h.handler.prepare_turn("d").await.unwrap();
    let rested = h.handler.step("d", ModelTurn::text("Waiting on the build.")).await.unwrap();
    assert_eq!(rested.phase, Phase::Idle);
    h.drain();

    let context = h.handler.prepare_turn("b").await.unwrap();
    assert!(
        context
            .messages
            .iter()
            .any(|m| m.text().starts_with("Action ") && m.text().contains("main@abc123"))
    );

    let feedback = h
        .turn("b", vec![("f", "send_feedback_build", json!({"feedback": "compiling"}))])
        .await;
    assert_eq!(feedback.dispatch.delivered, 1);
    assert_eq!(h.drain(), vec!["b".to_string(), "d".to_string()]);
    let client = h.handler.snapshot("d").await.unwrap();
    assert!(client.messages.last().unwrap().text().contains("Feedback #1"));

    let done = h
        .turn(
            "b",
            vec![("c", "complete_action_build", json!({"response": "artifact.tar", "success": true}))],
        )
        .await;
    assert_eq!(done.phase, Phase::Idle);
    let client = h.handler.snapshot("d").await.unwrap();
    let last = client.messages.last().unwrap().text();
    assert!(last.contains("Result of build action"));
    assert!(last.contains("artifact.tar"));

    let action = &h
        .handler
        .store()
        .durable()
        .list_primitives(conclave::primitives::PrimitiveKind::Action, "build", false)
        .await
        .unwrap()[0];
    assert_eq!(action.status(), Some(conclave::primitives::PrimitiveStatus::Success));
}
