use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use conclave::primitives::{PrimitiveKind, PrimitiveStatus};
use conclave::process::Phase;
use conclave::store::{DurableStore, InMemoryKeyValueStore, KeyValueStore, SqliteDurableStore};
use conclave::window::ConversationMessage;

use super::harness::{harness_with, quiet_window, reviewer, store_over, writer};

async fn sqlite(dir: &TempDir) -> Arc<dyn DurableStore> {
    let path = dir.path().join("conclave.db");
    Arc::new(
        SqliteDurableStore::connect(path.to_str().unwrap(), 1)
            .await
            .unwrap(),
    )
}

#[tokio::test]
async fn waiting_process_survives_a_handler_restart() {
    let dir = TempDir::new().unwrap();
    let durable = sqlite(&dir).await;
    let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());

    {
        let first = harness_with(store_over(kv.clone(), durable.clone()), quiet_window());
        first.handler.register_agent(writer()).await.unwrap();
        first.handler.register_agent(reviewer()).await.unwrap();
        first.handler.spawn_process("writer", Some("w".into())).await.unwrap();
        first.handler.spawn_process("reviewer", Some("r".into())).await.unwrap();
        first.handler.add_message("w", "draft the notes").await.unwrap();
        first
            .turn("w", vec![("call_1", "request_review", json!({"payload": "notes v1"}))])
            .await;
    }

    let mut second = harness_with(store_over(kv, durable), quiet_window());
    let restored = second.handler.snapshot("w").await.unwrap();
    assert!(matches!(
        &restored.record.phase,
        Phase::WaitingForResponse { tool_call_id, .. } if tool_call_id == "call_1"
    ));
    assert_eq!(restored.messages.len(), 4);
    assert!(restored.messages[1].text().contains("draft the notes"));

    let served = second
        .turn(
            "r",
            vec![("call_2", "complete_request_review", json!({"response": "approved"}))],
        )
        .await;
    assert_eq!(served.phase, Phase::Idle);
    assert_eq!(second.drain(), vec!["w".to_string()]);

    let resumed = second.handler.snapshot("w").await.unwrap();
    assert_eq!(
        resumed.record.phase,
        Phase::MainTurn {
            state: "Draft".into()
        }
    );
    assert_eq!(resumed.messages.len(), 4);
    assert!(matches!(
        &resumed.messages[3],
        ConversationMessage::ToolResponse { content, .. } if content.contains("approved")
    ));

    let requests = second
        .handler
        .store()
        .durable()
        .list_primitives(PrimitiveKind::Request, "review", false)
        .await
        .unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].status(), Some(PrimitiveStatus::Success));
}

#[tokio::test]
async fn reloaded_process_keeps_buffered_conversation_in_order() {
    let dir = TempDir::new().unwrap();
    let durable = sqlite(&dir).await;
    let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());

    {
        let first = harness_with(store_over(kv.clone(), durable.clone()), quiet_window());
        first.handler.register_agent(writer()).await.unwrap();
        first.handler.spawn_process("writer", Some("w".into())).await.unwrap();
        for line in ["alpha", "beta", "gamma"] {
            first.handler.add_message("w", line).await.unwrap();
        }
    }

    let second = harness_with(store_over(kv, durable), quiet_window());
    let snapshot = second.handler.snapshot("w").await.unwrap();
    let texts: Vec<_> = snapshot.messages.iter().map(ConversationMessage::text).collect();
    assert_eq!(texts, vec!["You write documents.", "alpha", "beta", "gamma"]);
    assert!(snapshot.active);

    let archive = second.handler.flush("w").await.unwrap().unwrap();
    assert_eq!(archive.messages.len(), 4);
    let archives = second.handler.store().durable().load_archives("w").await.unwrap();
    assert_eq!(archives, vec![archive]);
}
