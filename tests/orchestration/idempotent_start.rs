use std::sync::Arc;

use conclave::process::{Phase, ProcessEvent, StartOutcome};
use conclave::store::{InMemoryDurableStore, InMemoryKeyValueStore};

use super::harness::{harness, harness_with, quiet_window, reviewer, store_over};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hundred_concurrent_starts_leave_idle_once() {
    let mut h = harness(vec![reviewer()], &[("reviewer", "r")]).await;
    let mut events = h.handler.subscribe_events();

    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let handler = h.handler.clone();
            tokio::spawn(async move { handler.start("r").await })
        })
        .collect();

    let mut started = 0;
    for task in tasks {
        match task.await.unwrap().unwrap() {
            StartOutcome::Started => started += 1,
            StartOutcome::AlreadyActive => {}
            StartOutcome::Finished => panic!("process is not finished"),
        }
    }
    assert_eq!(started, 1);
    assert_eq!(h.drain(), vec!["r".to_string()]);

    let mut transitions = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ProcessEvent::Started { .. }) {
            transitions += 1;
        }
    }
    assert_eq!(transitions, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_on_unloaded_process_schedule_once() {
    let kv = Arc::new(InMemoryKeyValueStore::new());
    let durable = Arc::new(InMemoryDurableStore::new());

    let first = harness_with(store_over(kv.clone(), durable.clone()), quiet_window());
    first.handler.register_agent(reviewer()).await.unwrap();
    first
        .handler
        .spawn_process("reviewer", Some("r".into()))
        .await
        .unwrap();

    let mut second = harness_with(store_over(kv, durable), quiet_window());
    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let handler = second.handler.clone();
            tokio::spawn(async move { handler.start("r").await })
        })
        .collect();
    let mut started = 0;
    for task in tasks {
        if task.await.unwrap().unwrap() == StartOutcome::Started {
            started += 1;
        }
    }
    assert_eq!(started, 1);
    assert_eq!(second.drain().len(), 1);
}

#[tokio::test]
async fn start_is_idempotent_across_handlers_with_stale_caches() {
    let kv = Arc::new(InMemoryKeyValueStore::new());
    let durable = Arc::new(InMemoryDurableStore::new());

    let mut first = harness_with(store_over(kv.clone(), durable.clone()), quiet_window());
    first.handler.register_agent(reviewer()).await.unwrap();
    first
        .handler
        .spawn_process("reviewer", Some("r".into()))
        .await
        .unwrap();

    // The second handler caches the process while it is still idle.
    let mut second = harness_with(store_over(kv, durable), quiet_window());
    assert_eq!(second.handler.snapshot("r").await.unwrap().record.phase, Phase::Idle);

    assert_eq!(first.handler.start("r").await.unwrap(), StartOutcome::Started);
    assert_eq!(
        second.handler.start("r").await.unwrap(),
        StartOutcome::AlreadyActive
    );
    assert_eq!(first.drain(), vec!["r".to_string()]);
    assert!(second.drain().is_empty());
    assert_eq!(
        second.handler.snapshot("r").await.unwrap().record.phase,
        Phase::MainTurn {
            state: "Serve".into()
        }
    );
}

#[tokio::test]
async fn start_while_running_is_a_no_op() {
    let mut h = harness(vec![reviewer()], &[("reviewer", "r")]).await;
    assert_eq!(h.handler.start("r").await.unwrap(), StartOutcome::Started);
    h.handler.prepare_turn("r").await.unwrap();
    assert_eq!(
        h.handler.start("r").await.unwrap(),
        StartOutcome::AlreadyActive
    );
    assert_eq!(h.drain().len(), 1);

    let snapshot = h.handler.snapshot("r").await.unwrap();
    assert!(snapshot.active);
    assert_eq!(
        snapshot.record.phase,
        Phase::MainTurn {
            state: "Serve".into()
        }
    );
}
