use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use conclave::error::{ConclaveError, TransitionError};
use conclave::process::{AuxiliaryPass, ModelTurn, Phase, StartOutcome};
use conclave::window::ToolCall;

use super::harness::{harness, reflective, writer};

fn main_turn(state: &str) -> Phase {
    Phase::MainTurn {
        state: state.into(),
    }
}

#[tokio::test]
async fn goto_switches_state_and_narrows_tools() {
    let mut h = harness(vec![writer()], &[("writer", "w")]).await;
    h.handler.start("w").await.unwrap();

    let draft = h.handler.prepare_turn("w").await.unwrap();
    let mut offered: Vec<_> = draft.tools.iter().map(|t| t.name.clone()).collect();
    offered.sort();
    assert_eq!(offered, vec!["publish_status", "request_review"]);

    let outcome = h
        .turn("w", vec![("p", "publish_status", json!({"message": "drafted"}))])
        .await;
    assert_eq!(outcome.phase, main_turn("ReviewState"));
    assert_eq!(h.drain(), vec!["w".to_string(), "w".to_string()]);

    let review = h.handler.prepare_turn("w").await.unwrap();
    assert_eq!(review.state, "ReviewState");
    let names: Vec<_> = review.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["publish_status"]);
    assert!(review.prompt.contains("ReviewState"));
}

#[tokio::test]
async fn end_without_pending_work_goes_idle_and_clears_active_flag() {
    let h = harness(vec![writer()], &[("writer", "w")]).await;
    h.handler.start("w").await.unwrap();
    h.turn("w", vec![("p", "publish_status", json!({"message": "a"}))])
        .await;
    let outcome = h
        .turn("w", vec![("p2", "publish_status", json!({"message": "b"}))])
        .await;

    assert_eq!(outcome.phase, Phase::Idle);
    let snapshot = h.handler.snapshot("w").await.unwrap();
    assert!(!snapshot.active);
    assert_eq!(h.handler.start("w").await.unwrap(), StartOutcome::Started);
}

#[tokio::test]
async fn text_only_turn_counts_as_end() {
    let h = harness(vec![writer()], &[("writer", "w")]).await;
    h.handler.start("w").await.unwrap();
    h.handler.prepare_turn("w").await.unwrap();
    let outcome = h
        .handler
        .step("w", ModelTurn::text("Nothing to do yet."))
        .await
        .unwrap();
    assert_eq!(outcome.phase, Phase::Idle);
    assert!(outcome.tool_results.is_empty());
}

#[tokio::test]
async fn tool_outside_transition_table_aborts_turn() {
    let h = harness(vec![writer()], &[("writer", "w")]).await;
    h.handler.start("w").await.unwrap();
    h.handler.prepare_turn("w").await.unwrap();

    let error = assert_err!(
        h.handler
            .step(
                "w",
                ModelTurn::calls(vec![ToolCall::new("x", "delete_everything", json!({}))]),
            )
            .await
    );
    assert!(matches!(
        error,
        ConclaveError::Transition(TransitionError::InvalidTransition { .. })
    ));
    let snapshot = h.handler.snapshot("w").await.unwrap();
    assert_eq!(snapshot.record.phase, Phase::Idle);
    assert_eq!(snapshot.messages.len(), 1);
}

#[tokio::test]
async fn pre_pass_runs_before_the_initial_state() {
    let name = format!("reflective_{}", AuxiliaryPass::PrePass);
    let h = harness(vec![reflective(AuxiliaryPass::PrePass)], &[(&name, "p")]).await;
    h.handler.start("p").await.unwrap();

    let context = h.handler.prepare_turn("p").await.unwrap();
    assert_eq!(
        context.phase,
        Phase::AuxiliaryTurn {
            pass: AuxiliaryPass::PrePass
        }
    );
    assert_eq!(context.state, "Reflect");

    let outcome = h
        .turn("p", vec![("a", "publish_plan", json!({"message": "outline"}))])
        .await;
    assert_eq!(outcome.phase, main_turn("Plan"));

    let outcome = h
        .turn("p", vec![("b", "publish_plan", json!({"message": "final"}))])
        .await;
    assert_eq!(outcome.phase, Phase::Idle);
}

#[tokio::test]
async fn post_pass_runs_after_main_pass_ends() {
    let name = format!("reflective_{}", AuxiliaryPass::PostPass);
    let h = harness(vec![reflective(AuxiliaryPass::PostPass)], &[(&name, "p")]).await;
    h.handler.start("p").await.unwrap();

    let outcome = h
        .turn("p", vec![("a", "publish_plan", json!({"message": "plan"}))])
        .await;
    assert_eq!(
        outcome.phase,
        Phase::AuxiliaryTurn {
            pass: AuxiliaryPass::PostPass
        }
    );

    let outcome = h
        .turn("p", vec![("b", "publish_plan", json!({"message": "revised"}))])
        .await;
    assert_eq!(outcome.phase, Phase::Idle);
}

#[tokio::test]
async fn finish_is_terminal() {
    let name = format!("reflective_{}", AuxiliaryPass::PostPass);
    let mut h = harness(vec![reflective(AuxiliaryPass::PostPass)], &[(&name, "p")]).await;
    h.handler.start("p").await.unwrap();
    h.turn("p", vec![("a", "publish_plan", json!({"message": "plan"}))])
        .await;
    let outcome = h.turn("p", vec![("b", "read_plan", json!({}))]).await;
    assert_eq!(outcome.phase, Phase::Finished);
    h.drain();
    assert!(h.handler.dispatcher().index().topic_subscribers("plan").is_empty());

    assert_eq!(assert_ok!(h.handler.start("p").await), StartOutcome::Finished);
    h.handler.add_message("p", "are you there?").await.unwrap();
    assert!(h.drain().is_empty());
    assert_err!(h.handler.prepare_turn("p").await);
}

#[tokio::test]
async fn strongest_transition_wins_within_a_turn() {
    let name = format!("reflective_{}", AuxiliaryPass::PostPass);
    let h = harness(vec![reflective(AuxiliaryPass::PostPass)], &[(&name, "p")]).await;
    h.handler.start("p").await.unwrap();

    let outcome = h
        .turn(
            "p",
            vec![
                ("a", "publish_plan", json!({"message": "plan"})),
                ("b", "read_plan", json!({})),
            ],
        )
        .await;
    assert_eq!(
        outcome.phase,
        Phase::AuxiliaryTurn {
            pass: AuxiliaryPass::PostPass
        }
    );
    assert!(outcome.tool_results.iter().all(|r| r.success));

    let outcome = h
        .turn(
            "p",
            vec![
                ("c", "read_plan", json!({})),
                ("d", "publish_plan", json!({"message": "again"})),
            ],
        )
        .await;
    assert_eq!(outcome.phase, Phase::Finished);
}
