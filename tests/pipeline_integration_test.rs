//! 流水线集成测试
//!
//! 用脚本化协作者 + 临时 SQLite 走完整 ingest 流程，覆盖预算闸门、
//! 护栏净化、分歧升级与状态快照幂等。

use std::sync::Arc;

use friday::agents::mock::{
    scripted_solver_result, scripted_tutor_result, scripted_verifier_result, CountingOcr,
    ScriptedSolver, ScriptedTutor, ScriptedVerifier,
};
use friday::config::AppConfig;
use friday::core::Orchestrator;
use friday::schemas::{
    IngestEventRequest, SessionCreateRequest, TriggerType, TurnStatus,
};
use friday::storage::Storage;

struct Harness {
    _dir: tempfile::TempDir,
    orchestrator: Orchestrator,
    ocr: Arc<CountingOcr>,
    solver: Arc<ScriptedSolver>,
    tutor: Arc<ScriptedTutor>,
    verifier: Arc<ScriptedVerifier>,
}

fn harness(
    solver: ScriptedSolver,
    tutor: ScriptedTutor,
    verifier: ScriptedVerifier,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(
        Storage::new(
            &dir.path().join("friday.sqlite3"),
            &dir.path().join("audit.jsonl"),
        )
        .unwrap(),
    );
    let ocr = Arc::new(CountingOcr::new());
    let solver = Arc::new(solver);
    let tutor = Arc::new(tutor);
    let verifier = Arc::new(verifier);
    let orchestrator = Orchestrator::new(
        AppConfig::default(),
        storage,
        ocr.clone(),
        solver.clone(),
        tutor.clone(),
        verifier.clone(),
    );
    Harness {
        _dir: dir,
        orchestrator,
        ocr,
        solver,
        tutor,
        verifier,
    }
}

fn default_harness() -> Harness {
    harness(
        ScriptedSolver::new(scripted_solver_result(Some("sign_convention"), 0.0)),
        ScriptedTutor::new(scripted_tutor_result(
            "Which axis did you project the force onto?",
            0.7,
        )),
        ScriptedVerifier::new(scripted_verifier_result(0.0)),
    )
}

fn help_request(problem: &str, message: &str) -> IngestEventRequest {
    IngestEventRequest {
        trigger_type: TriggerType::HelpRequest,
        problem_text: Some(problem.to_string()),
        user_message: Some(message.to_string()),
        ..Default::default()
    }
}

fn create_session(orchestrator: &Orchestrator) -> String {
    orchestrator
        .create_session(&SessionCreateRequest {
            student_alias: "Viktor".to_string(),
            topic: Some("physics".to_string()),
            grade_level: Some("8".to_string()),
            goal: Some("build transfer".to_string()),
        })
        .unwrap()
        .session_id
}

#[tokio::test]
async fn test_happy_path_help_request() {
    let h = default_harness();
    let session_id = create_session(&h.orchestrator);

    let response = h
        .orchestrator
        .ingest(
            &session_id,
            &help_request(
                "Projectile motion, find y-projection.",
                "I used cosine but not sure.",
            ),
        )
        .await
        .unwrap();

    assert!(matches!(
        response.status,
        TurnStatus::Ok | TurnStatus::Uncertain
    ));
    assert!(!response.tutor_message.is_empty());
    assert!(!response.trace_id.is_empty());
    assert_eq!(h.ocr.call_count(), 1);
    assert_eq!(h.solver.call_count(), 1);
    assert_eq!(h.tutor.call_count(), 1);
    assert_eq!(h.verifier.call_count(), 1);
}

#[tokio::test]
async fn test_verifier_disagreement_surfaces_uncertain() {
    let h = harness(
        ScriptedSolver::new(scripted_solver_result(Some("symbolic_error"), 0.0)),
        ScriptedTutor::new(scripted_tutor_result("Check the disputed step.", 0.8)),
        ScriptedVerifier::new(scripted_verifier_result(0.8)),
    );
    let session_id = create_session(&h.orchestrator);

    let response = h
        .orchestrator
        .ingest(&session_id, &help_request("2x = 4", "x is five"))
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::Uncertain);
    assert!(response
        .flags
        .contains(&"verifier_disagreement".to_string()));
}

#[tokio::test]
async fn test_low_confidence_surfaces_uncertain() {
    let h = harness(
        ScriptedSolver::new(scripted_solver_result(None, 0.0)),
        ScriptedTutor::new(scripted_tutor_result("Try a boundary case.", 0.30)),
        ScriptedVerifier::new(scripted_verifier_result(0.0)),
    );
    let session_id = create_session(&h.orchestrator);

    let response = h
        .orchestrator
        .ingest(&session_id, &help_request("p", "w"))
        .await
        .unwrap();
    assert_eq!(response.status, TurnStatus::Uncertain);
}

#[tokio::test]
async fn test_budget_guard_blocks_without_collaborator_calls() {
    let h = default_harness();
    let session_id = create_session(&h.orchestrator);

    // 把会话花费推到软上限之上
    h.orchestrator
        .storage()
        .add_budget_entry(
            "seed",
            Some(&session_id),
            "solver",
            9.0,
            Some("o3"),
            &serde_json::json!({}),
        )
        .unwrap();

    let response = h
        .orchestrator
        .ingest(&session_id, &help_request("p", "w"))
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::BudgetBlocked);
    assert!(response.flags.contains(&"budget_cap_reached".to_string()));
    assert_eq!(h.ocr.call_count(), 0);
    assert_eq!(h.solver.call_count(), 0);
    assert_eq!(h.tutor.call_count(), 0);
    assert_eq!(h.verifier.call_count(), 0);

    // 软停本身要留痕
    let state = h.orchestrator.get_state(&session_id).unwrap();
    assert_eq!(state.last_events[0].event_type, "budget_blocked");
}

#[tokio::test]
async fn test_unknown_session_is_terminal_without_side_effects() {
    let h = default_harness();

    let response = h
        .orchestrator
        .ingest("missing000000", &help_request("p", "w"))
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::Error);
    assert!(response.flags.contains(&"session_not_found".to_string()));
    assert_eq!(h.ocr.call_count(), 0);
    assert_eq!(h.solver.call_count(), 0);
    assert!(h
        .orchestrator
        .storage()
        .get_recent_events("missing000000", 10)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_guard_sanitizes_leaky_tutor_draft() {
    let h = harness(
        ScriptedSolver::new(scripted_solver_result(Some("sign_convention"), 0.0)),
        ScriptedTutor::new(scripted_tutor_result("Final answer: x = 42", 0.9)),
        ScriptedVerifier::new(scripted_verifier_result(0.0)),
    );
    let session_id = create_session(&h.orchestrator);

    let response = h
        .orchestrator
        .ingest(&session_id, &help_request("Solve for x.", "x?"))
        .await
        .unwrap();

    assert!(!response.tutor_message.contains("x = 42"));
    assert!(response
        .flags
        .contains(&"hint_sanitized_by_guard".to_string()));
    assert!(response
        .flags
        .contains(&"leakage_penalty_applied".to_string()));
}

#[tokio::test]
async fn test_hidden_score_never_in_visible_response() {
    let h = default_harness();
    let session_id = create_session(&h.orchestrator);

    let response = h
        .orchestrator
        .ingest(&session_id, &help_request("p", "w"))
        .await
        .unwrap();

    let visible = serde_json::to_value(&response).unwrap();
    let rendered = visible.to_string();
    assert!(!rendered.contains("hidden_score"));
    assert!(!rendered.contains("competency_credit"));

    // 隐藏通道只进落盘审计
    let state = h.orchestrator.get_state(&session_id).unwrap();
    let completed = state
        .last_events
        .iter()
        .find(|e| e.event_type == "pipeline_completed")
        .unwrap();
    assert!(completed.payload.get("hidden_score").is_some());
}

#[tokio::test]
async fn test_get_state_is_idempotent_between_ingests() {
    let h = default_harness();
    let session_id = create_session(&h.orchestrator);
    h.orchestrator
        .ingest(&session_id, &help_request("p", "w"))
        .await
        .unwrap();

    let first = serde_json::to_value(h.orchestrator.get_state(&session_id).unwrap()).unwrap();
    let second = serde_json::to_value(h.orchestrator.get_state(&session_id).unwrap()).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_setpoints_stay_bounded_and_drift_capped() {
    let h = harness(
        ScriptedSolver::new(scripted_solver_result(Some("sign_convention"), 0.0)),
        ScriptedTutor::new(scripted_tutor_result("Final answer: x = 42", 0.9)),
        ScriptedVerifier::new(scripted_verifier_result(1.0)),
    );
    let session_id = create_session(&h.orchestrator);
    let before = h.orchestrator.get_state(&session_id).unwrap().setpoints;

    for _ in 0..3 {
        h.orchestrator
            .ingest(&session_id, &help_request("p", "w"))
            .await
            .unwrap();
    }

    let after = h.orchestrator.get_state(&session_id).unwrap().setpoints;
    for (key, value) in &after {
        assert!((0.0..=1.0).contains(value), "{key}={value}");
        // 新会话逐次更新，单次漂移上限 0.05，三轮不超过 0.15
        let start = before.get(key).copied().unwrap_or(0.5);
        assert!(
            (value - start).abs() <= 0.15 + 1e-9,
            "{key} drifted {start} -> {value}"
        );
    }
}

#[tokio::test]
async fn test_short_pause_recorded_as_context_switch() {
    let h = default_harness();
    let session_id = create_session(&h.orchestrator);

    let request = IngestEventRequest {
        trigger_type: TriggerType::Pause,
        problem_text: Some("p".to_string()),
        idle_seconds: Some(10.0),
        user_message: Some("thinking".to_string()),
        ..Default::default()
    };
    h.orchestrator.ingest(&session_id, &request).await.unwrap();

    let state = h.orchestrator.get_state(&session_id).unwrap();
    let received = state
        .last_events
        .iter()
        .find(|e| e.event_type == "ingest_received")
        .unwrap();
    assert_eq!(received.payload["trigger_type"], "CONTEXT_SWITCH");
}

#[tokio::test]
async fn test_stage_costs_land_in_ledger() {
    let h = harness(
        ScriptedSolver::new(scripted_solver_result(None, 0.25)),
        ScriptedTutor::new(scripted_tutor_result("Check units.", 0.7)),
        ScriptedVerifier::new(scripted_verifier_result(0.0)),
    );
    let session_id = create_session(&h.orchestrator);

    h.orchestrator
        .ingest(&session_id, &help_request("p", "w"))
        .await
        .unwrap();

    let state = h.orchestrator.get_state(&session_id).unwrap();
    assert!((state.budget_snapshot.session_spent_usd - 0.25).abs() < 1e-9);
    assert!((state.budget_snapshot.monthly_spent_usd - 0.25).abs() < 1e-9);
}
