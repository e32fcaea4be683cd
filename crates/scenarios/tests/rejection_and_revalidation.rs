//! Scenario 2: a rejected round blocks promotion; a
//! subsequent approved round promotes without touching round-1.

use edison_core::domain::{QaState, TaskState};
use edison_core::error::EdisonError;
use edison_core::identifiers::{SessionId, TaskId};
use edison_core::validator::{default_wave_order, Scope};
use orchestrator::Workflow;
use scenarios::{fake_validator, seed_required_evidence};
use tempfile::TempDir;

#[tokio::test]
async fn rejection_then_revalidation_promotes_without_mutating_round_one() {
    let dir = TempDir::new().unwrap();
    let wf = Workflow::new(dir.path(), ".project").unwrap();

    let task_id = TaskId::parse("T-001").unwrap();
    let session_id = SessionId::parse("S-1").unwrap();

    wf.task_create(task_id.clone(), "x".to_string(), edison_core::domain::TaskKind::Chore)
        .await
        .unwrap();
    wf.qa_new(task_id.clone()).await.unwrap();
    wf.task_claim(&task_id, &session_id).await.unwrap();

    let round_dir = dir
        .path()
        .join(".project/qa/validation-reports")
        .join(task_id.as_str())
        .join("round-1");
    seed_required_evidence(&round_dir).await;
    wf.task_ready(&task_id, Some(&session_id)).await.unwrap();

    let rejecting = vec![fake_validator("always-run", "critical", "reject")];
    let (qa, _, approval) = wf
        .qa_validate(&task_id, Scope::Task, &rejecting, &default_wave_order(), 2)
        .await
        .unwrap();
    assert_eq!(qa.state, QaState::Done);
    assert!(!approval.approved);

    let err = wf.task_promote(&task_id).await.unwrap_err();
    assert!(matches!(err, EdisonError::Transition(_)));

    let round_one_report = tokio::fs::read_to_string(round_dir.join("always-run-report.json"))
        .await
        .unwrap();

    wf.qa_promote(&task_id, QaState::Wip).await.unwrap();

    let round2_dir = dir
        .path()
        .join(".project/qa/validation-reports")
        .join(task_id.as_str())
        .join("round-2");
    seed_required_evidence(&round2_dir).await;

    let approving = vec![fake_validator("always-run", "critical", "approve")];
    let (qa, _, approval) = wf
        .qa_validate(&task_id, Scope::Task, &approving, &default_wave_order(), 2)
        .await
        .unwrap();
    assert_eq!(qa.state, QaState::Done);
    assert!(approval.approved);

    wf.qa_promote(&task_id, QaState::Validated).await.unwrap();
    let task = wf.task_promote(&task_id).await.unwrap();
    assert_eq!(task.state, TaskState::Validated);

    let round_one_report_after = tokio::fs::read_to_string(round_dir.join("always-run-report.json"))
        .await
        .unwrap();
    assert_eq!(round_one_report, round_one_report_after);
}
