//! Scenario 1: happy-path task lifecycle end to end.

use edison_core::domain::{QaState, TaskKind, TaskState};
use edison_core::identifiers::{SessionId, TaskId};
use edison_core::validator::{default_wave_order, Scope};
use orchestrator::Workflow;
use scenarios::{fake_validator, seed_required_evidence};
use tempfile::TempDir;

#[tokio::test]
async fn happy_path_task_lifecycle() {
    let dir = TempDir::new().unwrap();
    let wf = Workflow::new(dir.path(), ".project").unwrap();

    let task_id = TaskId::parse("T-001").unwrap();
    let session_id = SessionId::parse("S-1").unwrap();

    wf.task_create(task_id.clone(), "add-login".to_string(), TaskKind::Feature)
        .await
        .unwrap();
    wf.session_create(session_id.clone(), None).await.unwrap();
    wf.qa_new(task_id.clone()).await.unwrap();

    let task = wf.task_claim(&task_id, &session_id).await.unwrap();
    assert_eq!(task.state, TaskState::Wip);

    let round_dir = dir
        .path()
        .join(".project/qa/validation-reports")
        .join(task_id.as_str())
        .join("round-1");
    seed_required_evidence(&round_dir).await;

    let task = wf.task_ready(&task_id, Some(&session_id)).await.unwrap();
    assert_eq!(task.state, TaskState::Done);

    let validators = vec![fake_validator("always-run", "critical", "approve")];
    let (qa, outcomes, approval) = wf
        .qa_validate(&task_id, Scope::Task, &validators, &default_wave_order(), 2)
        .await
        .unwrap();
    assert_eq!(qa.state, QaState::Done);
    assert_eq!(outcomes.len(), 1);
    assert!(approval.approved);

    let qa = wf.qa_promote(&task_id, QaState::Validated).await.unwrap();
    assert_eq!(qa.state, QaState::Validated);

    let task = wf.task_promote(&task_id).await.unwrap();
    assert_eq!(task.state, TaskState::Validated);

    let session = wf.session_close(&session_id).await.unwrap();
    assert_eq!(session.state, edison_core::domain::SessionState::Closing);
}
