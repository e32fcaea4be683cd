//! Scenario 5: two concurrent claims on the same task; only
//! one commits, the other observes a stale/guard failure, and history
//! records exactly one `todo -> wip` entry.

use std::sync::Arc;

use edison_core::domain::{TaskKind, TaskState};
use edison_core::identifiers::{SessionId, TaskId};
use orchestrator::Workflow;
use tempfile::TempDir;

#[tokio::test]
async fn exactly_one_concurrent_claim_succeeds() {
    let dir = TempDir::new().unwrap();
    let wf = Arc::new(Workflow::new(dir.path(), ".project").unwrap());

    let task_id = TaskId::parse("T-001").unwrap();
    wf.task_create(task_id.clone(), "x".to_string(), TaskKind::Chore)
        .await
        .unwrap();

    let session_a = SessionId::parse("S-A").unwrap();
    let session_b = SessionId::parse("S-B").unwrap();

    let (wf1, id1) = (Arc::clone(&wf), task_id.clone());
    let (wf2, id2) = (Arc::clone(&wf), task_id.clone());

    let handle_a = tokio::spawn(async move { wf1.task_claim(&id1, &session_a).await });
    let handle_b = tokio::spawn(async move { wf2.task_claim(&id2, &session_b).await });

    let (result_a, result_b) = tokio::join!(handle_a, handle_b);
    let outcomes = [result_a.unwrap(), result_b.unwrap()];

    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);

    let task_repo_root = dir.path().join(".project/tasks");
    let task_repo = edison_core::repository::FileRepository::<edison_core::domain::Task>::new(task_repo_root);
    let task = task_repo.get(&task_id).await.unwrap();
    assert_eq!(task.state, TaskState::Wip);

    let wip_entries = task
        .state_history
        .iter()
        .filter(|entry| entry.to_state == "wip")
        .count();
    assert_eq!(wip_entries, 1);
}
