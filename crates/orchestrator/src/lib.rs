//! Workflow facade: the durable operations
//! callers invoke, composing `edison_core`'s repository, state machine,
//! rules, evidence, and validator modules.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use edison_core::domain::{
    CompletionPolicy, QaRecord, QaState, Session, SessionState, Task, TaskKind, TaskState,
};
use edison_core::error::EdisonError;
use edison_core::handlers::{Context, HandlerRegistry, MutableContext};
use edison_core::identifiers::{QaId, SessionId, TaskId};
use edison_core::repository::FileRepository;
use edison_core::rules::{self, EntitySnapshot, RecommendationReport};
use edison_core::state_machine::transition;
use edison_core::validator::{self, Scope, ValidatorDef, ValidatorOutcome, WaveSpec};
use edison_core::{config::Config, defaults, evidence};
use edison_core::evidence::BundleApproval;

/// Paths and pre-built repositories/registries for one project root. Built
/// once per process: handler registries load once at startup and are
/// immutable thereafter.
pub struct Workflow {
    project_root: PathBuf,
    pm_root: PathBuf,
    evidence_root: PathBuf,
    task_repo: FileRepository<Task>,
    qa_repo: FileRepository<QaRecord>,
    session_repo: FileRepository<Session>,
    registry: HandlerRegistry,
    config: Option<Config>,
}

impl Workflow {
    /// Builds a facade rooted at `<project_root>/<pm_dir>` (`pm_dir`
    /// defaults to `.project`, configurable).
    ///
    /// # Errors
    /// Propagates [`HandlerError`](edison_core::error::HandlerError) if
    /// built-in handler registration collides (a packaging bug, not a
    /// runtime condition).
    pub fn new(project_root: &Path, pm_dir: &str) -> Result<Self, EdisonError> {
        let pm_root = project_root.join(pm_dir);
        let mut registry = HandlerRegistry::new();
        edison_core::handlers::register_builtins(&mut registry)?;

        Ok(Self {
            project_root: project_root.to_path_buf(),
            evidence_root: pm_root.join("qa").join("validation-reports"),
            task_repo: FileRepository::new(pm_root.join("tasks")),
            qa_repo: FileRepository::new(pm_root.join("qa")),
            session_repo: FileRepository::new(pm_root.join("sessions")),
            pm_root,
            registry,
            config: None,
        })
    }

    /// Attaches a loaded configuration (for config-gated actions in
    /// transitions); optional, defaults to none.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    fn round_dir(&self, task_id: &TaskId, round: u32) -> PathBuf {
        evidence::round_dir(&self.evidence_root, task_id.as_str(), round)
    }

    /// `task.create(spec)`: generates the entity in `todo` with its initial
    /// history entry.
    #[tracing::instrument(skip(self), fields(task_id = %id))]
    pub async fn task_create(&self, id: TaskId, title: String, kind: TaskKind) -> Result<Task, EdisonError> {
        let task = Task::new(id, title, kind);
        self.task_repo.save(&task).await?;
        Ok(task)
    }

    /// Computes the `unmet_dependencies` context entry for `task` by
    /// resolving each `depends_on` id; a dependency this repository cannot
    /// load counts as unmet (fail-closed).
    async fn unmet_dependencies(&self, task: &Task) -> Vec<String> {
        let mut unmet = Vec::new();
        for dep in &task.depends_on {
            match self.task_repo.get(dep).await {
                Ok(dep_task) if dep_task.state == TaskState::Validated => {}
                _ => unmet.push(dep.to_string()),
            }
        }
        unmet
    }

    /// `task.claim(id, session)`: `todo -> wip`, linking the task
    /// to `session`.
    #[tracing::instrument(skip(self), fields(task_id = %id, session_id = %session))]
    pub async fn task_claim(&self, id: &TaskId, session: &SessionId) -> Result<Task, EdisonError> {
        let mut task = self.task_repo.get(id).await?;
        let unmet = self.unmet_dependencies(&task).await;

        let mut ctx = Context::new();
        ctx.insert("unmet_dependencies".into(), serde_json::json!(unmet));
        let mut mutctx = MutableContext::new();

        task.metadata.session_id = Some(session.clone());

        transition(
            defaults::task_spec(),
            &self.registry,
            &self.task_repo,
            &mut task,
            TaskState::Wip,
            &ctx,
            &mut mutctx,
            self.config.as_ref(),
            None,
        )
        .await?;

        Ok(task)
    }

    /// `task.ready(id, session)`: `wip -> done`, guarded by
    /// `can_finish_task` (implementation report plus required evidence
    /// present in the task's current round).
    #[tracing::instrument(skip(self), fields(task_id = %id))]
    pub async fn task_ready(&self, id: &TaskId, session: Option<&SessionId>) -> Result<Task, EdisonError> {
        let mut task = self.task_repo.get(id).await?;
        if task.requires_session_credential(session) {
            return Err(EdisonError::Repository(edison_core::error::RepositoryError::InvariantViolation {
                kind: "task",
                id: id.to_string(),
                detail: "task is owned by a different session".to_string(),
            }));
        }

        let round = self.current_round(id).await.max(1);
        let round_dir = self.round_dir(id, round);
        let has_implementation_report =
            tokio::fs::metadata(round_dir.join("implementation-report.md"))
                .await
                .is_ok_and(|m| m.len() > 0);
        let has_required_evidence = evidence::check_required_evidence(
            &round_dir,
            None,
            evidence::DEFAULT_REQUIRED_EVIDENCE,
            id.as_str(),
            round,
        )
        .await
        .is_ok();

        let mut ctx = Context::new();
        ctx.insert("has_implementation_report".into(), serde_json::json!(has_implementation_report));
        ctx.insert("has_required_evidence".into(), serde_json::json!(has_required_evidence));
        ctx.insert(
            "all_work_complete".into(),
            serde_json::json!(has_implementation_report && has_required_evidence),
        );
        let mut mutctx = MutableContext::new();

        transition(
            defaults::task_spec(),
            &self.registry,
            &self.task_repo,
            &mut task,
            TaskState::Done,
            &ctx,
            &mut mutctx,
            self.config.as_ref(),
            None,
        )
        .await?;

        Ok(task)
    }

    async fn current_round(&self, task_id: &TaskId) -> u32 {
        let qa_id = QaId::for_task(task_id);
        self.qa_repo
            .get(&qa_id)
            .await
            .map_or(0, |qa| qa.current_round)
    }

    /// `task.link(from, to)`: adds `to` as a `depends_on` entry on `from`,
    /// rejecting the edge without writing anything if it would close a
    /// dependency cycle.
    #[tracing::instrument(skip(self), fields(from = %from, to = %to))]
    pub async fn task_link(&self, from: &TaskId, to: &TaskId) -> Result<Task, EdisonError> {
        let all_tasks = self.task_repo.list(None, |_| true).await?;
        let edges: Vec<(TaskId, TaskId)> = all_tasks
            .iter()
            .flat_map(|t| t.depends_on.iter().map(|dep| (t.id.clone(), dep.clone())))
            .collect();

        if edison_core::dag::would_cycle(edges.iter().map(|(a, b)| (a, b)), from, to) {
            return Err(EdisonError::Repository(edison_core::error::RepositoryError::InvariantViolation {
                kind: "depends_on",
                id: from.to_string(),
                detail: format!("linking to '{to}' would introduce a dependency cycle"),
            }));
        }

        let mut task = self.task_repo.get(from).await?;
        task.depends_on.insert(to.clone());
        self.task_repo.save(&task).await?;
        Ok(task)
    }

    /// `task.promote(id)`: `done -> validated`, gated by the bundle approval
    /// marker for the task's current round.
    #[tracing::instrument(skip(self), fields(task_id = %id))]
    pub async fn task_promote(&self, id: &TaskId) -> Result<Task, EdisonError> {
        let mut task = self.task_repo.get(id).await?;
        let round = self.current_round(id).await.max(1);
        let round_dir = self.round_dir(id, round);
        let approved = evidence::read_bundle_approval(&round_dir)
            .await
            .is_some_and(|a| a.approved);

        let mut ctx = Context::new();
        ctx.insert("bundle_approved".into(), serde_json::json!(approved));
        let mut mutctx = MutableContext::new();

        transition(
            defaults::task_spec(),
            &self.registry,
            &self.task_repo,
            &mut task,
            TaskState::Validated,
            &ctx,
            &mut mutctx,
            self.config.as_ref(),
            None,
        )
        .await?;

        Ok(task)
    }

    /// `qa.new(task_id)`: creates the QA record in `waiting`.
    #[tracing::instrument(skip(self), fields(task_id = %task_id))]
    pub async fn qa_new(&self, task_id: TaskId) -> Result<QaRecord, EdisonError> {
        let qa = QaRecord::new(task_id);
        self.qa_repo.save(&qa).await?;
        Ok(qa)
    }

    async fn advance_qa_to_wip(&self, qa: &mut QaRecord, task: &Task) -> Result<(), EdisonError> {
        if qa.state == QaState::Waiting {
            let mut ctx = Context::new();
            ctx.insert("task_ready_for_qa".into(), serde_json::json!(task.state == TaskState::Done));
            let mut mutctx = MutableContext::new();
            transition(
                defaults::qa_spec(),
                &self.registry,
                &self.qa_repo,
                qa,
                QaState::Todo,
                &ctx,
                &mut mutctx,
                self.config.as_ref(),
                None,
            )
            .await?;
        }
        if qa.state == QaState::Todo {
            let ctx = Context::new();
            let mut mutctx = MutableContext::new();
            transition(
                defaults::qa_spec(),
                &self.registry,
                &self.qa_repo,
                qa,
                QaState::Wip,
                &ctx,
                &mut mutctx,
                self.config.as_ref(),
                None,
            )
            .await?;
        }
        Ok(())
    }

    /// Collects `scope`'s member tasks and their changed files, runs the
    /// validator scheduler against `validators`, advances the QA record
    /// through `todo -> wip -> done`, and writes the bundle approval marker
    /// — every member approved when all of its blocking validators approve.
    #[tracing::instrument(skip(self, validators), fields(task_id = %task_id))]
    pub async fn qa_validate(
        &self,
        task_id: &TaskId,
        scope: Scope,
        validators: &[ValidatorDef],
        wave_order: &[WaveSpec],
        concurrency: usize,
    ) -> Result<(QaRecord, Vec<ValidatorOutcome>, BundleApproval), EdisonError> {
        let task = self.task_repo.get(task_id).await?;
        let mut qa = self.qa_repo.get(&QaId::for_task(task_id)).await?;
        self.advance_qa_to_wip(&mut qa, &task).await?;

        let previous_round = qa.current_round;
        let round = qa.open_next_round();
        let round_dir = evidence::prepare_round(&self.evidence_root, task_id.as_str(), previous_round, round).await?;

        let all_tasks = self.task_repo.list(None, |_| true).await?;
        let members = validator::collect_member_tasks(scope, task_id, &all_tasks);

        let base_ref = self
            .config
            .as_ref()
            .and_then(|c| c.domain::<String>("orchestration.changed_files_base_ref").ok().flatten())
            .unwrap_or_else(|| "HEAD".to_string());
        // A missing/non-git project root is not fatal: the roster still
        // runs on always-run validators, it just can't also trigger on
        // path globs.
        let changed_files = validator::collect_changed_files(&self.project_root, &base_ref)
            .await
            .unwrap_or_default();

        let roster = validator::assemble_roster(validators, &changed_files, &[]);
        let grouped = validator::group_by_wave(&roster, wave_order);
        let outcomes = validator::run_all_waves(&round_dir, task_id.as_str(), round, &grouped, wave_order, concurrency).await;

        // An empty validator roster does not approve by default; opt into
        // vacuous approval via `orchestration.allow_empty_validator_approval`.
        let allow_empty = self
            .config
            .as_ref()
            .and_then(|c| c.domain::<bool>("orchestration.allow_empty_validator_approval").ok().flatten())
            .unwrap_or(false);
        let per_task: Vec<(String, Vec<ValidatorOutcome>, u32)> = if outcomes.is_empty() {
            Vec::new()
        } else {
            members.iter().map(|m| (m.id.to_string(), outcomes.clone(), round)).collect()
        };
        let approval = validator::compute_bundle_approval(round_dir.join("manifest.json"), &per_task, allow_empty);

        if !evidence::is_round_closed(&round_dir).await {
            evidence::write_bundle_approval(&round_dir, &approval).await?;
        }

        let mut ctx = Context::new();
        ctx.insert("has_validator_reports".into(), serde_json::json!(!outcomes.is_empty()));
        ctx.insert("validator_reports".into(), serde_json::json!(outcomes.iter().map(|o| o.id.clone()).collect::<Vec<_>>()));
        ctx.insert(
            "has_required_evidence".into(),
            serde_json::json!(evidence::check_required_evidence(&round_dir, None, evidence::DEFAULT_REQUIRED_EVIDENCE, task_id.as_str(), round).await.is_ok()),
        );
        let mut mutctx = MutableContext::new();

        transition(
            defaults::qa_spec(),
            &self.registry,
            &self.qa_repo,
            &mut qa,
            QaState::Done,
            &ctx,
            &mut mutctx,
            self.config.as_ref(),
            None,
        )
        .await?;

        self.qa_repo.save(&qa).await?;

        Ok((qa, outcomes, approval))
    }

    /// `qa.promote(task_id, to_state)`: promotes to `validated` when the
    /// bundle approval marker approves, or reopens to `wip` on rejection.
    #[tracing::instrument(skip(self), fields(task_id = %task_id))]
    pub async fn qa_promote(&self, task_id: &TaskId, to: QaState) -> Result<QaRecord, EdisonError> {
        let mut qa = self.qa_repo.get(&QaId::for_task(task_id)).await?;
        let round_dir = self.round_dir(task_id, qa.current_round.max(1));
        let approval = evidence::read_bundle_approval(&round_dir).await;

        let mut ctx = Context::new();
        ctx.insert("bundle_approved".into(), serde_json::json!(approval.as_ref().is_some_and(|a| a.approved)));
        ctx.insert("verdict".into(), serde_json::json!(if approval.as_ref().is_some_and(|a| a.approved) { "approve" } else { "reject" }));
        let mut mutctx = MutableContext::new();

        transition(
            defaults::qa_spec(),
            &self.registry,
            &self.qa_repo,
            &mut qa,
            to,
            &ctx,
            &mut mutctx,
            self.config.as_ref(),
            None,
        )
        .await?;

        Ok(qa)
    }

    /// `session.next(session_id, scope, limit)`: delegates to the rules engine over
    /// every task/QA owned by the session.
    #[tracing::instrument(skip(self), fields(session_id = %session_id))]
    pub async fn session_next(&self, session_id: &SessionId, limit: usize) -> Result<RecommendationReport, EdisonError> {
        let tasks = self
            .task_repo
            .list(None, |t| t.metadata.session_id.as_ref() == Some(session_id))
            .await?;

        let mut snapshots = Vec::with_capacity(tasks.len());
        let mut contexts = Vec::with_capacity(tasks.len());
        for task in &tasks {
            let unmet = self.unmet_dependencies(task).await;
            let mut ctx = Context::new();
            ctx.insert("unmet_dependencies".into(), serde_json::json!(unmet));
            ctx.insert("has_blockers".into(), serde_json::json!(false));
            contexts.push((task.id.to_string(), task.state.to_string(), ctx));
        }

        for (id, state, ctx) in &contexts {
            snapshots.push(EntitySnapshot {
                kind: "task",
                id: id.clone(),
                state: state.clone(),
                spec: defaults::task_spec(),
                context: ctx.clone(),
            });
        }

        let all_validated = !tasks.is_empty() && tasks.iter().all(|t| t.state == TaskState::Validated);
        let all_done_or_better =
            tasks.iter().all(|t| matches!(t.state, TaskState::Done | TaskState::Validated));

        let report = rules::recommend(
            session_id.as_str(),
            CompletionPolicy::ParentValidatedChildrenDone,
            all_validated,
            Vec::new(),
            &self.registry,
            &snapshots,
            0,
            limit,
        );
        let _ = all_done_or_better;
        Ok(report)
    }

    /// `session.close(session_id)`: composes the completion check (default
    /// `parent_validated_children_done` policy) with the `active -> closing`
    /// transition.
    #[tracing::instrument(skip(self), fields(session_id = %session_id))]
    pub async fn session_close(&self, session_id: &SessionId) -> Result<Session, EdisonError> {
        let mut session = self.session_repo.get(session_id).await?;
        let tasks = self
            .task_repo
            .list(None, |t| t.metadata.session_id.as_ref() == Some(session_id))
            .await?;

        let all_work_complete = tasks.iter().all(|t| matches!(t.state, TaskState::Done | TaskState::Validated));
        let has_pending_commits = false;

        let mut ctx = Context::new();
        ctx.insert("all_work_complete".into(), serde_json::json!(all_work_complete));
        ctx.insert("has_pending_commits".into(), serde_json::json!(has_pending_commits));
        ctx.insert("session_blockers".into(), serde_json::json!([]));
        let mut mutctx = MutableContext::new();

        transition(
            defaults::session_spec(),
            &self.registry,
            &self.session_repo,
            &mut session,
            SessionState::Closing,
            &ctx,
            &mut mutctx,
            self.config.as_ref(),
            None,
        )
        .await?;

        Ok(session)
    }

    /// `session.create`: not one of the facade's headline operations but
    /// required for every other operation in a fresh project; mirrors
    /// `task_create`'s shape.
    #[tracing::instrument(skip(self), fields(session_id = %id))]
    pub async fn session_create(&self, id: SessionId, owner: Option<String>) -> Result<Session, EdisonError> {
        let session = Session::new(id, owner);
        self.session_repo.save(&session).await?;
        Ok(session)
    }

    #[must_use]
    pub fn pm_root(&self) -> &Path {
        &self.pm_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workflow(dir: &TempDir) -> Workflow {
        Workflow::new(dir.path(), ".project").unwrap()
    }

    #[tokio::test]
    async fn task_create_then_claim_moves_to_wip() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        let id = TaskId::parse("T-001").unwrap();
        wf.task_create(id.clone(), "add login".into(), TaskKind::Feature).await.unwrap();

        let session_id = SessionId::parse("S-1").unwrap();
        let task = wf.task_claim(&id, &session_id).await.unwrap();
        assert_eq!(task.state, TaskState::Wip);
        assert_eq!(task.metadata.session_id, Some(session_id));
    }

    #[tokio::test]
    async fn claim_is_blocked_by_unmet_dependencies() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        let dep = TaskId::parse("T-000").unwrap();
        wf.task_create(dep.clone(), "dep".into(), TaskKind::Chore).await.unwrap();

        let id = TaskId::parse("T-001").unwrap();
        let mut task = Task::new(id.clone(), "add login".into(), TaskKind::Feature);
        task.depends_on.insert(dep);
        wf.task_repo.save(&task).await.unwrap();

        let session_id = SessionId::parse("S-1").unwrap();
        let err = wf.task_claim(&id, &session_id).await.unwrap_err();
        assert!(matches!(err, EdisonError::Transition(_)));
    }

    #[tokio::test]
    async fn ready_requires_evidence_and_report() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        let id = TaskId::parse("T-001").unwrap();
        wf.task_create(id.clone(), "x".into(), TaskKind::Chore).await.unwrap();
        let session_id = SessionId::parse("S-1").unwrap();
        wf.task_claim(&id, &session_id).await.unwrap();

        let err = wf.task_ready(&id, Some(&session_id)).await.unwrap_err();
        assert!(matches!(err, EdisonError::Transition(_)));

        let round_dir = wf.round_dir(&id, 1);
        tokio::fs::create_dir_all(&round_dir).await.unwrap();
        tokio::fs::write(round_dir.join("implementation-report.md"), b"done").await.unwrap();
        for name in evidence::DEFAULT_REQUIRED_EVIDENCE {
            tokio::fs::write(round_dir.join(name), b"ok").await.unwrap();
        }

        let task = wf.task_ready(&id, Some(&session_id)).await.unwrap();
        assert_eq!(task.state, TaskState::Done);
    }

    #[tokio::test]
    async fn full_lifecycle_through_qa_and_promotion() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        let id = TaskId::parse("T-001").unwrap();
        wf.task_create(id.clone(), "x".into(), TaskKind::Chore).await.unwrap();
        wf.qa_new(id.clone()).await.unwrap();

        let session_id = SessionId::parse("S-1").unwrap();
        wf.task_claim(&id, &session_id).await.unwrap();

        let round_dir = wf.round_dir(&id, 1);
        tokio::fs::create_dir_all(&round_dir).await.unwrap();
        tokio::fs::write(round_dir.join("implementation-report.md"), b"done").await.unwrap();
        for name in evidence::DEFAULT_REQUIRED_EVIDENCE {
            tokio::fs::write(round_dir.join(name), b"ok").await.unwrap();
        }
        wf.task_ready(&id, Some(&session_id)).await.unwrap();

        let report_script = concat!(
            "cat > lint-report.json <<'EOF'\n",
            "{\"validator\":\"lint\",\"task_id\":\"T-001\",\"round\":1,",
            "\"timestamp\":\"2026-01-01T00:00:00Z\",\"status\":\"approve\",",
            "\"model\":null,\"continuation_id\":null,\"issues\":[],",
            "\"summary\":\"ok\",\"metrics\":{},",
            "\"tracking\":{\"process_id\":null,\"started_at\":\"2026-01-01T00:00:00Z\",\"completed_at\":null}}\n",
            "EOF\n",
        );
        let validators = vec![ValidatorDef {
            id: "lint".to_string(),
            wave: "critical".to_string(),
            blocking: true,
            always_run: true,
            trigger_globs: Vec::new(),
            engine: edison_core::validator::Engine::Cli {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), report_script.to_string()],
            },
            fallback_engine: None,
            prompt_template: String::new(),
            context7_packages: Vec::new(),
            timeout: std::time::Duration::from_secs(5),
        }];
        let (qa, outcomes, approval) = wf
            .qa_validate(&id, Scope::Task, &validators, &validator::default_wave_order(), 4)
            .await
            .unwrap();
        assert_eq!(qa.state, QaState::Done);
        assert_eq!(outcomes.len(), 1);
        assert!(approval.approved);

        let qa = wf.qa_promote(&id, QaState::Validated).await.unwrap();
        assert_eq!(qa.state, QaState::Validated);

        let task = wf.task_promote(&id).await.unwrap();
        assert_eq!(task.state, TaskState::Validated);
    }

    #[tokio::test]
    async fn session_next_recommends_claim_for_unclaimed_task() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        let session_id = SessionId::parse("S-1").unwrap();
        wf.session_create(session_id.clone(), None).await.unwrap();

        let id = TaskId::parse("T-001").unwrap();
        let mut task = Task::new(id, "x".into(), TaskKind::Chore);
        task.metadata.session_id = Some(session_id.clone());
        wf.task_repo.save(&task).await.unwrap();

        let report = wf.session_next(&session_id, 0).await.unwrap();
        assert!(!report.actions.is_empty());
    }

    #[tokio::test]
    async fn task_link_rejects_cycle_without_mutating_either_task() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        let a = TaskId::parse("T-A").unwrap();
        let b = TaskId::parse("T-B").unwrap();
        wf.task_create(a.clone(), "a".into(), TaskKind::Chore).await.unwrap();
        wf.task_create(b.clone(), "b".into(), TaskKind::Chore).await.unwrap();

        wf.task_link(&a, &b).await.unwrap();

        let err = wf.task_link(&b, &a).await.unwrap_err();
        assert!(matches!(err, EdisonError::Repository(_)));

        let task_a = wf.task_repo.get(&a).await.unwrap();
        let task_b = wf.task_repo.get(&b).await.unwrap();
        assert!(task_a.depends_on.contains(&b));
        assert!(!task_b.depends_on.contains(&a));
    }

    #[tokio::test]
    async fn session_close_requires_all_work_complete() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        let session_id = SessionId::parse("S-1").unwrap();
        wf.session_create(session_id.clone(), None).await.unwrap();

        let id = TaskId::parse("T-001").unwrap();
        let mut task = Task::new(id, "x".into(), TaskKind::Chore);
        task.metadata.session_id = Some(session_id.clone());
        wf.task_repo.save(&task).await.unwrap();

        let err = wf.session_close(&session_id).await.unwrap_err();
        assert!(matches!(err, EdisonError::Transition(_)));
    }
}
