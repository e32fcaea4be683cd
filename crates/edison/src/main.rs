//! Edison CLI: a thin dispatcher over the `orchestrator` workflow facade.
//!
//! Exit codes follow : 0 success, 1 validation/guard/config
//! failure, 130 interrupted (Ctrl-C).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use edison_core::domain::{QaState, TaskKind};
use edison_core::identifiers::{SessionId, TaskId};
use orchestrator::Workflow;

#[derive(Parser)]
#[command(name = "edison", version, about = "Workflow orchestration engine for multi-agent task execution")]
struct Cli {
    /// Project root containing the `.project` state directory.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// State directory name under `--root`.
    #[arg(long, global = true, default_value = ".project")]
    pm_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Task lifecycle operations.
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// QA lifecycle operations.
    Qa {
        #[command(subcommand)]
        action: QaAction,
    },
    /// Session lifecycle and recommendations.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Creates a task in `todo`.
    Create {
        id: String,
        title: String,
        #[arg(long, value_enum, default_value = "feature")]
        kind: TaskKindArg,
    },
    /// Claims a task into `wip` under a session.
    Claim { id: String, #[arg(long)] session: String },
    /// Moves a claimed task to `done` once evidence is present.
    Ready { id: String, #[arg(long)] session: Option<String> },
    /// Promotes a `done` task to `validated` once its bundle is approved.
    Promote { id: String },
    /// Adds a `depends_on` edge; rejected if it would introduce a cycle.
    Link { from: String, to: String },
}

#[derive(Subcommand)]
enum QaAction {
    /// Creates the QA record for a task.
    New { task_id: String },
    /// Runs the validator roster for a task's current round.
    Validate {
        task_id: String,
        #[arg(long, value_enum, default_value = "task")]
        scope: ScopeArg,
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },
    /// Promotes or reopens QA based on the bundle approval marker.
    Promote {
        task_id: String,
        #[arg(long, value_enum, default_value = "validated")]
        to: QaStateArg,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Creates a new session.
    Create { id: String, #[arg(long)] owner: Option<String> },
    /// Prints the next recommended actions for a session.
    Next { id: String, #[arg(long, default_value_t = 0)] limit: usize },
    /// Requests closing a session.
    Close { id: String },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum TaskKindArg {
    Feature,
    Bug,
    Chore,
}

impl From<TaskKindArg> for TaskKind {
    fn from(value: TaskKindArg) -> Self {
        match value {
            TaskKindArg::Feature => Self::Feature,
            TaskKindArg::Bug => Self::Bug,
            TaskKindArg::Chore => Self::Chore,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum QaStateArg {
    Wip,
    Validated,
}

impl From<QaStateArg> for QaState {
    fn from(value: QaStateArg) -> Self {
        match value {
            QaStateArg::Wip => Self::Wip,
            QaStateArg::Validated => Self::Validated,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ScopeArg {
    Task,
    Hierarchy,
    Bundle,
}

impl From<ScopeArg> for edison_core::validator::Scope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::Task => Self::Task,
            ScopeArg::Hierarchy => Self::Hierarchy,
            ScopeArg::Bundle => Self::Bundle,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("EDISON_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let wf = Workflow::new(&cli.root, &cli.pm_dir).context("initializing workflow facade")?;

    match cli.command {
        Command::Task { action } => run_task(&wf, action).await,
        Command::Qa { action } => run_qa(&wf, action).await,
        Command::Session { action } => run_session(&wf, action).await,
    }
}

async fn run_task(wf: &Workflow, action: TaskAction) -> anyhow::Result<()> {
    match action {
        TaskAction::Create { id, title, kind } => {
            let id = TaskId::parse(id)?;
            let task = wf.task_create(id, title, kind.into()).await?;
            print_json(&task)
        }
        TaskAction::Claim { id, session } => {
            let id = TaskId::parse(id)?;
            let session = SessionId::parse(session)?;
            let task = wf.task_claim(&id, &session).await?;
            print_json(&task)
        }
        TaskAction::Ready { id, session } => {
            let id = TaskId::parse(id)?;
            let session = session.map(SessionId::parse).transpose()?;
            let task = wf.task_ready(&id, session.as_ref()).await?;
            print_json(&task)
        }
        TaskAction::Promote { id } => {
            let id = TaskId::parse(id)?;
            let task = wf.task_promote(&id).await?;
            print_json(&task)
        }
        TaskAction::Link { from, to } => {
            let from = TaskId::parse(from)?;
            let to = TaskId::parse(to)?;
            let task = wf.task_link(&from, &to).await?;
            print_json(&task)
        }
    }
}

async fn run_qa(wf: &Workflow, action: QaAction) -> anyhow::Result<()> {
    match action {
        QaAction::New { task_id } => {
            let task_id = TaskId::parse(task_id)?;
            let qa = wf.qa_new(task_id).await?;
            print_json(&qa)
        }
        QaAction::Validate { task_id, scope, concurrency } => {
            let task_id = TaskId::parse(task_id)?;
            let wave_order = edison_core::validator::default_wave_order();
            let (qa, outcomes, approval) = wf
                .qa_validate(&task_id, scope.into(), &[], &wave_order, concurrency)
                .await?;
            print_json(&serde_json::json!({ "qa": qa, "outcomes": outcomes_to_json(&outcomes), "approval": approval }))
        }
        QaAction::Promote { task_id, to } => {
            let task_id = TaskId::parse(task_id)?;
            let qa = wf.qa_promote(&task_id, to.into()).await?;
            print_json(&qa)
        }
    }
}

async fn run_session(wf: &Workflow, action: SessionAction) -> anyhow::Result<()> {
    match action {
        SessionAction::Create { id, owner } => {
            let id = SessionId::parse(id)?;
            let session = wf.session_create(id, owner).await?;
            print_json(&session)
        }
        SessionAction::Next { id, limit } => {
            let id = SessionId::parse(id)?;
            let report = wf.session_next(&id, limit).await?;
            print_json(&report)
        }
        SessionAction::Close { id } => {
            let id = SessionId::parse(id)?;
            let session = wf.session_close(&id).await?;
            print_json(&session)
        }
    }
}

fn outcomes_to_json(outcomes: &[edison_core::validator::ValidatorOutcome]) -> serde_json::Value {
    serde_json::json!(outcomes
        .iter()
        .map(|o| serde_json::json!({ "id": o.id, "verdict": format!("{:?}", o.verdict), "note": o.note }))
        .collect::<Vec<_>>())
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
