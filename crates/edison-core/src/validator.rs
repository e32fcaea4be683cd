//! Validator scheduler: roster assembly,
//! wave-ordered parallel execution, fallback to delegation, bundle
//! approval computation.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;

use crate::domain::task::Task;
use crate::error::{EvidenceError, ValidatorError};
use crate::evidence::{run_git, BundleApproval, TaskApproval};
use crate::identifiers::TaskId;
use crate::io;

/// Verdict a validator reports, per the fixed report schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Approve,
    Reject,
    Blocked,
    Pending,
}

/// One finding inside a validator report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub severity: String,
    pub category: String,
    pub location: Option<String>,
    pub recommendation: Option<String>,
}

/// Process tracking metadata inside a validator report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tracking {
    pub process_id: Option<u32>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// `<round-dir>/<validator-id>-report.json`, the contract between the core
/// and validators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorReport {
    pub validator: String,
    pub task_id: String,
    pub round: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub status: Verdict,
    pub model: Option<String>,
    pub continuation_id: Option<String>,
    #[serde(default)]
    pub issues: Vec<Finding>,
    pub summary: String,
    #[serde(default)]
    pub metrics: serde_json::Value,
    pub tracking: Tracking,
}

/// How a validator's engine is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Engine {
    /// A CLI tool runnable as a child process (`command`).
    Cli { command: String, args: Vec<String> },
    /// Requires external orchestration; Edison only writes the delegation
    /// instructions and waits for a report to appear.
    Delegated,
}

/// A validator definition loaded from config.
#[derive(Debug, Clone)]
pub struct ValidatorDef {
    pub id: String,
    pub wave: String,
    pub blocking: bool,
    pub always_run: bool,
    pub trigger_globs: Vec<String>,
    pub engine: Engine,
    pub fallback_engine: Option<Engine>,
    pub prompt_template: String,
    pub context7_packages: Vec<String>,
    pub timeout: Duration,
}

/// Wave-level policy.
#[derive(Debug, Clone)]
pub struct WaveSpec {
    pub name: String,
    pub requires_previous_pass: bool,
    pub continue_on_fail: bool,
}

/// Default wave order.
#[must_use]
pub fn default_wave_order() -> Vec<WaveSpec> {
    vec![
        WaveSpec {
            name: "critical".to_string(),
            requires_previous_pass: false,
            continue_on_fail: true,
        },
        WaveSpec {
            name: "comprehensive".to_string(),
            requires_previous_pass: false,
            continue_on_fail: true,
        },
    ]
}

fn glob_matches(pattern: &str, path: &str) -> bool {
    // Minimal glob: `*` matches any run of non-separator characters.
    // Sufficient for trigger patterns like `src/**/*.rs`.
    let regex_src = regex::escape(pattern)
        .replace("\\*\\*", ".*")
        .replace("\\*", "[^/]*");
    regex::Regex::new(&format!("^{regex_src}$"))
        .is_ok_and(|re| re.is_match(path))
}

/// The breadth of a `qa.validate(task_id, scope)` call: which tasks count
/// as members for changed-file collection and bundle approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Only the named task.
    Task,
    /// The named task and every descendant reachable through `parent`.
    Hierarchy,
    /// Every task sharing the named task's `bundle_root` (the named task
    /// itself is included whether or not it is the root).
    Bundle,
}

/// Step 1 of roster assembly: collects the member tasks for `scope`,
/// rooted at `root`.
#[must_use]
pub fn collect_member_tasks<'a>(scope: Scope, root: &TaskId, all_tasks: &'a [Task]) -> Vec<&'a Task> {
    match scope {
        Scope::Task => all_tasks.iter().filter(|t| &t.id == root).collect(),
        Scope::Bundle => all_tasks
            .iter()
            .filter(|t| &t.id == root || t.bundle_root.as_ref() == Some(root))
            .collect(),
        Scope::Hierarchy => {
            let mut ids: BTreeSet<TaskId> = BTreeSet::new();
            ids.insert(root.clone());
            loop {
                let before = ids.len();
                for t in all_tasks {
                    if t.parent.as_ref().is_some_and(|p| ids.contains(p)) {
                        ids.insert(t.id.clone());
                    }
                }
                if ids.len() == before {
                    break;
                }
            }
            all_tasks.iter().filter(|t| ids.contains(&t.id)).collect()
        }
    }
}

/// Step 2 of roster assembly: the changed files across every member,
/// collected as a single `git diff --name-only` against `base_ref` (one
/// repository, so the diff is identical for every member of the same
/// bundle/hierarchy).
///
/// # Errors
/// Propagates `git diff` spawn/IO failures as [`EvidenceError`].
pub async fn collect_changed_files(repo_root: &Path, base_ref: &str) -> Result<Vec<String>, EvidenceError> {
    let output = run_git(repo_root, &["diff", "--name-only", base_ref]).await?;
    Ok(output.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect())
}

/// Assembles the roster of validators to run for a round (
/// step 3): always-run, or trigger-matched, or explicitly added.
#[must_use]
pub fn assemble_roster<'a>(
    definitions: &'a [ValidatorDef],
    changed_files: &[String],
    explicitly_added: &[String],
) -> Vec<&'a ValidatorDef> {
    definitions
        .iter()
        .filter(|def| {
            def.always_run
                || def
                    .trigger_globs
                    .iter()
                    .any(|glob| changed_files.iter().any(|f| glob_matches(glob, f)))
                || explicitly_added.contains(&def.id)
        })
        .collect()
}

/// Groups a roster by wave, preserving default wave order for waves with no
/// explicit `WaveSpec`.
#[must_use]
pub fn group_by_wave<'a>(
    roster: &[&'a ValidatorDef],
    wave_order: &[WaveSpec],
) -> Vec<(String, Vec<&'a ValidatorDef>)> {
    let mut out: Vec<(String, Vec<&ValidatorDef>)> =
        wave_order.iter().map(|w| (w.name.clone(), Vec::new())).collect();

    for def in roster {
        if let Some(entry) = out.iter_mut().find(|(name, _)| *name == def.wave) {
            entry.1.push(def);
        } else {
            out.push((def.wave.clone(), vec![def]));
        }
    }

    out.retain(|(_, defs)| !defs.is_empty());
    out
}

/// Result of running one validator.
#[derive(Debug, Clone)]
pub struct ValidatorOutcome {
    pub id: String,
    pub verdict: Verdict,
    /// Mirrors the originating [`ValidatorDef::blocking`]; bundle approval
    /// only requires blocking outcomes to approve.
    pub blocking: bool,
    pub note: Option<String>,
}

/// Checks the Context7 marker precondition: every declared
/// `context7_packages` entry must have a `context7-<pkg>.(txt|md)` file in
/// the round directory or snapshot, unless a signed bypass file is present.
pub async fn context7_preflight(round_dir: &Path, def: &ValidatorDef) -> Option<String> {
    for pkg in &def.context7_packages {
        let txt = round_dir.join(format!("context7-{pkg}.txt"));
        let md = round_dir.join(format!("context7-{pkg}.md"));
        let bypass = round_dir.join(format!("context7-{pkg}.bypass.json"));
        let has_marker = tokio::fs::try_exists(&txt).await.unwrap_or(false)
            || tokio::fs::try_exists(&md).await.unwrap_or(false);
        let has_bypass = tokio::fs::try_exists(&bypass).await.unwrap_or(false);
        if !has_marker && !has_bypass {
            return Some(format!("missing context7 marker for package '{pkg}'"));
        }
    }
    None
}

/// Checks whether `command` is available on `PATH`, for validator engine
/// availability probing.
#[must_use]
pub fn engine_available(command: &str) -> bool {
    which::which(command).is_ok()
}

/// Runs one executable validator as a child process, writing its report to
/// `<round_dir>/<id>-report.json`. Timeout maps to
/// [`ValidatorOutcome::Blocked`]
pub async fn run_executable(round_dir: &Path, _task_id: &str, _round: u32, def: &ValidatorDef) -> ValidatorOutcome {
    let Engine::Cli { command, args } = &def.engine else {
        return ValidatorOutcome {
            id: def.id.clone(),
            verdict: Verdict::Blocked,
            blocking: def.blocking,
            note: Some("validator has no CLI engine".to_string()),
        };
    };

    if let Some(reason) = context7_preflight(round_dir, def).await {
        return ValidatorOutcome {
            id: def.id.clone(),
            verdict: Verdict::Blocked,
            blocking: def.blocking,
            note: Some(reason),
        };
    }

    let spawn = Command::new(command)
        .args(args)
        .current_dir(round_dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    let mut child = match spawn {
        Ok(child) => child,
        Err(source) => {
            return ValidatorOutcome {
                id: def.id.clone(),
                verdict: Verdict::Blocked,
                blocking: def.blocking,
                note: Some(ValidatorError::Spawn { id: def.id.clone(), source }.to_string()),
            };
        }
    };

    let wait = timeout(def.timeout, child.wait()).await;
    match wait {
        Ok(Ok(status)) => {
            let report_path = round_dir.join(format!("{}-report.json", def.id));
            match io::read_json::<ValidatorReport>(&report_path).await {
                Ok(report) => ValidatorOutcome {
                    id: def.id.clone(),
                    verdict: report.status,
                    blocking: def.blocking,
                    note: None,
                },
                Err(_) if status.success() => ValidatorOutcome {
                    id: def.id.clone(),
                    verdict: Verdict::Blocked,
                    blocking: def.blocking,
                    note: Some("validator exited successfully but wrote no report".to_string()),
                },
                Err(_) => ValidatorOutcome {
                    id: def.id.clone(),
                    verdict: Verdict::Blocked,
                    blocking: def.blocking,
                    note: Some(format!("validator exited with {status}")),
                },
            }
        }
        Ok(Err(source)) => ValidatorOutcome {
            id: def.id.clone(),
            verdict: Verdict::Blocked,
            blocking: def.blocking,
            note: Some(source.to_string()),
        },
        Err(_) => {
            let _ = child.kill().await;
            let timeout_err = ValidatorError::Timeout { id: def.id.clone(), seconds: def.timeout.as_secs() };
            ValidatorOutcome {
                id: def.id.clone(),
                verdict: Verdict::Blocked,
                blocking: def.blocking,
                note: Some(timeout_err.to_string()),
            }
        }
    }
}

/// Writes `<round_dir>/delegation-<id>.md` for a validator whose engine
/// requires external orchestration; the validator remains `pending` until
/// its report appears.
pub async fn write_delegation(round_dir: &Path, def: &ValidatorDef) -> std::io::Result<PathBuf> {
    let path = round_dir.join(format!("delegation-{}.md", def.id));
    let body = format!(
        "# Delegated validator: {}\n\n{}\n\nWrite your verdict to `{}-report.json` in this directory.\n",
        def.id, def.prompt_template, def.id
    );
    io::atomic_write(&path, body.as_bytes()).await?;
    Ok(path)
}

/// Runs one wave: partitions into executable/delegated, executes
/// executables up to `concurrency`, and computes the wave verdict — PASS if
/// no blocking validator in the wave is reject/blocked.
pub async fn run_wave(
    round_dir: &Path,
    task_id: &str,
    round: u32,
    wave: &[&ValidatorDef],
    concurrency: usize,
) -> (Vec<ValidatorOutcome>, bool) {
    let mut outcomes = Vec::new();

    for chunk in wave.chunks(concurrency.max(1)) {
        let mut handles = Vec::new();
        for def in chunk {
            let executable = matches!(&def.engine, Engine::Cli { command, .. } if engine_available(command));
            if executable {
                let round_dir = round_dir.to_path_buf();
                let task_id = task_id.to_string();
                let def = (*def).clone();
                handles.push(tokio::spawn(async move {
                    run_executable(&round_dir, &task_id, round, &def).await
                }));
            } else if let Some(fallback) = def.fallback_engine.clone() {
                let mut retried = (*def).clone();
                retried.engine = fallback;
                let available = matches!(&retried.engine, Engine::Cli { command, .. } if engine_available(command));
                if available {
                    let round_dir = round_dir.to_path_buf();
                    let task_id = task_id.to_string();
                    handles.push(tokio::spawn(async move {
                        run_executable(&round_dir, &task_id, round, &retried).await
                    }));
                } else if def.blocking {
                    outcomes.push(ValidatorOutcome {
                        id: def.id.clone(),
                        verdict: Verdict::Blocked,
                        blocking: def.blocking,
                        note: Some("primary and fallback engines unavailable".to_string()),
                    });
                } else {
                    outcomes.push(ValidatorOutcome {
                        id: def.id.clone(),
                        verdict: Verdict::Pending,
                        blocking: def.blocking,
                        note: Some("non-blocking validator skipped: no engine available".to_string()),
                    });
                }
            } else {
                let _ = write_delegation(round_dir, def).await;
                outcomes.push(ValidatorOutcome {
                    id: def.id.clone(),
                    verdict: Verdict::Pending,
                    blocking: def.blocking,
                    note: Some("delegated to external orchestrator".to_string()),
                });
            }
        }

        for handle in handles {
            if let Ok(outcome) = handle.await {
                outcomes.push(outcome);
            }
        }
    }

    let passed = !wave
        .iter()
        .any(|def| def.blocking && matches!(outcomes.iter().find(|o| o.id == def.id).map(|o| o.verdict), Some(Verdict::Reject | Verdict::Blocked)));

    (outcomes, passed)
}

/// Runs every wave in order, honoring `requires_previous_pass` and
/// `continue_on_fail`.
pub async fn run_all_waves(
    round_dir: &Path,
    task_id: &str,
    round: u32,
    waves: &[(String, Vec<&ValidatorDef>)],
    wave_specs: &[WaveSpec],
    concurrency: usize,
) -> Vec<ValidatorOutcome> {
    let mut all_outcomes = Vec::new();
    let mut previous_passed = true;

    for (name, defs) in waves {
        let spec = wave_specs.iter().find(|w| &w.name == name);
        let requires_previous = spec.is_some_and(|s| s.requires_previous_pass);
        let continue_on_fail = spec.is_none_or(|s| s.continue_on_fail);

        if requires_previous && !previous_passed {
            for def in defs {
                all_outcomes.push(ValidatorOutcome {
                    id: def.id.clone(),
                    verdict: Verdict::Blocked,
                    blocking: def.blocking,
                    note: Some(format!("wave '{name}' requires previous wave to pass")),
                });
            }
            continue;
        }

        let (outcomes, passed) = run_wave(round_dir, task_id, round, defs, concurrency).await;
        all_outcomes.extend(outcomes);
        previous_passed = passed;

        if !passed && !continue_on_fail {
            break;
        }
    }

    all_outcomes
}

/// Computes the aggregate bundle approval from per-task outcome maps: a
/// task is approved if every blocking validator's outcome for it is
/// `approve`.
#[must_use]
pub fn compute_bundle_approval(
    manifest_path: PathBuf,
    per_task_outcomes: &[(String, Vec<ValidatorOutcome>, u32)],
    allow_empty: bool,
) -> BundleApproval {
    if per_task_outcomes.is_empty() {
        return BundleApproval {
            approved: allow_empty,
            tasks: Vec::new(),
            generated_at: io::now(),
            manifest: manifest_path,
        };
    }

    let tasks: Vec<TaskApproval> = per_task_outcomes
        .iter()
        .map(|(task_id, outcomes, round)| {
            let approved = outcomes.iter().filter(|o| o.blocking).all(|o| o.verdict == Verdict::Approve);
            let verdict = if approved { "approve" } else { "reject" };
            TaskApproval {
                task_id: task_id.clone(),
                approved,
                verdict: verdict.to_string(),
                round: *round,
            }
        })
        .collect();

    let approved = tasks.iter().all(|t| t.approved);

    BundleApproval {
        approved,
        tasks,
        generated_at: io::now(),
        manifest: manifest_path,
    }
}
