//! Evidence & rounds: round-scoped
//! directories, required-evidence checks, content-addressed snapshots.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::process::Command;

use crate::error::EvidenceError;
use crate::io;

/// Default required evidence files, configurable per
/// `evidence.required_files` in the merged config.
pub const DEFAULT_REQUIRED_EVIDENCE: &[&str] = &[
    "command-type-check.txt",
    "command-lint.txt",
    "command-test.txt",
    "command-build.txt",
];

/// One per-task entry in a bundle approval marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskApproval {
    pub task_id: String,
    pub approved: bool,
    pub verdict: String,
    pub round: u32,
}

/// `<round-dir>/bundle-approved.json`, written exactly once per round when
/// all blocking validators across the bundle have approved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleApproval {
    pub approved: bool,
    pub tasks: Vec<TaskApproval>,
    pub generated_at: chrono::DateTime<Utc>,
    pub manifest: PathBuf,
}

/// Returns `<evidence_root>/<task_id>/round-<n>/`.
#[must_use]
pub fn round_dir(evidence_root: &Path, task_id: &str, round: u32) -> PathBuf {
    evidence_root.join(task_id).join(format!("round-{round}"))
}

/// Returns `<evidence_root>/_snapshots/<git_head>/<diff_hash>/<clean|dirty>/`.
#[must_use]
pub fn snapshot_dir(evidence_root: &Path, git_head: &str, diff_hash: &str, dirty: bool) -> PathBuf {
    let cleanliness = if dirty { "dirty" } else { "clean" };
    evidence_root
        .join("_snapshots")
        .join(git_head)
        .join(diff_hash)
        .join(cleanliness)
}

/// Creates a round directory and seeds it with empty
/// `implementation-report.md` / `validation-summary.md`, enforcing
/// monotonic round numbers against `current_round`.
///
/// # Errors
/// `EvidenceError::NonMonotonicRound` if `round <= current_round`.
pub async fn prepare_round(
    evidence_root: &Path,
    task_id: &str,
    current_round: u32,
    round: u32,
) -> Result<PathBuf, EvidenceError> {
    if round <= current_round {
        return Err(EvidenceError::NonMonotonicRound {
            task_id: task_id.to_string(),
            current: current_round,
            requested: round,
        });
    }

    let dir = round_dir(evidence_root, task_id, round);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|source| EvidenceError::Io { path: dir.clone(), source })?;

    for name in ["implementation-report.md", "validation-summary.md"] {
        let path = dir.join(name);
        io::atomic_write(&path, b"")
            .await
            .map_err(|source| EvidenceError::Io { path, source })?;
    }

    Ok(dir)
}

/// A round directory is immutable once `bundle-approved.json` exists within
/// it (the round-immutability invariant).
pub async fn is_round_closed(round_dir: &Path) -> bool {
    tokio::fs::try_exists(round_dir.join("bundle-approved.json"))
        .await
        .unwrap_or(false)
}

/// Checks presence and non-emptiness of every file in `required` within
/// `round_dir`, falling back to `snapshot_dir` if given and the fingerprint
/// matches.
///
/// # Errors
/// `EvidenceError::Missing` naming every file absent or empty in both
/// locations.
pub async fn check_required_evidence(
    round_dir: &Path,
    snapshot_dir: Option<&Path>,
    required: &[&str],
    task_id: &str,
    round: u32,
) -> Result<(), EvidenceError> {
    let mut missing = Vec::new();
    for name in required {
        if file_present_and_nonempty(&round_dir.join(name)).await {
            continue;
        }
        if let Some(snap) = snapshot_dir {
            if file_present_and_nonempty(&snap.join(name)).await {
                continue;
            }
        }
        missing.push((*name).to_string());
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(EvidenceError::Missing {
            task_id: task_id.to_string(),
            round,
            missing,
        })
    }
}

async fn file_present_and_nonempty(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}

/// Computes the evidence snapshot fingerprint: current
/// HEAD commit and a stable hash of `git diff --no-color
/// --src-prefix=a/ --dst-prefix=b/ HEAD`.
///
/// # Errors
/// Propagates process spawn failures as [`EvidenceError::Io`].
#[allow(clippy::expect_used)] // buffer is sized exactly for the digest and hex output is always ASCII
pub async fn fingerprint(repo_root: &Path) -> Result<(String, String, bool), EvidenceError> {
    let head = run_git(repo_root, &["rev-parse", "HEAD"]).await?;
    let diff = run_git(
        repo_root,
        &["diff", "--no-color", "--src-prefix=a/", "--dst-prefix=b/", "HEAD"],
    )
    .await?;

    let dirty = !diff.trim().is_empty();
    let mut hasher = Sha256::new();
    hasher.update(diff.as_bytes());
    let digest = hasher.finalize();
    let mut hex_buf = vec![0u8; digest.len() * 2];
    faster_hex::hex_encode(&digest, &mut hex_buf).expect("hex buffer sized for digest");
    let diff_hash = String::from_utf8(hex_buf).expect("hex output is ASCII");

    Ok((head.trim().to_string(), diff_hash, dirty))
}

pub(crate) async fn run_git(repo_root: &Path, args: &[&str]) -> Result<String, EvidenceError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|source| EvidenceError::Io {
            path: repo_root.to_path_buf(),
            source,
        })?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Writes the bundle approval marker exactly once per round. Fails loudly
/// (caller's bug) if the round is already closed — callers must check
/// [`is_round_closed`] first.
pub async fn write_bundle_approval(
    round_dir: &Path,
    approval: &BundleApproval,
) -> Result<(), EvidenceError> {
    let path = round_dir.join("bundle-approved.json");
    io::write_json(&path, approval)
        .await
        .map_err(|source| EvidenceError::Io { path, source })
}

/// Reads the bundle approval marker for a round, if present.
pub async fn read_bundle_approval(round_dir: &Path) -> Option<BundleApproval> {
    io::read_json(&round_dir.join("bundle-approved.json")).await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn prepare_round_rejects_non_monotonic_numbers() {
        let dir = TempDir::new().unwrap();
        let err = prepare_round(dir.path(), "T-001", 2, 2).await.unwrap_err();
        assert!(matches!(err, EvidenceError::NonMonotonicRound { .. }));
    }

    #[tokio::test]
    async fn prepare_round_seeds_report_files() {
        let dir = TempDir::new().unwrap();
        let round = prepare_round(dir.path(), "T-001", 0, 1).await.unwrap();
        assert!(tokio::fs::try_exists(round.join("implementation-report.md")).await.unwrap());
        assert!(tokio::fs::try_exists(round.join("validation-summary.md")).await.unwrap());
    }

    #[tokio::test]
    async fn required_evidence_check_reports_missing_files() {
        let dir = TempDir::new().unwrap();
        let round = prepare_round(dir.path(), "T-001", 0, 1).await.unwrap();
        io::atomic_write(&round.join("command-test.txt"), b"ok").await.unwrap();

        let err = check_required_evidence(&round, None, DEFAULT_REQUIRED_EVIDENCE, "T-001", 1)
            .await
            .unwrap_err();
        let EvidenceError::Missing { missing, .. } = err else {
            panic!("expected Missing");
        };
        assert_eq!(missing.len(), 3);
        assert!(!missing.contains(&"command-test.txt".to_string()));
    }

    #[tokio::test]
    async fn empty_evidence_file_counts_as_missing() {
        let dir = TempDir::new().unwrap();
        let round = prepare_round(dir.path(), "T-001", 0, 1).await.unwrap();
        io::atomic_write(&round.join("command-test.txt"), b"").await.unwrap();
        let err = check_required_evidence(&round, None, &["command-test.txt"], "T-001", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, EvidenceError::Missing { .. }));
    }

    #[tokio::test]
    async fn snapshot_fallback_satisfies_required_evidence() {
        let dir = TempDir::new().unwrap();
        let round = prepare_round(dir.path(), "T-001", 0, 1).await.unwrap();
        let snap = dir.path().join("_snapshots/abc/def/clean");
        tokio::fs::create_dir_all(&snap).await.unwrap();
        io::atomic_write(&snap.join("command-test.txt"), b"ok").await.unwrap();

        check_required_evidence(&round, Some(&snap), &["command-test.txt"], "T-001", 1)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn bundle_approval_round_trips() {
        let dir = TempDir::new().unwrap();
        let round = prepare_round(dir.path(), "T-001", 0, 1).await.unwrap();
        let approval = BundleApproval {
            approved: true,
            tasks: vec![TaskApproval {
                task_id: "T-001".into(),
                approved: true,
                verdict: "approve".into(),
                round: 1,
            }],
            generated_at: Utc::now(),
            manifest: round.join("manifest.json"),
        };
        write_bundle_approval(&round, &approval).await.unwrap();
        assert!(is_round_closed(&round).await);
        let loaded = read_bundle_approval(&round).await.unwrap();
        assert!(loaded.approved);
    }
}
