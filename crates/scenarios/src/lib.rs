//! Shared fixtures for the end-to-end scenarios in `tests/`.
//!
//! Each scenario drives a real [`orchestrator::Workflow`] against a
//! `tempfile::TempDir` project tree — no mocks, every check runs against
//! real files on disk.

#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::path::Path;
use std::time::Duration;

use edison_core::validator::{Engine, ValidatorDef};

/// A validator definition whose "engine" is a shell one-liner writing a
/// fixed-verdict report, so scenarios can exercise the real validator
/// scheduler without depending on an external validator binary.
#[must_use]
pub fn fake_validator(id: &str, wave: &str, verdict: &str) -> ValidatorDef {
    let script = format!(
        "cat > {id}-report.json <<'EOF'\n{{\"validator\":\"{id}\",\"task_id\":\"T\",\"round\":1,\"timestamp\":\"2026-01-01T00:00:00Z\",\"status\":\"{verdict}\",\"model\":null,\"continuation_id\":null,\"issues\":[],\"summary\":\"ok\",\"metrics\":{{}},\"tracking\":{{\"process_id\":null,\"started_at\":\"2026-01-01T00:00:00Z\",\"completed_at\":null}}}}\nEOF\n"
    );
    ValidatorDef {
        id: id.to_string(),
        wave: wave.to_string(),
        blocking: true,
        always_run: true,
        trigger_globs: Vec::new(),
        engine: Engine::Cli {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script],
        },
        fallback_engine: None,
        prompt_template: String::new(),
        context7_packages: Vec::new(),
        timeout: Duration::from_secs(5),
    }
}

/// Writes all four default-required evidence files plus an implementation
/// report into `round_dir`.
pub async fn seed_required_evidence(round_dir: &Path) {
    tokio::fs::create_dir_all(round_dir).await.unwrap();
    tokio::fs::write(round_dir.join("implementation-report.md"), b"done")
        .await
        .unwrap();
    for name in edison_core::evidence::DEFAULT_REQUIRED_EVIDENCE {
        tokio::fs::write(round_dir.join(name), b"ok").await.unwrap();
    }
}
