//! Bundled state-machine specifications (`LayerKind::BundledDefaults`):
//! the lowest-precedence layer, overridable by packs, user config, and
//! project config.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::sync::OnceLock;

use crate::state_machine::{parse_spec, StateMachineSpec};

const TASK_SPEC_YAML: &str = include_str!("../assets/state_machines/task.yaml");
const QA_SPEC_YAML: &str = include_str!("../assets/state_machines/qa.yaml");
const SESSION_SPEC_YAML: &str = include_str!("../assets/state_machines/session.yaml");

static TASK_SPEC: OnceLock<StateMachineSpec> = OnceLock::new();
static QA_SPEC: OnceLock<StateMachineSpec> = OnceLock::new();
static SESSION_SPEC: OnceLock<StateMachineSpec> = OnceLock::new();

/// The bundled Task state machine. Parsing a fixed, crate-authored YAML
/// literal cannot fail at runtime; a parse error here is a packaging bug.
#[must_use]
#[allow(clippy::expect_used)] // bundled YAML is a compile-time constant; a parse failure is a packaging bug
pub fn task_spec() -> &'static StateMachineSpec {
    TASK_SPEC.get_or_init(|| parse_spec(TASK_SPEC_YAML).expect("bundled task.yaml is valid"))
}

/// The bundled QA state machine.
#[must_use]
#[allow(clippy::expect_used)]
pub fn qa_spec() -> &'static StateMachineSpec {
    QA_SPEC.get_or_init(|| parse_spec(QA_SPEC_YAML).expect("bundled qa.yaml is valid"))
}

/// The bundled Session state machine.
#[must_use]
#[allow(clippy::expect_used)]
pub fn session_spec() -> &'static StateMachineSpec {
    SESSION_SPEC.get_or_init(|| parse_spec(SESSION_SPEC_YAML).expect("bundled session.yaml is valid"))
}
