//! Error taxonomy.
//!
//! Each component owns a `thiserror` enum; [`EdisonError`] composes them via
//! `#[from]` so the workflow facade can propagate with `?` while callers can
//! still match on the originating kind through the closed taxonomy.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::path::PathBuf;

use thiserror::Error;

/// Failures from path/IO utilities (component A) and the entity repository (C).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("entity not found: {kind} {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("stale state: expected {kind} {id} in '{expected}', not found there")]
    StaleState {
        kind: &'static str,
        id: String,
        expected: String,
    },

    #[error("lock held on {path}: {detail}")]
    LockTimeout { path: PathBuf, detail: String },

    #[error("entity shape invalid for {kind} {id}: {detail}")]
    InvariantViolation {
        kind: &'static str,
        id: String,
        detail: String,
    },

    #[error("cannot delete {kind} {id} from terminal-incompatible state '{state}'")]
    DeleteNotPermitted {
        kind: &'static str,
        id: String,
        state: String,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error for {kind} {id}: {source}")]
    Serde {
        kind: &'static str,
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Layered configuration loader failures (component B).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required config layer missing: {path}")]
    MissingRequired { path: PathBuf },

    #[error("malformed config layer {path}: {detail}")]
    Malformed { path: PathBuf, detail: String },

    #[error("unresolvable placeholder '{placeholder}' in {path}")]
    UnresolvedPlaceholder { path: PathBuf, placeholder: String },

    #[error("placeholder cycle detected while resolving {path}")]
    PlaceholderCycle { path: PathBuf },

    #[error("__APPEND used on non-sequence path '{path}'")]
    AppendOnNonSequence { path: String },

    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Handler registry failures (component D).
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("duplicate registration of {kind} '{name}' within the same layer")]
    DuplicateInLayer { kind: &'static str, name: String },

    #[error("{kind} '{name}' is not registered")]
    Unresolved { kind: &'static str, name: String },
}

/// State-machine engine failures (component E).
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("entity is in unknown state '{state}'")]
    UnknownState { state: String },

    #[error("no transition from '{from}' to '{to}' is declared")]
    InvalidTransition { from: String, to: String },

    #[error("guard '{name}' rejected the transition")]
    GuardFailed { name: String },

    #[error("condition '{name}' failed: {reason}")]
    ConditionFailed { name: String, reason: String },

    #[error("rollback to '{to}' requires a non-empty reason")]
    RollbackReasonRequired { to: String },

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Evidence & rounds failures (component H).
#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("required evidence missing for {task_id} round {round}: {missing:?}")]
    Missing {
        task_id: String,
        round: u32,
        missing: Vec<String>,
    },

    #[error("round {round} for {task_id} is closed and immutable")]
    RoundClosed { task_id: String, round: u32 },

    #[error("round numbers must be monotonic: {task_id} already has round {current}, cannot open {requested}")]
    NonMonotonicRound {
        task_id: String,
        current: u32,
        requested: u32,
    },

    #[error("snapshot fingerprint mismatch: round expects {expected}, repo is at {actual}")]
    SnapshotMismatch { expected: String, actual: String },

    #[error("I/O error in evidence store at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Validator scheduler failures (component I).
#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("validator '{id}' timed out after {seconds}s")]
    Timeout { id: String, seconds: u64 },

    #[error("validator '{id}' blocked: {reason}")]
    Blocked { id: String, reason: String },

    #[error("bundle approval marker absent or not approved for {task_id}")]
    BundleApprovalMissing { task_id: String },

    #[error("spawning validator '{id}' failed: {source}")]
    Spawn {
        id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Composition engine failures (component G).
#[derive(Debug, Error)]
pub enum CompositionError {
    #[error("include target not found: {path}")]
    IncludeNotFound { path: String },

    #[error("unresolved template marker left after pipeline: {marker}")]
    UnresolvedMarker { marker: String },

    #[error("malformed expression in conditional: {expr}")]
    MalformedExpression { expr: String },

    #[error("section '{name}' opening and closing markers disagree")]
    SectionMismatch { name: String },

    #[error("loop target '{key}' is not an array")]
    LoopTargetNotArray { key: String },

    #[error("internal composition engine invariant violated: {detail}")]
    Internal { detail: String },

    #[error("I/O error composing output at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Memory pipeline failures (component J) — always logged, never propagated
/// past the pipeline boundary (fail-open).
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("provider '{provider}' save failed: {detail}")]
    SaveFailed { provider: String, detail: String },

    #[error("provider '{provider}' search failed: {detail}")]
    SearchFailed { provider: String, detail: String },
}

/// The crate-wide error, composing every component's taxonomy
#[derive(Debug, Error)]
pub enum EdisonError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Evidence(#[from] EvidenceError),

    #[error(transparent)]
    Validator(#[from] ValidatorError),

    #[error(transparent)]
    Composition(#[from] CompositionError),
}

impl EdisonError {
    /// Process exit code: 0 success (not represented here),
    /// 1 validation/guard failure, 130 interrupt (handled at the binary, not
    /// constructed from an error).
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        1
    }
}
