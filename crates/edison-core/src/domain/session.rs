//! Session entity: a unit of coordinated work owning claimed
//! tasks and QA records.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::history::{EntityMetadata, StateHistoryEntry};
use crate::identifiers::SessionId;
use crate::io::now;

/// Session lifecycle states: `active -> closing -> validated -> archived`,
/// with `recovery` a side branch reachable from `active`/`closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Closing,
    Validated,
    Archived,
    Recovery,
}

impl SessionState {
    #[must_use]
    pub const fn all() -> [Self; 5] {
        [
            Self::Active,
            Self::Closing,
            Self::Validated,
            Self::Archived,
            Self::Recovery,
        ]
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Archived)
    }

    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        match (self, target) {
            (Self::Active, Self::Closing | Self::Recovery) => true,
            (Self::Closing, Self::Validated | Self::Recovery) => true,
            (Self::Validated, Self::Archived) => true,
            (Self::Recovery, Self::Active | Self::Closing) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Validated => "validated",
            Self::Archived => "archived",
            Self::Recovery => "recovery",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "closing" => Ok(Self::Closing),
            "validated" => Ok(Self::Validated),
            "archived" => Ok(Self::Archived),
            "recovery" => Ok(Self::Recovery),
            other => Err(format!("unknown session state '{other}'")),
        }
    }
}

/// One entry in a session's activity log (free-form operator-facing trail,
/// distinct from the state-machine's `state_history`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Continuation mode, governing how a session resumes across invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContinuationMode {
    None,
    Auto,
    Manual,
}

/// Continuation settings: mode plus resource budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuationSettings {
    pub mode: ContinuationMode,
    pub max_turns: Option<u32>,
    pub max_wall_clock_minutes: Option<u32>,
}

impl Default for ContinuationSettings {
    fn default() -> Self {
        Self {
            mode: ContinuationMode::None,
            max_turns: None,
            max_wall_clock_minutes: None,
        }
    }
}

/// Optional git branch/worktree linkage. Edison only records the path and
/// branch name; it does not itself create, switch, or clean up worktrees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeLinkage {
    pub branch: String,
    pub path: std::path::PathBuf,
}

/// Session completion policy: default is
/// `parent_validated_children_done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    ParentValidatedChildrenDone,
    AllTasksValidated,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self::ParentValidatedChildrenDone
    }
}

/// The Session entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub state: SessionState,
    pub owner: Option<String>,
    pub activity_log: Vec<ActivityLogEntry>,
    pub worktree: Option<WorktreeLinkage>,
    pub continuation: ContinuationSettings,
    pub state_history: Vec<StateHistoryEntry>,
    pub metadata: EntityMetadata,
}

impl Session {
    #[must_use]
    pub fn new(id: SessionId, owner: Option<String>) -> Self {
        let now = now();
        Self {
            id,
            state: SessionState::Active,
            owner,
            activity_log: Vec::new(),
            worktree: None,
            continuation: ContinuationSettings::default(),
            state_history: vec![StateHistoryEntry::new(
                None,
                SessionState::Active.to_string(),
                now,
                None,
                vec![],
            )],
            metadata: EntityMetadata::new(now),
        }
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.activity_log.push(ActivityLogEntry {
            timestamp: now(),
            message: message.into(),
        });
    }

    pub fn record_transition(
        &mut self,
        to: SessionState,
        reason: Option<String>,
        rule_violations: Vec<String>,
    ) {
        let now = now();
        self.state_history.push(StateHistoryEntry::new(
            Some(self.state.to_string()),
            to.to_string(),
            now,
            reason,
            rule_violations,
        ));
        self.state = to;
        self.metadata.touch(now);
    }
}
