//! Task entity: unit of implementation work.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::history::{EntityMetadata, StateHistoryEntry};
use crate::identifiers::{SessionId, TaskId};
use crate::io::now;

/// Task lifecycle states. Location on disk encodes state (the parent
/// directory name is authoritative); this enum is the in-memory mirror.
///
/// Explicit, exhaustive transition shape for the task lifecycle:
/// `todo -> wip -> done -> validated`, with `blocked` a side branch off
/// `todo`/`wip` that exits back to either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Todo,
    Wip,
    Blocked,
    Done,
    Validated,
}

impl TaskState {
    #[must_use]
    pub const fn all() -> [Self; 5] {
        [
            Self::Todo,
            Self::Wip,
            Self::Blocked,
            Self::Done,
            Self::Validated,
        ]
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Validated)
    }

    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        match (self, target) {
            (Self::Todo, Self::Wip | Self::Blocked) => true,
            (Self::Wip, Self::Done | Self::Blocked) => true,
            (Self::Blocked, Self::Todo | Self::Wip) => true,
            (Self::Done, Self::Validated | Self::Wip) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn valid_transitions(self) -> Vec<Self> {
        Self::all()
            .into_iter()
            .filter(|&target| self.can_transition_to(target))
            .collect()
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Todo => "todo",
            Self::Wip => "wip",
            Self::Blocked => "blocked",
            Self::Done => "done",
            Self::Validated => "validated",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "wip" => Ok(Self::Wip),
            "blocked" => Ok(Self::Blocked),
            "done" => Ok(Self::Done),
            "validated" => Ok(Self::Validated),
            other => Err(format!("unknown task state '{other}'")),
        }
    }
}

/// The kind of work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Feature,
    Bug,
    Chore,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Feature => "feature",
            Self::Bug => "bug",
            Self::Chore => "chore",
        };
        write!(f, "{s}")
    }
}

/// The Task entity: structured frontmatter fields plus a free-text body
/// (the human-readable implementation brief).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub kind: TaskKind,
    pub state: TaskState,
    pub tags: BTreeSet<String>,
    pub depends_on: BTreeSet<TaskId>,
    pub related: BTreeSet<TaskId>,
    pub parent: Option<TaskId>,
    pub bundle_root: Option<TaskId>,
    pub state_history: Vec<StateHistoryEntry>,
    pub metadata: EntityMetadata,
    /// Free-text implementation brief; not interpreted by the engine.
    pub body: String,
}

impl Task {
    #[must_use]
    pub fn new(id: TaskId, title: String, kind: TaskKind) -> Self {
        let now = now();
        Self {
            id,
            title,
            kind,
            state: TaskState::Todo,
            tags: BTreeSet::new(),
            depends_on: BTreeSet::new(),
            related: BTreeSet::new(),
            parent: None,
            bundle_root: None,
            state_history: vec![StateHistoryEntry::new(
                None,
                TaskState::Todo.to_string(),
                now,
                None,
                vec![],
            )],
            metadata: EntityMetadata::new(now),
            body: String::new(),
        }
    }

    /// Is this task a member of a bundle it does not itself root?
    #[must_use]
    pub fn is_bundle_member(&self) -> bool {
        self.bundle_root.as_ref().is_some_and(|root| root != &self.id)
    }

    /// Once a task is linked to a session, further mutation requires that
    /// session's credentials until the task reaches a terminal state.
    #[must_use]
    pub fn requires_session_credential(&self, caller: Option<&SessionId>) -> bool {
        match (&self.metadata.session_id, self.state.is_terminal()) {
            (Some(_), true) => false,
            (Some(owner), false) => caller != Some(owner),
            (None, _) => false,
        }
    }

    pub fn record_transition(
        &mut self,
        to: TaskState,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_in_todo_with_one_history_entry() {
        let task = Task::new(TaskId::parse("T-001").unwrap(), "add login".into(), TaskKind::Feature);
        assert_eq!(task.state, TaskState::Todo);
        assert_eq!(task.state_history.len(), 1);
        assert!(task.state_history[0].from_state.is_none());
    }

    #[test]
    fn todo_to_validated_is_not_a_direct_transition() {
        assert!(!TaskState::Todo.can_transition_to(TaskState::Validated));
    }

    #[test]
    fn blocked_exits_back_to_todo_or_wip_only() {
        assert!(TaskState::Blocked.can_transition_to(TaskState::Todo));
        assert!(TaskState::Blocked.can_transition_to(TaskState::Wip));
        assert!(!TaskState::Blocked.can_transition_to(TaskState::Done));
    }

    #[test]
    fn unowned_task_never_requires_a_credential() {
        let task = Task::new(TaskId::parse("T-001").unwrap(), "x".into(), TaskKind::Chore);
        assert!(!task.requires_session_credential(None));
    }

    #[test]
    fn session_owned_task_requires_matching_session() {
        let mut task = Task::new(TaskId::parse("T-001").unwrap(), "x".into(), TaskKind::Chore);
        let owner = SessionId::parse("S-1").unwrap();
        task.metadata.session_id = Some(owner.clone());
        let other = SessionId::parse("S-2").unwrap();
        assert!(task.requires_session_credential(Some(&other)));
        assert!(!task.requires_session_credential(Some(&owner)));
    }
}
