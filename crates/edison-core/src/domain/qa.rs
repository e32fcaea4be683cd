//! QA record entity: a per-task validation dossier.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::history::{EntityMetadata, StateHistoryEntry};
use crate::identifiers::{QaId, TaskId};
use crate::io::now;

/// QA lifecycle states: `waiting -> todo -> wip -> done -> validated`, with
/// `done -> wip` on rejection (round increments).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QaState {
    Waiting,
    Todo,
    Wip,
    Done,
    Validated,
}

impl QaState {
    #[must_use]
    pub const fn all() -> [Self; 5] {
        [
            Self::Waiting,
            Self::Todo,
            Self::Wip,
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
            (Self::Waiting, Self::Todo) => true,
            (Self::Todo, Self::Wip) => true,
            (Self::Wip, Self::Done) => true,
            (Self::Done, Self::Validated | Self::Wip) => true,
            _ => false,
        }
    }
}

impl fmt::Display for QaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Todo => "todo",
            Self::Wip => "wip",
            Self::Done => "done",
            Self::Validated => "validated",
        };
        write!(f, "{s}")
    }
}

impl FromStr for QaState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "todo" => Ok(Self::Todo),
            "wip" => Ok(Self::Wip),
            "done" => Ok(Self::Done),
            "validated" => Ok(Self::Validated),
            other => Err(format!("unknown qa state '{other}'")),
        }
    }
}

/// Summary of one validation round, retained after the round directory
/// itself becomes immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: u32,
    pub verdict: String,
    pub closed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// The QA record entity. Identifier is always `<task-id>-qa` ([`QaId`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaRecord {
    pub id: QaId,
    pub task_id: TaskId,
    pub state: QaState,
    pub current_round: u32,
    pub round_summaries: Vec<RoundSummary>,
    pub state_history: Vec<StateHistoryEntry>,
    pub metadata: EntityMetadata,
    pub body: String,
}

impl QaRecord {
    #[must_use]
    pub fn new(task_id: TaskId) -> Self {
        let now = now();
        let id = QaId::for_task(&task_id);
        Self {
            id,
            task_id,
            state: QaState::Waiting,
            current_round: 0,
            round_summaries: Vec::new(),
            state_history: vec![StateHistoryEntry::new(
                None,
                QaState::Waiting.to_string(),
                now,
                None,
                vec![],
            )],
            metadata: EntityMetadata::new(now),
            body: String::new(),
        }
    }

    pub fn record_transition(
        &mut self,
        to: QaState,
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

    /// Opens a new round, enforcing monotonic round numbers.
    pub fn open_next_round(&mut self) -> u32 {
        self.current_round += 1;
        self.current_round
    }
}
