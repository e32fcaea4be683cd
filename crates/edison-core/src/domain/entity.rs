//! The [`Entity`] trait unifies Task/QA/Session for the generic repository
//! (component C) and state-machine engine (component E): any type with a
//! stable id, a state drawn from a small enum, and an append-only history
//! can be stored, locked, and transitioned the same way.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use crate::domain::history::StateHistoryEntry;

/// How an entity kind is serialized to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStyle {
    /// YAML frontmatter header + free-text body (Task, QA).
    Frontmatter,
    /// Plain JSON record (Session).
    Json,
}

/// A state enum usable by the generic engine: exhaustively enumerable,
/// string-convertible, and queryable for its allowed successors.
pub trait EntityState: Copy + Eq + Display + FromStr<Err = String> + Send + Sync + 'static {
    fn all() -> Vec<Self>
    where
        Self: Sized;

    fn can_transition_to(self, target: Self) -> bool;

    fn is_terminal(self) -> bool;
}

macro_rules! impl_entity_state {
    ($ty:ty, $count:literal) => {
        impl EntityState for $ty {
            fn all() -> Vec<Self> {
                <$ty>::all().to_vec()
            }

            fn can_transition_to(self, target: Self) -> bool {
                <$ty>::can_transition_to(self, target)
            }

            fn is_terminal(self) -> bool {
                <$ty>::is_terminal(self)
            }
        }
    };
}

impl_entity_state!(crate::domain::task::TaskState, 5);
impl_entity_state!(crate::domain::qa::QaState, 5);
impl_entity_state!(crate::domain::session::SessionState, 5);

/// Common surface every stored entity exposes to the repository and engine.
pub trait Entity: Send + Sync + Clone {
    type Id: Display + Clone + Eq + Ord + std::hash::Hash + Send + Sync;
    type State: EntityState;

    /// Stable identifier, unique within the entity kind.
    const KIND: &'static str;

    /// How this entity kind is encoded on disk.
    const DOCUMENT_STYLE: DocumentStyle;

    fn id(&self) -> &Self::Id;
    fn state(&self) -> Self::State;
    fn state_history(&self) -> &[StateHistoryEntry];

    /// Path of this entity's file, relative to its state directory.
    fn relative_path(id: &Self::Id) -> PathBuf;

    /// Appends a history entry and sets the new state; called by the
    /// state-machine engine after a transition's guard/conditions pass.
    fn apply_transition(
        &mut self,
        to: Self::State,
        reason: Option<String>,
        rule_violations: Vec<String>,
    );
}

impl Entity for crate::domain::task::Task {
    type Id = crate::identifiers::TaskId;
    type State = crate::domain::task::TaskState;
    const KIND: &'static str = "task";
    const DOCUMENT_STYLE: DocumentStyle = DocumentStyle::Frontmatter;

    fn relative_path(id: &Self::Id) -> PathBuf {
        PathBuf::from(format!("{id}.md"))
    }

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn state(&self) -> Self::State {
        self.state
    }

    fn state_history(&self) -> &[StateHistoryEntry] {
        &self.state_history
    }

    fn apply_transition(
        &mut self,
        to: Self::State,
        reason: Option<String>,
        rule_violations: Vec<String>,
    ) {
        self.record_transition(to, reason, rule_violations);
    }
}

impl Entity for crate::domain::qa::QaRecord {
    type Id = crate::identifiers::QaId;
    type State = crate::domain::qa::QaState;
    const KIND: &'static str = "qa";
    const DOCUMENT_STYLE: DocumentStyle = DocumentStyle::Frontmatter;

    fn relative_path(id: &Self::Id) -> PathBuf {
        PathBuf::from(format!("{id}.md"))
    }

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn state(&self) -> Self::State {
        self.state
    }

    fn state_history(&self) -> &[StateHistoryEntry] {
        &self.state_history
    }

    fn apply_transition(
        &mut self,
        to: Self::State,
        reason: Option<String>,
        rule_violations: Vec<String>,
    ) {
        self.record_transition(to, reason, rule_violations);
    }
}

impl Entity for crate::domain::session::Session {
    type Id = crate::identifiers::SessionId;
    type State = crate::domain::session::SessionState;
    const KIND: &'static str = "session";
    const DOCUMENT_STYLE: DocumentStyle = DocumentStyle::Json;

    fn relative_path(id: &Self::Id) -> PathBuf {
        PathBuf::from(format!("{id}/session.json"))
    }

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn state(&self) -> Self::State {
        self.state
    }

    fn state_history(&self) -> &[StateHistoryEntry] {
        &self.state_history
    }

    fn apply_transition(
        &mut self,
        to: Self::State,
        reason: Option<String>,
        rule_violations: Vec<String>,
    ) {
        self.record_transition(to, reason, rule_violations);
    }
}
