//! Entity model: Task, QA, Session, their
//! shared history/metadata, and the [`entity::Entity`] abstraction the
//! generic repository and state-machine engine build on.

pub mod entity;
pub mod history;
pub mod qa;
pub mod session;
pub mod task;

pub use entity::{Entity, EntityState};
pub use history::{is_monotonic, EntityMetadata, StateHistoryEntry};
pub use qa::{QaRecord, QaState, RoundSummary};
pub use session::{
    ActivityLogEntry, CompletionPolicy, ContinuationMode, ContinuationSettings, Session,
    SessionState, WorktreeLinkage,
};
pub use task::{Task, TaskKind, TaskState};
