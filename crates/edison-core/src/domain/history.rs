//! Shared entity metadata and append-only state history.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identifiers::SessionId;

/// Fields common to every Task/QA/Session entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owner: Option<String>,
    pub session_id: Option<SessionId>,
}

impl EntityMetadata {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            owner: None,
            session_id: None,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// One recorded transition: `(from_state, to_state, timestamp, reason,
/// rule_violations)`. Appended on every successful transition; never
/// rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    pub from_state: Option<String>,
    pub to_state: String,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
    #[serde(default)]
    pub rule_violations: Vec<String>,
}

impl StateHistoryEntry {
    #[must_use]
    pub fn new(
        from_state: Option<String>,
        to_state: String,
        timestamp: DateTime<Utc>,
        reason: Option<String>,
        rule_violations: Vec<String>,
    ) -> Self {
        Self {
            from_state,
            to_state,
            timestamp,
            reason,
            rule_violations,
        }
    }
}

/// Checks the history-monotonicity invariant: timestamps
/// non-decreasing, each entry's `from_state` equal to the previous entry's
/// `to_state` (or absent for the first entry).
#[must_use]
pub fn is_monotonic(history: &[StateHistoryEntry]) -> bool {
    let mut prev_to: Option<&str> = None;
    let mut prev_ts: Option<DateTime<Utc>> = None;
    for entry in history {
        if let Some(ts) = prev_ts {
            if entry.timestamp < ts {
                return false;
            }
        }
        match (&entry.from_state, prev_to) {
            (None, None) => {}
            (Some(from), Some(prev)) if from == prev => {}
            _ => return false,
        }
        prev_to = Some(entry.to_state.as_str());
        prev_ts = Some(entry.timestamp);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(from: Option<&str>, to: &str, ts: DateTime<Utc>) -> StateHistoryEntry {
        StateHistoryEntry::new(from.map(str::to_string), to.to_string(), ts, None, vec![])
    }

    #[test]
    fn empty_history_is_monotonic() {
        assert!(is_monotonic(&[]));
    }

    #[test]
    fn chained_history_is_monotonic() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        let history = vec![entry(None, "todo", t0), entry(Some("todo"), "wip", t1)];
        assert!(is_monotonic(&history));
    }

    #[test]
    fn broken_chain_is_rejected() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        let history = vec![entry(None, "todo", t0), entry(Some("done"), "wip", t1)];
        assert!(!is_monotonic(&history));
    }

    #[test]
    fn decreasing_timestamp_is_rejected() {
        let t0 = Utc::now();
        let t1 = t0 - chrono::Duration::seconds(1);
        let history = vec![entry(None, "todo", t0), entry(Some("todo"), "wip", t1)];
        assert!(!is_monotonic(&history));
    }
}
