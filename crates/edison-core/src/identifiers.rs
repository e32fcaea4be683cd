//! Semantic newtypes for entity identifiers.
//!
//! Parsing is validate-once, use-everywhere: a `TaskId` in hand is known to be
//! well-formed, so call sites never re-check format.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error parsing a domain identifier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} '{value}' contains characters other than alphanumerics, '-', '_', '.'")]
    InvalidChars { field: &'static str, value: String },
}

fn validate(field: &'static str, raw: &str) -> Result<(), IdError> {
    if raw.is_empty() {
        return Err(IdError::Empty { field });
    }
    if !raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(IdError::InvalidChars {
            field,
            value: raw.to_string(),
        });
    }
    Ok(())
}

macro_rules! id_newtype {
    ($name:ident, $field:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: impl Into<String>) -> Result<Self, IdError> {
                let raw = raw.into();
                validate($field, &raw)?;
                Ok(Self(raw))
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            #[must_use]
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

id_newtype!(TaskId, "task id");
id_newtype!(SessionId, "session id");
id_newtype!(AgentId, "agent id");

/// A QA record's identifier is derived from its task: `<task-id>-qa`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QaId(String);

impl QaId {
    #[must_use]
    pub fn for_task(task_id: &TaskId) -> Self {
        Self(format!("{task_id}-qa"))
    }

    pub fn parse(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        validate("qa id", &raw)?;
        if !raw.ends_with("-qa") {
            return Err(IdError::InvalidChars {
                field: "qa id",
                value: raw,
            });
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The task this QA record validates.
    pub fn task_id(&self) -> Result<TaskId, IdError> {
        TaskId::parse(self.0.trim_end_matches("-qa"))
    }
}

impl TryFrom<String> for QaId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<QaId> for String {
    fn from(value: QaId) -> Self {
        value.0
    }
}

impl fmt::Display for QaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
