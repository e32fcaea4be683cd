//! Edison's domain and engine library: entity model, layered config,
//! handler registry, declarative state-machine engine, evidence/rounds,
//! validator scheduling, composition, and memory.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod composition;
pub mod config;
pub mod dag;
pub mod defaults;
pub mod domain;
pub mod error;
pub mod evidence;
pub mod frontmatter;
pub mod handlers;
pub mod identifiers;
pub mod io;
pub mod memory;
pub mod repository;
pub mod rules;
pub mod state_machine;
pub mod validator;

pub use error::EdisonError;
pub use identifiers::{AgentId, IdError, QaId, SessionId, TaskId};
