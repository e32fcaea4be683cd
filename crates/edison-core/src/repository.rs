//! File-backed entity repository: `get`,
//! `save`, `move`, `list`, `delete`, each taking the entity's per-file
//! advisory lock ([`crate::io::FileLock`]) for the operation's duration.
//!
//! One generic [`FileRepository<E>`] driven by [`crate::domain::Entity`]
//! serves every entity kind instead of a hand-written repository per kind.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::domain::entity::DocumentStyle;
use crate::domain::Entity;
use crate::error::RepositoryError;
use crate::frontmatter;
use crate::io::{self, FileLock};

/// Default lock acquisition timeout.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// A file-backed repository for one entity kind, rooted at
/// `<PM>/<kind-dir>/`. State directories (`<root>/<state>/`) are created
/// lazily on first save into that state.
pub struct FileRepository<E: Entity> {
    root: PathBuf,
    lock_timeout: Duration,
    _marker: PhantomData<E>,
}

impl<E> FileRepository<E>
where
    E: Entity + Serialize + DeserializeOwned,
{
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn state_dir(&self, state: E::State) -> PathBuf {
        self.root.join(state.to_string())
    }

    fn path_in(&self, state: E::State, id: &E::Id) -> PathBuf {
        self.state_dir(state).join(E::relative_path(id))
    }

    /// Searches state directories in `E::State::all()` order, returning the
    /// first match. No lock is taken: reads are non-locking.
    ///
    /// # Errors
    /// `RepositoryError::NotFound` if no state directory contains the id.
    pub async fn get(&self, id: &E::Id) -> Result<E, RepositoryError> {
        for state in E::State::all() {
            let path = self.path_in(state, id);
            match tokio::fs::read(&path).await {
                Ok(bytes) => return decode::<E>(&bytes),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => return Err(RepositoryError::Io { path, source }),
            }
        }
        Err(RepositoryError::NotFound {
            kind: E::KIND,
            id: id.to_string(),
        })
    }

    /// Writes `entity` into the directory matching its current state,
    /// atomically, under the file's lock.
    pub async fn save(&self, entity: &E) -> Result<(), RepositoryError> {
        let path = self.path_in(entity.state(), entity.id());
        let lock = FileLock::acquire(&path, self.lock_timeout)
            .await
            .map_err(|source| RepositoryError::LockTimeout {
                path: path.clone(),
                detail: source.to_string(),
            })?;

        let bytes = encode(entity)?;
        io::atomic_write(&path, &bytes)
            .await
            .map_err(|source| RepositoryError::Io {
                path: path.clone(),
                source,
            })?;

        lock.release().await.map_err(|source| RepositoryError::Io { path, source })
    }

    /// Atomically moves the entity's file from `from_state`'s directory to
    /// `to_state`'s, under the file's lock. Fails with `StaleState` if the
    /// file is not present in `from_state`.
    pub async fn move_state(
        &self,
        id: &E::Id,
        from_state: E::State,
        to_state: E::State,
    ) -> Result<(), RepositoryError> {
        let from = self.path_in(from_state, id);
        let to = self.path_in(to_state, id);

        let lock = FileLock::acquire(&from, self.lock_timeout)
            .await
            .map_err(|source| RepositoryError::LockTimeout {
                path: from.clone(),
                detail: source.to_string(),
            })?;

        if !tokio::fs::try_exists(&from).await.unwrap_or(false) {
            return Err(RepositoryError::StaleState {
                kind: E::KIND,
                id: id.to_string(),
                expected: from_state.to_string(),
            });
        }

        io::atomic_move(&from, &to)
            .await
            .map_err(|source| RepositoryError::Io {
                path: to.clone(),
                source,
            })?;

        lock.release()
            .await
            .map_err(|source| RepositoryError::Io { path: from, source })
    }

    /// Lists entities across all state directories (or `only_state` if
    /// given) matching `filter`.
    pub async fn list(
        &self,
        only_state: Option<E::State>,
        filter: impl Fn(&E) -> bool,
    ) -> Result<Vec<E>, RepositoryError> {
        let states: Vec<E::State> = only_state.map_or_else(E::State::all, |s| vec![s]);
        let mut out = Vec::new();

        for state in states {
            let dir = self.state_dir(state);
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => return Err(RepositoryError::Io { path: dir, source }),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|source| RepositoryError::Io {
                    path: dir.clone(),
                    source,
                })?
            {
                let path = entry.path();
                if entity_file_matches::<E>(&path) {
                    let bytes = tokio::fs::read(&path)
                        .await
                        .map_err(|source| RepositoryError::Io {
                            path: path.clone(),
                            source,
                        })?;
                    let entity = decode::<E>(&bytes)?;
                    if filter(&entity) {
                        out.push(entity);
                    }
                }
            }
        }

        Ok(out)
    }

    /// Deletes an entity, only permitted from non-terminal states.
    pub async fn delete(&self, id: &E::Id, from_state: E::State) -> Result<(), RepositoryError> {
        if from_state.is_terminal() {
            return Err(RepositoryError::DeleteNotPermitted {
                kind: E::KIND,
                id: id.to_string(),
                state: from_state.to_string(),
            });
        }

        let path = self.path_in(from_state, id);
        let lock = FileLock::acquire(&path, self.lock_timeout)
            .await
            .map_err(|source| RepositoryError::LockTimeout {
                path: path.clone(),
                detail: source.to_string(),
            })?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(RepositoryError::NotFound {
                    kind: E::KIND,
                    id: id.to_string(),
                });
            }
            Err(source) => return Err(RepositoryError::Io { path, source }),
        }

        lock.release().await.map_err(|source| RepositoryError::Io { path, source })
    }
}

fn entity_file_matches<E: Entity>(path: &Path) -> bool {
    match E::DOCUMENT_STYLE {
        DocumentStyle::Frontmatter => path.extension().is_some_and(|ext| ext == "md"),
        DocumentStyle::Json => path.file_name().is_some_and(|n| n == "session.json"),
    }
}

fn encode<E: Entity + Serialize>(entity: &E) -> Result<Vec<u8>, RepositoryError> {
    match E::DOCUMENT_STYLE {
        DocumentStyle::Json => serde_json::to_vec_pretty(entity).map_err(|source| {
            RepositoryError::Serde {
                kind: E::KIND,
                id: entity.id().to_string(),
                source,
            }
        }),
        DocumentStyle::Frontmatter => {
            let mut value = serde_json::to_value(entity).map_err(|source| {
                RepositoryError::Serde {
                    kind: E::KIND,
                    id: entity.id().to_string(),
                    source,
                }
            })?;
            let body = match &mut value {
                Value::Object(map) => map
                    .remove("body")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default(),
                _ => String::new(),
            };
            let doc = frontmatter::render(&value, &body).map_err(|err| {
                RepositoryError::InvariantViolation {
                    kind: E::KIND,
                    id: entity.id().to_string(),
                    detail: err.to_string(),
                }
            })?;
            Ok(doc.into_bytes())
        }
    }
}

fn decode<E: Entity + DeserializeOwned>(bytes: &[u8]) -> Result<E, RepositoryError> {
    let text = std::str::from_utf8(bytes).map_err(|err| RepositoryError::InvariantViolation {
        kind: E::KIND,
        id: String::new(),
        detail: format!("non-UTF8 entity file: {err}"),
    })?;

    match E::DOCUMENT_STYLE {
        DocumentStyle::Json => serde_json::from_str(text).map_err(|source| RepositoryError::Serde {
            kind: E::KIND,
            id: String::new(),
            source,
        }),
        DocumentStyle::Frontmatter => {
            let (mut header, body): (Value, String) =
                frontmatter::parse(text).map_err(|err| RepositoryError::InvariantViolation {
                    kind: E::KIND,
                    id: String::new(),
                    detail: err.to_string(),
                })?;
            if let Value::Object(ref mut map) = header {
                map.insert("body".to_string(), Value::String(body));
            }
            serde_json::from_value(header).map_err(|source| RepositoryError::Serde {
                kind: E::KIND,
                id: String::new(),
                source,
            })
        }
    }
}
