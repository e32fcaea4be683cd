//! Memory pipeline: a pluggable provider
//! trait plus a fail-open pipeline of named steps run against a session's
//! evidence/activity.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;
use crate::io;

/// One searchable record a provider stores and returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub session_id: String,
    pub kind: String,
    pub content: String,
    pub tags: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A query against the provider's store.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub session_id: Option<String>,
    pub tags: Vec<String>,
    pub text: Option<String>,
    pub limit: usize,
}

/// Pluggable memory backend: `search`/`save` only, so the
/// default file-backed provider and any external provider share one seam.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    async fn save(&self, record: MemoryRecord) -> Result<(), MemoryError>;
    async fn search(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryError>;
}

/// Default provider: one JSON-lines file per session under `<root>/<session_id>.jsonl`.
pub struct FileMemoryProvider {
    root: PathBuf,
}

impl FileMemoryProvider {
    #[must_use]
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{session_id}.jsonl"))
    }

    async fn load_all(&self, session_id: &str) -> Vec<MemoryRecord> {
        let path = self.path_for(session_id);
        let Ok(content) = tokio::fs::read_to_string(&path).await else {
            return Vec::new();
        };
        content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

#[async_trait]
impl MemoryProvider for FileMemoryProvider {
    async fn save(&self, record: MemoryRecord) -> Result<(), MemoryError> {
        let path = self.path_for(&record.session_id);
        let mut records = self.load_all(&record.session_id).await;
        records.push(record);

        let body = records
            .iter()
            .map(|r| serde_json::to_string(r).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n");

        io::atomic_write(&path, body.as_bytes())
            .await
            .map_err(|source| MemoryError::SaveFailed {
                provider: "file".to_string(),
                detail: source.to_string(),
            })
    }

    async fn search(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryError> {
        let Some(session_id) = &query.session_id else {
            return Err(MemoryError::SearchFailed {
                provider: "file".to_string(),
                detail: "file provider requires session_id scoping".to_string(),
            });
        };

        let mut records = self.load_all(session_id).await;

        if !query.tags.is_empty() {
            records.retain(|r| query.tags.iter().all(|tag| r.tags.contains(tag)));
        }
        if let Some(text) = &query.text {
            let needle = text.to_lowercase();
            records.retain(|r| r.content.to_lowercase().contains(&needle));
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if query.limit > 0 {
            records.truncate(query.limit);
        }
        Ok(records)
    }
}

/// Named step in the memory pipeline; each runs independently and a
/// failure never aborts the others (fail-open).
pub trait PipelineStep: Send + Sync {
    fn name(&self) -> &'static str;
    fn run<'a>(
        &'a self,
        provider: &'a dyn MemoryProvider,
        session_id: &'a str,
        activity_summary: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), MemoryError>> + Send + 'a>>;
}

/// `session-insights-v1`: extracts a one-line insight per session close and
/// saves it tagged `insight`.
pub struct SessionInsightsV1;

impl PipelineStep for SessionInsightsV1 {
    fn name(&self) -> &'static str {
        "session-insights-v1"
    }

    fn run<'a>(
        &'a self,
        provider: &'a dyn MemoryProvider,
        session_id: &'a str,
        activity_summary: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), MemoryError>> + Send + 'a>> {
        Box::pin(async move {
            let record = MemoryRecord {
                id: format!("{session_id}-insight"),
                session_id: session_id.to_string(),
                kind: "insight".to_string(),
                content: activity_summary.to_string(),
                tags: vec!["insight".to_string()],
                created_at: io::now(),
            };
            provider.save(record).await
        })
    }
}

/// `provider-save-structured`: saves the raw activity summary verbatim,
/// tagged `raw`.
pub struct ProviderSaveStructured;

impl PipelineStep for ProviderSaveStructured {
    fn name(&self) -> &'static str {
        "provider-save-structured"
    }

    fn run<'a>(
        &'a self,
        provider: &'a dyn MemoryProvider,
        session_id: &'a str,
        activity_summary: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), MemoryError>> + Send + 'a>> {
        Box::pin(async move {
            let record = MemoryRecord {
                id: format!("{session_id}-raw-{}", io::now().timestamp_millis()),
                session_id: session_id.to_string(),
                kind: "raw".to_string(),
                content: activity_summary.to_string(),
                tags: vec!["raw".to_string()],
                created_at: io::now(),
            };
            provider.save(record).await
        })
    }
}

/// `provider-index`: a no-op placeholder for providers that maintain their
/// own search index out-of-band; the file provider has none, so this
/// always succeeds.
pub struct ProviderIndex;

impl PipelineStep for ProviderIndex {
    fn name(&self) -> &'static str {
        "provider-index"
    }

    fn run<'a>(
        &'a self,
        _provider: &'a dyn MemoryProvider,
        _session_id: &'a str,
        _activity_summary: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), MemoryError>> + Send + 'a>> {
        Box::pin(async move { Ok(()) })
    }
}

/// Outcome of one pipeline step, recorded for observability rather than
/// propagated: the pipeline never fails the caller.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: &'static str,
    pub error: Option<String>,
}

/// Runs every step against `provider`, logging (and recording, never
/// propagating) individual failures.
pub async fn run_pipeline(
    steps: &[Box<dyn PipelineStep>],
    provider: &dyn MemoryProvider,
    session_id: &str,
    activity_summary: &str,
) -> Vec<StepOutcome> {
    let mut outcomes = Vec::with_capacity(steps.len());
    for step in steps {
        let result = step.run(provider, session_id, activity_summary).await;
        match result {
            Ok(()) => outcomes.push(StepOutcome {
                step: step.name(),
                error: None,
            }),
            Err(err) => {
                tracing::warn!(step = step.name(), error = %err, "memory pipeline step failed; continuing");
                outcomes.push(StepOutcome {
                    step: step.name(),
                    error: Some(err.to_string()),
                });
            }
        }
    }
    outcomes
}

/// Default pipeline order.
#[must_use]
pub fn default_pipeline() -> Vec<Box<dyn PipelineStep>> {
    vec![
        Box::new(SessionInsightsV1),
        Box::new(ProviderSaveStructured),
        Box::new(ProviderIndex),
    ]
}

/// A provider whose `save` always fails, used to exercise fail-open
/// behavior from tests without touching the filesystem.
pub struct AlwaysFailingProvider;

#[async_trait]
impl MemoryProvider for AlwaysFailingProvider {
    async fn save(&self, _record: MemoryRecord) -> Result<(), MemoryError> {
        Err(MemoryError::SaveFailed {
            provider: "always-failing".to_string(),
            detail: "injected failure".to_string(),
        })
    }

    async fn search(&self, _query: &MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryError> {
        Ok(Vec::new())
    }
}
