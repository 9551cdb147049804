//! Boundary ports between the orchestrator and its collaborators.
//!
//! These traits are the only way the runtime reaches persistence, the
//! upstream model, and usage accounting. Implementations live in other
//! crates (`chunkline-store`, `chunkline-gemini`) or in tests.
//!
//! Object-safety note:
//! - Traits use `async-trait` for async dyn-dispatch.
//! - Cancellation is passed explicitly as a `CancellationToken`.

use crate::error::JobResult;
use crate::ids::{SessionKey, TaskId};
use crate::segment::Segment;
use crate::snapshot::{JobSnapshot, SnapshotMetadata};
use crate::usage::TokenUsage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateChunkRequest {
    pub session_key: SessionKey,
    pub task_id: TaskId,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub segments: Vec<Segment>,
    /// Tail of the previous chunk's output, used for tone and terminology.
    #[serde(default)]
    pub context: String,
    pub source_lang: String,
    pub target_lang: String,
    pub thinking_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineRequest {
    pub session_key: SessionKey,
    pub task_id: TaskId,
    pub original: Vec<Segment>,
    pub draft_text: String,
    pub thinking_level: String,
}

/// Translated segments plus the usage counters of the call that made them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderOutput {
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub usage: TokenUsage,
}

#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate_chunk(
        &self,
        request: TranslateChunkRequest,
        cancel: &CancellationToken,
    ) -> JobResult<ProviderOutput>;

    async fn refine(
        &self,
        request: RefineRequest,
        cancel: &CancellationToken,
    ) -> JobResult<ProviderOutput>;
}

/// Snapshot persistence. The orchestrator never assumes it is the only writer.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load(&self, session_key: &SessionKey) -> JobResult<Option<JobSnapshot>>;

    /// Write the snapshot and register it in the index of known sessions.
    async fn save_full(&self, session_key: &SessionKey, snapshot: &JobSnapshot) -> JobResult<()>;

    /// Write the snapshot only. Must not touch the index of known sessions.
    async fn save_partial(&self, session_key: &SessionKey, snapshot: &JobSnapshot)
    -> JobResult<()>;

    async fn delete(&self, session_key: &SessionKey) -> JobResult<()>;

    async fn list_all(&self) -> JobResult<Vec<SnapshotMetadata>>;
}

/// External token accounting, fed after every upstream call.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, usage: TokenUsage) -> JobResult<()>;
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _usage: TokenUsage) -> JobResult<()> {
        Ok(())
    }
}
