//! # chunkline-protocol - shared contract for chunked translation jobs
//!
//! This crate defines the data model, event taxonomy, error taxonomy and
//! boundary ports that the planner, runtime, stores and providers agree on.
//!
//! It carries no runtime of its own; the only async-adjacent dependency is
//! `tokio-util` for the `CancellationToken` passed through provider calls.
//!
//! ## Module Overview
//!
//! - [`ids`] - `SessionKey`, `TaskId`, `ContentId`
//! - [`segment`] - `Segment`, `Timecode` and timecode parsing
//! - [`snapshot`] - `JobSnapshot`, `Checkpoint`, `SnapshotMetadata`
//! - [`event`] - `JobEvent` + `JobEventKind`
//! - [`usage`] - `TokenUsage`
//! - [`ports`] - `JobStore`, `TranslationProvider`, `UsageSink`
//! - [`error`] - `JobError`, `JobResult`

pub mod error;
pub mod event;
pub mod ids;
pub mod ports;
pub mod segment;
pub mod snapshot;
pub mod usage;

// Re-export the most commonly used types at the crate root.
pub use error::{ErrorKind, JobError, JobResult};
pub use event::{JobEvent, JobEventKind, RetryPhase, TaskKind};
pub use ids::{ContentId, SessionKey, TaskId};
pub use ports::{
    JobStore, NoopUsageSink, ProviderOutput, RefineRequest, TranslateChunkRequest,
    TranslationProvider, UsageSink,
};
pub use segment::{Segment, Timecode, join_texts, parse_timecode};
pub use snapshot::{Checkpoint, JobSnapshot, SnapshotMetadata};
pub use tokio_util::sync::CancellationToken;
pub use usage::TokenUsage;
