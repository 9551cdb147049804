//! Persisted job state and per-chunk checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionKey;
use crate::segment::Segment;

/// Fingerprint + time-range summary of one planned chunk. Only used to
/// re-locate a chunk after the source changes, never for translation content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub chunk_index: usize,
    pub chunk_fingerprint: String,
    #[serde(default)]
    pub first_start_sec: Option<f64>,
    #[serde(default)]
    pub last_start_sec: Option<f64>,
    #[serde(default)]
    pub segment_count: usize,
}

/// Persisted unit of work, complete or partial.
///
/// When `is_partial` is set, `translations` covers exactly the first
/// `completed_chunk_count` chunks and `source_chunk_checkpoints` holds one
/// entry per completed chunk, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub session_key: SessionKey,
    #[serde(default)]
    pub translations: Vec<Segment>,
    #[serde(default)]
    pub is_partial: bool,
    #[serde(default)]
    pub completed_chunk_count: usize,
    #[serde(default)]
    pub transcript_fingerprint: String,
    #[serde(default)]
    pub source_chunk_checkpoints: Vec<Checkpoint>,
    #[serde(default)]
    pub is_refined: bool,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_source_lang")]
    pub source_lang: String,
    pub target_lang: String,
    pub timestamp: DateTime<Utc>,
}

fn default_title() -> String {
    "Unknown".to_owned()
}

fn default_source_lang() -> String {
    "Auto".to_owned()
}

impl JobSnapshot {
    pub fn metadata(&self) -> SnapshotMetadata {
        SnapshotMetadata {
            session_key: self.session_key.clone(),
            title: self.title.clone(),
            source_lang: self.source_lang.clone(),
            target_lang: self.target_lang.clone(),
            timestamp: self.timestamp,
            is_refined: self.is_refined,
            is_partial: self.is_partial,
        }
    }
}

/// Index entry describing a stored snapshot without its translations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub session_key: SessionKey,
    pub title: String,
    pub source_lang: String,
    pub target_lang: String,
    pub timestamp: DateTime<Utc>,
    pub is_refined: bool,
    pub is_partial: bool,
}
