//! Resume point resolution for a stale snapshot against a fresh chunk plan.
//!
//! Strategies are tried in order: whole-transcript fingerprint, the last
//! completed chunk's checkpoint (fingerprint then source time), and finally
//! the start time of the last cached translation. When nothing anchors, the
//! cached translations are discarded and the job restarts from chunk 0.

use chunkline_protocol::{Checkpoint, JobSnapshot, Segment};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{FingerprintFn, TimecodeParser, build_checkpoints_with, default_parse};
use crate::chunker::Chunk;
use crate::fingerprint::build_fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResumeReason {
    FingerprintSame,
    ZeroCompletedCount,
    FingerprintMatch,
    SourceTimeFallback,
    TimestampFallback,
    TimestampReset,
}

impl ResumeReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FingerprintSame => "fingerprint-same",
            Self::ZeroCompletedCount => "zero-completed-count",
            Self::FingerprintMatch => "fingerprint-match",
            Self::SourceTimeFallback => "source-time-fallback",
            Self::TimestampFallback => "timestamp-fallback",
            Self::TimestampReset => "timestamp-reset",
        }
    }
}

impl std::fmt::Display for ResumeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory result; the caller decides how to act on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumePlan {
    pub start_chunk_index: usize,
    pub initial_translations: Vec<Segment>,
    pub reason: ResumeReason,
    pub used_checkpoint_fallback: bool,
    pub used_timestamp_fallback: bool,
    /// Checkpoints of the current plan, for the caller to persist.
    pub source_chunk_checkpoints: Vec<Checkpoint>,
}

pub fn clamp_chunk_index(value: usize, total: usize) -> usize {
    value.min(total)
}

/// Index of the first chunk holding a segment that starts after
/// `last_saved_start_sec`. `Some(0)` for an empty plan.
pub fn find_resume_chunk_by_timestamp(
    chunks: &[Chunk],
    last_saved_start_sec: f64,
    parse: TimecodeParser,
) -> Option<usize> {
    if chunks.is_empty() || !last_saved_start_sec.is_finite() {
        return Some(0);
    }

    chunks.iter().position(|chunk| {
        chunk
            .segments
            .iter()
            .map(|segment| parse(&segment.start))
            .fold(f64::NEG_INFINITY, f64::max)
            > last_saved_start_sec
    })
}

/// Checkpoint step only. `None` means no checkpoint-based resume is possible.
pub fn resolve_from_checkpoints(
    cached: &[Checkpoint],
    current: &[Checkpoint],
    completed_chunk_count: usize,
    current_total_chunks: usize,
) -> Option<(usize, ResumeReason)> {
    if cached.is_empty() {
        return None;
    }

    let completed = clamp_chunk_index(completed_chunk_count, cached.len());
    if completed == 0 {
        return Some((0, ResumeReason::ZeroCompletedCount));
    }
    let last_completed = &cached[completed - 1];

    if let Some(index) = current.iter().position(|checkpoint| {
        !checkpoint.chunk_fingerprint.is_empty()
            && checkpoint.chunk_fingerprint == last_completed.chunk_fingerprint
    }) {
        return Some((
            clamp_chunk_index(index + 1, current_total_chunks),
            ResumeReason::FingerprintMatch,
        ));
    }

    let last_end = last_completed.last_start_sec.filter(|sec| sec.is_finite())?;
    current
        .iter()
        .position(|checkpoint| checkpoint.last_start_sec.is_some_and(|sec| sec > last_end))
        .map(|index| {
            (
                clamp_chunk_index(index, current_total_chunks),
                ResumeReason::SourceTimeFallback,
            )
        })
}

#[derive(Debug, Clone, Copy)]
pub struct ResumeResolver {
    pub parse: TimecodeParser,
    pub fingerprint: FingerprintFn,
}

impl Default for ResumeResolver {
    fn default() -> Self {
        Self {
            parse: default_parse,
            fingerprint: build_fingerprint,
        }
    }
}

impl ResumeResolver {
    pub fn new(parse: TimecodeParser, fingerprint: FingerprintFn) -> Self {
        Self { parse, fingerprint }
    }

    pub fn resolve(
        &self,
        cached: &JobSnapshot,
        chunks: &[Chunk],
        transcript_fingerprint: &str,
    ) -> ResumePlan {
        let source_chunk_checkpoints = build_checkpoints_with(chunks, self.parse, self.fingerprint);
        let total = chunks.len();

        let plan = |start_chunk_index, initial_translations, reason, checkpoint, timestamp| {
            ResumePlan {
                start_chunk_index,
                initial_translations,
                reason,
                used_checkpoint_fallback: checkpoint,
                used_timestamp_fallback: timestamp,
                source_chunk_checkpoints: source_chunk_checkpoints.clone(),
            }
        };

        if !cached.transcript_fingerprint.is_empty()
            && cached.transcript_fingerprint == transcript_fingerprint
        {
            return plan(
                clamp_chunk_index(cached.completed_chunk_count, total),
                cached.translations.clone(),
                ResumeReason::FingerprintSame,
                false,
                false,
            );
        }

        if let Some((start, reason)) = resolve_from_checkpoints(
            &cached.source_chunk_checkpoints,
            &source_chunk_checkpoints,
            cached.completed_chunk_count,
            total,
        ) {
            return plan(start, cached.translations.clone(), reason, true, false);
        }

        let fallback = cached
            .translations
            .last()
            .filter(|segment| !segment.start.is_blank())
            .and_then(|segment| {
                find_resume_chunk_by_timestamp(chunks, (self.parse)(&segment.start), self.parse)
            });

        match fallback {
            Some(index) => plan(
                clamp_chunk_index(index, total),
                cached.translations.clone(),
                ResumeReason::TimestampFallback,
                false,
                true,
            ),
            None => plan(0, Vec::new(), ResumeReason::TimestampReset, false, true),
        }
    }
}

/// Texts of the last `count` segments joined by single spaces.
pub fn continuation_context(translations: &[Segment], count: usize) -> String {
    let tail = translations.len().saturating_sub(count);
    chunkline_protocol::join_texts(&translations[tail..])
}
