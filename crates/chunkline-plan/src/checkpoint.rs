use chunkline_protocol::{Checkpoint, Segment, Timecode, parse_timecode};

use crate::chunker::Chunk;
use crate::fingerprint::build_fingerprint;

pub type TimecodeParser = fn(&Timecode) -> f64;
pub type FingerprintFn = fn(&[Segment]) -> String;

pub(crate) fn default_parse(timecode: &Timecode) -> f64 {
    parse_timecode(timecode.as_str())
}

/// One checkpoint per chunk, using the default parser and fingerprint.
pub fn build_checkpoints(chunks: &[Chunk]) -> Vec<Checkpoint> {
    build_checkpoints_with(chunks, default_parse, build_fingerprint)
}

pub fn build_checkpoints_with(
    chunks: &[Chunk],
    parse: TimecodeParser,
    fingerprint: FingerprintFn,
) -> Vec<Checkpoint> {
    chunks
        .iter()
        .enumerate()
        .map(|(chunk_index, chunk)| {
            let mut first_start_sec: Option<f64> = None;
            let mut last_start_sec: Option<f64> = None;

            for seconds in chunk.segments.iter().map(|s| parse(&s.start)) {
                if !seconds.is_finite() {
                    continue;
                }
                first_start_sec = Some(first_start_sec.map_or(seconds, |v| v.min(seconds)));
                last_start_sec = Some(last_start_sec.map_or(seconds, |v| v.max(seconds)));
            }

            Checkpoint {
                chunk_index,
                chunk_fingerprint: fingerprint(&chunk.segments),
                first_start_sec,
                last_start_sec,
                segment_count: chunk.segments.len(),
            }
        })
        .collect()
}
