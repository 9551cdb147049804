//! Pure planning logic: chunking, fingerprints, checkpoints and resume points.
//!
//! Nothing here does I/O; the runtime feeds it segments and snapshots.

pub mod checkpoint;
pub mod chunker;
pub mod fingerprint;
pub mod resume;
pub mod tokens;

pub use checkpoint::{FingerprintFn, TimecodeParser, build_checkpoints, build_checkpoints_with};
pub use chunker::{Chunk, PlannerLimits, group_segments_by_sentence, is_sentence_end, plan_chunks};
pub use fingerprint::{EMPTY_FINGERPRINT, build_fingerprint, fnv1a32, normalize_whitespace};
pub use resume::{
    ResumePlan, ResumeReason, ResumeResolver, clamp_chunk_index, continuation_context,
    find_resume_chunk_by_timestamp, resolve_from_checkpoints,
};
pub use tokens::estimate_tokens;

