use chunkline_protocol::Segment;
use serde::{Deserialize, Serialize};

use crate::tokens::estimate_tokens;

/// Longest merged text, in characters, before a sentence group is cut early.
const MAX_GROUP_CHARS: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerLimits {
    /// Cut at the next sentence boundary once this many tokens are buffered.
    pub soft_limit: usize,
    /// Cut unconditionally once this many tokens are buffered.
    pub hard_limit: usize,
}

impl Default for PlannerLimits {
    fn default() -> Self {
        Self {
            soft_limit: 2800,
            hard_limit: 3800,
        }
    }
}

/// A contiguous, non-empty run of source segments sent as one upstream request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub segments: Vec<Segment>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn estimated_tokens(&self) -> usize {
        self.segments
            .iter()
            .map(|segment| estimate_tokens(&segment.text))
            .sum()
    }
}

/// True when the text ends with `.`, `?` or `!`, ignoring trailing whitespace.
pub fn is_sentence_end(text: &str) -> bool {
    text.trim_end().ends_with(['.', '?', '!'])
}

/// Split segments into token-bounded chunks, preferring sentence boundaries.
///
/// Pure and deterministic: the same input and limits always produce the same
/// chunks, and concatenating the chunks yields the input unchanged.
pub fn plan_chunks(segments: &[Segment], limits: PlannerLimits) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut token_count = 0_usize;

    for (index, segment) in segments.iter().enumerate() {
        token_count += estimate_tokens(&segment.text);
        current.push(segment.clone());

        let is_last = index + 1 == segments.len();
        let soft_cut = token_count >= limits.soft_limit && is_sentence_end(&segment.text);
        let hard_cut = token_count >= limits.hard_limit;

        if soft_cut || hard_cut || is_last {
            chunks.push(Chunk {
                segments: std::mem::take(&mut current),
            });
            token_count = 0;
        }
    }

    chunks
}

/// Merge raw caption lines into sentence-sized groups.
///
/// A group closes at a sentence end, once its merged text passes 150
/// characters, or at the last line. Each group keeps the start of its first
/// line. Lines with empty text are dropped.
pub fn group_segments_by_sentence(segments: &[Segment]) -> Vec<Segment> {
    let lines: Vec<&Segment> = segments
        .iter()
        .filter(|segment| !segment.text.trim().is_empty())
        .collect();

    let mut grouped = Vec::new();
    let mut current: Option<Segment> = None;

    for (index, line) in lines.iter().enumerate() {
        let group = match current.take() {
            None => (*line).clone(),
            Some(mut group) => {
                group.text.push(' ');
                group.text.push_str(&line.text);
                group
            }
        };

        let is_last = index + 1 == lines.len();
        if is_sentence_end(&line.text) || group.text.chars().count() > MAX_GROUP_CHARS || is_last {
            grouped.push(group);
        } else {
            current = Some(group);
        }
    }

    grouped
}
