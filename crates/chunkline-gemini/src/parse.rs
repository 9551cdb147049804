//! Turning model text into segments.
//!
//! Model output is usually a clean JSON array, but it can arrive wrapped in
//! markdown fences or cut off mid-object when the output token limit is hit.

use chunkline_protocol::{JobError, JobResult, Segment};
use serde::Deserialize;
use serde_json::Value;

const FENCE: &str = "```";

#[derive(Debug, Deserialize)]
struct WireSegment {
    #[serde(default)]
    start: String,
    #[serde(default)]
    text: String,
}

/// Remove every ```` ``` ```` fence, an optional `json` tag right after it,
/// and one newline after that.
pub fn strip_fences(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(pos) = rest.find(FENCE) {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + FENCE.len()..];
        rest = rest.strip_prefix("json").unwrap_or(rest);
        rest = rest.strip_prefix('\n').unwrap_or(rest);
    }
    out.push_str(rest);
    out.trim().to_owned()
}

/// Recover the longest prefix of a truncated array that still parses.
///
/// Cuts after the last `}`, closes the array, and retries with the previous
/// `}` until something parses.
pub fn repair_truncated_json(raw: &str) -> Option<String> {
    let mut text = raw.trim();

    while let Some(last) = text.rfind('}') {
        let mut candidate = text[..=last].to_owned();
        if candidate.starts_with('[') && !candidate.ends_with(']') {
            candidate.push(']');
        }
        if serde_json::from_str::<Value>(&candidate).is_ok() {
            return Some(candidate);
        }
        text = &text[..last];
    }
    None
}

fn decode(json: &str) -> Option<Vec<Segment>> {
    let items: Vec<WireSegment> = serde_json::from_str(json).ok()?;
    Some(
        items
            .into_iter()
            .map(|item| Segment::new(item.start, item.text))
            .collect(),
    )
}

/// Parse candidate text into segments, repairing truncation when needed.
pub fn parse_segments(raw: &str) -> JobResult<Vec<Segment>> {
    if raw.trim().is_empty() {
        return Err(JobError::MalformedResponse("empty response text".to_owned()));
    }

    let cleaned = strip_fences(raw);
    if let Some(segments) = decode(&cleaned) {
        return Ok(segments);
    }

    let repaired = repair_truncated_json(&cleaned).ok_or_else(|| {
        JobError::MalformedResponse("response is not a JSON segment array".to_owned())
    })?;
    tracing::warn!(
        original_len = cleaned.len(),
        repaired_len = repaired.len(),
        "repaired truncated model output"
    );
    decode(&repaired).ok_or_else(|| {
        JobError::MalformedResponse("repaired response is not a JSON segment array".to_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tagged_and_bare_fences() {
        assert_eq!(strip_fences("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_fences("```\n[]```"), "[]");
        assert_eq!(strip_fences("  [2]  "), "[2]");
    }

    #[test]
    fn parses_clean_array() -> anyhow::Result<()> {
        let segments = parse_segments(r#"[{"id":"0_0","start":"0:01","text":"안녕"}]"#)?;
        assert_eq!(segments, vec![Segment::new("0:01", "안녕")]);
        Ok(())
    }

    #[test]
    fn repairs_truncated_tail() -> anyhow::Result<()> {
        let raw = r#"```json
[{"id":"0_0","start":"0:01","text":"a"},{"id":"0_1","start":"0:02","text":"b"},{"id":"0_2","start":"0:0"#;
        let segments = parse_segments(raw)?;
        assert_eq!(
            segments,
            vec![Segment::new("0:01", "a"), Segment::new("0:02", "b")]
        );
        Ok(())
    }

    #[test]
    fn repair_walks_back_past_nested_braces() {
        let raw = r#"[{"a":1},{"b":{"c":2}"#;
        assert_eq!(repair_truncated_json(raw).as_deref(), Some(r#"[{"a":1}]"#));
    }

    #[test]
    fn unrecoverable_text_is_malformed() {
        let err = parse_segments("sorry, I cannot help").unwrap_err();
        assert!(matches!(err, JobError::MalformedResponse(_)));

        let err = parse_segments("   ").unwrap_err();
        assert!(matches!(err, JobError::MalformedResponse(_)));
    }

    #[test]
    fn tolerates_numeric_ids_and_missing_fields() -> anyhow::Result<()> {
        let segments = parse_segments(r#"[{"id":3,"start":"0:09"},{"text":"x"}]"#)?;
        assert_eq!(
            segments,
            vec![Segment::new("0:09", ""), Segment::new("", "x")]
        );
        Ok(())
    }
}
