//! Timed text segments.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Offset from the start of the source, kept in its textual form
/// (`H:MM:SS`, `M:SS` or `S`) and parsed on demand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Timecode(String);

impl Timecode {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Seconds from the start. Malformed or empty input yields `0.0`.
    pub fn seconds(&self) -> f64 {
        parse_timecode(&self.0)
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Timecode {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for Timecode {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Parse `H:MM:SS`, `M:SS` or `S` into seconds. Never fails: anything
/// unparseable is `0.0`.
pub fn parse_timecode(raw: &str) -> f64 {
    let raw = raw.trim();
    if raw.is_empty() {
        return 0.0;
    }

    let mut parts = Vec::with_capacity(3);
    for part in raw.split(':') {
        match part.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => parts.push(value),
            _ => return 0.0,
        }
    }

    let seconds = match parts.as_slice() {
        [h, m, s] => h * 3600.0 + m * 60.0 + s,
        [m, s] => m * 60.0 + s,
        [s] => *s,
        _ => 0.0,
    };
    if seconds.is_finite() { seconds } else { 0.0 }
}

/// Minimal timed unit of source or translated text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Timecode,
    pub text: String,
}

impl Segment {
    pub fn new(start: impl Into<Timecode>, text: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            text: text.into(),
        }
    }

    pub fn start_seconds(&self) -> f64 {
        self.start.seconds()
    }
}

/// Join segment texts with single spaces, the draft form a refine pass consumes.
pub fn join_texts<'a>(segments: impl IntoIterator<Item = &'a Segment>) -> String {
    segments
        .into_iter()
        .map(|segment| segment.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}
