//! Stable content fingerprints for drift detection.
//!
//! 32-bit FNV-1a over one `start|text` line per segment, with runs of
//! whitespace collapsed. Used for equality only, never for security.

use chunkline_protocol::Segment;

/// Fingerprint of an empty segment list.
pub const EMPTY_FINGERPRINT: &str = "00000000";

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

pub fn fnv1a32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Trim and collapse every whitespace run to a single space.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn build_fingerprint(segments: &[Segment]) -> String {
    if segments.is_empty() {
        return EMPTY_FINGERPRINT.to_owned();
    }

    let canonical = segments
        .iter()
        .map(|segment| {
            format!(
                "{}|{}",
                normalize_whitespace(segment.start.as_str()),
                normalize_whitespace(&segment.text)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!("{:08x}", fnv1a32(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv_matches_reference_vectors() {
        assert_eq!(fnv1a32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn empty_input_has_fixed_fingerprint() {
        assert_eq!(build_fingerprint(&[]), EMPTY_FINGERPRINT);
    }

    #[test]
    fn ignores_whitespace_run_length() {
        let tight = vec![Segment::new("0:01", "a b"), Segment::new("0:02", "c")];
        let loose = vec![Segment::new("0:01", " a   b "), Segment::new("0:02", "c\n")];
        assert_eq!(build_fingerprint(&tight), build_fingerprint(&loose));
        assert_eq!(build_fingerprint(&tight).len(), 8);
    }

    #[test]
    fn sensitive_to_order_and_tokens() {
        let base = vec![Segment::new("0:01", "a"), Segment::new("0:02", "b")];
        let swapped = vec![Segment::new("0:02", "b"), Segment::new("0:01", "a")];
        let edited = vec![Segment::new("0:01", "a"), Segment::new("0:02", "bb")];
        let retimed = vec![Segment::new("0:01", "a"), Segment::new("0:03", "b")];

        let fp = build_fingerprint(&base);
        assert_eq!(fp, build_fingerprint(&base));
        assert_ne!(fp, build_fingerprint(&swapped));
        assert_ne!(fp, build_fingerprint(&edited));
        assert_ne!(fp, build_fingerprint(&retimed));
    }
}
