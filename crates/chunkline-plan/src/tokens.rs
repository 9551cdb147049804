//! Cheap token estimate used for chunk sizing.
//!
//! Narrow (Latin-like) characters count as a quarter token, wide CJK/Hangul
//! characters as half a token; the sum is rounded up.

/// Wide/CJK ranges that tokenize roughly twice as densely as narrow text.
fn is_wide(c: char) -> bool {
    matches!(
        c as u32,
        0x1100..=0x115F
            | 0x2E80..=0x303E
            | 0x3041..=0x33FF
            | 0x3400..=0x4DBF
            | 0x4E00..=0x9FFF
            | 0xA000..=0xA4CF
            | 0xA960..=0xA97F
            | 0xAC00..=0xD7A3
            | 0xF900..=0xFAFF
            | 0xFE30..=0xFE4F
            | 0xFF00..=0xFF60
            | 0xFFE0..=0xFFE6
            | 0x20000..=0x2FFFD
            | 0x30000..=0x3FFFD
    )
}

pub fn estimate_tokens(text: &str) -> usize {
    let (narrow, wide) = text.chars().fold((0_usize, 0_usize), |(narrow, wide), c| {
        if is_wide(c) {
            (narrow, wide + 1)
        } else {
            (narrow + 1, wide)
        }
    });
    // narrow/4 + wide/2, rounded up
    (narrow + 2 * wide).div_ceil(4)
}
