use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Token counters returned by one upstream call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub thinking_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64, thinking_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            thinking_tokens,
        }
    }

    /// Output as billed: candidate tokens plus thinking tokens.
    pub fn billed_output(&self) -> u64 {
        self.output_tokens + self.thinking_tokens
    }

    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0 && self.thinking_tokens == 0
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
        self.thinking_tokens += rhs.thinking_tokens;
    }
}
