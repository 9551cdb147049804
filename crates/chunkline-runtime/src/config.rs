use std::time::Duration;

use chunkline_plan::PlannerLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Back-off before retry number `attempt` (1-based): `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub limits: PlannerLimits,
    pub retry: RetryPolicy,
    /// Pause between two chunks of the same job.
    pub inter_chunk_delay: Duration,
    /// How many trailing translated segments feed the next prompt's context.
    pub context_tail: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            limits: PlannerLimits::default(),
            retry: RetryPolicy::default(),
            inter_chunk_delay: Duration::from_millis(300),
            context_tail: 3,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_limits(mut self, limits: PlannerLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_inter_chunk_delay(mut self, delay: Duration) -> Self {
        self.inter_chunk_delay = delay;
        self
    }

    pub fn with_context_tail(mut self, context_tail: usize) -> Self {
        self.context_tail = context_tail;
        self
    }
}

/// Per-job knobs passed through to the provider and the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslateConfig {
    pub thinking_level: String,
    pub title: String,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            thinking_level: "minimal".to_owned(),
            title: "Unknown".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_from_twice_the_base() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.limits.soft_limit, 2800);
        assert_eq!(config.limits.hard_limit, 3800);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.inter_chunk_delay, Duration::from_millis(300));
        assert_eq!(config.context_tail, 3);
        assert_eq!(TranslateConfig::default().thinking_level, "minimal");
    }
}
