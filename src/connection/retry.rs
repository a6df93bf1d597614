use std::time::Duration;

/// Exponential backoff: `min(base * 2^(attempt - 1), cap)`.
///
/// Deterministic and overflow-safe. No jitter is applied, so two processes
/// started together will retry in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Wait before retrying after failed attempt number `attempt` (1-based).
    /// Attempt 0 is treated as 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Bookkeeping for one connect sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
    waits: Vec<Duration>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the next attempt and returns its number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn record_wait(&mut self, delay: Duration) {
        self.waits.push(delay);
    }

    pub fn waits(&self) -> &[Duration] {
        &self.waits
    }

    pub fn total_wait(&self) -> Duration {
        self.waits.iter().sum()
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.waits.clear();
    }
}
