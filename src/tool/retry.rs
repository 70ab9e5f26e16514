//! Bounded retry with exponential backoff and jitter

use rand::Rng;
use std::time::Duration;

/// How transient failures are retried
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (minimum 1)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for a single delay, before jitter
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy with no delay between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Whether another attempt is allowed after `attempts` have run
    pub fn allows_retry(&self, state: &RetryState) -> bool {
        state.attempts < self.max_attempts.max(1)
    }

    /// Compute the next delay and advance the backoff in `state`.
    /// Jitter scales each delay by 0.5x to 1.5x.
    pub fn next_delay(&self, state: &mut RetryState) -> Duration {
        let base = state.next_base.unwrap_or(self.initial_delay);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let delay = Duration::from_secs_f64(base.as_secs_f64() * jitter);

        state.next_base = Some(Duration::from_secs_f64(
            (base.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        ));
        state.total_backoff += delay;
        delay
    }
}

/// Progress of a single invocation through its retry budget
#[derive(Debug, Default, Clone)]
pub struct RetryState {
    pub attempts: u32,
    pub total_backoff: Duration,
    next_base: Option<Duration>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }
}
