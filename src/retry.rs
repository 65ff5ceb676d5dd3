//! Backoff policy shared by the event scanner and the relay executor.
//!
//! Delays are computed by [`BackoffPolicy`] and applied through a [`Sleeper`] so tests
//! can observe the schedule without waiting on real time.

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub strategy: BackoffStrategy,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Retries allowed per budget (see [`Backoff`])
    pub max_attempts: u32,
    pub max_total_wait_ms: u64,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            max_attempts: 8,
            max_total_wait_ms: 30_000,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base_delay_ms: delay.as_millis() as u64,
            max_delay_ms: delay.as_millis() as u64,
            max_attempts,
            max_total_wait_ms: delay.as_millis() as u64 * max_attempts as u64,
            jitter: false,
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let base = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay_ms,
            BackoffStrategy::Exponential => self
                .base_delay_ms
                .saturating_mul(1u64 << retry.min(20)),
        };
        let capped = base.min(self.max_delay_ms);

        // Equal jitter: half fixed, half random, so delays never collapse to zero
        let millis = if self.jitter && capped > 1 {
            let half = capped / 2;
            half + rand::thread_rng().gen_range(0..=capped - half)
        } else {
            capped
        };
        Duration::from_millis(millis)
    }

    /// Start a fresh retry budget
    pub fn start(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            retries: 0,
            waited: Duration::ZERO,
        }
    }
}

/// A retry budget: bounded by attempt count and by total time spent waiting.
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    retries: u32,
    waited: Duration,
}

impl Backoff {
    /// Next delay, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.policy.max_attempts {
            return None;
        }
        let mut delay = self.policy.delay(self.retries);

        // A zero total budget means only the attempt count applies
        if self.policy.max_total_wait_ms > 0 {
            let budget = Duration::from_millis(self.policy.max_total_wait_ms);
            let remaining = budget.saturating_sub(self.waited);
            if remaining.is_zero() {
                return None;
            }
            delay = delay.min(remaining);
        }

        self.retries += 1;
        self.waited += delay;
        Some(delay)
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }
}

/// Suspension point used between attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exponential(jitter: bool) -> BackoffPolicy {
        BackoffPolicy {
            strategy: BackoffStrategy::Exponential,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            max_attempts: 10,
            max_total_wait_ms: 60_000,
            jitter,
        }
    }

    #[test]
    fn exponential_doubles_until_cap() {
        let policy = exponential(false);
        let delays: Vec<u64> = (0..6).map(|r| policy.delay(r).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn jitter_stays_within_half_to_full_delay() {
        let policy = exponential(true);
        for retry in 0..8 {
            let expected = policy.clone();
            let ceiling = BackoffPolicy {
                jitter: false,
                ..expected
            }
            .delay(retry);
            let d = policy.delay(retry);
            assert!(d <= ceiling, "{:?} > {:?}", d, ceiling);
            assert!(d >= ceiling / 2, "{:?} < half of {:?}", d, ceiling);
        }
    }

    #[test]
    fn budget_stops_after_max_attempts() {
        let mut backoff = BackoffPolicy::fixed(Duration::from_millis(50), 3).start();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(50)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(50)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(50)));
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.retries(), 3);
    }

    #[test]
    fn budget_clamps_to_total_wait() {
        let policy = BackoffPolicy {
            max_total_wait_ms: 250,
            ..exponential(false)
        };
        let mut backoff = policy.start();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(150)));
        assert_eq!(backoff.next_delay(), None);
    }
}
