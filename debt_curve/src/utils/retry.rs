use std::{future::Future, time::Duration};

use tracing::debug;

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed,
    /// Doubles the delay after every attempt, capped at `max`
    Exponential { max: Duration },
}

/// Bounded retry of an async operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(500),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, delay: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Exponential { max },
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.delay.saturating_mul(factor).min(max)
            }
        }
    }

    /// Runs `operation` until `should_retry` rejects its output or the attempts are exhausted.
    ///
    /// The output of the last attempt is returned either way, so the caller decides what an
    /// exhausted retry means.
    pub async fn run<T, F, Fut, R>(&self, mut operation: F, should_retry: R) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = T>,
        R: Fn(&T) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let output = operation().await;
            if attempt >= max_attempts || !should_retry(&output) {
                return output;
            }

            let delay = self.delay_for(attempt);
            debug!("Attempt {}/{} will be retried in {:?}", attempt, max_attempts, delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
