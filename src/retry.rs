//! Bounded exponential backoff.

use std::{fmt, future::Future, time::Duration};

use tracing::warn;

/// Exponential backoff policy: `initial * multiplier^attempt`, capped at `max`,
/// for at most `budget` attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
    pub budget: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
            multiplier: 2,
            budget: 10,
        }
    }
}

impl Backoff {
    /// Delay before the retry following the failed `attempt` (zero based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.initial
            .saturating_mul(self.multiplier.saturating_pow(attempt))
            .min(self.max)
    }

    /// Runs `op` until it succeeds or the attempt budget is exhausted,
    /// returning the last error in the latter case.
    pub async fn retry<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let budget = self.budget.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 >= budget => return Err(err),
                Err(err) => {
                    let delay = self.delay(attempt);
                    warn!(%err, attempt, budget, ?delay, "{what} failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
