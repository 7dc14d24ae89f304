use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::backend::BackendError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// What a single backend attempt means for the retry loop.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    Retryable(BackendError),
    Fatal(BackendError),
}

impl<T> AttemptOutcome<T> {
    /// Only rate limiting is worth another attempt.
    pub fn classify(result: Result<T, BackendError>) -> Self {
        match result {
            Ok(value) => AttemptOutcome::Success(value),
            Err(e) if e.is_rate_limited() => AttemptOutcome::Retryable(e),
            Err(e) => AttemptOutcome::Fatal(e),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("backend still rate limited after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: BackendError },
    #[error(transparent)]
    Fatal(BackendError),
}

/// Bounded exponential backoff without jitter: the first attempt runs
/// immediately, retry `n` waits `base_delay * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before the attempt at zero-based `index`.
    pub fn delay_before(&self, index: u32) -> Duration {
        match index {
            0 => Duration::ZERO,
            n => self.base_delay.saturating_mul(1u32 << (n - 1).min(31)),
        }
    }

    /// Full wait schedule, one entry per attempt.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts).map(|i| self.delay_before(i)).collect()
    }

    /// Drives `attempt` until it succeeds, fails fatally, or attempts run out.
    /// The closure receives the one-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut attempt: F) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut index = 0;
        loop {
            let delay = self.delay_before(index);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            index += 1;

            match AttemptOutcome::classify(attempt(index).await) {
                AttemptOutcome::Success(value) => return Ok(value),
                AttemptOutcome::Fatal(e) => return Err(RetryError::Fatal(e)),
                AttemptOutcome::Retryable(e) if index >= self.max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: index,
                        last: e,
                    });
                }
                AttemptOutcome::Retryable(e) => {
                    warn!(
                        "Backend rate limited on attempt {}/{}, retrying in {:?}: {}",
                        index,
                        self.max_attempts,
                        self.delay_before(index),
                        e
                    );
                }
            }
        }
    }
}
