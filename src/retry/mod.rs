//! Retry with exponential backoff
//!
//! A small parameterized loop over {max attempts, base delay, transient classifier}.
//! The wrapped operation and the sleep hook are both injected, so the policy can be
//! exercised without a network or real waiting.


use async_trait::async_trait;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

/// Hook used between attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    #[inline]
    async fn sleep(&self, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for every further retry
    pub base_delay: Duration,
}

/// Why a retried operation ultimately failed
#[derive(Debug, PartialEq, Eq)]
pub enum RetryFailure<E> {
    /// The classifier marked the error as non-transient; no further attempts were made
    Fatal { attempt: u32, error: E },
    /// Every attempt failed with a transient error; `error` is the last one
    Exhausted { attempts: u32, error: E },
}

impl<E> RetryFailure<E> {
    #[inline]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Fatal { attempt, .. } => *attempt,
            Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    #[inline]
    pub fn into_error(self) -> E {
        match self {
            Self::Fatal { error, .. } | Self::Exhausted { error, .. } => error,
        }
    }
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    #[inline]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay to wait after the given failed attempt (1-based): `base * 2^(attempt - 1)`
    #[inline]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = EXPONENTIAL_BACKOFF_BASE.saturating_pow(exponent);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `operation` until it succeeds, fails fatally, or attempts run out.
    ///
    /// `operation` receives the 1-based attempt number.
    #[inline]
    pub async fn run<T, E, Op, Fut, C>(
        &self,
        sleeper: &dyn Sleeper,
        is_transient: C,
        mut operation: Op,
    ) -> Result<T, RetryFailure<E>>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!("Attempt {}/{}", attempt, max_attempts);

            let error = match operation(attempt).await {
                Ok(value) => {
                    debug!("Succeeded on attempt {}", attempt);
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !is_transient(&error) {
                warn!("Non-retryable error on attempt {}: {}", attempt, error);
                return Err(RetryFailure::Fatal { attempt, error });
            }

            if attempt >= max_attempts {
                error!("All {} attempts failed, last error: {}", max_attempts, error);
                return Err(RetryFailure::Exhausted {
                    attempts: attempt,
                    error,
                });
            }

            let delay = self.delay_after(attempt);
            warn!(
                "Transient error on attempt {}/{}: {}; retrying in {:?}",
                attempt, max_attempts, error, delay
            );
            sleeper.sleep(delay).await;
            attempt += 1;
        }
    }
}
