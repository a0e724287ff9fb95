use std::time::Duration;

use imagegen_contracts::{GenerateError, GlobalSettings, ProviderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryMode {
    /// Every failure is retried the same way.
    #[default]
    All,
    /// Stop on failures a later attempt cannot fix.
    TransientOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub mode: RetryMode,
}

impl RetryPolicy {
    pub fn from_settings(global: &GlobalSettings) -> Self {
        Self {
            max_attempts: global.max_retries,
            base_delay: Duration::try_from_secs_f64(global.retry_delay).unwrap_or(Duration::ZERO),
            mode: RetryMode::default(),
        }
    }

    /// Pause after the zero-based `attempt` failed: `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    fn should_retry(&self, err: &ProviderError) -> bool {
        match self.mode {
            RetryMode::All => true,
            RetryMode::TransientOnly => !err.is_permanent(),
        }
    }
}

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Runs `op` until it succeeds or the policy is spent, sleeping between
/// attempts only. The last provider error is returned as is.
pub fn run_with_retry<T>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut op: impl FnMut(u32) -> Result<T, ProviderError>,
    mut on_retry: impl FnMut(u32, &ProviderError, Duration),
) -> Result<T, GenerateError> {
    let mut attempt = 0;
    loop {
        if attempt >= policy.max_attempts {
            return Err(GenerateError::RetriesExhausted {
                attempts: policy.max_attempts,
            });
        }
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => {
                let last = attempt + 1 >= policy.max_attempts;
                if last || !policy.should_retry(&err) {
                    return Err(GenerateError::Provider(err));
                }
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    delay_secs = delay.as_secs_f64(),
                    "attempt failed: {err}"
                );
                on_retry(attempt, &err, delay);
                sleeper.sleep(delay);
            }
        }
        attempt += 1;
    }
}
