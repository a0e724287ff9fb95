//! Per-provider sliding-log request limiter.
//!
//! Admission is "at most N requests in any trailing 60 second interval",
//! recomputed from the stored timestamps on every check. Nothing blocks or
//! sleeps here; `wait_time` is advisory.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::RegistryError;
use crate::providers::{ProviderRegistry, RateLimitQuota};

pub const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RateLimiter {
    provider: String,
    requests_per_minute: u32,
    requests: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(provider: impl Into<String>, quota: RateLimitQuota) -> Self {
        Self {
            provider: provider.into(),
            requests_per_minute: quota.requests_per_minute,
            requests: VecDeque::new(),
        }
    }

    /// Reads the quota once; later registry edits do not affect this limiter.
    pub fn for_provider(
        registry: &ProviderRegistry,
        provider: &str,
    ) -> Result<Self, RegistryError> {
        let quota = registry.get_rate_limit_info(provider)?;
        Ok(Self::new(provider, quota))
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    pub fn check(&mut self) -> bool {
        self.check_at(Instant::now())
    }

    /// Drops timestamps that fell out of the window, then compares with the quota.
    pub fn check_at(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.requests.len() < self.requests_per_minute as usize
    }

    pub fn record(&mut self) {
        self.record_at(Instant::now());
    }

    /// Callers are expected to `check` first; ordering is not enforced.
    pub fn record_at(&mut self, now: Instant) {
        self.requests.push_back(now);
    }

    pub fn wait_time(&self) -> Duration {
        self.wait_time_at(Instant::now())
    }

    pub fn wait_time_at(&self, now: Instant) -> Duration {
        if self.requests.len() < self.requests_per_minute as usize {
            return Duration::ZERO;
        }
        let Some(oldest) = self.requests.iter().min() else {
            return Duration::ZERO;
        };
        WINDOW.saturating_sub(now.saturating_duration_since(*oldest))
    }

    pub fn remaining_at(&mut self, now: Instant) -> u32 {
        self.prune(now);
        self.requests_per_minute
            .saturating_sub(self.requests.len() as u32)
    }

    pub fn recorded(&self) -> usize {
        self.requests.len()
    }

    fn prune(&mut self, now: Instant) {
        self.requests
            .retain(|timestamp| now.saturating_duration_since(*timestamp) < WINDOW);
    }
}
