//! Injected clock and sleep, so routing/classification determinism is
//! testable.

use chrono::{DateTime, Utc};
use std::time::Duration;

pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[async_trait::async_trait]
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[async_trait::async_trait]
impl Sleeper for SystemClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Test double that returns a fixed instant and never actually sleeps.
#[derive(Debug, Clone)]
pub struct FixedClock {
    pub fixed: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(fixed: DateTime<Utc>) -> Self {
        Self { fixed }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.fixed
    }
}

#[async_trait::async_trait]
impl Sleeper for FixedClock {
    async fn sleep(&self, _duration: Duration) {
        // Test double: no-op so unit tests don't stall.
    }
}
