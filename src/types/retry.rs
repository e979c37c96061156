use std::time::Duration;

/// Bounded polling policy for the remote cluster backend. Injected as
/// configuration so tests can run it with zero sleep time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self { max_attempts, interval }
    }

    /// Default pod polling budget: 300 attempts at 2s, roughly ten minutes.
    pub const fn pod_default() -> Self {
        Self::new(300, Duration::from_secs(2))
    }

    /// Same attempt bound without any sleeping, for tests.
    pub const fn no_wait(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Total time the policy may block for.
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }

    pub async fn wait(&self) {
        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::pod_default()
    }
}
