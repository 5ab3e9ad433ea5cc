//! Configuration for a syncing peer.

use std::time::Duration;

/// Default period for checking whether a leader is known.
pub const DEFAULT_CHECK_LEADER_INTERVAL: Duration = Duration::from_millis(200);

/// Configuration for sync behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Poll period for the "leader known" signal when the elector cannot push
    /// it. Bounds election-detection latency.
    pub check_leader_interval: Duration,
    /// Coalescing window for outgoing updates. Zero sends every dispatch.
    pub debounce: Duration,
    /// How long a new leader waits for an answer to its force ask.
    /// Defaults to `check_leader_interval`.
    pub init_timeout: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            check_leader_interval: DEFAULT_CHECK_LEADER_INTERVAL,
            debounce: Duration::ZERO,
            init_timeout: None,
        }
    }
}

impl SyncConfig {
    pub fn with_check_leader_interval(mut self, interval: Duration) -> Self {
        self.check_leader_interval = interval;
        self
    }

    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = Some(timeout);
        self
    }

    /// Effective wait for force-ask replies.
    pub fn init_timeout(&self) -> Duration {
        self.init_timeout.unwrap_or(self.check_leader_interval)
    }

    /// Check the configuration for values the peer cannot run with.
    pub fn validate(&self) -> std::result::Result<(), &'static str> {
        if self.check_leader_interval.is_zero() {
            return Err("check_leader_interval must be greater than zero");
        }
        Ok(())
    }
}
