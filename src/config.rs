use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{Result, SeshatError};
use crate::message::DEFAULT_MAX_FRAME_LENGTH;

/// Balance every participant starts with, and returns to on `reset`.
pub const INITIAL_BALANCE: u64 = 1000;

/// Probability of an injected prepare failure when none is configured.
pub const DEFAULT_FAIL_PROBABILITY: f64 = 0.3;

/// Settings for one participant node process.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NodeConfig {
    pub host: String,
    /// Listening port. `0` lets the OS pick one.
    pub port: u16,
    /// Chance, in `[0.0, 1.0]`, that a single `prepare` fails on purpose.
    pub fail_probability: f64,
    pub initial_balance: u64,
    pub max_frame_length: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            fail_probability: DEFAULT_FAIL_PROBABILITY,
            initial_balance: INITIAL_BALANCE,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl NodeConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn with_fail_probability(mut self, fail_probability: f64) -> Self {
        self.fail_probability = fail_probability;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.fail_probability) {
            return Err(SeshatError::Config(format!(
                "fail_probability must be within [0.0, 1.0], got {}",
                self.fail_probability
            )));
        }
        if self.max_frame_length == 0 {
            return Err(SeshatError::Config("max_frame_length must be positive".into()));
        }
        Ok(())
    }
}

/// Large debits get a delay hint attached to their prepare so the timeout path
/// can be exercised without touching the nodes. The default delay outlasts the
/// default `call_timeout`, so such a debit times out.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SlowPath {
    /// Debits strictly above this amount are slowed down.
    pub threshold: u64,
    pub delay: Duration,
}

impl Default for SlowPath {
    fn default() -> Self {
        Self {
            threshold: 500,
            delay: Duration::from_secs(6),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CoordinatorConfig {
    /// Per-call timeout for protocol messages.
    pub call_timeout: Duration,
    /// Per-call timeout for balance and fault-injection queries.
    pub status_timeout: Duration,
    pub slow_path: Option<SlowPath>,
    pub max_frame_length: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            status_timeout: Duration::from_secs(2),
            slow_path: Some(SlowPath::default()),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.call_timeout.is_zero() || self.status_timeout.is_zero() {
            return Err(SeshatError::Config("timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on transactions with outstanding remote calls.
    pub concurrency_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 3,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(SeshatError::Config("concurrency_limit must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_the_demo_setup() {
        let node = NodeConfig::default();
        assert_eq!(node.initial_balance, 1000);
        assert_eq!(node.fail_probability, 0.3);
        assert!(node.validate().is_ok());

        let coordinator = CoordinatorConfig::default();
        let slow_path = coordinator.slow_path.unwrap();
        assert_eq!(slow_path.threshold, 500);
        assert!(slow_path.delay > coordinator.call_timeout);
        assert!(coordinator.validate().is_ok());

        assert_eq!(SchedulerConfig::default().concurrency_limit, 3);
    }

    #[test]
    fn test_out_of_range_probability_is_rejected() {
        let config = NodeConfig::new(6001).with_fail_probability(1.5);
        assert!(matches!(config.validate(), Err(SeshatError::Config(_))));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let config = SchedulerConfig { concurrency_limit: 0 };
        assert!(config.validate().is_err());
    }
}
