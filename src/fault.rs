use log::warn;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::errors::{Result, SeshatError};

/// Reason reported for every injected prepare failure.
pub const PREPARE_FAILURE_REASON: &str = "Node failure during prepare";

/// Faults a participant node injects into its own prepare handling.
///
/// The node consults this policy before voting; the ledger never sees it. A
/// crashed node keeps serving every command, but all of its prepares fail.
/// Independently, each prepare fails with probability `fail_probability`.
pub struct FaultPolicy {
    fail_probability: f64,
    crashed: AtomicBool,
    prepare_delay: Mutex<Option<Duration>>,
}

impl FaultPolicy {
    pub fn new(fail_probability: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&fail_probability) {
            return Err(SeshatError::Config(format!(
                "fail_probability must be within [0.0, 1.0], got {}",
                fail_probability
            )));
        }
        Ok(Self {
            fail_probability,
            crashed: AtomicBool::new(false),
            prepare_delay: Mutex::new(None),
        })
    }

    /// A policy that never injects anything.
    pub fn reliable() -> Self {
        Self {
            fail_probability: 0.0,
            crashed: AtomicBool::new(false),
            prepare_delay: Mutex::new(None),
        }
    }

    pub fn fail_probability(&self) -> f64 {
        self.fail_probability
    }

    pub fn crash(&self) {
        self.crashed.store(true, Ordering::SeqCst);
        warn!("Node crashed (simulated)");
    }

    pub fn restart(&self) {
        self.crashed.store(false, Ordering::SeqCst);
        warn!("Node restarted");
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Stall every subsequent prepare by `delay` before it votes.
    pub fn set_prepare_delay(&self, delay: Option<Duration>) {
        *self.prepare_delay.lock() = delay;
    }

    pub fn prepare_delay(&self) -> Option<Duration> {
        *self.prepare_delay.lock()
    }

    /// Rolls the dice for one prepare. Returns the failure reason if it should fail.
    pub fn prepare_fault(&self) -> Option<&'static str> {
        if self.is_crashed() {
            return Some(PREPARE_FAILURE_REASON);
        }
        if self.fail_probability > 0.0 && rand::rng().random::<f64>() < self.fail_probability {
            warn!("Simulated failure during prepare");
            return Some(PREPARE_FAILURE_REASON);
        }
        None
    }
}
