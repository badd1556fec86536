use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// How a logical transaction ended, from the coordinator's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionOutcome {
    Committed,
    RolledBack,
    /// Commit was decided but not every participant confirmed it.
    PartialCommit,
}

/// Outcome counters owned by one coordinator. Only ever incremented.
#[derive(Debug, Default)]
pub struct TransactionStats {
    committed: AtomicU64,
    rolled_back: AtomicU64,
    partial_commits: AtomicU64,
}

impl TransactionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: TransactionOutcome) {
        let counter = match outcome {
            TransactionOutcome::Committed => &self.committed,
            TransactionOutcome::RolledBack => &self.rolled_back,
            TransactionOutcome::PartialCommit => &self.partial_commits,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            committed: self.committed.load(Ordering::SeqCst),
            rolled_back: self.rolled_back.load(Ordering::SeqCst),
            partial_commits: self.partial_commits.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time copy of [`TransactionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub committed: u64,
    pub rolled_back: u64,
    pub partial_commits: u64,
}

impl StatsSnapshot {
    pub fn total(&self) -> u64 {
        self.committed + self.rolled_back + self.partial_commits
    }

    /// Fraction of transactions that committed cleanly, `0.0` when there were none.
    pub fn success_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.committed as f64 / total as f64,
        }
    }
}
