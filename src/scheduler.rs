//! Runs many transfers at once against the same participants.
//!
//! Every amount gets its own task. A semaphore sized to the concurrency limit
//! admits at most that many into the coordinator at a time; a finishing task
//! hands its permit straight to the next waiting one.

use log::{error, info};
use parking_lot::Mutex;
use rand::Rng;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

use crate::config::SchedulerConfig;
use crate::coordinator::{Coordinator, TransactionReport};
use crate::errors::{Result, SeshatError};
use crate::stats::TransactionOutcome;
use crate::transport::{TcpTransport, Transport};

/// Result of one worker in a batch.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    /// Position of the amount in the submitted batch.
    pub index: usize,
    pub amount: u64,
    pub tx_id: Option<String>,
    pub outcome: TransactionOutcome,
    /// `None` when the worker died before producing a report.
    pub report: Option<TransactionReport>,
    pub logs: Vec<String>,
}

impl BatchEntry {
    fn label(&self) -> String {
        match &self.tx_id {
            Some(tx_id) => tx_id.clone(),
            None => format!("#{:03}", self.index + 1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Entries in submission order.
    pub entries: Vec<BatchEntry>,
    pub committed: usize,
    pub rolled_back: usize,
    pub partial_commits: usize,
    /// Highest number of transactions that were inside the coordinator together.
    pub peak_in_flight: usize,
    pub logs: Vec<String>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.entries.len()
    }
}

/// Shared state of one running batch.
struct BatchState {
    results: Mutex<Vec<BatchEntry>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

pub struct ConcurrentScheduler<T = TcpTransport> {
    coordinator: Arc<Coordinator<T>>,
    config: SchedulerConfig,
}

impl<T: Transport + 'static> ConcurrentScheduler<T> {
    pub fn new(coordinator: Arc<Coordinator<T>>, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            coordinator,
            config,
        })
    }

    pub fn coordinator(&self) -> &Arc<Coordinator<T>> {
        &self.coordinator
    }

    pub fn concurrency_limit(&self) -> usize {
        self.config.concurrency_limit
    }

    /// Runs one transfer per amount with bounded concurrency and waits for all of them.
    pub async fn execute_concurrent(&self, amounts: &[u64]) -> BatchReport {
        let mut logs = vec![format!(
            "=== STARTING {} CONCURRENT TRANSACTIONS ===",
            amounts.len()
        )];
        info!("{}", logs[0]);

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit));
        let state = Arc::new(BatchState {
            results: Mutex::new(Vec::with_capacity(amounts.len())),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let mut workers = Vec::with_capacity(amounts.len());
        for (index, &amount) in amounts.iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let state = Arc::clone(&state);
            let coordinator = Arc::clone(&self.coordinator);

            let task = tokio::spawn(async move {
                // The semaphore is never closed, so acquiring only fails if that changes.
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        state.results.lock().push(failed_entry(index, amount, e.to_string()));
                        return;
                    }
                };

                let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                state.peak.fetch_max(now, Ordering::SeqCst);

                let report = coordinator.execute_transaction(amount).await;

                state.in_flight.fetch_sub(1, Ordering::SeqCst);
                state.results.lock().push(BatchEntry {
                    index,
                    amount,
                    tx_id: Some(report.tx_id.clone()),
                    outcome: report.outcome,
                    logs: report.logs.clone(),
                    report: Some(report),
                });
            });
            workers.push((index, amount, task));
        }

        for (index, amount, task) in workers {
            if let Err(e) = task.await {
                error!("Transaction worker {} failed: {}", index + 1, e);
                let mut results = state.results.lock();
                if !results.iter().any(|r| r.index == index) {
                    results.push(failed_entry(index, amount, e.to_string()));
                }
            }
        }

        let mut entries = std::mem::take(&mut *state.results.lock());
        entries.sort_by_key(|e| e.index);

        let count = |outcome| entries.iter().filter(|e| e.outcome == outcome).count();
        let committed = count(TransactionOutcome::Committed);
        let rolled_back = count(TransactionOutcome::RolledBack);
        let partial_commits = count(TransactionOutcome::PartialCommit);

        for entry in &entries {
            logs.extend(entry.logs.iter().cloned());
        }

        let mut summary = format!(
            "Total: {} | Committed: {} | Rolled back: {}",
            entries.len(),
            committed,
            rolled_back
        );
        if partial_commits > 0 {
            summary.push_str(&format!(" | Partial: {}", partial_commits));
        }
        logs.push("=== CONCURRENT TRANSACTIONS COMPLETE ===".to_string());
        logs.push(summary);
        for entry in &entries {
            let status = match entry.outcome {
                TransactionOutcome::Committed => "COMMITTED",
                TransactionOutcome::RolledBack => "ROLLED BACK",
                TransactionOutcome::PartialCommit => "PARTIAL COMMIT",
            };
            logs.push(format!("{}: {}", entry.label(), status));
        }
        info!(
            "Batch done: {} committed, {} rolled back, {} partial",
            committed, rolled_back, partial_commits
        );

        BatchReport {
            entries,
            committed,
            rolled_back,
            partial_commits,
            peak_in_flight: state.peak.load(Ordering::SeqCst),
            logs,
        }
    }

    /// Runs `count` transfers with amounts drawn uniformly from `amounts`.
    pub async fn execute_random(
        &self,
        count: usize,
        amounts: RangeInclusive<u64>,
    ) -> Result<BatchReport> {
        if amounts.is_empty() {
            return Err(SeshatError::Config(format!(
                "empty amount range {}..={}",
                amounts.start(),
                amounts.end()
            )));
        }

        let batch: Vec<u64> = {
            let mut rng = rand::rng();
            (0..count)
                .map(|_| rng.random_range(amounts.clone()))
                .collect()
        };
        Ok(self.execute_concurrent(&batch).await)
    }
}

fn failed_entry(index: usize, amount: u64, reason: String) -> BatchEntry {
    BatchEntry {
        index,
        amount,
        tx_id: None,
        outcome: TransactionOutcome::RolledBack,
        report: None,
        logs: vec![format!("Error: {}", reason)],
    }
}
