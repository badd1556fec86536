//! Canned failure walkthroughs against a live pair of participants.

use log::info;

use crate::registry::Role;
use crate::scheduler::ConcurrentScheduler;
use crate::transport::Transport;

/// Amounts of the concurrent batch in the last scenario.
pub const CONCURRENT_BATCH: [u64; 5] = [100, 200, 300, 400, 500];

/// Runs the four canned scenarios in order and returns one concatenated log.
///
/// 1. The debit node is crashed while a transfer of 100 runs, then restarted.
/// 2. A transfer of 2000 exceeds the debit balance.
/// 3. A transfer of 600 goes down the slow path and times out at the debit
///    node whenever the slow-path delay outlasts the call timeout, as it does
///    by default.
/// 4. A concurrent batch of [`CONCURRENT_BATCH`].
pub async fn demonstrate_failure_scenarios<T: Transport + 'static>(
    scheduler: &ConcurrentScheduler<T>,
) -> Vec<String> {
    let coordinator = scheduler.coordinator();
    let mut logs = vec!["=== DEMONSTRATING FAILURE SCENARIOS ===".to_string()];

    logs.push("SCENARIO 1: Node crash during prepare phase".to_string());
    let crashed = coordinator.crash_node(Role::Debit).await;
    info!("Crash request: {}", crashed.describe());
    let report = coordinator.execute_transaction_with_id(100, "FAIL-001").await;
    logs.extend(report.logs);
    let restarted = coordinator.restart_node(Role::Debit).await;
    info!("Restart request: {}", restarted.describe());

    logs.push(String::new());
    logs.push("SCENARIO 2: Insufficient funds".to_string());
    let report = coordinator.execute_transaction_with_id(2000, "FAIL-002").await;
    logs.extend(report.logs);

    logs.push(String::new());
    logs.push("SCENARIO 3: Network timeout (simulated)".to_string());
    let report = coordinator.execute_transaction_with_id(600, "FAIL-003").await;
    logs.extend(report.logs);

    logs.push(String::new());
    logs.push("SCENARIO 4: Concurrent transactions with random failures".to_string());
    let batch = scheduler.execute_concurrent(&CONCURRENT_BATCH).await;
    logs.extend(batch.logs);

    logs.push("=== FAILURE DEMONSTRATION COMPLETE ===".to_string());
    logs
}
