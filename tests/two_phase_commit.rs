mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{SharedTransport, TestCluster, TestTransport, fast_config};
use seshat::prelude::*;

fn has_line(report: &TransactionReport, needle: &str) -> bool {
    report.logs.iter().any(|line| line.contains(needle))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_transfer_commits_on_both_nodes() {
    let cluster = TestCluster::start().await;
    let coordinator = cluster.coordinator(CoordinatorConfig::default());

    let report = coordinator.execute_transaction(300).await;

    assert_eq!(report.outcome, TransactionOutcome::Committed);
    assert!(report.votes.iter().all(|v| v.ready));
    assert_eq!(report.initial_balance(Role::Debit), Some(1000));
    assert_eq!(report.final_balance(Role::Debit), Some(700));
    assert_eq!(report.final_balance(Role::Credit), Some(1300));
    assert!(has_line(&report, "Sender ready"));
    assert!(has_line(&report, "Receiver ready"));
    assert!(has_line(&report, "TRANSACTION COMMITTED"));
    assert!(report.logs.iter().all(|l| l.starts_with(&format!("TX {}:", report.tx_id))));
    assert_eq!(cluster.balances(), (700, 1300));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_insufficient_funds_rolls_back() {
    let cluster = TestCluster::start().await;
    let coordinator = cluster.coordinator(CoordinatorConfig::default());

    let report = coordinator.execute_transaction(2000).await;

    assert_eq!(report.outcome, TransactionOutcome::RolledBack);
    assert!(!report.votes[0].ready);
    assert_eq!(report.votes[0].reason.as_deref(), Some("Insufficient funds"));
    assert!(has_line(&report, "TRANSACTION ROLLED BACK"));
    assert_eq!(report.final_balance(Role::Debit), Some(1000));
    assert_eq!(report.final_balance(Role::Credit), Some(1000));
    assert_eq!(cluster.debit.service().ledger().in_flight_count(), 0);
    assert_eq!(cluster.credit.service().ledger().in_flight_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_crashed_debit_node_blocks_the_transfer() {
    let cluster = TestCluster::start().await;
    let coordinator = cluster.coordinator(CoordinatorConfig::default());

    assert!(coordinator.crash_node(Role::Debit).await.is(Status::Crashed));
    let report = coordinator.execute_transaction(100).await;

    assert_eq!(report.outcome, TransactionOutcome::RolledBack);
    assert_eq!(
        report.votes[0].reason.as_deref(),
        Some("Node failure during prepare")
    );
    assert!(has_line(&report, "Sender failed: Node failure during prepare"));
    assert!(has_line(&report, "Receiver rolled back"));
    assert_eq!(cluster.balances(), (1000, 1000));

    assert!(coordinator.restart_node(Role::Debit).await.is(Status::Restarted));
    let report = coordinator.execute_transaction(100).await;
    assert_eq!(report.outcome, TransactionOutcome::Committed);
    assert_eq!(cluster.balances(), (900, 1100));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_slow_debit_times_out_and_releases_nothing() {
    let cluster = TestCluster::start().await;
    let config = fast_config();
    let stall = config.slow_path.unwrap().delay;
    let coordinator = cluster.coordinator(config);

    let report = coordinator.execute_transaction(600).await;

    assert_eq!(report.outcome, TransactionOutcome::RolledBack);
    assert_eq!(report.votes[0].reason.as_deref(), Some("Connection timed out"));
    assert!(report.votes[1].ready);

    // Let the stalled prepare wake up and notice the rollback.
    tokio::time::sleep(stall + Duration::from_millis(300)).await;
    assert_eq!(cluster.balances(), (1000, 1000));
    assert_eq!(cluster.debit.service().ledger().in_flight_count(), 0);
    assert_eq!(cluster.credit.service().ledger().in_flight_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_amount_at_threshold_takes_the_fast_path() {
    let cluster = TestCluster::start().await;
    let coordinator = cluster.coordinator(fast_config());

    let report = coordinator.execute_transaction(500).await;
    assert_eq!(report.outcome, TransactionOutcome::Committed);
    assert_eq!(cluster.balances(), (500, 1500));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lost_commit_is_reported_as_partial() {
    let cluster = TestCluster::start().await;
    let transport = Arc::new(TestTransport::new());
    transport.lose_commits_to(Role::Credit);
    let coordinator =
        cluster.coordinator_with(CoordinatorConfig::default(), SharedTransport(transport));

    let report = coordinator.execute_transaction(300).await;

    assert_eq!(report.outcome, TransactionOutcome::PartialCommit);
    assert!(has_line(&report, "Sender committed. Balance: $700"));
    assert!(has_line(&report, "Receiver commit failed"));
    assert!(has_line(&report, "PARTIAL COMMIT - needs recovery"));
    assert!(!has_line(&report, "TRANSACTION COMMITTED"));
    assert_eq!(report.stats.partial_commits, 1);

    // Nothing repairs the anomaly: the credit side keeps its prepared record.
    assert_eq!(cluster.balances(), (700, 1000));
    assert_eq!(cluster.credit.service().ledger().in_flight_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_node_is_a_negative_vote() {
    let mut cluster = TestCluster::start().await;
    let coordinator = cluster.coordinator(fast_config());
    cluster.credit.shutdown().await;

    let report = coordinator.execute_transaction(100).await;

    assert_eq!(report.outcome, TransactionOutcome::RolledBack);
    assert!(report.votes[0].ready);
    assert_eq!(
        report.votes[1].reason.as_deref(),
        Some("Connection refused - node down?")
    );
    assert_eq!(
        report.initial_balances[1].reading,
        BalanceReading::Unknown
    );
    assert!(has_line(&report, "Receiver=Unknown"));
    assert!(has_line(&report, "Receiver rollback not acknowledged"));
    assert_eq!(report.final_balance(Role::Debit), Some(1000));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_node_status_reset_and_stats() {
    let mut cluster = TestCluster::start().await;
    let coordinator = cluster.coordinator(fast_config());

    assert_eq!(coordinator.execute_transaction(250).await.outcome, TransactionOutcome::Committed);
    assert_eq!(coordinator.execute_transaction(5000).await.outcome, TransactionOutcome::RolledBack);

    let stats = coordinator.stats();
    assert_eq!(stats.committed, 1);
    assert_eq!(stats.rolled_back, 1);
    assert_eq!(stats.total(), 2);
    assert_eq!(stats.success_rate(), 0.5);

    assert_eq!(
        coordinator.node_status(cluster.debit.port()).await.unwrap(),
        NodeStatus::Active {
            balance: 750,
            crashed: false
        }
    );
    assert!(matches!(
        coordinator.node_status(1).await,
        Err(SeshatError::UnknownNode(_))
    ));

    let results = coordinator.reset_all().await;
    assert!(results.iter().all(|r| r.success && r.balance == Some(1000)));
    assert_eq!(cluster.balances(), (1000, 1000));

    let credit_port = cluster.credit.port();
    cluster.credit.shutdown().await;
    assert!(matches!(
        coordinator.node_status(credit_port).await.unwrap(),
        NodeStatus::Inactive { .. }
    ));
    let balances = coordinator.balances().await;
    assert_eq!(balances[0].reading.balance(), Some(1000));
    assert_eq!(balances[1].reading, BalanceReading::Unknown);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_generated_ids_are_unique() {
    let cluster = TestCluster::start().await;
    let coordinator = cluster.coordinator(CoordinatorConfig::default());

    let ids: std::collections::HashSet<_> =
        (0..100).map(|_| coordinator.next_transaction_id()).collect();
    assert_eq!(ids.len(), 100);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_delay_command_stalls_the_node() {
    let cluster = TestCluster::start().await;
    let coordinator = cluster.coordinator(CoordinatorConfig::default());

    let started = std::time::Instant::now();
    let outcome = coordinator
        .delay_node(Role::Credit, Duration::from_millis(200))
        .await;
    assert!(outcome.is(Status::Delayed));
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_forced_prepare_delay_times_out_any_amount() {
    let cluster = TestCluster::start().await;
    let coordinator = cluster.coordinator(fast_config());
    cluster
        .credit
        .service()
        .faults()
        .set_prepare_delay(Some(Duration::from_millis(700)));

    let report = coordinator.execute_transaction(10).await;

    assert_eq!(report.outcome, TransactionOutcome::RolledBack);
    assert!(report.votes[0].ready);
    assert_eq!(report.votes[1].reason.as_deref(), Some("Connection timed out"));
    assert_eq!(report.final_balance(Role::Debit), Some(1000));

    cluster.credit.service().faults().set_prepare_delay(None);
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(cluster.credit.service().ledger().in_flight_count(), 0);
    assert_eq!(coordinator.execute_transaction(10).await.outcome, TransactionOutcome::Committed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_default_slow_path_outlasts_the_call_timeout() {
    let cluster = TestCluster::start().await;
    let coordinator = cluster.coordinator(CoordinatorConfig::default());

    let report = coordinator.execute_transaction_with_id(600, "FAIL-003").await;

    assert_eq!(report.outcome, TransactionOutcome::RolledBack);
    assert_eq!(report.votes[0].reason.as_deref(), Some("Connection timed out"));
    assert!(has_line(&report, "TX FAIL-003: Sender failed: Connection timed out"));
    assert_eq!(report.final_balance(Role::Debit), Some(1000));
    assert_eq!(report.final_balance(Role::Credit), Some(1000));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unaffordable_debit_aborts_even_on_the_slow_path() {
    let cluster = TestCluster::start().await;
    let coordinator = cluster.coordinator(fast_config());

    let report = coordinator.execute_transaction_with_id(2000, "FAIL-002").await;

    assert_eq!(report.outcome, TransactionOutcome::RolledBack);
    assert_eq!(report.votes[0].reason.as_deref(), Some("Insufficient funds"));
    assert!(has_line(&report, "TX FAIL-002: Sender failed: Insufficient funds"));
    assert_eq!(cluster.balances(), (1000, 1000));
    assert_eq!(cluster.debit.service().ledger().in_flight_count(), 0);
}
