//! Common utilities for Seshat integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use seshat::prelude::*;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A debit node and a credit node on ephemeral local ports, both reliable.
pub struct TestCluster {
    pub debit: NodeHandle,
    pub credit: NodeHandle,
}

impl TestCluster {
    pub async fn start() -> Self {
        Self::start_with_fail_probability(0.0).await
    }

    pub async fn start_with_fail_probability(fail_probability: f64) -> Self {
        init_logging();
        Self {
            debit: spawn_node(fail_probability).await,
            credit: spawn_node(fail_probability).await,
        }
    }

    pub fn registry(&self) -> ParticipantRegistry {
        ParticipantRegistry::transfer(
            self.debit.participant(Role::Debit, "Sender"),
            self.credit.participant(Role::Credit, "Receiver"),
        )
        .unwrap()
    }

    pub fn coordinator(&self, config: CoordinatorConfig) -> Coordinator {
        Coordinator::new(self.registry(), config).unwrap()
    }

    pub fn coordinator_with<T: Transport>(
        &self,
        config: CoordinatorConfig,
        transport: T,
    ) -> Coordinator<T> {
        Coordinator::with_transport(self.registry(), config, transport).unwrap()
    }

    /// Balances straight from the ledgers, bypassing the network.
    pub fn balances(&self) -> (u64, u64) {
        (
            self.debit.service().ledger().balance(),
            self.credit.service().ledger().balance(),
        )
    }
}

pub async fn spawn_node(fail_probability: f64) -> NodeHandle {
    let config = NodeConfig::new(0).with_fail_probability(fail_probability);
    ParticipantNode::bind(config).await.unwrap().spawn().unwrap()
}

/// Coordinator settings that keep the slow path short enough for tests.
pub fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        call_timeout: Duration::from_millis(400),
        status_timeout: Duration::from_millis(400),
        slow_path: Some(SlowPath {
            threshold: 500,
            delay: Duration::from_millis(800),
        }),
        ..Default::default()
    }
}

/// Wraps [`TcpTransport`] to lose commits and to measure overlapping calls.
pub struct TestTransport {
    inner: TcpTransport,
    lose_commits_to: Mutex<Option<Role>>,
    latency: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl TestTransport {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Every call waits `latency` before going out.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            inner: TcpTransport::default(),
            lose_commits_to: Mutex::new(None),
            latency,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Commits addressed to `role` are never delivered.
    pub fn lose_commits_to(&self, role: Role) {
        *self.lose_commits_to.lock() = Some(role);
    }

    /// Most calls that were outstanding at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Transport for TestTransport {
    fn send(
        &self,
        node: &ParticipantRef,
        request: &Request,
        timeout: Duration,
    ) -> impl Future<Output = Outcome> + Send {
        async move {
            let lost = request.command == Command::Commit
                && *self.lose_commits_to.lock() == Some(node.role);
            if lost {
                return Outcome::ConnectionRefused;
            }

            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let outcome = self.inner.send(node, request, timeout).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }
}

/// Shares one transport between a test and the coordinator that uses it.
pub struct SharedTransport(pub Arc<TestTransport>);

impl Transport for SharedTransport {
    fn send(
        &self,
        node: &ParticipantRef,
        request: &Request,
        timeout: Duration,
    ) -> impl Future<Output = Outcome> + Send {
        self.0.send(node, request, timeout)
    }
}
