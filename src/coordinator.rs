use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::CoordinatorConfig;
use crate::errors::{Result, SeshatError};
use crate::message::{Request, Status};
use crate::registry::{ParticipantRef, ParticipantRegistry, Role};
use crate::stats::{StatsSnapshot, TransactionOutcome, TransactionStats};
use crate::transport::{Outcome, TcpTransport, Transport};

/// What a balance query learned about one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceReading {
    Known { balance: u64, crashed: bool },
    /// The node could not be asked.
    Unknown,
}

impl BalanceReading {
    pub fn balance(&self) -> Option<u64> {
        match self {
            BalanceReading::Known { balance, .. } => Some(*balance),
            BalanceReading::Unknown => None,
        }
    }
}

impl fmt::Display for BalanceReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceReading::Known { balance, .. } => write!(f, "${}", balance),
            BalanceReading::Unknown => f.write_str("Unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeBalance {
    pub name: String,
    pub role: Role,
    pub port: u16,
    pub reading: BalanceReading,
}

/// One participant's phase-one vote as the coordinator saw it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeVote {
    pub name: String,
    pub role: Role,
    pub ready: bool,
    /// Why the vote was negative, verbatim from the node or the transport.
    pub reason: Option<String>,
}

/// Everything a caller gets back for one logical transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReport {
    pub tx_id: String,
    pub amount: u64,
    pub outcome: TransactionOutcome,
    pub votes: Vec<NodeVote>,
    pub initial_balances: Vec<NodeBalance>,
    pub final_balances: Vec<NodeBalance>,
    /// Coordinator statistics right after this transaction was counted.
    pub stats: StatsSnapshot,
    pub logs: Vec<String>,
}

impl TransactionReport {
    pub fn final_balance(&self, role: Role) -> Option<u64> {
        self.final_balances
            .iter()
            .find(|b| b.role == role)
            .and_then(|b| b.reading.balance())
    }

    pub fn initial_balance(&self, role: Role) -> Option<u64> {
        self.initial_balances
            .iter()
            .find(|b| b.role == role)
            .and_then(|b| b.reading.balance())
    }
}

/// Reachability of a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Active { balance: u64, crashed: bool },
    /// Answered, but not with a balance.
    Reachable,
    Inactive { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetResult {
    pub name: String,
    pub port: u16,
    pub success: bool,
    pub balance: Option<u64>,
    pub message: String,
}

/// Ordered trace lines for one transaction, mirrored to the `log` facade.
struct TransactionLog {
    tx_id: String,
    lines: Vec<String>,
}

impl TransactionLog {
    fn new(tx_id: &str) -> Self {
        Self {
            tx_id: tx_id.to_string(),
            lines: Vec::new(),
        }
    }

    fn push(&mut self, line: impl fmt::Display) {
        let line = format!("TX {}: {}", self.tx_id, line);
        info!("{}", line);
        self.lines.push(line);
    }

    fn push_error(&mut self, line: impl fmt::Display) {
        let line = format!("TX {}: {}", self.tx_id, line);
        error!("{}", line);
        self.lines.push(line);
    }
}

fn describe_balances(balances: &[NodeBalance]) -> String {
    balances
        .iter()
        .map(|b| format!("{}={}", b.name, b.reading))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Drives two-phase commit for transfers between the participants of a registry.
///
/// One coordinator is created per process and shared by reference (or `Arc`)
/// with every caller; it owns its statistics.
pub struct Coordinator<T = TcpTransport> {
    registry: ParticipantRegistry,
    transport: T,
    config: CoordinatorConfig,
    stats: TransactionStats,
    next_tx: AtomicU64,
    /// Distinguishes ids minted by different coordinator instances.
    nonce: u32,
}

impl Coordinator<TcpTransport> {
    pub fn new(registry: ParticipantRegistry, config: CoordinatorConfig) -> Result<Self> {
        let transport = TcpTransport::new(config.max_frame_length);
        Self::with_transport(registry, config, transport)
    }
}

impl<T: Transport> Coordinator<T> {
    pub fn with_transport(
        registry: ParticipantRegistry,
        config: CoordinatorConfig,
        transport: T,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            transport,
            config,
            stats: TransactionStats::new(),
            next_tx: AtomicU64::new(1),
            nonce: rand::random::<u32>() & 0x00ff_ffff,
        })
    }

    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Mints a short id, unique among all ids this coordinator hands out.
    pub fn next_transaction_id(&self) -> String {
        let seq = self.next_tx.fetch_add(1, Ordering::SeqCst);
        format!("{:06x}-{}", self.nonce, seq)
    }

    /// Transfers `amount` from the debit participant to the credit participant.
    pub async fn execute_transaction(&self, amount: u64) -> TransactionReport {
        let tx_id = self.next_transaction_id();
        self.execute_transaction_with_id(amount, tx_id).await
    }

    /// Like [`Coordinator::execute_transaction`] with a caller-chosen id.
    /// Keeping ids unique is then up to the caller.
    pub async fn execute_transaction_with_id(
        &self,
        amount: u64,
        tx_id: impl Into<String>,
    ) -> TransactionReport {
        let tx_id = tx_id.into();
        let mut log = TransactionLog::new(&tx_id);

        let initial_balances = self.balances().await;
        log.push(format_args!(
            "Started - Transfer ${} from {} to {}",
            amount,
            self.registry.by_role(Role::Debit).name,
            self.registry.by_role(Role::Credit).name
        ));
        log.push(format_args!("Initial - {}", describe_balances(&initial_balances)));

        let votes = self.run_prepare_phase(&tx_id, amount, &mut log).await;

        log.push("PHASE 2 - DECISION");
        let outcome = if votes.iter().all(|v| v.ready) {
            log.push("All ready -> COMMIT");
            if self.run_commit_phase(&tx_id, amount, &mut log).await {
                log.push("TRANSACTION COMMITTED");
                TransactionOutcome::Committed
            } else {
                log.push_error("PARTIAL COMMIT - needs recovery");
                TransactionOutcome::PartialCommit
            }
        } else {
            log.push("Not all ready -> ROLLBACK");
            self.run_abort_phase(&tx_id, &mut log).await;
            log.push("TRANSACTION ROLLED BACK");
            TransactionOutcome::RolledBack
        };
        self.stats.record(outcome);

        let final_balances = self.balances().await;
        log.push(format_args!("Final - {}", describe_balances(&final_balances)));

        TransactionReport {
            tx_id,
            amount,
            outcome,
            votes,
            initial_balances,
            final_balances,
            stats: self.stats.snapshot(),
            logs: log.lines,
        }
    }

    /// Phase 1: ask every participant, in registry order, for its vote.
    async fn run_prepare_phase(
        &self,
        tx_id: &str,
        amount: u64,
        log: &mut TransactionLog,
    ) -> Vec<NodeVote> {
        log.push("PHASE 1 - PREPARE");
        let mut votes = Vec::with_capacity(self.registry.len());

        for node in self.registry.iter() {
            let mut request = Request::prepare(tx_id, amount, node.role.operation());
            if let Some(slow_path) = self.config.slow_path {
                if node.role == Role::Debit && amount > slow_path.threshold {
                    request = request.with_delay(slow_path.delay.as_millis() as u64);
                }
            }

            let outcome = self
                .transport
                .send(node, &request, self.config.call_timeout)
                .await;

            let vote = if outcome.is(Status::Ready) {
                log.push(format_args!("{} ready", node.name));
                NodeVote {
                    name: node.name.clone(),
                    role: node.role,
                    ready: true,
                    reason: None,
                }
            } else {
                let reason = outcome.describe();
                log.push(format_args!("{} failed: {}", node.name, reason));
                NodeVote {
                    name: node.name.clone(),
                    role: node.role,
                    ready: false,
                    reason: Some(reason),
                }
            };
            votes.push(vote);
        }

        votes
    }

    /// Phase 2, commit branch. Returns whether every participant confirmed.
    ///
    /// A participant that does not confirm is logged and left as is: nothing
    /// here retries or compensates.
    async fn run_commit_phase(&self, tx_id: &str, amount: u64, log: &mut TransactionLog) -> bool {
        let mut all_committed = true;

        for node in self.registry.iter() {
            let request = Request::commit(tx_id, amount, node.role.operation());
            let outcome = self
                .transport
                .send(node, &request, self.config.call_timeout)
                .await;

            match outcome.response() {
                Some(response) if response.status == Status::Committed => {
                    let balance = response
                        .balance
                        .map(|b| format!("${}", b))
                        .unwrap_or_else(|| "?".to_string());
                    log.push(format_args!("{} committed. Balance: {}", node.name, balance));
                }
                _ => {
                    log.push_error(format_args!(
                        "{} commit failed: {}",
                        node.name,
                        outcome.describe()
                    ));
                    all_committed = false;
                }
            }
        }

        all_committed
    }

    /// Phase 2, rollback branch. Failures are logged and otherwise ignored.
    async fn run_abort_phase(&self, tx_id: &str, log: &mut TransactionLog) {
        for node in self.registry.iter() {
            let outcome = self
                .transport
                .send(node, &Request::rollback(tx_id), self.config.call_timeout)
                .await;

            if outcome.is(Status::RolledBack) {
                log.push(format_args!("{} rolled back", node.name));
            } else {
                let reason = outcome.describe();
                warn!("TX {}: rollback at {} not acknowledged: {}", tx_id, node.name, reason);
                log.push(format_args!("{} rollback not acknowledged: {}", node.name, reason));
            }
        }
    }

    async fn query_balance(&self, node: &ParticipantRef) -> BalanceReading {
        let outcome = self
            .transport
            .send(node, &Request::balance(), self.config.status_timeout)
            .await;

        match outcome.response() {
            Some(response) if response.status == Status::Success => BalanceReading::Known {
                balance: response.balance.unwrap_or_default(),
                crashed: response.crashed.unwrap_or(false),
            },
            _ => BalanceReading::Unknown,
        }
    }

    /// Best-effort balance snapshot of every participant, in registry order.
    pub async fn balances(&self) -> Vec<NodeBalance> {
        let mut balances = Vec::with_capacity(self.registry.len());
        for node in self.registry.iter() {
            balances.push(NodeBalance {
                name: node.name.clone(),
                role: node.role,
                port: node.port,
                reading: self.query_balance(node).await,
            });
        }
        balances
    }

    /// Reachability and balance of the participant listening on `port`.
    pub async fn node_status(&self, port: u16) -> Result<NodeStatus> {
        let node = self
            .registry
            .by_port(port)
            .ok_or_else(|| SeshatError::UnknownNode(format!("no participant on port {}", port)))?;

        let outcome = self
            .transport
            .send(node, &Request::balance(), self.config.status_timeout)
            .await;

        Ok(match outcome {
            Outcome::Ok(response) if response.status == Status::Success => NodeStatus::Active {
                balance: response.balance.unwrap_or_default(),
                crashed: response.crashed.unwrap_or(false),
            },
            Outcome::Ok(_) => NodeStatus::Reachable,
            other => NodeStatus::Inactive {
                reason: other.describe(),
            },
        })
    }

    /// Puts every participant back to its initial balance.
    pub async fn reset_all(&self) -> Vec<ResetResult> {
        let mut results = Vec::with_capacity(self.registry.len());
        for node in self.registry.iter() {
            let outcome = self
                .transport
                .send(node, &Request::reset(), self.config.status_timeout)
                .await;

            let result = match outcome.response() {
                Some(response) if response.status == Status::Success => ResetResult {
                    name: node.name.clone(),
                    port: node.port,
                    success: true,
                    balance: response.balance,
                    message: format!(
                        "{} reset to ${}",
                        node.name,
                        response.balance.unwrap_or_default()
                    ),
                },
                _ => ResetResult {
                    name: node.name.clone(),
                    port: node.port,
                    success: false,
                    balance: None,
                    message: format!("{} reset failed: {}", node.name, outcome.describe()),
                },
            };
            info!("{}", result.message);
            results.push(result);
        }
        results
    }

    /// Puts the participant holding `role` into crashed mode.
    pub async fn crash_node(&self, role: Role) -> Outcome {
        let node = self.registry.by_role(role);
        self.transport
            .send(node, &Request::crash(), self.config.status_timeout)
            .await
    }

    pub async fn restart_node(&self, role: Role) -> Outcome {
        let node = self.registry.by_role(role);
        self.transport
            .send(node, &Request::restart(), self.config.status_timeout)
            .await
    }

    /// Asks the participant holding `role` to stall for `delay` before answering.
    pub async fn delay_node(&self, role: Role, delay: Duration) -> Outcome {
        let node = self.registry.by_role(role);
        self.transport
            .send(
                node,
                &Request::delay(delay.as_millis() as u64),
                self.config.status_timeout + delay,
            )
            .await
    }
}
