use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SeshatError};
use crate::message::Operation;
use crate::twopc::{
    ParticipantError, ParticipantTransaction, PrepareVote, TransactionState, TransferChange,
    TwoPhaseCommitParticipant,
};

/// One entry of the append-only history of applied changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedRecord {
    /// `None` for changes applied through the untracked [`Ledger::commit`].
    pub tx_id: Option<String>,
    pub amount: u64,
    pub operation: Operation,
    /// Balance right after the change.
    pub balance: u64,
}

struct LedgerState {
    balance: u64,
    in_flight: HashMap<String, ParticipantTransaction>,
    /// Ids that have seen a rollback; a prepare arriving after it is refused.
    rolled_back: HashSet<String>,
    history: Vec<CommittedRecord>,
}

impl LedgerState {
    fn admits(&self, change: TransferChange) -> bool {
        match change.operation {
            Operation::Debit => self.balance >= change.amount,
            Operation::Credit => self.balance.checked_add(change.amount).is_some(),
        }
    }

    fn record(&mut self, tx_id: Option<&str>, change: TransferChange) {
        self.history.push(CommittedRecord {
            tx_id: tx_id.map(str::to_string),
            amount: change.amount,
            operation: change.operation,
            balance: self.balance,
        });
    }

    fn apply(&mut self, tx_id: Option<&str>, change: TransferChange) -> Result<u64> {
        self.balance = match change.operation {
            Operation::Debit => self.balance.checked_sub(change.amount).ok_or(
                SeshatError::InsufficientFunds {
                    balance: self.balance,
                    amount: change.amount,
                },
            )?,
            Operation::Credit => self
                .balance
                .checked_add(change.amount)
                .ok_or(SeshatError::BalanceOverflow)?,
        };
        self.record(tx_id, change);
        Ok(self.balance)
    }
}

/// Per-node account ledger.
///
/// Holds a single balance, the transactions currently in flight on this node,
/// and the history of everything applied. Every operation runs under one lock,
/// so a read-modify-write of the balance can never interleave with another.
pub struct Ledger {
    name: String,
    initial_balance: u64,
    state: Mutex<LedgerState>,
}

impl Ledger {
    pub fn new(name: impl Into<String>, initial_balance: u64) -> Self {
        Self {
            name: name.into(),
            initial_balance,
            state: Mutex::new(LedgerState {
                balance: initial_balance,
                in_flight: HashMap::new(),
                rolled_back: HashSet::new(),
                history: Vec::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Checks whether `amount` could be applied right now, without touching anything.
    pub fn prepare(&self, amount: u64, operation: Operation) -> bool {
        self.state.lock().admits(TransferChange { amount, operation })
    }

    /// Applies `amount` immediately, outside of any tracked transaction.
    ///
    /// A debit that would take the balance below zero is refused rather than applied.
    pub fn commit(&self, amount: u64, operation: Operation) -> Result<u64> {
        let balance = self
            .state
            .lock()
            .apply(None, TransferChange { amount, operation })?;
        info!("[{}] {} {}. New balance: {}", self.name, operation, amount, balance);
        Ok(balance)
    }

    pub fn balance(&self) -> u64 {
        self.state.lock().balance
    }

    /// Restores the initial balance and forgets all history and in-flight holds.
    pub fn reset(&self) -> u64 {
        let mut state = self.state.lock();
        state.balance = self.initial_balance;
        state.in_flight.clear();
        state.rolled_back.clear();
        state.history.clear();
        info!("[{}] Reset to {}", self.name, state.balance);
        state.balance
    }

    pub fn history(&self) -> Vec<CommittedRecord> {
        self.state.lock().history.clone()
    }

    pub fn transaction(&self, tx_id: &str) -> Option<ParticipantTransaction> {
        self.state.lock().in_flight.get(tx_id).cloned()
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Registers `tx_id` as `Preparing`. The vote itself happens in [`Ledger::vote`].
    ///
    /// Splitting the two lets the node stall or fail a prepare in between while
    /// the id is already visible to a concurrent rollback.
    pub fn begin(
        &self,
        tx_id: &str,
        change: TransferChange,
    ) -> std::result::Result<(), ParticipantError> {
        let mut state = self.state.lock();
        if state.in_flight.contains_key(tx_id) {
            return Err(ParticipantError::DuplicateTransaction(tx_id.to_string()));
        }
        if state.rolled_back.contains(tx_id) {
            return Err(ParticipantError::AlreadyRolledBack(tx_id.to_string()));
        }
        state.in_flight.insert(
            tx_id.to_string(),
            ParticipantTransaction {
                tx_id: tx_id.to_string(),
                change,
                state: TransactionState::Preparing,
                held_amount: None,
            },
        );
        debug!("[{}] TX {} preparing {} {}", self.name, tx_id, change.operation, change.amount);
        Ok(())
    }

    /// Decides the vote for a transaction registered with [`Ledger::begin`].
    pub fn vote(&self, tx_id: &str) -> std::result::Result<PrepareVote, ParticipantError> {
        let mut state = self.state.lock();
        let (current, change) = state
            .in_flight
            .get(tx_id)
            .map(|tx| (tx.state, tx.change))
            .ok_or_else(|| ParticipantError::UnknownTransaction(tx_id.to_string()))?;

        match current {
            TransactionState::Preparing => {}
            TransactionState::RolledBack => {
                // Rolled back while we were stalled: nothing was held, nothing to undo.
                state.in_flight.remove(tx_id);
                debug!("[{}] TX {} was rolled back before its vote", self.name, tx_id);
                return Ok(PrepareVote::Abort(
                    "Rolled back before prepare completed".to_string(),
                ));
            }
            other => {
                return Err(ParticipantError::NotPrepared {
                    tx_id: tx_id.to_string(),
                    state: other,
                });
            }
        }

        let (vote, next, held) = if state.admits(change) {
            match change.operation {
                Operation::Debit => {
                    state.balance -= change.amount;
                    (PrepareVote::Ready, TransactionState::Prepared, Some(change.amount))
                }
                Operation::Credit => (PrepareVote::Ready, TransactionState::Prepared, None),
            }
        } else {
            let reason = match change.operation {
                Operation::Debit => "Insufficient funds",
                Operation::Credit => "Balance overflow",
            };
            (PrepareVote::Abort(reason.to_string()), TransactionState::Rejected, None)
        };

        if let Some(tx) = state.in_flight.get_mut(tx_id) {
            tx.state = next;
            tx.held_amount = held;
        }
        debug!("[{}] TX {} voted {:?}, balance {}", self.name, tx_id, vote, state.balance);
        Ok(vote)
    }

    /// Marks a `Preparing` transaction as failed and drops it.
    pub fn fail(
        &self,
        tx_id: &str,
        reason: impl Into<String>,
    ) -> std::result::Result<PrepareVote, ParticipantError> {
        let mut state = self.state.lock();
        match state.in_flight.get(tx_id).map(|tx| tx.state) {
            None => Err(ParticipantError::UnknownTransaction(tx_id.to_string())),
            Some(TransactionState::Preparing | TransactionState::RolledBack) => {
                state.in_flight.remove(tx_id);
                Ok(PrepareVote::Failed(reason.into()))
            }
            Some(other) => Err(ParticipantError::NotPrepared {
                tx_id: tx_id.to_string(),
                state: other,
            }),
        }
    }
}

impl TwoPhaseCommitParticipant for Ledger {
    type GlobalTransactionId = String;

    fn prepare_transaction(
        &self,
        global_tx_id: Self::GlobalTransactionId,
        change: TransferChange,
    ) -> std::result::Result<PrepareVote, ParticipantError> {
        self.begin(&global_tx_id, change)?;
        self.vote(&global_tx_id)
    }

    fn commit_transaction(
        &self,
        global_tx_id: Self::GlobalTransactionId,
        expected: Option<TransferChange>,
    ) -> std::result::Result<u64, ParticipantError> {
        let mut state = self.state.lock();
        let tx = state
            .in_flight
            .get(&global_tx_id)
            .cloned()
            .ok_or_else(|| ParticipantError::UnknownTransaction(global_tx_id.clone()))?;

        if tx.state != TransactionState::Prepared {
            return Err(ParticipantError::NotPrepared {
                tx_id: global_tx_id,
                state: tx.state,
            });
        }
        if let Some(requested) = expected {
            if requested != tx.change {
                return Err(ParticipantError::Mismatch {
                    tx_id: global_tx_id,
                    prepared: tx.change,
                    requested,
                });
            }
        }

        let balance = match tx.change.operation {
            // The debit was taken at prepare time.
            Operation::Debit => {
                state.record(Some(&global_tx_id), tx.change);
                state.balance
            }
            Operation::Credit => state.apply(Some(&global_tx_id), tx.change)?,
        };
        state.in_flight.remove(&global_tx_id);

        info!(
            "[{}] TX {} committed {} {}. New balance: {}",
            self.name, global_tx_id, tx.change.operation, tx.change.amount, balance
        );
        Ok(balance)
    }

    fn abort_transaction(
        &self,
        global_tx_id: Self::GlobalTransactionId,
    ) -> std::result::Result<(), ParticipantError> {
        let mut state = self.state.lock();
        state.rolled_back.insert(global_tx_id.clone());
        let (current, held) = state
            .in_flight
            .get(&global_tx_id)
            .map(|tx| (tx.state, tx.held_amount))
            .ok_or_else(|| ParticipantError::NotFound(global_tx_id.clone()))?;

        match current {
            TransactionState::Prepared => {
                if let Some(held) = held {
                    state.balance = state.balance.saturating_add(held);
                }
                state.in_flight.remove(&global_tx_id);
            }
            TransactionState::Rejected => {
                state.in_flight.remove(&global_tx_id);
            }
            TransactionState::Preparing => {
                // Left in place so the stalled prepare sees the abort when it resumes.
                if let Some(tx) = state.in_flight.get_mut(&global_tx_id) {
                    tx.state = TransactionState::RolledBack;
                }
            }
            other => {
                return Err(ParticipantError::NotPrepared {
                    tx_id: global_tx_id,
                    state: other,
                });
            }
        }

        info!(
            "[{}] TX {} rolled back from {}. Balance: {}",
            self.name, global_tx_id, current, state.balance
        );
        Ok(())
    }
}
