use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::SeshatError;
use crate::message::Operation;

/// The slice of a transfer one participant is asked to apply.
///
/// In a two-node transfer the debit participant receives
/// `TransferChange { amount, operation: Debit }` and the credit participant the
/// same amount with `Credit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferChange {
    pub amount: u64,
    pub operation: Operation,
}

impl TransferChange {
    pub fn debit(amount: u64) -> Self {
        Self {
            amount,
            operation: Operation::Debit,
        }
    }

    pub fn credit(amount: u64) -> Self {
        Self {
            amount,
            operation: Operation::Credit,
        }
    }
}

/// Participant-local lifecycle of one transaction id.
///
/// ```text
/// Preparing ─┬─> Prepared ─┬─> Committed
///            │             └─> RolledBack
///            ├─> Rejected
///            └─> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    Preparing,
    Prepared,
    Rejected,
    Failed,
    Committed,
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Preparing => "preparing",
            TransactionState::Prepared => "prepared",
            TransactionState::Rejected => "rejected",
            TransactionState::Failed => "failed",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// A participant's record of one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantTransaction {
    pub tx_id: String,
    pub change: TransferChange,
    pub state: TransactionState,
    /// Funds withdrawn at prepare time. Only ever set for debits.
    pub held_amount: Option<u64>,
}

/// A participant's answer to `prepare`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareVote {
    Ready,
    /// Business-rule refusal, e.g. insufficient funds.
    Abort(String),
    /// The participant could not do the work at all.
    Failed(String),
}

impl PrepareVote {
    pub fn is_ready(&self) -> bool {
        matches!(self, PrepareVote::Ready)
    }
}

/// Error type for Two-Phase Commit Participant operations.
///
/// The `Display` text doubles as the `reason` a node puts on the wire.
#[derive(Debug, thiserror::Error)]
pub enum ParticipantError {
    #[error("Unknown transaction {0}")]
    UnknownTransaction(String),
    #[error("Transaction not found: {0}")]
    NotFound(String),
    #[error("Transaction not prepared: {tx_id} is {state}")]
    NotPrepared {
        tx_id: String,
        state: TransactionState,
    },
    #[error("Transaction {0} is already in flight")]
    DuplicateTransaction(String),
    #[error("Transaction {0} was already rolled back")]
    AlreadyRolledBack(String),
    #[error("Commit for {tx_id} does not match prepared {prepared:?}, got {requested:?}")]
    Mismatch {
        tx_id: String,
        prepared: TransferChange,
        requested: TransferChange,
    },
    #[error("Ledger error: {0}")]
    Ledger(#[from] SeshatError),
}

/// Trait for a participant in a two-phase commit protocol.
///
/// The participant owns its state exclusively: the coordinator only ever
/// reaches it through these three calls (over the wire, via the node service).
/// Implementations must be `Send` and `Sync`; concurrent calls for different
/// ids are expected.
pub trait TwoPhaseCommitParticipant: Send + Sync {
    /// The type used to identify a distributed transaction.
    type GlobalTransactionId: Send + Sync + Clone + fmt::Debug;

    /// Phase 1: vote on `change`.
    ///
    /// `Ok(PrepareVote::Ready)` means the participant has done everything
    /// needed to commit later (for a debit, the funds are already held).
    /// A negative vote leaves the balance untouched.
    fn prepare_transaction(
        &self,
        global_tx_id: Self::GlobalTransactionId,
        change: TransferChange,
    ) -> std::result::Result<PrepareVote, ParticipantError>;

    /// Phase 2: make a prepared transaction permanent and return the new balance.
    ///
    /// When `expected` is given it must match what was prepared.
    fn commit_transaction(
        &self,
        global_tx_id: Self::GlobalTransactionId,
        expected: Option<TransferChange>,
    ) -> std::result::Result<u64, ParticipantError>;

    /// Phase 2: discard a transaction, refunding any held funds.
    fn abort_transaction(
        &self,
        global_tx_id: Self::GlobalTransactionId,
    ) -> std::result::Result<(), ParticipantError>;
}
