pub mod config;
pub mod coordinator;
pub mod data_store;
pub mod errors;
pub mod fault;
pub mod message;
pub mod node;
pub mod registry;
pub mod scenarios;
pub mod scheduler;
pub mod stats;
pub mod transport;
pub mod twopc;

// Re-export key types for easier access
pub use config::{CoordinatorConfig, NodeConfig, SchedulerConfig, SlowPath};
pub use coordinator::{
    BalanceReading, Coordinator, NodeBalance, NodeStatus, NodeVote, ResetResult,
    TransactionReport,
};
pub use data_store::{CommittedRecord, Ledger};
pub use errors::{Result, SeshatError};
pub use fault::FaultPolicy;
pub use message::{Command, Operation, Request, Response, Status};
pub use node::{NodeHandle, NodeService, ParticipantNode};
pub use registry::{ParticipantRef, ParticipantRegistry, Role};
pub use scheduler::{BatchEntry, BatchReport, ConcurrentScheduler};
pub use stats::{StatsSnapshot, TransactionOutcome, TransactionStats};
pub use transport::{Outcome, TcpTransport, Transport};
pub use twopc::{ParticipantError, TransferChange, TwoPhaseCommitParticipant};

pub mod prelude {
    pub use crate::config::*;
    pub use crate::coordinator::*;
    pub use crate::errors::*;
    pub use crate::node::*;
    pub use crate::registry::*;
    pub use crate::scheduler::*;
    pub use crate::stats::*;
    pub use crate::transport::*;
    pub use crate::*;
}
