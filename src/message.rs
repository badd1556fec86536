//! Wire records exchanged between the coordinator and participant nodes.
//!
//! Every connection carries exactly one [`Request`] and one [`Response`]. Both
//! are flat records: every field other than the command or status is optional,
//! and the reader decides which of them it cares about. Records are encoded
//! with `bincode` and framed by a 4-byte big-endian length prefix.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::Result;

/// Default upper bound on a single frame.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Which side of a transfer a participant plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Debit,
    Credit,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Debit => write!(f, "debit"),
            Operation::Credit => write!(f, "credit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Prepare,
    Commit,
    Rollback,
    Balance,
    Reset,
    Crash,
    Restart,
    Delay,
}

/// Status carried by every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ready,
    Abort,
    Error,
    Committed,
    RolledBack,
    Success,
    Crashed,
    Restarted,
    Delayed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Ready => "ready",
            Status::Abort => "abort",
            Status::Error => "error",
            Status::Committed => "committed",
            Status::RolledBack => "rolled_back",
            Status::Success => "success",
            Status::Crashed => "crashed",
            Status::Restarted => "restarted",
            Status::Delayed => "delayed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub command: Command,
    pub tx_id: Option<String>,
    pub amount: Option<u64>,
    pub operation: Option<Operation>,
    /// Stall duration in milliseconds, not seconds as in the classic `delay`
    /// field. Honoured by `delay`, and by `prepare` as the slow-path hint.
    pub delay_ms: Option<u64>,
}

impl Request {
    fn bare(command: Command) -> Self {
        Self {
            command,
            tx_id: None,
            amount: None,
            operation: None,
            delay_ms: None,
        }
    }

    pub fn prepare(tx_id: impl Into<String>, amount: u64, operation: Operation) -> Self {
        Self {
            tx_id: Some(tx_id.into()),
            amount: Some(amount),
            operation: Some(operation),
            ..Self::bare(Command::Prepare)
        }
    }

    pub fn commit(tx_id: impl Into<String>, amount: u64, operation: Operation) -> Self {
        Self {
            tx_id: Some(tx_id.into()),
            amount: Some(amount),
            operation: Some(operation),
            ..Self::bare(Command::Commit)
        }
    }

    pub fn rollback(tx_id: impl Into<String>) -> Self {
        Self {
            tx_id: Some(tx_id.into()),
            ..Self::bare(Command::Rollback)
        }
    }

    pub fn balance() -> Self {
        Self::bare(Command::Balance)
    }

    pub fn reset() -> Self {
        Self::bare(Command::Reset)
    }

    pub fn crash() -> Self {
        Self::bare(Command::Crash)
    }

    pub fn restart() -> Self {
        Self::bare(Command::Restart)
    }

    pub fn delay(delay_ms: u64) -> Self {
        Self {
            delay_ms: Some(delay_ms),
            ..Self::bare(Command::Delay)
        }
    }

    /// Attaches the slow-path hint to a request.
    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(buf)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub tx_id: Option<String>,
    pub reason: Option<String>,
    pub balance: Option<u64>,
    pub crashed: Option<bool>,
    pub port: Option<u16>,
    pub delay_ms: Option<u64>,
}

impl Response {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            tx_id: None,
            reason: None,
            balance: None,
            crashed: None,
            port: None,
            delay_ms: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(Status::Error).with_reason(reason)
    }

    pub fn with_tx_id(mut self, tx_id: impl Into<String>) -> Self {
        self.tx_id = Some(tx_id.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_balance(mut self, balance: u64) -> Self {
        self.balance = Some(balance);
        self
    }

    pub fn with_crashed(mut self, crashed: bool) -> Self {
        self.crashed = Some(crashed);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SeshatError;

    #[test]
    fn test_prepare_request_survives_the_wire() {
        let request = Request::prepare("tx-1", 300, Operation::Debit).with_delay(3000);
        let bytes = request.encode().unwrap();
        let decoded = Request::decode(&bytes).unwrap();

        assert_eq!(decoded.command, Command::Prepare);
        assert_eq!(decoded.tx_id.as_deref(), Some("tx-1"));
        assert_eq!(decoded.amount, Some(300));
        assert_eq!(decoded.operation, Some(Operation::Debit));
        assert_eq!(decoded.delay_ms, Some(3000));
    }

    #[test]
    fn test_garbage_is_a_codec_error() {
        let err = Request::decode(&[0xff, 0xff, 0xff, 0xff, 0x01]).unwrap_err();
        assert!(matches!(err, SeshatError::Codec(_)));
    }

    #[test]
    fn test_status_names_match_protocol_vocabulary() {
        assert_eq!(Status::RolledBack.to_string(), "rolled_back");
        assert_eq!(Status::Ready.to_string(), "ready");
        assert_eq!(Operation::Credit.to_string(), "credit");
    }
}
