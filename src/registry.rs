use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{Result, SeshatError};
use crate::message::Operation;

/// The part a participant plays in every transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Debit,
    Credit,
}

impl Role {
    pub fn operation(&self) -> Operation {
        match self {
            Role::Debit => Operation::Debit,
            Role::Credit => Operation::Credit,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.operation(), f)
    }
}

/// Where a participant lives and what it does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantRef {
    pub host: String,
    pub port: u16,
    pub role: Role,
    pub name: String,
}

impl ParticipantRef {
    pub fn new(host: impl Into<String>, port: u16, role: Role, name: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            role,
            name: name.into(),
        }
    }
}

impl fmt::Display for ParticipantRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.host, self.port)
    }
}

/// Ordered, immutable set of the participants of a transfer.
///
/// The order is the order prepare and phase-two messages are sent in. Exactly
/// one participant holds each role; deserialization goes through the same check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<ParticipantRef>", into = "Vec<ParticipantRef>")]
pub struct ParticipantRegistry {
    participants: Vec<ParticipantRef>,
    debit: usize,
    credit: usize,
}

impl ParticipantRegistry {
    pub fn new(participants: Vec<ParticipantRef>) -> Result<Self> {
        let holder = |role: Role| -> Result<usize> {
            let mut holders = participants
                .iter()
                .enumerate()
                .filter(|(_, p)| p.role == role)
                .map(|(i, _)| i);
            match (holders.next(), holders.count()) {
                (Some(index), 0) => Ok(index),
                (first, rest) => Err(SeshatError::Config(format!(
                    "expected exactly one {} participant, found {}",
                    role,
                    first.map_or(0, |_| 1 + rest)
                ))),
            }
        };
        let debit = holder(Role::Debit)?;
        let credit = holder(Role::Credit)?;
        Ok(Self {
            participants,
            debit,
            credit,
        })
    }

    /// Sender first, receiver second.
    pub fn transfer(debit: ParticipantRef, credit: ParticipantRef) -> Result<Self> {
        Self::new(vec![debit, credit])
    }

    /// The classic local pair: `Sender` on `debit_port`, `Receiver` on `credit_port`.
    pub fn localhost(debit_port: u16, credit_port: u16) -> Self {
        Self {
            participants: vec![
                ParticipantRef::new("127.0.0.1", debit_port, Role::Debit, "Sender"),
                ParticipantRef::new("127.0.0.1", credit_port, Role::Credit, "Receiver"),
            ],
            debit: 0,
            credit: 1,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParticipantRef> {
        self.participants.iter()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// The single holder of `role`, located when the registry was validated.
    pub fn by_role(&self, role: Role) -> &ParticipantRef {
        match role {
            Role::Debit => &self.participants[self.debit],
            Role::Credit => &self.participants[self.credit],
        }
    }

    pub fn by_port(&self, port: u16) -> Option<&ParticipantRef> {
        self.participants.iter().find(|p| p.port == port)
    }
}

impl TryFrom<Vec<ParticipantRef>> for ParticipantRegistry {
    type Error = SeshatError;

    fn try_from(participants: Vec<ParticipantRef>) -> Result<Self> {
        Self::new(participants)
    }
}

impl From<ParticipantRegistry> for Vec<ParticipantRef> {
    fn from(registry: ParticipantRegistry) -> Self {
        registry.participants
    }
}
