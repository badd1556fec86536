use thiserror::Error;

#[derive(Error, Debug)]
pub enum SeshatError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Insufficient funds: balance {balance}, requested {amount}")]
    InsufficientFunds { balance: u64, amount: u64 },

    #[error("Balance overflow")]
    BalanceOverflow,

    #[error("Other error: {0}")]
    Other(String),
}

impl From<bincode::Error> for SeshatError {
    fn from(e: bincode::Error) -> Self {
        SeshatError::Codec(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SeshatError>;
