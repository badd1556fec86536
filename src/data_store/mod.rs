pub mod ledger;

pub use ledger::{CommittedRecord, Ledger};
