//! Async service wrappers shared by hosts

mod ledger;

pub use ledger::SyncLedger;
