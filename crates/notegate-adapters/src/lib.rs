//! Concrete collaborators for the notegate gateway: the wallet process runner, the
//! ledger explorer HTTP client, and deterministic fixtures.

#![deny(unsafe_code)]

pub mod fixtures;
pub mod http_ledger;
pub mod process;

pub use fixtures::{InMemoryLedger, ScriptedWalletTool};
pub use http_ledger::HttpLedgerClient;
pub use process::ProcessWalletTool;
