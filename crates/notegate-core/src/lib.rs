//! notegate core: signed command envelopes, validation, coin selection,
//! wallet execution and swap settlement tracking for a custodial note wallet.

#![deny(unsafe_code)]

pub mod authority;
pub mod builder;
pub mod command;
pub mod config;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod ledger;
pub mod notes;
pub mod selection;
pub mod signer;
pub mod swap;
pub mod validation;

pub use authority::{CommandAuthority, SignatureCheck, VerifiedCommand};
pub use builder::{ExecutionPlan, WalletInvocation};
pub use command::{SwapRequest, WalletCommand};
pub use config::GateConfig;
pub use envelope::{CommandRequest, SignedEnvelope};
pub use error::GateError;
pub use executor::{CommandExecutor, NoteSource, ToolOutput, WalletTool};
pub use gateway::{CommandOutput, CommandResult, SwapInitiation, WalletGateway};
pub use ledger::{ChainTip, LedgerBlock, LedgerClient, LedgerTransaction, TxOutput};
pub use notes::{parse_notes, NoteListing, ParsedNote};
pub use signer::EnvelopeSigner;
pub use swap::{SwapMonitor, SwapStatus, SwapStore, SwapTransaction};
