//! Deterministic collaborators for tests and local demos.

use async_trait::async_trait;
use notegate_core::builder::WalletInvocation;
use notegate_core::error::GateError;
use notegate_core::executor::{ToolOutput, WalletTool};
use notegate_core::ledger::{ChainTip, LedgerBlock, LedgerClient, LedgerTransaction};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Wallet stand-in that answers from scripted stdout and records every invocation.
///
/// A draft-creating subcommand writes `scripted.draft` into the working directory.
#[derive(Debug, Default)]
pub struct ScriptedWalletTool {
    responses: Mutex<HashMap<String, Result<String, String>>>,
    invocations: Mutex<Vec<Vec<String>>>,
}

impl ScriptedWalletTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, subcommand: &str, stdout: impl Into<String>) -> Self {
        self.set_response(subcommand, Ok(stdout.into()));
        self
    }

    pub fn fail(self, subcommand: &str, stderr: impl Into<String>) -> Self {
        self.set_response(subcommand, Err(stderr.into()));
        self
    }

    pub fn set_response(&self, subcommand: &str, response: Result<String, String>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(subcommand.to_string(), response);
        }
    }

    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl WalletTool for ScriptedWalletTool {
    fn tool_id(&self) -> &'static str {
        "scripted"
    }

    async fn run(
        &self,
        invocation: &WalletInvocation,
        workdir: Option<&Path>,
    ) -> Result<ToolOutput, GateError> {
        if let Ok(mut calls) = self.invocations.lock() {
            calls.push(invocation.argv());
        }
        let response = self
            .responses
            .lock()
            .ok()
            .and_then(|responses| responses.get(&invocation.subcommand).cloned())
            .unwrap_or_else(|| Ok(String::new()));

        match response {
            Ok(stdout) => {
                if invocation.subcommand == "simple-spend" {
                    if let Some(dir) = workdir {
                        std::fs::write(dir.join("scripted.draft"), invocation.display())
                            .map_err(|e| GateError::execution("simple-spend", e.to_string()))?;
                    }
                }
                Ok(ToolOutput::stdout(stdout))
            }
            Err(stderr) => Err(GateError::execution(invocation.subcommand.clone(), stderr)),
        }
    }
}

/// Ledger held in memory; `set_height` and `push_block` drive it forward.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

#[derive(Debug, Default)]
struct LedgerState {
    height: u64,
    blocks: HashMap<u64, LedgerBlock>,
    offline: bool,
}

impl InMemoryLedger {
    pub fn at_height(height: u64) -> Self {
        let ledger = Self::default();
        ledger.set_height(height);
        ledger
    }

    pub fn set_height(&self, height: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.height = height;
        }
    }

    /// Store a block and advance the height to it if it is newer.
    pub fn push_block(&self, block: LedgerBlock) {
        if let Ok(mut state) = self.state.lock() {
            state.height = state.height.max(block.height);
            state.blocks.insert(block.height, block);
        }
    }

    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.offline = offline;
        }
    }

    fn read<T>(&self, f: impl FnOnce(&LedgerState) -> T) -> Result<T, GateError> {
        let state = self
            .state
            .lock()
            .map_err(|_| GateError::Ledger("ledger fixture poisoned".to_string()))?;
        if state.offline {
            return Err(GateError::Ledger("ledger offline".to_string()));
        }
        Ok(f(&state))
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    fn client_id(&self) -> &'static str {
        "in-memory"
    }

    async fn tip(&self) -> Result<ChainTip, GateError> {
        self.read(|state| ChainTip {
            height: state.height,
            block_hash: state
                .blocks
                .get(&state.height)
                .map(|block| block.hash.clone())
                .unwrap_or_else(|| format!("block-{}", state.height)),
            timestamp: None,
        })
    }

    async fn height(&self) -> Result<u64, GateError> {
        self.read(|state| state.height)
    }

    async fn block_by_height(&self, height: u64) -> Result<Option<LedgerBlock>, GateError> {
        self.read(|state| state.blocks.get(&height).cloned())
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<LedgerBlock>, GateError> {
        self.read(|state| state.blocks.values().find(|b| b.hash == hash).cloned())
    }

    async fn transaction(&self, tx_id: &str) -> Result<Option<LedgerTransaction>, GateError> {
        self.read(|state| {
            state
                .blocks
                .values()
                .flat_map(|block| block.transactions.iter())
                .find(|tx| tx.tx_id == tx_id)
                .cloned()
        })
    }

    async fn latest_transactions(&self, limit: usize) -> Result<Vec<LedgerTransaction>, GateError> {
        self.read(|state| {
            let mut heights: Vec<&u64> = state.blocks.keys().collect();
            heights.sort_unstable_by(|a, b| b.cmp(a));
            heights
                .into_iter()
                .flat_map(|height| state.blocks[height].transactions.iter().cloned())
                .take(limit)
                .collect()
        })
    }
}
