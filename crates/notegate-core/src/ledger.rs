use crate::error::GateError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    pub height: u64,
    pub block_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub tx_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    #[serde(default)]
    pub outputs: Vec<TxOutput>,
}

impl LedgerTransaction {
    /// Sum of the outputs paying `address`. A spend with one gift per note pays
    /// the same recipient through several outputs.
    pub fn paid_to(&self, address: &str) -> u64 {
        self.outputs
            .iter()
            .filter(|output| output.address == address)
            .fold(0u64, |total, output| total.saturating_add(output.amount))
    }

    pub fn pays(&self, address: &str, amount: u64) -> bool {
        amount > 0 && self.paid_to(address) == amount
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBlock {
    pub height: u64,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub transactions: Vec<LedgerTransaction>,
}

impl LedgerBlock {
    /// First transaction whose outputs to `address` total exactly `amount`.
    pub fn find_payment(&self, address: &str, amount: u64) -> Option<&LedgerTransaction> {
        self.transactions.iter().find(|tx| tx.pays(address, amount))
    }
}

/// Read-only view of the public ledger. Absent objects are `Ok(None)`.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    fn client_id(&self) -> &'static str;

    async fn tip(&self) -> Result<ChainTip, GateError>;

    async fn height(&self) -> Result<u64, GateError>;

    async fn block_by_height(&self, height: u64) -> Result<Option<LedgerBlock>, GateError>;

    async fn block_by_hash(&self, hash: &str) -> Result<Option<LedgerBlock>, GateError>;

    async fn transaction(&self, tx_id: &str) -> Result<Option<LedgerTransaction>, GateError>;

    async fn latest_transactions(&self, limit: usize)
        -> Result<Vec<LedgerTransaction>, GateError>;
}
