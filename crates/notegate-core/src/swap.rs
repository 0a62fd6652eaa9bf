//! Swap settlement tracking.
//!
//! A swap moves `pending → sent-pending → sent-confirmed`. `failed` is reachable
//! from non-terminal states; `unconfirmed` marks a pending swap whose spend was
//! never observed within the confirmation timeout. Transitions are evaluated when
//! a status is requested and cascade within that request.

use crate::error::GateError;
use crate::executor::NoteSource;
use crate::ledger::LedgerClient;
use crate::notes::{NoteKey, ParsedNote};
use crate::validation::ValidatedSwapParams;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwapStatus {
    Pending,
    Unconfirmed,
    SentPending,
    SentConfirmed,
    Failed,
}

impl SwapStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::SentConfirmed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Unconfirmed => "unconfirmed",
            Self::SentPending => "sent-pending",
            Self::SentConfirmed => "sent-confirmed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapTransaction {
    pub swap_id: String,
    pub recipient: String,
    pub amount: u64,
    pub fee: u64,
    /// Ledger units the swap spend pays `recipient`, summed over its outputs.
    pub payment_total: u64,
    pub initial_block_height: u64,
    pub status: SwapStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub notes_before: Vec<NoteKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub change_utxo: Vec<NoteKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_block_height: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SwapTransaction {
    pub fn pending(
        terms: &ValidatedSwapParams,
        notes_before: &[ParsedNote],
        initial_block_height: u64,
        payment_total: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            swap_id: terms.swap_id.clone(),
            recipient: terms.recipient.clone(),
            amount: terms.amount,
            fee: terms.fee,
            payment_total,
            initial_block_height,
            status: SwapStatus::Pending,
            created_at: now,
            updated_at: now,
            notes_before: notes_before.iter().map(ParsedNote::key).collect(),
            change_utxo: Vec::new(),
            tx_id: None,
            confirmed_block_height: None,
            error: None,
        }
    }

    fn transition(&mut self, to: SwapStatus) {
        info!(swap_id = %self.swap_id, from = %self.status, to = %to, "swap transition");
        self.status = to;
        self.updated_at = Utc::now();
    }

    fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.transition(SwapStatus::Failed);
    }
}

/// Swap records keyed by id, each behind its own async mutex.
#[derive(Default)]
pub struct SwapStore {
    entries: RwLock<HashMap<String, Arc<Mutex<SwapTransaction>>>>,
}

impl SwapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new swap; an existing id is a conflict.
    pub async fn insert(&self, swap: SwapTransaction) -> Result<(), GateError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&swap.swap_id) {
            return Err(GateError::Conflict(format!(
                "swap '{}' already exists",
                swap.swap_id
            )));
        }
        entries.insert(swap.swap_id.clone(), Arc::new(Mutex::new(swap)));
        Ok(())
    }

    pub async fn contains(&self, swap_id: &str) -> bool {
        self.entries.read().await.contains_key(swap_id)
    }

    pub async fn entry(&self, swap_id: &str) -> Option<Arc<Mutex<SwapTransaction>>> {
        self.entries.read().await.get(swap_id).cloned()
    }

    pub async fn get(&self, swap_id: &str) -> Option<SwapTransaction> {
        let entry = self.entry(swap_id).await?;
        let swap = entry.lock().await;
        Some(swap.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove terminal swaps last updated before `now - retention`.
    pub async fn sweep_terminal_at(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let horizon = now
            - ChronoDuration::from_std(retention).unwrap_or_else(|_| ChronoDuration::days(1));
        let candidates: Vec<(String, Arc<Mutex<SwapTransaction>>)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();

        let mut expired = Vec::new();
        for (id, entry) in candidates {
            let swap = entry.lock().await;
            if swap.status.is_terminal() && swap.updated_at < horizon {
                expired.push(id);
            }
        }

        if !expired.is_empty() {
            let mut entries = self.entries.write().await;
            for id in &expired {
                entries.remove(id);
            }
        }
        expired.len()
    }

    pub async fn sweep_terminal(&self, retention: Duration) -> usize {
        self.sweep_terminal_at(Utc::now(), retention).await
    }
}

pub struct SwapMonitor {
    store: Arc<SwapStore>,
    notes: Arc<dyn NoteSource>,
    ledger: Arc<dyn LedgerClient>,
    timeout_blocks: u64,
}

impl SwapMonitor {
    pub fn new(
        store: Arc<SwapStore>,
        notes: Arc<dyn NoteSource>,
        ledger: Arc<dyn LedgerClient>,
        timeout_blocks: u64,
    ) -> Self {
        Self {
            store,
            notes,
            ledger,
            timeout_blocks,
        }
    }

    pub fn store(&self) -> &Arc<SwapStore> {
        &self.store
    }

    pub async fn register(
        &self,
        terms: &ValidatedSwapParams,
        notes_before: &[ParsedNote],
        initial_block_height: u64,
        payment_total: u64,
    ) -> Result<SwapTransaction, GateError> {
        let swap =
            SwapTransaction::pending(terms, notes_before, initial_block_height, payment_total);
        self.store.insert(swap.clone()).await?;
        info!(
            swap_id = %swap.swap_id,
            amount = swap.amount,
            payment_total,
            initial_block_height,
            "swap registered"
        );
        Ok(swap)
    }

    /// Move a swap to `failed` unless it already reached a terminal state.
    pub async fn mark_failed(&self, swap_id: &str, error: &str) -> Result<SwapTransaction, GateError> {
        let entry = self.entry(swap_id).await?;
        let mut swap = entry.lock().await;
        if !swap.status.is_terminal() {
            swap.fail(error);
        }
        Ok(swap.clone())
    }

    /// Current view of a swap after applying any transitions now observable.
    pub async fn status(&self, swap_id: &str) -> Result<SwapTransaction, GateError> {
        let entry = self.entry(swap_id).await?;
        let mut swap = entry.lock().await;
        self.refresh(&mut swap).await;
        Ok(swap.clone())
    }

    async fn entry(&self, swap_id: &str) -> Result<Arc<Mutex<SwapTransaction>>, GateError> {
        self.store
            .entry(swap_id)
            .await
            .ok_or_else(|| GateError::NotFound(format!("swap '{}'", swap_id)))
    }

    async fn refresh(&self, swap: &mut SwapTransaction) {
        loop {
            let progressed = match swap.status {
                SwapStatus::Pending | SwapStatus::Unconfirmed => self.check_spent(swap).await,
                SwapStatus::SentPending => self.check_confirmed(swap).await,
                SwapStatus::SentConfirmed | SwapStatus::Failed => false,
            };
            if !progressed || swap.status.is_terminal() {
                break;
            }
        }
    }

    /// Returns whether the swap moved to `sent-pending`.
    async fn check_spent(&self, swap: &mut SwapTransaction) -> bool {
        let current = match self.notes.current_notes().await {
            Ok(notes) => notes,
            Err(err) => {
                warn!(swap_id = %swap.swap_id, error = %err, "note listing unavailable");
                return false;
            }
        };
        let current_keys = note_counts(current.iter().map(ParsedNote::key));
        let before = note_counts(swap.notes_before.iter().cloned());

        // Identical (name, assets) notes are counted, so spending one of two still registers.
        let spent = before
            .iter()
            .any(|(key, count)| current_keys.get(key).copied().unwrap_or(0) < *count);
        if spent {
            swap.change_utxo = current_keys
                .into_iter()
                .filter(|(key, _)| !before.contains_key(key))
                .map(|(key, _)| key)
                .collect();
            swap.transition(SwapStatus::SentPending);
            return true;
        }

        if swap.status == SwapStatus::Pending {
            match self.ledger.height().await {
                Ok(height) if self.timed_out(swap, height) => {
                    swap.transition(SwapStatus::Unconfirmed);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(swap_id = %swap.swap_id, error = %err, "ledger height unavailable");
                }
            }
        }
        false
    }

    /// Returns whether the swap reached a terminal state.
    async fn check_confirmed(&self, swap: &mut SwapTransaction) -> bool {
        let height = match self.ledger.height().await {
            Ok(height) => height,
            Err(err) => {
                warn!(swap_id = %swap.swap_id, error = %err, "ledger height unavailable");
                return false;
            }
        };

        let mut heights = vec![height];
        if height > 0 {
            heights.push(height - 1);
        }
        for candidate in heights {
            let block = match self.ledger.block_by_height(candidate).await {
                Ok(Some(block)) => block,
                Ok(None) => continue,
                Err(err) => {
                    warn!(swap_id = %swap.swap_id, height = candidate, error = %err, "block unavailable");
                    return false;
                }
            };
            if let Some(tx) = block.find_payment(&swap.recipient, swap.payment_total) {
                swap.tx_id = Some(tx.tx_id.clone());
                swap.confirmed_block_height = Some(block.height);
                swap.transition(SwapStatus::SentConfirmed);
                return true;
            }
        }

        if self.timed_out(swap, height) {
            swap.fail(format!(
                "not confirmed within {} blocks",
                self.timeout_blocks
            ));
            return true;
        }
        false
    }

    fn timed_out(&self, swap: &SwapTransaction, height: u64) -> bool {
        height.saturating_sub(swap.initial_block_height) >= self.timeout_blocks
    }
}

fn note_counts(keys: impl Iterator<Item = NoteKey>) -> BTreeMap<NoteKey, usize> {
    let mut counts = BTreeMap::new();
    for key in keys {
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{ChainTip, LedgerBlock, LedgerTransaction, TxOutput};
    use crate::selection::{select_notes, swap_spend_params, SelectionTarget};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeNotes {
        notes: StdMutex<Vec<ParsedNote>>,
        offline: AtomicBool,
    }

    impl FakeNotes {
        fn set(&self, notes: Vec<ParsedNote>) {
            *self.notes.lock().unwrap() = notes;
        }
    }

    #[async_trait]
    impl NoteSource for FakeNotes {
        async fn current_notes(&self) -> Result<Vec<ParsedNote>, GateError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(GateError::execution("list-notes", "socket closed"));
            }
            Ok(self.notes.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct FakeLedger {
        height: AtomicU64,
        blocks: StdMutex<HashMap<u64, LedgerBlock>>,
    }

    impl FakeLedger {
        fn set_height(&self, height: u64) {
            self.height.store(height, Ordering::SeqCst);
        }

        fn add_payment(&self, height: u64, tx_id: &str, address: &str, amount: u64) {
            self.blocks.lock().unwrap().insert(
                height,
                LedgerBlock {
                    height,
                    hash: format!("h{height}"),
                    parent_hash: None,
                    timestamp: None,
                    transactions: vec![LedgerTransaction {
                        tx_id: tx_id.into(),
                        block_height: Some(height),
                        outputs: vec![TxOutput {
                            address: address.into(),
                            amount,
                        }],
                    }],
                },
            );
        }
    }

    #[async_trait]
    impl LedgerClient for FakeLedger {
        fn client_id(&self) -> &'static str {
            "fake"
        }

        async fn tip(&self) -> Result<ChainTip, GateError> {
            Ok(ChainTip {
                height: self.height.load(Ordering::SeqCst),
                block_hash: "tip".into(),
                timestamp: None,
            })
        }

        async fn height(&self) -> Result<u64, GateError> {
            Ok(self.height.load(Ordering::SeqCst))
        }

        async fn block_by_height(&self, height: u64) -> Result<Option<LedgerBlock>, GateError> {
            Ok(self.blocks.lock().unwrap().get(&height).cloned())
        }

        async fn block_by_hash(&self, _hash: &str) -> Result<Option<LedgerBlock>, GateError> {
            Ok(None)
        }

        async fn transaction(&self, _tx_id: &str) -> Result<Option<LedgerTransaction>, GateError> {
            Ok(None)
        }

        async fn latest_transactions(
            &self,
            _limit: usize,
        ) -> Result<Vec<LedgerTransaction>, GateError> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        notes: Arc<FakeNotes>,
        ledger: Arc<FakeLedger>,
        monitor: SwapMonitor,
    }

    fn harness() -> Harness {
        let notes = Arc::new(FakeNotes::default());
        let ledger = Arc::new(FakeLedger::default());
        let monitor = SwapMonitor::new(
            Arc::new(SwapStore::new()),
            notes.clone(),
            ledger.clone(),
            3,
        );
        Harness {
            notes,
            ledger,
            monitor,
        }
    }

    fn terms(id: &str) -> ValidatedSwapParams {
        ValidatedSwapParams {
            swap_id: id.into(),
            recipient: "recipient-addr".into(),
            amount: 500,
            fee: 2,
        }
    }

    /// `(amount + fee) * unit` for [`terms`] at a unit of 1000.
    const PAYMENT: u64 = 502_000;

    fn wallet() -> Vec<ParsedNote> {
        vec![ParsedNote::new("a", "b", 1000), ParsedNote::new("c", "d", 50)]
    }

    async fn registered(h: &Harness, id: &str) {
        h.notes.set(wallet());
        h.ledger.set_height(100);
        h.monitor
            .register(&terms(id), &wallet(), 100, PAYMENT)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stays_pending_while_notes_are_untouched() {
        let h = harness();
        registered(&h, "s1").await;
        let swap = h.monitor.status("s1").await.unwrap();
        assert_eq!(swap.status, SwapStatus::Pending);
    }

    #[tokio::test]
    async fn moved_notes_mark_sent_pending_with_change() {
        let h = harness();
        registered(&h, "s1").await;
        h.notes
            .set(vec![ParsedNote::new("c", "d", 50), ParsedNote::new("e", "f", 498)]);

        let swap = h.monitor.status("s1").await.unwrap();
        assert_eq!(swap.status, SwapStatus::SentPending);
        assert_eq!(swap.change_utxo, vec![ParsedNote::new("e", "f", 498).key()]);
        assert!(swap.updated_at >= swap.created_at);
    }

    #[tokio::test]
    async fn payment_in_previous_block_confirms_in_one_query() {
        let h = harness();
        registered(&h, "s1").await;
        h.notes.set(vec![]);
        h.ledger.add_payment(101, "tx-abc", "recipient-addr", PAYMENT);
        h.ledger.set_height(102);

        let swap = h.monitor.status("s1").await.unwrap();
        assert_eq!(swap.status, SwapStatus::SentConfirmed);
        assert_eq!(swap.tx_id.as_deref(), Some("tx-abc"));
        assert_eq!(swap.confirmed_block_height, Some(101));
    }

    #[tokio::test]
    async fn wrong_amount_is_not_a_confirmation() {
        let h = harness();
        registered(&h, "s1").await;
        h.notes.set(vec![]);
        h.ledger.add_payment(101, "tx-abc", "recipient-addr", PAYMENT - 1);
        h.ledger.set_height(101);

        let swap = h.monitor.status("s1").await.unwrap();
        assert_eq!(swap.status, SwapStatus::SentPending);
        assert!(swap.tx_id.is_none());
    }

    #[tokio::test]
    async fn bare_swap_amount_is_not_the_payment() {
        let h = harness();
        registered(&h, "s1").await;
        h.notes.set(vec![]);
        h.ledger.add_payment(101, "tx-abc", "recipient-addr", terms("s1").amount);
        h.ledger.set_height(101);

        let swap = h.monitor.status("s1").await.unwrap();
        assert_eq!(swap.status, SwapStatus::SentPending);
    }

    #[tokio::test]
    async fn mined_swap_spend_confirms() {
        let h = harness();
        let unit = 1000;
        let notes = vec![
            ParsedNote::new("a", "b", 300_000),
            ParsedNote::new("c", "d", 250_000),
        ];
        let swap_terms = terms("s1");
        let target = SelectionTarget::new(swap_terms.amount, swap_terms.fee).with_unit(unit);
        let selection = select_notes(&target, &notes).unwrap();
        let spend = swap_spend_params(&swap_terms, &selection.notes, unit).unwrap();
        let paid: u64 = spend.gifts.iter().sum();

        h.notes.set(notes.clone());
        h.ledger.set_height(40);
        h.monitor.register(&swap_terms, &notes, 40, paid).await.unwrap();

        let outputs = spend
            .recipients
            .iter()
            .zip(&spend.gifts)
            .map(|(recipient, gift)| TxOutput {
                address: recipient.address.clone(),
                amount: *gift,
            })
            .collect::<Vec<_>>();
        assert_eq!(outputs.len(), 2);
        h.ledger.blocks.lock().unwrap().insert(
            41,
            LedgerBlock {
                height: 41,
                hash: "h41".into(),
                parent_hash: None,
                timestamp: None,
                transactions: vec![LedgerTransaction {
                    tx_id: "swap-spend".into(),
                    block_height: Some(41),
                    outputs,
                }],
            },
        );
        h.notes.set(vec![ParsedNote::new("e", "f", 48_000)]);
        h.ledger.set_height(41);

        let swap = h.monitor.status("s1").await.unwrap();
        assert_eq!(swap.status, SwapStatus::SentConfirmed);
        assert_eq!(swap.tx_id.as_deref(), Some("swap-spend"));
        assert_eq!(swap.confirmed_block_height, Some(41));

        h.ledger.set_height(43);
        assert_eq!(h.monitor.status("s1").await.unwrap().status, SwapStatus::SentConfirmed);
    }

    #[tokio::test]
    async fn spending_one_of_two_identical_notes_is_seen() {
        let h = harness();
        let twins = vec![ParsedNote::new("a", "b", 1000), ParsedNote::new("a", "b", 1000)];
        h.notes.set(twins.clone());
        h.ledger.set_height(100);
        h.monitor.register(&terms("s1"), &twins, 100, PAYMENT).await.unwrap();
        assert_eq!(h.monitor.status("s1").await.unwrap().status, SwapStatus::Pending);

        h.notes.set(vec![ParsedNote::new("a", "b", 1000)]);
        let swap = h.monitor.status("s1").await.unwrap();
        assert_eq!(swap.status, SwapStatus::SentPending);
        assert!(swap.change_utxo.is_empty());
    }

    #[tokio::test]
    async fn sent_pending_fails_after_timeout() {
        let h = harness();
        registered(&h, "s1").await;
        h.notes.set(vec![]);
        h.ledger.set_height(102);
        assert_eq!(h.monitor.status("s1").await.unwrap().status, SwapStatus::SentPending);

        h.ledger.set_height(103);
        let swap = h.monitor.status("s1").await.unwrap();
        assert_eq!(swap.status, SwapStatus::Failed);
        assert!(swap.error.unwrap().contains("3 blocks"));

        // Terminal: a late payment does not revive it.
        h.ledger.add_payment(103, "late", "recipient-addr", PAYMENT);
        assert_eq!(h.monitor.status("s1").await.unwrap().status, SwapStatus::Failed);
    }

    #[tokio::test]
    async fn unobserved_spend_becomes_unconfirmed_not_failed() {
        let h = harness();
        registered(&h, "s1").await;
        h.ledger.set_height(110);

        let swap = h.monitor.status("s1").await.unwrap();
        assert_eq!(swap.status, SwapStatus::Unconfirmed);
        assert_eq!(h.monitor.status("s1").await.unwrap().status, SwapStatus::Unconfirmed);

        h.notes.set(vec![ParsedNote::new("c", "d", 50)]);
        let swap = h.monitor.status("s1").await.unwrap();
        // Moves on, then times out against the original height.
        assert_eq!(swap.status, SwapStatus::Failed);
    }

    #[tokio::test]
    async fn observation_failure_leaves_state_unchanged() {
        let h = harness();
        registered(&h, "s1").await;
        h.notes.offline.store(true, Ordering::SeqCst);
        h.ledger.set_height(200);

        let before = h.monitor.store().get("s1").await.unwrap();
        let after = h.monitor.status("s1").await.unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn duplicate_and_unknown_ids() {
        let h = harness();
        registered(&h, "s1").await;
        let err = h
            .monitor
            .register(&terms("s1"), &wallet(), 100, PAYMENT)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
        let err = h.monitor.status("nope").await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn mark_failed_keeps_terminal_states() {
        let h = harness();
        registered(&h, "s1").await;
        let swap = h.monitor.mark_failed("s1", "wallet command failed during sign").await.unwrap();
        assert_eq!(swap.status, SwapStatus::Failed);
        let again = h.monitor.mark_failed("s1", "other").await.unwrap();
        assert_eq!(again.error.as_deref(), Some("wallet command failed during sign"));
    }

    #[tokio::test]
    async fn sweep_removes_only_old_terminal_swaps() {
        let h = harness();
        registered(&h, "old-failed").await;
        registered(&h, "live").await;
        h.monitor.mark_failed("old-failed", "boom").await.unwrap();

        let store = h.monitor.store();
        let retention = Duration::from_secs(3600);
        assert_eq!(store.sweep_terminal_at(Utc::now(), retention).await, 0);

        let later = Utc::now() + ChronoDuration::hours(2);
        assert_eq!(store.sweep_terminal_at(later, retention).await, 1);
        assert!(!store.contains("old-failed").await);
        assert!(store.contains("live").await);
    }

    #[test]
    fn status_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(SwapStatus::SentConfirmed).unwrap(),
            serde_json::json!("sent-confirmed")
        );
        assert!(SwapStatus::Failed.is_terminal());
        assert!(!SwapStatus::Unconfirmed.is_terminal());
    }
}
