use notegate_core::swap::SwapStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Periodically drop terminal swaps older than `retention`. Abort the handle to stop.
pub fn spawn_sweeper(store: Arc<SwapStore>, every: Duration, retention: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = store.sweep_terminal(retention).await;
            if removed > 0 {
                info!(removed, "swept terminal swaps");
            } else {
                debug!("swap sweep found nothing to remove");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notegate_core::swap::{SwapStatus, SwapTransaction};
    use notegate_core::validation::ValidatedSwapParams;

    fn swap(id: &str, status: SwapStatus) -> SwapTransaction {
        let terms = ValidatedSwapParams {
            swap_id: id.into(),
            recipient: "addr".into(),
            amount: 1,
            fee: 1,
        };
        let mut swap = SwapTransaction::pending(&terms, &[], 1, 1);
        swap.status = status;
        swap
    }

    #[tokio::test]
    async fn sweeps_terminal_swaps_until_aborted() {
        let store = Arc::new(SwapStore::new());
        store.insert(swap("done", SwapStatus::SentConfirmed)).await.unwrap();
        store.insert(swap("waiting", SwapStatus::SentPending)).await.unwrap();

        let handle = spawn_sweeper(store.clone(), Duration::from_millis(20), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.abort();

        assert!(!store.contains("done").await);
        assert!(store.contains("waiting").await);
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
