// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Background expiry of idempotency entries.

use std::time::Duration;

use notarium_security::idempotency::IdempotencyStore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Spawn a task that calls [`IdempotencyStore::cleanup`] every `every`
/// until `cancel` fires. The task resolves to the total number of entries
/// it removed.
pub fn spawn_sweeper<R>(
    store: IdempotencyStore<R>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<usize>
where
    R: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut removed_total = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    removed_total += store.cleanup();
                }
            }
        }
        info!(removed_total, "idempotency sweeper stopped");
        removed_total
    })
}

#[cfg(test)]
mod tests {
    use notarium_core::types::Fingerprint;

    use super::*;

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::from_bytes([byte; 32])
    }

    #[tokio::test(start_paused = true)]
    async fn removes_expired_entries_until_cancelled() {
        let store: IdempotencyStore<String> = IdempotencyStore::new(Duration::from_millis(1));
        store.set("a", fp(1), "one".into()).unwrap();
        store.set("b", fp(2), "two".into()).unwrap();
        // Expiry is judged against the wall clock.
        std::thread::sleep(Duration::from_millis(5));

        let cancel = CancellationToken::new();
        let handle = spawn_sweeper(store.clone(), Duration::from_secs(60), cancel.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.size(), 0);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_live_entries() {
        let store: IdempotencyStore<String> = IdempotencyStore::new(Duration::from_secs(3600));
        store.set("a", fp(1), "one".into()).unwrap();

        let cancel = CancellationToken::new();
        let handle = spawn_sweeper(store.clone(), Duration::from_secs(1), cancel.clone());
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();

        assert_eq!(handle.await.unwrap(), 0);
        assert_eq!(store.size(), 1);
    }
}
