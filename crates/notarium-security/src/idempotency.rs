// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Idempotency store — at-most-once execution for retried write requests.
//
// Each client-supplied key maps to exactly one slot: either an in-flight
// reservation (the operation is running somewhere) or a recorded entry
// (payload fingerprint + response snapshot). The map is guarded by a plain
// mutex that is only held for map operations; callers waiting on somebody
// else's reservation park on a watch channel with no lock held, so a slow
// TSA exchange never blocks unrelated keys.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use notarium_core::error::{NotariumError, Result};
use notarium_core::types::Fingerprint;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// A recorded response for one idempotency key.
#[derive(Debug, Clone)]
pub struct IdempotencyEntry<R> {
    pub key: String,
    pub payload_fingerprint: Fingerprint,
    pub response: R,
    pub created_at: DateTime<Utc>,
}

/// Result of [`IdempotencyStore::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome<R> {
    /// No live entry for this key.
    Absent,
    /// Same key, same payload: replay the stored response.
    MatchedReplay(R),
    /// Same key, different payload: a client error.
    Conflict { stored: Fingerprint },
}

/// Result of [`IdempotencyStore::begin`].
#[derive(Debug)]
pub enum Admission<R> {
    /// The caller owns the key and must run the operation.
    Execute(Reservation<R>),
    /// The operation already ran with this payload; here is its response.
    Replay(R),
}

enum Slot<R> {
    InFlight {
        id: Uuid,
        fingerprint: Fingerprint,
        done: watch::Receiver<()>,
    },
    Recorded {
        entry: IdempotencyEntry<R>,
        /// Monotonic reading the TTL is measured from; `created_at` is for
        /// reporting only.
        recorded_at: Instant,
    },
}

impl<R> Slot<R> {
    fn recorded(entry: IdempotencyEntry<R>) -> Self {
        Slot::Recorded {
            entry,
            recorded_at: Instant::now(),
        }
    }
}

struct Inner<R> {
    slots: Mutex<HashMap<String, Slot<R>>>,
    ttl: Duration,
}

impl<R> Inner<R> {
    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot<R>>> {
        // Slots are only ever inserted or removed whole, so a panic in
        // another holder cannot leave a torn entry behind.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, recorded_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(recorded_at) > self.ttl
    }
}

/// What `begin` saw under the lock.
enum Seen<R> {
    Replay(R),
    Conflict(Fingerprint),
    Wait(watch::Receiver<()>),
    Vacant,
}

/// TTL-bounded, in-memory idempotency store.
///
/// Contents are ephemeral: a fresh process starts with an empty store.
/// Cloning is cheap and every clone shares the same map.
pub struct IdempotencyStore<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for IdempotencyStore<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Clone> IdempotencyStore<R> {
    /// Create an empty store whose entries expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                ttl,
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Look up the recorded entry for `key` without waiting.
    ///
    /// In-flight reservations have recorded nothing yet and read as
    /// `Absent`, as do expired entries the sweeper has not reached.
    pub fn check(&self, key: &str, payload_fingerprint: &Fingerprint) -> CheckOutcome<R> {
        let slots = self.inner.slots();
        match slots.get(key) {
            Some(Slot::Recorded { entry, recorded_at })
                if !self.inner.is_expired(*recorded_at, Instant::now()) =>
            {
                if entry.payload_fingerprint == *payload_fingerprint {
                    CheckOutcome::MatchedReplay(entry.response.clone())
                } else {
                    CheckOutcome::Conflict {
                        stored: entry.payload_fingerprint,
                    }
                }
            }
            _ => CheckOutcome::Absent,
        }
    }

    /// The live recorded entry for `key`, if any.
    pub fn get(&self, key: &str) -> Option<IdempotencyEntry<R>> {
        let slots = self.inner.slots();
        match slots.get(key) {
            Some(Slot::Recorded { entry, recorded_at })
                if !self.inner.is_expired(*recorded_at, Instant::now()) =>
            {
                Some(entry.clone())
            }
            _ => None,
        }
    }

    /// Record a response for a key nobody holds.
    ///
    /// Fails with `DuplicateEntry` if the key has a live entry or an
    /// in-flight reservation; entries are never overwritten.
    pub fn set(&self, key: &str, payload_fingerprint: Fingerprint, response: R) -> Result<()> {
        let mut slots = self.inner.slots();
        let occupied = match slots.get(key) {
            Some(Slot::Recorded { recorded_at, .. }) => {
                !self.inner.is_expired(*recorded_at, Instant::now())
            }
            Some(Slot::InFlight { .. }) => true,
            None => false,
        };
        if occupied {
            warn!(key, "refusing to overwrite live idempotency entry");
            return Err(NotariumError::DuplicateEntry {
                key: key.to_owned(),
            });
        }
        slots.insert(
            key.to_owned(),
            Slot::recorded(IdempotencyEntry {
                key: key.to_owned(),
                payload_fingerprint,
                response,
                created_at: Utc::now(),
            }),
        );
        debug!(key, %payload_fingerprint, "idempotency entry recorded");
        Ok(())
    }

    /// Admit a write request for `key`.
    ///
    /// Exactly one concurrent caller per key receives `Execute`; the others
    /// wait until that reservation is completed (and then replay its
    /// response) or dropped (and then compete for the key again). A
    /// different payload under the same key is an `IdempotencyConflict`.
    #[instrument(skip(self, payload_fingerprint), fields(fingerprint = %payload_fingerprint))]
    pub async fn begin(&self, key: &str, payload_fingerprint: Fingerprint) -> Result<Admission<R>> {
        loop {
            let seen = {
                let slots = self.inner.slots();
                match slots.get(key) {
                    Some(Slot::Recorded { entry, recorded_at })
                        if !self.inner.is_expired(*recorded_at, Instant::now()) =>
                    {
                        if entry.payload_fingerprint == payload_fingerprint {
                            Seen::Replay(entry.response.clone())
                        } else {
                            Seen::Conflict(entry.payload_fingerprint)
                        }
                    }
                    Some(Slot::InFlight {
                        fingerprint, done, ..
                    }) => {
                        if *fingerprint == payload_fingerprint {
                            Seen::Wait(done.clone())
                        } else {
                            Seen::Conflict(*fingerprint)
                        }
                    }
                    _ => Seen::Vacant,
                }
            };

            match seen {
                Seen::Replay(response) => {
                    debug!("replaying recorded response");
                    return Ok(Admission::Replay(response));
                }
                Seen::Conflict(stored) => {
                    warn!(%stored, "idempotency key reused with a different payload");
                    return Err(NotariumError::IdempotencyConflict {
                        key: key.to_owned(),
                        stored,
                        presented: payload_fingerprint,
                    });
                }
                Seen::Wait(mut done) => {
                    debug!("waiting for in-flight request with the same key");
                    // The sender is dropped, never sent on, so this resolves
                    // with Err once the holder completes or abandons.
                    let _ = done.changed().await;
                }
                Seen::Vacant => {
                    if let Some(reservation) = self.try_reserve(key, payload_fingerprint) {
                        debug!("key reserved");
                        return Ok(Admission::Execute(reservation));
                    }
                }
            }
        }
    }

    // Re-checks under the lock: another caller may have reserved the key
    // between the lookup above and now.
    fn try_reserve(&self, key: &str, payload_fingerprint: Fingerprint) -> Option<Reservation<R>> {
        let mut slots = self.inner.slots();
        let vacant = match slots.get(key) {
            Some(Slot::Recorded { recorded_at, .. }) => {
                self.inner.is_expired(*recorded_at, Instant::now())
            }
            Some(Slot::InFlight { .. }) => false,
            None => true,
        };
        if !vacant {
            return None;
        }
        let (tx, rx) = watch::channel(());
        let id = Uuid::new_v4();
        slots.insert(
            key.to_owned(),
            Slot::InFlight {
                id,
                fingerprint: payload_fingerprint,
                done: rx,
            },
        );
        Some(Reservation {
            inner: Arc::clone(&self.inner),
            key: key.to_owned(),
            id,
            payload_fingerprint,
            _done: tx,
        })
    }

    /// Remove every recorded entry older than the TTL.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    /// [`cleanup`](Self::cleanup) against an explicit clock reading.
    ///
    /// An entry is removed iff more than `ttl` has elapsed between its
    /// recording and `now` on the monotonic clock. In-flight reservations
    /// are never touched. Returns the number removed.
    pub fn cleanup_at(&self, now: Instant) -> usize {
        let mut slots = self.inner.slots();
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Recorded { recorded_at, .. } => !self.inner.is_expired(*recorded_at, now),
            Slot::InFlight { .. } => true,
        });
        let removed = before - slots.len();
        if removed > 0 {
            info!(removed, remaining = slots.len(), "expired idempotency entries swept");
        }
        removed
    }

    /// Number of live recorded entries. Diagnostic only.
    pub fn size(&self) -> usize {
        let now = Instant::now();
        self.inner
            .slots()
            .values()
            .filter(|slot| match slot {
                Slot::Recorded { recorded_at, .. } => !self.inner.is_expired(*recorded_at, now),
                Slot::InFlight { .. } => false,
            })
            .count()
    }

    /// Number of reservations whose operation is still running.
    pub fn in_flight(&self) -> usize {
        self.inner
            .slots()
            .values()
            .filter(|slot| matches!(slot, Slot::InFlight { .. }))
            .count()
    }
}

/// Exclusive right to execute the operation for one key.
///
/// Call [`complete`](Self::complete) with the response once the operation
/// succeeds. Dropping the reservation instead (error, cancellation, panic)
/// releases the key without recording anything, and wakes any waiters.
pub struct Reservation<R> {
    inner: Arc<Inner<R>>,
    key: String,
    id: Uuid,
    payload_fingerprint: Fingerprint,
    // Dropped after `Drop::drop` has updated the map, which wakes waiters.
    _done: watch::Sender<()>,
}

impl<R> std::fmt::Debug for Reservation<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("payload_fingerprint", &self.payload_fingerprint)
            .finish()
    }
}

impl<R> Reservation<R> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn payload_fingerprint(&self) -> &Fingerprint {
        &self.payload_fingerprint
    }

    /// Record `response` as the outcome for this key.
    pub fn complete(self, response: R) -> Result<()> {
        let mut slots = self.inner.slots();
        match slots.get(&self.key) {
            Some(Slot::InFlight { id, .. }) if *id == self.id => {}
            _ => {
                return Err(NotariumError::DuplicateEntry {
                    key: self.key.clone(),
                });
            }
        }
        slots.insert(
            self.key.clone(),
            Slot::recorded(IdempotencyEntry {
                key: self.key.clone(),
                payload_fingerprint: self.payload_fingerprint,
                response,
                created_at: Utc::now(),
            }),
        );
        debug!(key = %self.key, "reservation completed");
        Ok(())
    }
}

impl<R> Drop for Reservation<R> {
    fn drop(&mut self) {
        let mut slots = self.inner.slots();
        let ours = matches!(
            slots.get(&self.key),
            Some(Slot::InFlight { id, .. }) if *id == self.id
        );
        if ours {
            slots.remove(&self.key);
            debug!(key = %self.key, "reservation abandoned, nothing recorded");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::integrity::digest;

    const TTL: Duration = Duration::from_secs(60);

    fn store() -> IdempotencyStore<String> {
        IdempotencyStore::new(TTL)
    }

    #[test]
    fn set_then_check_replays() {
        let store = store();
        let h = digest(b"payload");
        store.set("k1", h, "response".into()).unwrap();

        assert_eq!(
            store.check("k1", &h),
            CheckOutcome::MatchedReplay("response".to_string())
        );
        assert_eq!(store.size(), 1);
    }

    #[test]
    fn check_with_different_payload_conflicts() {
        let store = store();
        let h = digest(b"payload");
        let h2 = digest(b"other payload");
        store.set("k1", h, "response".into()).unwrap();

        assert_eq!(store.check("k1", &h2), CheckOutcome::Conflict { stored: h });
    }

    #[test]
    fn unknown_key_is_absent() {
        let store = store();
        assert_eq!(store.check("missing", &digest(b"x")), CheckOutcome::Absent);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn set_never_overwrites_live_entry() {
        let store = store();
        let h = digest(b"payload");
        store.set("k1", h, "first".into()).unwrap();

        let err = store.set("k1", h, "second".into()).unwrap_err();
        assert!(matches!(err, NotariumError::DuplicateEntry { .. }));
        assert_eq!(store.get("k1").unwrap().response, "first");
    }

    #[test]
    fn cleanup_keeps_fresh_entries() {
        let store = store();
        store.set("k1", digest(b"a"), "r".into()).unwrap();
        assert_eq!(store.cleanup(), 0);
        assert_eq!(store.size(), 1);
    }

    fn recorded_at(store: &IdempotencyStore<String>, key: &str) -> Instant {
        match store.inner.slots().get(key) {
            Some(Slot::Recorded { recorded_at, .. }) => *recorded_at,
            _ => panic!("no recorded entry for {key}"),
        }
    }

    #[test]
    fn cleanup_removes_only_entries_older_than_ttl() {
        let store = store();
        store.set("k1", digest(b"a"), "r".into()).unwrap();
        let recorded = recorded_at(&store, "k1");

        // Exactly at the TTL boundary the entry is not yet older than ttl.
        assert_eq!(store.cleanup_at(recorded + TTL), 0);
        assert_eq!(store.cleanup_at(recorded + TTL + Duration::from_secs(1)), 1);
        assert_eq!(store.size(), 0);
        // Idempotent.
        assert_eq!(store.cleanup_at(recorded + TTL + Duration::from_secs(1)), 0);
    }

    #[test]
    fn expiry_ignores_wall_clock_steps() {
        let store = store();
        let now = Instant::now();
        // Wall clock stepped back a day after this entry was written.
        store.inner.slots().insert(
            "k1".into(),
            Slot::Recorded {
                entry: IdempotencyEntry {
                    key: "k1".into(),
                    payload_fingerprint: digest(b"a"),
                    response: "r".into(),
                    created_at: Utc::now() + chrono::Duration::days(1),
                },
                recorded_at: now,
            },
        );

        // A reading before the recording never counts as aged.
        assert_eq!(store.cleanup_at(now.checked_sub(Duration::from_secs(1)).unwrap_or(now)), 0);
        assert_eq!(store.cleanup_at(now + TTL + Duration::from_secs(1)), 1);
    }

    #[test]
    fn expired_entry_reads_absent_and_can_be_replaced() {
        let store: IdempotencyStore<String> = IdempotencyStore::new(Duration::ZERO);
        let h = digest(b"a");
        store.set("k1", h, "old".into()).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(store.check("k1", &h), CheckOutcome::Absent);
        store.set("k1", h, "new".into()).unwrap();
    }

    #[tokio::test]
    async fn begin_executes_once_then_replays() {
        let store = store();
        let h = digest(b"payload");

        let Admission::Execute(reservation) = store.begin("k1", h).await.unwrap() else {
            panic!("first admission must execute");
        };
        assert_eq!(store.in_flight(), 1);
        assert_eq!(store.check("k1", &h), CheckOutcome::Absent);
        reservation.complete("done".into()).unwrap();

        match store.begin("k1", h).await.unwrap() {
            Admission::Replay(r) => assert_eq!(r, "done"),
            Admission::Execute(_) => panic!("second admission must replay"),
        }
        assert_eq!(store.in_flight(), 0);
    }

    #[tokio::test]
    async fn begin_with_different_payload_is_conflict() {
        let store = store();
        store.set("k1", digest(b"a"), "r".into()).unwrap();

        let err = store.begin("k1", digest(b"b")).await.unwrap_err();
        match err {
            NotariumError::IdempotencyConflict {
                key,
                stored,
                presented,
            } => {
                assert_eq!(key, "k1");
                assert_eq!(stored, digest(b"a"));
                assert_eq!(presented, digest(b"b"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn conflict_is_detected_while_in_flight() {
        let store = store();
        let _held = store.begin("k1", digest(b"a")).await.unwrap();
        let err = store.begin("k1", digest(b"b")).await.unwrap_err();
        assert!(matches!(err, NotariumError::IdempotencyConflict { .. }));
    }

    #[tokio::test]
    async fn dropped_reservation_records_nothing() {
        let store = store();
        let h = digest(b"payload");
        {
            let admission = store.begin("k1", h).await.unwrap();
            assert!(matches!(admission, Admission::Execute(_)));
        }
        assert_eq!(store.in_flight(), 0);
        assert_eq!(store.size(), 0);
        assert!(matches!(
            store.begin("k1", h).await.unwrap(),
            Admission::Execute(_)
        ));
    }

    #[tokio::test]
    async fn cleanup_never_removes_in_flight_reservations() {
        let store = store();
        let _held = store.begin("k1", digest(b"a")).await.unwrap();
        let far_future = Instant::now() + Duration::from_secs(365 * 24 * 60 * 60);
        assert_eq!(store.cleanup_at(far_future), 0);
        assert_eq!(store.in_flight(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_attempts_execute_once() {
        let store = store();
        let executions = Arc::new(AtomicUsize::new(0));
        let h = digest(b"same payload");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let executions = Arc::clone(&executions);
            handles.push(tokio::spawn(async move {
                match store.begin("K", h).await.unwrap() {
                    Admission::Execute(reservation) => {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        reservation.complete("stored response".to_string()).unwrap();
                        "stored response".to_string()
                    }
                    Admission::Replay(response) => response,
                }
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), "stored response");
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(store.size(), 1);
    }

    #[tokio::test]
    async fn waiter_takes_over_after_abandoned_reservation() {
        let store = store();
        let h = digest(b"payload");
        let Admission::Execute(first) = store.begin("k1", h).await.unwrap() else {
            panic!("expected execute");
        };

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.begin("k1", h).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(first);

        let admission = waiter.await.unwrap().unwrap();
        assert!(matches!(admission, Admission::Execute(_)));
    }
}
