use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use super::error::PlutoError;
use super::identity::IdentityKey;

/// Upstream session tokens stay valid for a few hours; refresh well before that.
pub const SESSION_TTL: Duration = Duration::from_secs(4 * 60 * 60);

/// An authentication payload plus the moment it was obtained. Never mutated;
/// a refresh installs a new `Arc`.
#[derive(Debug)]
pub struct CachedSession {
    payload: Value,
    obtained_at: Instant,
    ttl: Duration,
}

impl CachedSession {
    pub fn new(payload: Value, ttl: Duration) -> Self {
        Self {
            payload,
            obtained_at: Instant::now(),
            ttl,
        }
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn obtained_at(&self) -> Instant {
        self.obtained_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.obtained_at) >= self.ttl
    }

    pub fn token(&self) -> Option<&str> {
        self.payload["sessionToken"]
            .as_str()
            .filter(|t| !t.is_empty())
    }

    /// Query string the stitcher expects on every playback URL, if the
    /// upstream supplied one.
    pub fn stitcher_params(&self) -> Option<&str> {
        self.payload["stitcherParams"]
            .as_str()
            .filter(|p| !p.is_empty())
    }
}

type Outcome = Result<Arc<CachedSession>, PlutoError>;

enum Slot {
    Ready(Arc<CachedSession>),
    Pending {
        flight: u64,
        rx: watch::Receiver<Option<Outcome>>,
    },
}

#[derive(Default)]
struct Slots {
    next_flight: u64,
    entries: HashMap<IdentityKey, Slot>,
}

enum Claim {
    Hit(Arc<CachedSession>),
    Wait(watch::Receiver<Option<Outcome>>),
    Lead(u64, watch::Sender<Option<Outcome>>),
}

// ── Session cache ──────────────────────────────────────────────────────────────

/// Per-identity session store with single-flight refresh.
///
/// The first caller to miss on a key becomes the leader and runs the fetch;
/// callers arriving while it is in flight subscribe to the leader's result
/// instead of authenticating again. Failures are handed to those waiters and
/// then forgotten, so the next lookup retries.
pub struct SessionCache {
    slots: Mutex<Slots>,
    ttl: Duration,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCache {
    pub fn new() -> Self {
        Self::with_ttl(SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn get_session<F, Fut>(&self, key: IdentityKey, fetch: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, PlutoError>>,
    {
        let (flight, tx) = loop {
            match self.claim(key) {
                Claim::Hit(session) => return Ok(session),
                Claim::Lead(flight, tx) => break (flight, tx),
                Claim::Wait(rx) => {
                    debug!(?key, "session fetch in flight, waiting");
                    if let Some(outcome) = wait_for_leader(rx).await {
                        return outcome;
                    }
                    // Leader vanished without an answer; race to take over.
                }
            }
        };

        debug!(?key, flight, "fetching new session");
        let mut guard = FlightGuard {
            cache: self,
            key,
            flight,
            tx: Some(tx),
        };
        let outcome = fetch()
            .await
            .map(|payload| Arc::new(CachedSession::new(payload, self.ttl)));
        guard.complete(outcome.clone());
        outcome
    }

    fn claim(&self, key: IdentityKey) -> Claim {
        let mut slots = self.lock();
        match slots.entries.get(&key) {
            Some(Slot::Ready(session)) if !session.is_expired(Instant::now()) => {
                return Claim::Hit(Arc::clone(session));
            }
            Some(Slot::Pending { rx, .. }) => return Claim::Wait(rx.clone()),
            _ => {}
        }

        let flight = slots.next_flight;
        slots.next_flight += 1;
        let (tx, rx) = watch::channel(None);
        slots.entries.insert(key, Slot::Pending { flight, rx });
        Claim::Lead(flight, tx)
    }

    /// Forgets every session. Fetches already in flight still answer their
    /// own waiters but are not stored.
    pub fn invalidate_all(&self) {
        let mut slots = self.lock();
        let dropped = slots.entries.len();
        slots.entries.clear();
        debug!(dropped, "session cache invalidated");
    }

    /// Live session for `key`, without fetching.
    pub fn cached(&self, key: &IdentityKey) -> Option<Arc<CachedSession>> {
        match self.lock().entries.get(key) {
            Some(Slot::Ready(session)) if !session.is_expired(Instant::now()) => {
                Some(Arc::clone(session))
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.lock()
            .entries
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn wait_for_leader(mut rx: watch::Receiver<Option<Outcome>>) -> Option<Outcome> {
    match rx.wait_for(Option::is_some).await {
        Ok(value) => (*value).clone(),
        Err(_) => None,
    }
}

/// Owns the leader's side of a flight. If the leader future is dropped before
/// finishing, the pending marker is removed before the channel closes so
/// waiters retry against a clean slot.
struct FlightGuard<'a> {
    cache: &'a SessionCache,
    key: IdentityKey,
    flight: u64,
    tx: Option<watch::Sender<Option<Outcome>>>,
}

impl FlightGuard<'_> {
    fn complete(&mut self, outcome: Outcome) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        {
            let mut slots = self.cache.lock();
            if self.is_current(&slots) {
                match &outcome {
                    Ok(session) => {
                        slots
                            .entries
                            .insert(self.key, Slot::Ready(Arc::clone(session)));
                    }
                    Err(_) => {
                        slots.entries.remove(&self.key);
                    }
                }
            }
        }
        tx.send_replace(Some(outcome));
    }

    fn is_current(&self, slots: &Slots) -> bool {
        matches!(
            slots.entries.get(&self.key),
            Some(Slot::Pending { flight, .. }) if *flight == self.flight
        )
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.tx.is_none() {
            return;
        }
        let mut slots = self.cache.lock();
        if self.is_current(&slots) {
            slots.entries.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::types::Region;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(region: Region, slot: usize) -> IdentityKey {
        IdentityKey {
            region,
            account_slot: slot,
            device_slot: slot,
        }
    }

    async fn slow_ok(counter: &AtomicUsize, token: &str) -> Result<Value, PlutoError> {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(json!({ "sessionToken": token }))
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_fetch_once() {
        let cache = SessionCache::new();
        let calls = AtomicUsize::new(0);
        let k = key(Region::Uk, 0);

        let results = futures::future::join_all(
            (0..16).map(|_| cache.get_session(k, || slow_ok(&calls, "tok"))),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            let session = result.as_ref().unwrap();
            assert!(Arc::ptr_eq(first, session));
            assert_eq!(session.token(), Some("tok"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_fetch_independently() {
        let cache = SessionCache::new();
        let calls = AtomicUsize::new(0);

        let (a, b) = tokio::join!(
            cache.get_session(key(Region::Uk, 0), || slow_ok(&calls, "a")),
            cache.get_session(key(Region::Uk, 1), || slow_ok(&calls, "b")),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(a.unwrap().token(), Some("a"));
        assert_eq!(b.unwrap().token(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_reaches_every_waiter_and_is_not_cached() {
        let cache = SessionCache::new();
        let calls = AtomicUsize::new(0);
        let k = key(Region::Ca, 0);

        let counter = &calls;
        let failing = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err::<Value, _>(PlutoError::UpstreamUnavailable("HTTP 503".into()))
        };

        let results = futures::future::join_all((0..5).map(|_| cache.get_session(k, failing))).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(
                result.unwrap_err(),
                PlutoError::UpstreamUnavailable("HTTP 503".into())
            );
        }
        assert!(cache.cached(&k).is_none());

        let retry = cache.get_session(k, || slow_ok(&calls, "ok")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(retry.unwrap().token(), Some("ok"));
    }

    #[tokio::test(start_paused = true)]
    async fn live_entry_is_reused_until_ttl_elapses() {
        let cache = SessionCache::new();
        let calls = AtomicUsize::new(0);
        let k = key(Region::De, 2);

        cache.get_session(k, || slow_ok(&calls, "first")).await.unwrap();
        tokio::time::advance(SESSION_TTL - Duration::from_secs(60)).await;

        let hit = cache.get_session(k, || slow_ok(&calls, "second")).await.unwrap();
        assert_eq!(hit.token(), Some("first"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        let refreshed = cache.get_session(k, || slow_ok(&calls, "second")).await.unwrap();
        assert_eq!(refreshed.token(), Some("second"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_all_forces_refetch() {
        let cache = SessionCache::new();
        let calls = AtomicUsize::new(0);
        let k = key(Region::Local, 0);

        cache.get_session(k, || slow_ok(&calls, "old")).await.unwrap();
        assert_eq!(cache.len(), 1);
        cache.invalidate_all();
        assert!(cache.is_empty());

        let fresh = cache.get_session(k, || slow_ok(&calls, "new")).await.unwrap();
        assert_eq!(fresh.token(), Some("new"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidation_during_flight_does_not_store_stale_result() {
        let cache = SessionCache::new();
        let calls = AtomicUsize::new(0);
        let k = key(Region::Fr, 0);

        let (in_flight, after) = tokio::join!(
            cache.get_session(k, || slow_ok(&calls, "before")),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                cache.invalidate_all();
                cache.get_session(k, || slow_ok(&calls, "after")).await
            }
        );

        assert_eq!(in_flight.unwrap().token(), Some("before"));
        assert_eq!(after.unwrap().token(), Some("after"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.cached(&k).unwrap().token(), Some("after"));
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_takes_over_when_leader_is_dropped() {
        let cache = SessionCache::new();
        let calls = AtomicUsize::new(0);
        let k = key(Region::UsEast, 0);

        let counter = &calls;
        let stalled = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!({ "sessionToken": "never" }))
        };

        let (leader, waiter) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(20), cache.get_session(k, stalled)),
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                cache.get_session(k, || slow_ok(&calls, "takeover")).await
            }
        );

        assert!(leader.is_err());
        assert_eq!(waiter.unwrap().token(), Some("takeover"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn payload_accessors_ignore_blank_fields() {
        let session = CachedSession::new(
            json!({ "sessionToken": "", "stitcherParams": "a=1" }),
            SESSION_TTL,
        );
        assert_eq!(session.token(), None);
        assert_eq!(session.stitcher_params(), Some("a=1"));
    }
}
