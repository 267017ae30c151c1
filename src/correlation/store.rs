use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::entry::{Entry, FinalResult, StatusUpdate};

/// Default time an entry stays reachable after it was observed.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);
/// Default number of independently locked shards.
pub const DEFAULT_SHARD_COUNT: usize = 16;

type Shard<P> = HashMap<String, Slot<P>>;

/// Per-session pair of independent sub-keys.
///
/// Status writes never touch `final_result`, so a late status update can't
/// hide a terminal answer that is already stored.
struct Slot<P> {
    status: Option<StatusUpdate>,
    final_result: Option<FinalResult<P>>,
}

impl<P> Default for Slot<P> {
    fn default() -> Self {
        Self {
            status: None,
            final_result: None,
        }
    }
}

impl<P> Slot<P> {
    fn is_empty(&self) -> bool {
        self.status.is_none() && self.final_result.is_none()
    }
}

/// Result of the poll-order lookup: final first, status second.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<P> {
    Final(FinalResult<P>),
    Status(StatusUpdate),
    Absent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub sessions: usize,
    pub pending_finals: usize,
    pub pending_statuses: usize,
}

/// In-memory table mapping a session id to its pending status and final
/// entries.
///
/// Every operation on one session id runs under that id's shard lock, so
/// `put`, `take_final` and `peek_status` are atomic with respect to each
/// other for the same id. Ids hashed to different shards never contend.
/// Nothing here blocks on I/O and nothing here fails: each read is either
/// present or absent.
pub struct CorrelationStore<P> {
    shards: Box<[Mutex<Shard<P>>]>,
    hasher: RandomState,
    ttl: TimeDelta,
}

impl<P> Default for CorrelationStore<P> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_SHARD_COUNT)
    }
}

impl<P> CorrelationStore<P> {
    pub fn new(ttl: Duration, shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            hasher: RandomState::new(),
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl.to_std().unwrap_or(Duration::MAX)
    }

    /// Unconditional upsert. Status entries replace the previous status;
    /// final entries replace the previous final (last final wins).
    pub fn put(&self, session_id: &str, entry: Entry<P>) {
        let mut shard = self.lock_shard(session_id);
        let slot = shard.entry(session_id.to_string()).or_default();

        match entry {
            Entry::Status(status) => {
                debug!(session.id = session_id, phase = %status.phase, "Stored status update");
                slot.status = Some(status);
            }
            Entry::Final(result) => {
                if slot.final_result.replace(result).is_some() {
                    debug!(session.id = session_id, "Replaced earlier final result");
                } else {
                    debug!(session.id = session_id, "Stored final result");
                }
            }
        }
    }

    /// Consume the final result for `session_id`, releasing its status entry
    /// with it. Exactly one caller observes a given final result.
    pub fn take_final(&self, session_id: &str) -> Option<FinalResult<P>> {
        self.take_final_at(session_id, Utc::now())
    }

    pub fn take_final_at(&self, session_id: &str, now: DateTime<Utc>) -> Option<FinalResult<P>> {
        let mut shard = self.lock_shard(session_id);
        self.take_final_locked(&mut shard, session_id, now)
    }

    /// Non-consuming read of the latest status update.
    pub fn peek_status(&self, session_id: &str) -> Option<StatusUpdate> {
        self.peek_status_at(session_id, Utc::now())
    }

    pub fn peek_status_at(&self, session_id: &str, now: DateTime<Utc>) -> Option<StatusUpdate> {
        let mut shard = self.lock_shard(session_id);
        self.peek_status_locked(&mut shard, session_id, now)
    }

    /// `take_final`, then `peek_status` only if no final was present, under
    /// a single lock acquisition.
    pub fn lookup(&self, session_id: &str) -> Lookup<P> {
        self.lookup_at(session_id, Utc::now())
    }

    pub fn lookup_at(&self, session_id: &str, now: DateTime<Utc>) -> Lookup<P> {
        let mut shard = self.lock_shard(session_id);

        if let Some(result) = self.take_final_locked(&mut shard, session_id, now) {
            return Lookup::Final(result);
        }

        match self.peek_status_locked(&mut shard, session_id, now) {
            Some(status) => Lookup::Status(status),
            None => Lookup::Absent,
        }
    }

    /// Drop every entry older than the TTL, and any status sharing a slot with
    /// an expired final. Returns the number of entries (status or final)
    /// removed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;

        for shard in self.shards.iter() {
            let mut shard = shard.lock().unwrap_or_else(PoisonError::into_inner);
            shard.retain(|_, slot| {
                // An expired final takes its status with it, as on read.
                if slot
                    .final_result
                    .as_ref()
                    .is_some_and(|result| self.is_expired(result.observed_at, now))
                {
                    removed += 1 + usize::from(slot.status.is_some());
                    return false;
                }
                if slot
                    .status
                    .as_ref()
                    .is_some_and(|status| self.is_expired(status.observed_at, now))
                {
                    slot.status = None;
                    removed += 1;
                }
                !slot.is_empty()
            });
        }

        removed
    }

    pub fn stats(&self) -> StoreStats {
        self.shards
            .iter()
            .fold(StoreStats::default(), |mut stats, shard| {
                let shard = shard.lock().unwrap_or_else(PoisonError::into_inner);
                stats.sessions += shard.len();
                for slot in shard.values() {
                    stats.pending_finals += usize::from(slot.final_result.is_some());
                    stats.pending_statuses += usize::from(slot.status.is_some());
                }
                stats
            })
    }

    /// Number of session ids with at least one live entry.
    pub fn len(&self) -> usize {
        self.stats().sessions
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_final_locked(
        &self,
        shard: &mut Shard<P>,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Option<FinalResult<P>> {
        if !shard
            .get(session_id)
            .is_some_and(|slot| slot.final_result.is_some())
        {
            return None;
        }

        // Status is unreachable once a final exists, so it goes with it.
        let result = shard.remove(session_id)?.final_result?;
        if self.is_expired(result.observed_at, now) {
            debug!(session.id = session_id, "Dropped expired final result");
            return None;
        }

        debug!(session.id = session_id, "Consumed final result");
        Some(result)
    }

    fn peek_status_locked(
        &self,
        shard: &mut Shard<P>,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Option<StatusUpdate> {
        let slot = shard.get_mut(session_id)?;
        let status = slot.status.as_ref()?;

        if self.is_expired(status.observed_at, now) {
            slot.status = None;
            if slot.is_empty() {
                shard.remove(session_id);
            }
            debug!(session.id = session_id, "Dropped expired status update");
            return None;
        }

        Some(status.clone())
    }

    fn is_expired(&self, observed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(observed_at) > self.ttl
    }

    fn lock_shard(&self, session_id: &str) -> MutexGuard<'_, Shard<P>> {
        let index = (self.hasher.hash_one(session_id) as usize) % self.shards.len();
        // A panic while holding the lock can't leave a half-written slot, so
        // poisoning is ignored.
        self.shards[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Maintenance view of a store, independent of its payload type, so one
/// sweeper and one health endpoint can serve every integration.
pub trait SweepableStore: Send + Sync {
    fn sweep_expired(&self) -> usize;
    fn stats(&self) -> StoreStats;
}

impl<P: Send> SweepableStore for CorrelationStore<P> {
    fn sweep_expired(&self) -> usize {
        CorrelationStore::sweep_expired(self)
    }

    fn stats(&self) -> StoreStats {
        CorrelationStore::stats(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    fn store() -> CorrelationStore<Value> {
        CorrelationStore::new(Duration::from_secs(600), 4)
    }

    fn minutes_ago(minutes: i64) -> DateTime<Utc> {
        Utc::now() - TimeDelta::minutes(minutes)
    }

    #[test]
    fn test_final_is_consumed_exactly_once() {
        let store = store();
        store.put("abc", Entry::final_result(json!({"formulas": [1, 2, 3]})));

        let taken = store.take_final("abc").expect("final should be present");
        assert_eq!(taken.payload, json!({"formulas": [1, 2, 3]}));
        assert!(store.take_final("abc").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_status_is_last_write_wins_and_not_consumed() {
        let store = store();
        store.put("abc", Entry::status("fetching", None));
        store.put("abc", Entry::status("rewriting", Some("2 of 3".to_string())));

        for _ in 0..3 {
            let status = store.peek_status("abc").expect("status should be present");
            assert_eq!(status.phase, "rewriting");
            assert_eq!(status.message.as_deref(), Some("2 of 3"));
        }
        assert!(store.take_final("abc").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_final_wins_over_status_regardless_of_write_order() {
        let status_after = store();
        status_after.put("s", Entry::final_result(json!("done")));
        status_after.put("s", Entry::status("processing", None));

        let status_before = store();
        status_before.put("s", Entry::status("processing", None));
        status_before.put("s", Entry::final_result(json!("done")));

        for store in [status_after, status_before] {
            match store.lookup("s") {
                Lookup::Final(result) => assert_eq!(result.payload, json!("done")),
                other => panic!("expected final, got {other:?}"),
            }
            // Status was released together with the final.
            assert_eq!(store.lookup("s"), Lookup::Absent);
            assert!(store.is_empty());
        }
    }

    #[test]
    fn test_last_final_wins_on_duplicate_delivery() {
        let store = store();
        store.put("abc", Entry::final_result(json!("p1")));
        store.put("abc", Entry::final_result(json!("p2")));

        assert_eq!(store.take_final("abc").map(|r| r.payload), Some(json!("p2")));
        assert!(store.take_final("abc").is_none());
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = store();
        store.put("s", Entry::status("processing", None));
        store.put("t", Entry::final_result(json!({"image": "t.png"})));

        assert!(store.take_final("s").is_none());
        assert!(store.peek_status("t").is_none());
        assert_eq!(store.peek_status("s").map(|s| s.phase), Some("processing".to_string()));
        assert_eq!(
            store.take_final("t").map(|r| r.payload),
            Some(json!({"image": "t.png"}))
        );
        assert!(store.peek_status("s").is_some());
    }

    #[test]
    fn test_empty_session_id_is_just_another_key() {
        let store = store();
        store.put("", Entry::status("queued", None));
        assert!(store.peek_status("").is_some());
        assert!(store.peek_status("other").is_none());
    }

    #[test]
    fn test_expired_entries_are_unreachable_on_access() {
        let store = store();
        store.put(
            "old",
            Entry::final_result(json!("stale")).with_observed_at(minutes_ago(11)),
        );
        store.put(
            "old-status",
            Entry::<Value>::status("processing", None).with_observed_at(minutes_ago(11)),
        );

        assert!(store.take_final("old").is_none());
        assert!(store.peek_status("old-status").is_none());
        assert_eq!(store.lookup("old-status"), Lookup::Absent);
        assert!(store.is_empty());
    }

    #[test]
    fn test_entry_within_ttl_is_still_reachable() {
        let store = store();
        store.put(
            "recent",
            Entry::final_result(json!("fresh")).with_observed_at(minutes_ago(9)),
        );
        assert_eq!(store.take_final("recent").map(|r| r.payload), Some(json!("fresh")));
    }

    #[test]
    fn test_sweep_drops_only_expired_sub_keys() {
        let store = store();
        store.put(
            "a",
            Entry::<Value>::status("processing", None).with_observed_at(minutes_ago(30)),
        );
        store.put("a", Entry::final_result(json!("kept")));
        store.put(
            "b",
            Entry::final_result(json!("gone")).with_observed_at(minutes_ago(30)),
        );
        store.put("c", Entry::status("fresh", None));

        assert_eq!(store.sweep_expired(), 2);

        let stats = store.stats();
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.pending_finals, 1);
        assert_eq!(stats.pending_statuses, 1);
        assert!(store.take_final("b").is_none());
        assert_eq!(store.take_final("a").map(|r| r.payload), Some(json!("kept")));
    }

    #[test]
    fn test_sweep_releases_late_status_with_expired_final() {
        let store = store();
        store.put(
            "s",
            Entry::final_result(json!("stale")).with_observed_at(minutes_ago(11)),
        );
        store.put("s", Entry::status("processing", None));

        assert_eq!(store.sweep_expired(), 2);
        assert_eq!(store.lookup("s"), Lookup::Absent);
        assert!(store.is_empty());
    }

    #[test]
    fn test_sweep_uses_supplied_clock() {
        let store = store();
        store.put("a", Entry::<Value>::status("processing", None));

        assert_eq!(store.sweep_expired_at(Utc::now()), 0);
        assert_eq!(store.sweep_expired_at(Utc::now() + TimeDelta::minutes(11)), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_take_final_has_single_winner() {
        let store = Arc::new(store());
        store.put("race", Entry::final_result(json!("only once")));

        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));
        let winners = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..threads {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                let winners = Arc::clone(&winners);
                scope.spawn(move || {
                    barrier.wait();
                    if store.take_final("race").is_some() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_final_survives_concurrent_status_writes() {
        let store = Arc::new(store());

        std::thread::scope(|scope| {
            for writer in 0..8 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for step in 0..100 {
                        store.put("busy", Entry::status(format!("{writer}-{step}"), None));
                    }
                });
            }
            let store = Arc::clone(&store);
            scope.spawn(move || store.put("busy", Entry::final_result(json!("answer"))));
        });

        assert_eq!(store.take_final("busy").map(|r| r.payload), Some(json!("answer")));
        assert!(store.peek_status("busy").is_none());
    }

    #[test]
    fn test_zero_shards_falls_back_to_one() {
        let store: CorrelationStore<Value> = CorrelationStore::new(DEFAULT_TTL, 0);
        store.put("a", Entry::status("x", None));
        assert_eq!(store.len(), 1);
        assert_eq!(store.ttl(), DEFAULT_TTL);
    }
}
