//! Bounded LRU cache of request records with per-entry expiry.

use std::collections::{BTreeMap, HashMap};

use super::record::RequestRecord;

/// Default number of identifiers tracked per limiter.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

struct Slot {
    record: RequestRecord,
    /// Epoch ms after which the entry is treated as absent
    expires_at: u64,
    /// Position in the recency index
    tick: u64,
}

/// LRU-bounded map from identifier to [`RequestRecord`].
///
/// Recency is tracked with a monotonically increasing tick; the smallest
/// tick in `recency` is the least-recently-used entry. Eviction and expiry
/// run synchronously inside the calls that touch the cache.
pub struct RecordCache {
    capacity: usize,
    ttl_ms: u64,
    entries: HashMap<String, Slot>,
    recency: BTreeMap<u64, String>,
    next_tick: u64,
}

impl RecordCache {
    /// Create a cache holding at most `capacity` records, each living `ttl_ms`
    /// after its last write. A capacity of zero is raised to one.
    pub fn new(capacity: usize, ttl_ms: u64) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl_ms,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a live record and mark it most-recently-used.
    ///
    /// An expired entry is dropped and reported as absent.
    pub fn get(&mut self, key: &str, now: u64) -> Option<&RequestRecord> {
        let expired = match self.entries.get(key) {
            Some(slot) => now >= slot.expires_at,
            None => return None,
        };

        if expired {
            self.remove(key);
            return None;
        }

        let tick = self.bump_tick();
        let slot = self.entries.get_mut(key)?;
        self.recency.remove(&slot.tick);
        slot.tick = tick;
        self.recency.insert(tick, key.to_string());

        Some(&slot.record)
    }

    /// Look up a live record without touching recency or dropping anything.
    pub fn peek(&self, key: &str, now: u64) -> Option<&RequestRecord> {
        self.entries
            .get(key)
            .filter(|slot| now < slot.expires_at)
            .map(|slot| &slot.record)
    }

    /// Store `record` as the most-recently-used entry for `key`.
    ///
    /// The entry expires `ttl_ms` from `now`, or when its block lifts if that
    /// is later. Inserting a new key at capacity evicts the least-recently-used
    /// entry.
    pub fn insert(&mut self, key: &str, record: RequestRecord, now: u64) {
        let mut expires_at = now.saturating_add(self.ttl_ms);
        if record.blocked {
            if let Some(until) = record.block_until {
                expires_at = expires_at.max(until);
            }
        }

        let tick = self.bump_tick();

        if let Some(slot) = self.entries.get_mut(key) {
            self.recency.remove(&slot.tick);
            slot.record = record;
            slot.expires_at = expires_at;
            slot.tick = tick;
            self.recency.insert(tick, key.to_string());
            return;
        }

        while self.entries.len() >= self.capacity {
            if !self.evict_lru() {
                break;
            }
        }

        self.entries.insert(
            key.to_string(),
            Slot {
                record,
                expires_at,
                tick,
            },
        );
        self.recency.insert(tick, key.to_string());
    }

    /// Remove the entry for `key`, returning its record if one was stored.
    pub fn remove(&mut self, key: &str) -> Option<RequestRecord> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.tick);
        Some(slot.record)
    }

    /// Drop every entry that has expired at `now`. Returns how many went.
    pub fn purge_expired(&mut self, now: u64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, slot)| now >= slot.expires_at)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }

        expired.len()
    }

    fn evict_lru(&mut self) -> bool {
        match self.recency.pop_first() {
            Some((_, key)) => {
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }

    fn bump_tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }
}

impl std::fmt::Debug for RecordCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCache")
            .field("capacity", &self.capacity)
            .field("ttl_ms", &self.ttl_ms)
            .field("len", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(count: u64) -> RequestRecord {
        RequestRecord {
            count,
            reset_time: 1_000,
            blocked: false,
            block_until: None,
            suspicion_score: 0.0,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let mut cache = RecordCache::new(4, 1_000);
        cache.insert("a", record(1), 0);

        assert_eq!(cache.get("a", 10).map(|r| r.count), Some(1));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("missing", 10).is_none());
    }

    #[test]
    fn test_lru_eviction_order() {
        let mut cache = RecordCache::new(3, 10_000);
        cache.insert("a", record(1), 0);
        cache.insert("b", record(2), 0);
        cache.insert("c", record(3), 0);

        // Touch "a" so "b" becomes the least recently used
        assert!(cache.get("a", 1).is_some());

        cache.insert("d", record(4), 2);

        assert_eq!(cache.len(), 3);
        assert!(cache.peek("b", 3).is_none());
        assert!(cache.peek("a", 3).is_some());
        assert!(cache.peek("c", 3).is_some());
        assert!(cache.peek("d", 3).is_some());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let mut cache = RecordCache::new(2, 10_000);
        cache.insert("a", record(1), 0);
        cache.insert("b", record(1), 0);
        cache.insert("a", record(7), 1);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek("a", 2).map(|r| r.count), Some(7));
        assert!(cache.peek("b", 2).is_some());
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let mut cache = RecordCache::new(4, 1_000);
        cache.insert("a", record(1), 0);

        assert!(cache.peek("a", 999).is_some());
        assert!(cache.peek("a", 1_000).is_none());
        // peek leaves the expired entry in place
        assert_eq!(cache.len(), 1);

        assert!(cache.get("a", 1_000).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_blocked_entry_outlives_ttl() {
        let mut cache = RecordCache::new(4, 1_000);
        let mut blocked = record(10);
        blocked.blocked = true;
        blocked.block_until = Some(5_000);
        cache.insert("a", blocked, 0);

        assert!(cache.peek("a", 4_999).is_some());
        assert!(cache.peek("a", 5_000).is_none());
    }

    #[test]
    fn test_peek_does_not_refresh_recency() {
        let mut cache = RecordCache::new(2, 10_000);
        cache.insert("a", record(1), 0);
        cache.insert("b", record(1), 0);

        assert!(cache.peek("a", 1).is_some());
        cache.insert("c", record(1), 1);

        assert!(cache.peek("a", 2).is_none());
        assert!(cache.peek("b", 2).is_some());
    }

    #[test]
    fn test_purge_expired() {
        let mut cache = RecordCache::new(8, 1_000);
        cache.insert("old", record(1), 0);
        cache.insert("new", record(1), 900);

        assert_eq!(cache.purge_expired(1_500), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.peek("new", 1_500).is_some());
    }

    #[test]
    fn test_remove() {
        let mut cache = RecordCache::new(2, 1_000);
        cache.insert("a", record(3), 0);

        assert_eq!(cache.remove("a").map(|r| r.count), Some(3));
        assert!(cache.remove("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut cache = RecordCache::new(0, 1_000);
        cache.insert("a", record(1), 0);
        cache.insert("b", record(1), 0);

        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.peek("b", 1).is_some());
    }
}
