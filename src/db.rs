//! The keyspace engine: TTL tracking, lazy plus periodic expiration, and
//! approximated-LFU eviction against a memory ceiling.
use std::collections::{BTreeMap, HashMap, HashSet};

use bytes::Bytes;
use tracing::debug;

use crate::aof::AofState;

/// Per-entry fixed overhead folded into the memory estimator, covering the
/// `HashMap` bucket, the `Entry` struct fields, and allocator bookkeeping
/// that a byte-for-byte count of `key` and `val` would otherwise miss.
const ENTRY_OVERHEAD_BYTES: u64 = 40;

/// Low-water mark eviction target, as a fraction of `limit_bytes`.
const EVICT_TARGET_NUM: u64 = 4;
const EVICT_TARGET_DEN: u64 = 5;

#[derive(Debug, Clone)]
pub struct Entry {
    pub val: Bytes,
    pub expires_at_ms: Option<i64>,
    pub access_count: u32,
    pub last_access_ms: i64,
}

impl Entry {
    fn footprint(&self, key: &[u8]) -> u64 {
        key.len() as u64 + self.val.len() as u64 + ENTRY_OVERHEAD_BYTES
    }
}

#[derive(Debug, Default)]
pub struct MemoryStats {
    pub estimated_bytes: u64,
    pub limit_bytes: u64,
    pub evictions_total: u64,
}

impl MemoryStats {
    fn new(limit_bytes: u64) -> Self {
        Self { estimated_bytes: 0, limit_bytes, evictions_total: 0 }
    }
}

/// The string-keyed map plus its mirrored expiry index and LFU buckets.
///
/// `access_buckets` groups live keys by `access_count`, giving eviction an
/// ascending-order walk without a full sort on every call: the reference
/// design sorts by `access_count` on each eviction (O(N log N)); bucketing
/// keeps the common case of "nothing due for eviction" at O(1) and an
/// eviction pass at O(keys actually removed).
#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<Bytes, Entry>,
    expiry_index: HashMap<Bytes, i64>,
    access_buckets: BTreeMap<u32, HashSet<Bytes>>,
}

impl Keyspace {
    fn bucket_insert(&mut self, key: Bytes, count: u32) {
        self.access_buckets.entry(count).or_default().insert(key);
    }

    fn bucket_remove(&mut self, key: &Bytes, count: u32) {
        if let Some(set) = self.access_buckets.get_mut(&count) {
            set.remove(key);
            if set.is_empty() {
                self.access_buckets.remove(&count);
            }
        }
    }

    /// Remove a key unconditionally from all three structures. Does not
    /// touch `MemoryStats`; callers account for the freed footprint.
    fn remove_key(&mut self, key: &Bytes) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        if entry.expires_at_ms.is_some() {
            self.expiry_index.remove(key);
        }
        self.bucket_remove(key, entry.access_count);
        Some(entry)
    }

    /// Remove `key` if its entry has expired by `now_ms`. Returns the
    /// removed entry's footprint if it was expired, so callers can keep
    /// `MemoryStats` in sync.
    fn expire_if_due(&mut self, key: &Bytes, now_ms: i64) -> Option<u64> {
        let expires_at = *self.expiry_index.get(key)?;
        if expires_at > now_ms {
            return None;
        }
        let footprint = self.entries.get(key).map(|e| e.footprint(key));
        self.remove_key(key);
        footprint
    }

    /// Assert the expiry-index/keyspace agreement invariant from spec §4.2(i):
    /// every `(k, t)` in the index has `entries[k].expires_at_ms == Some(t)`,
    /// and every entry with a finite expiry has a matching index row. A
    /// violation is a programming bug, per spec §7(v); this is compiled out
    /// entirely in release builds.
    #[cfg(debug_assertions)]
    fn debug_check_invariants(&self) {
        for (key, &indexed_at) in &self.expiry_index {
            match self.entries.get(key) {
                Some(entry) => debug_assert_eq!(
                    entry.expires_at_ms,
                    Some(indexed_at),
                    "expiry index disagrees with entry for key {key:?}"
                ),
                None => panic!("expiry index references a key absent from the keyspace: {key:?}"),
            }
        }
        for (key, entry) in &self.entries {
            if entry.expires_at_ms.is_some() {
                debug_assert!(self.expiry_index.contains_key(key), "entry with finite TTL missing from expiry index: {key:?}");
            }
        }
    }
}

/// Process-wide state: keyspace, memory stats, and AOF state, owned by the
/// single event-loop thread and passed around as `&mut Store`. Nothing in
/// this struct is behind a lock; there is exactly one thread of execution.
pub struct Store {
    keyspace: Keyspace,
    pub memory: MemoryStats,
    pub aof: AofState,
}

/// How a TTL option was specified on `SET`.
#[derive(Debug, Clone, Copy)]
pub enum Expiry {
    None,
    ExSeconds(i64),
    PxMillis(i64),
}

impl Store {
    pub fn new(maxmemory_bytes: u64, aof: AofState) -> Self {
        Self { keyspace: Keyspace::default(), memory: MemoryStats::new(maxmemory_bytes), aof }
    }

    /// Insert or replace `key`, clearing any stale expiry, evicting cold
    /// entries to make room *before* the new entry exists, then inserting.
    /// Eviction only ever walks keys already present in the keyspace, so the
    /// entry currently being written can never be picked for eviction by its
    /// own `set` call, regardless of how cold its fresh `access_count` is.
    pub fn set(&mut self, key: Bytes, val: Bytes, expiry: Expiry, now_ms: i64) -> crate::Result<()> {
        let expires_at_ms = match expiry {
            Expiry::None => None,
            Expiry::ExSeconds(s) => {
                if s <= 0 {
                    return Err(crate::Error::InvalidExpireTime);
                }
                Some(now_ms + s * 1000)
            }
            Expiry::PxMillis(ms) => {
                if ms <= 0 {
                    return Err(crate::Error::InvalidExpireTime);
                }
                Some(now_ms + ms)
            }
        };

        if let Some(prev) = self.keyspace.remove_key(&key) {
            self.memory.estimated_bytes -= prev.footprint(&key);
        }

        let incoming_footprint = key.len() as u64 + val.len() as u64 + ENTRY_OVERHEAD_BYTES;
        if self.memory.estimated_bytes + incoming_footprint > self.memory.limit_bytes {
            let target = self.memory.limit_bytes * EVICT_TARGET_NUM / EVICT_TARGET_DEN;
            self.evict_to(target.saturating_sub(incoming_footprint));
        }

        let entry = Entry { val, expires_at_ms, access_count: 1, last_access_ms: now_ms };
        self.memory.estimated_bytes += entry.footprint(&key);
        if let Some(at) = expires_at_ms {
            self.keyspace.expiry_index.insert(key.clone(), at);
        }
        self.keyspace.bucket_insert(key.clone(), entry.access_count);
        self.keyspace.entries.insert(key, entry);
        #[cfg(debug_assertions)]
        self.keyspace.debug_check_invariants();
        Ok(())
    }

    /// Lazy-expire, then bump the LFU counter on a hit.
    pub fn get(&mut self, key: &Bytes, now_ms: i64) -> Option<Bytes> {
        if let Some(freed) = self.keyspace.expire_if_due(key, now_ms) {
            self.memory.estimated_bytes -= freed;
            #[cfg(debug_assertions)]
            self.keyspace.debug_check_invariants();
            return None;
        }
        let val = self.keyspace.entries.get(key)?.val.clone();
        let old_count = self.keyspace.entries.get(key).unwrap().access_count;
        self.keyspace.bucket_remove(key, old_count);
        let new_count = old_count.saturating_add(1);
        if let Some(entry) = self.keyspace.entries.get_mut(key) {
            entry.access_count = new_count;
            entry.last_access_ms = now_ms;
        }
        self.keyspace.bucket_insert(key.clone(), new_count);
        Some(val)
    }

    /// Lazy-expire each key, then remove the rest; an already-expired key
    /// does not contribute to the returned count.
    pub fn del(&mut self, keys: &[Bytes], now_ms: i64) -> i64 {
        let mut count = 0i64;
        for key in keys {
            if let Some(freed) = self.keyspace.expire_if_due(key, now_ms) {
                self.memory.estimated_bytes -= freed;
                continue;
            }
            if let Some(entry) = self.keyspace.remove_key(key) {
                self.memory.estimated_bytes -= entry.footprint(key);
                count += 1;
            }
        }
        #[cfg(debug_assertions)]
        self.keyspace.debug_check_invariants();
        count
    }

    /// Walk the expiry index and remove everything due, proactively.
    pub fn sweep(&mut self, now_ms: i64) {
        let due: Vec<Bytes> = self
            .keyspace
            .expiry_index
            .iter()
            .filter(|&(_, &at)| at <= now_ms)
            .map(|(k, _)| k.clone())
            .collect();
        for key in due {
            if let Some(entry) = self.keyspace.remove_key(&key) {
                self.memory.estimated_bytes -= entry.footprint(&key);
                debug!(key = ?key, "sweep removed expired entry");
            }
        }
        #[cfg(debug_assertions)]
        self.keyspace.debug_check_invariants();
    }

    /// Remove lowest-access_count entries until estimated_bytes <= target.
    /// Called from `set` before the new entry is inserted, so the key
    /// currently being written is never a candidate: it simply isn't in
    /// `access_buckets` yet.
    pub fn evict_to(&mut self, target_bytes: u64) {
        let bucket_keys: Vec<u32> = self.keyspace.access_buckets.keys().copied().collect();
        'outer: for count in bucket_keys {
            let keys: Vec<Bytes> = match self.keyspace.access_buckets.get(&count) {
                Some(set) => set.iter().cloned().collect(),
                None => continue,
            };
            for key in keys {
                if self.memory.estimated_bytes <= target_bytes {
                    break 'outer;
                }
                if let Some(entry) = self.keyspace.remove_key(&key) {
                    self.memory.estimated_bytes -= entry.footprint(&key);
                    self.memory.evictions_total += 1;
                    debug!(key = ?key, "evicted entry under memory pressure");
                }
            }
        }
    }

    pub fn config_get(&self, param: &str) -> Option<String> {
        match param.to_ascii_lowercase().as_str() {
            "maxmemory" => Some(self.memory.limit_bytes.to_string()),
            "appendfsync" => Some(self.aof.sync_policy.as_str().to_string()),
            _ => None,
        }
    }

    pub fn config_set(&mut self, param: &str, value: &str) -> crate::Result<()> {
        match param.to_ascii_lowercase().as_str() {
            "maxmemory" => {
                let bytes: u64 = value.parse().map_err(|_| crate::Error::NotAnInteger)?;
                self.memory.limit_bytes = bytes;
                Ok(())
            }
            "appendfsync" => {
                let policy = crate::aof::SyncPolicy::parse(value)
                    .ok_or_else(|| crate::Error::UnknownOption(value.to_string()))?;
                self.aof.sync_policy = policy;
                Ok(())
            }
            other => Err(crate::Error::UnknownConfigParam(other.to_string())),
        }
    }

    pub fn keyspace_len(&self) -> usize {
        self.keyspace.entries.len()
    }

    #[cfg(test)]
    fn expiry_index_keys(&self) -> HashSet<Bytes> {
        self.keyspace.expiry_index.keys().cloned().collect()
    }

    #[cfg(test)]
    fn keys_with_finite_expiry(&self) -> HashSet<Bytes> {
        self.keyspace
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at_ms.is_some())
            .map(|(k, _)| k.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aof::AofState;

    fn store(limit_bytes: u64) -> Store {
        Store::new(limit_bytes, AofState::disabled())
    }

    #[test]
    fn set_then_get_within_ttl_then_expires() {
        let mut s = store(1 << 20);
        s.set(Bytes::from("k"), Bytes::from("v"), Expiry::PxMillis(50), 1_000).unwrap();
        assert_eq!(s.get(&Bytes::from("k"), 1_010), Some(Bytes::from("v")));
        assert_eq!(s.get(&Bytes::from("k"), 1_200), None);
    }

    #[test]
    fn set_without_ttl_clears_previous_ttl() {
        let mut s = store(1 << 20);
        s.set(Bytes::from("k"), Bytes::from("v1"), Expiry::ExSeconds(1), 0).unwrap();
        s.set(Bytes::from("k"), Bytes::from("v2"), Expiry::None, 0).unwrap();
        assert!(s.expiry_index_keys().is_empty());
        assert_eq!(s.get(&Bytes::from("k"), 10_000), Some(Bytes::from("v2")));
    }

    #[test]
    fn invalid_expire_time_rejected() {
        let mut s = store(1 << 20);
        assert!(matches!(
            s.set(Bytes::from("k"), Bytes::from("v"), Expiry::ExSeconds(0), 0),
            Err(crate::Error::InvalidExpireTime)
        ));
        assert!(matches!(
            s.set(Bytes::from("k"), Bytes::from("v"), Expiry::PxMillis(-5), 0),
            Err(crate::Error::InvalidExpireTime)
        ));
    }

    #[test]
    fn del_counts_only_live_removals() {
        let mut s = store(1 << 20);
        s.set(Bytes::from("live"), Bytes::from("v"), Expiry::None, 0).unwrap();
        s.set(Bytes::from("expired"), Bytes::from("v"), Expiry::PxMillis(10), 0).unwrap();
        let count = s.del(&[Bytes::from("live"), Bytes::from("expired"), Bytes::from("missing")], 1_000);
        assert_eq!(count, 1);
    }

    #[test]
    fn sweep_matches_lazy_expiry() {
        let mut s = store(1 << 20);
        s.set(Bytes::from("a"), Bytes::from("v"), Expiry::PxMillis(10), 0).unwrap();
        s.set(Bytes::from("b"), Bytes::from("v"), Expiry::None, 0).unwrap();
        s.sweep(1_000);
        assert_eq!(s.keyspace_len(), 1);
        assert_eq!(s.get(&Bytes::from("b"), 1_000), Some(Bytes::from("v")));
    }

    #[test]
    fn eviction_targets_lowest_access_count_first() {
        let mut s = store(200);
        s.set(Bytes::from("a"), Bytes::from("x".repeat(50)), Expiry::None, 0).unwrap();
        s.set(Bytes::from("b"), Bytes::from("x".repeat(50)), Expiry::None, 0).unwrap();
        // bump "b" so "a" is the colder key
        s.get(&Bytes::from("b"), 0);
        s.set(Bytes::from("c"), Bytes::from("x".repeat(50)), Expiry::None, 0).unwrap();
        assert!(s.get(&Bytes::from("a"), 0).is_none());
        assert!(s.memory.evictions_total >= 1);
    }

    #[test]
    fn set_never_evicts_the_key_it_is_currently_writing() {
        let mut s = store(200);
        s.set(Bytes::from("a"), Bytes::from("x".repeat(50)), Expiry::None, 0).unwrap();
        s.set(Bytes::from("b"), Bytes::from("x".repeat(50)), Expiry::None, 0).unwrap();
        // fresh key "c" starts at access_count 1, as cold as anything else,
        // but must survive its own insert regardless of eviction pressure.
        s.set(Bytes::from("c"), Bytes::from("x".repeat(50)), Expiry::None, 0).unwrap();
        assert_eq!(s.get(&Bytes::from("c"), 0), Some(Bytes::from("x".repeat(50))));
    }

    #[test]
    fn expiry_index_consistency_holds() {
        let mut s = store(1 << 20);
        s.set(Bytes::from("a"), Bytes::from("v"), Expiry::ExSeconds(10), 0).unwrap();
        s.set(Bytes::from("b"), Bytes::from("v"), Expiry::None, 0).unwrap();
        assert_eq!(s.expiry_index_keys(), s.keys_with_finite_expiry());
        s.del(&[Bytes::from("a")], 0);
        assert_eq!(s.expiry_index_keys(), s.keys_with_finite_expiry());
    }

    #[test]
    fn memory_bound_after_sets() {
        let mut s = store(100);
        for i in 0..20 {
            s.set(Bytes::from(format!("k{i}")), Bytes::from("v"), Expiry::None, 0).unwrap();
        }
        assert!(s.memory.estimated_bytes <= s.memory.limit_bytes + 64);
    }
}
