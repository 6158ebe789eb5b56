use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

type EvictedFn<K, V> = Box<dyn Fn(K, V) + Send>;

struct Entry<V> {
    value: V,
    charge: usize,
    /// Stamp of this entry's newest position in the recency queue. Older
    /// queue positions for the same key are skipped during eviction.
    stamp: u64,
}

/// A charge-based LRU cache.
///
/// Every entry carries a caller-supplied charge (bytes for value buffers,
/// one unit for open file readers); the cache evicts least-recently-used
/// entries until total charge fits the capacity. Values are cloned out on
/// lookup, so `V` is typically a cheap handle (`Arc<...>`, `Bytes`): the
/// cache's copy anchors the entry's lifetime and the caller's clone pins it
/// past eviction.
pub struct Cache<K, V>
where
    K: PartialEq + Eq + Hash + Clone + Debug,
    V: Clone,
{
    capacity: usize,
    usage: usize,
    entries: HashMap<K, Entry<V>>,
    /// Recency queue, oldest in front. Stale positions are dropped lazily.
    recency: VecDeque<(K, u64)>,
    next_stamp: u64,
    /// Monotonic id source for cache-unique prefixes.
    next_id: AtomicU64,
    evicted_fn: Option<EvictedFn<K, V>>,
    stats: Stats,
}

impl<K, V> Cache<K, V>
where
    K: PartialEq + Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new(capacity: usize, evicted_fn: Option<EvictedFn<K, V>>) -> Self {
        Cache {
            capacity,
            usage: 0,
            entries: HashMap::new(),
            recency: VecDeque::new(),
            next_stamp: 0,
            next_id: AtomicU64::new(1),
            evicted_fn,
            stats: Stats::new(),
        }
    }

    /// Returns a clone of the value for the given key, refreshing its
    /// recency.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let stamp = self.bump_stamp();
        if let Some(entry) = self.entries.get_mut(key) {
            entry.stamp = stamp;
            self.recency.push_back((key.clone(), stamp));
            self.stats.hit();
            let value = entry.value.clone();
            self.maybe_compact();
            Some(value)
        } else {
            self.stats.miss();
            None
        }
    }

    /// Inserts an entry with the given charge, evicting least-recently-used
    /// entries as needed to fit the capacity.
    pub fn insert(&mut self, key: K, value: V, charge: usize) {
        if let Some(old) = self.entries.remove(&key) {
            self.usage -= old.charge;
        }
        let stamp = self.bump_stamp();
        self.usage += charge;
        self.entries.insert(
            key.clone(),
            Entry {
                value,
                charge,
                stamp,
            },
        );
        self.recency.push_back((key, stamp));
        self.evict_to_fit();
        self.maybe_compact();
    }

    /// Removes the entry for the given key, if present. The eviction
    /// callback does not run for explicit removal.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.usage -= entry.charge;
        Some(entry.value)
    }

    /// Returns a process-unique id, used to build cache key prefixes for
    /// files that have no unique id of their own.
    pub fn new_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Total charge currently held.
    pub fn usage(&self) -> usize {
        self.usage
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns (hits, misses).
    pub fn stats(&self) -> (usize, usize) {
        self.stats.get()
    }

    fn bump_stamp(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }

    fn evict_to_fit(&mut self) {
        while self.usage > self.capacity {
            let (key, stamp) = match self.recency.pop_front() {
                Some(front) => front,
                None => break,
            };
            // Only the newest queue position for a key is authoritative.
            let current = self
                .entries
                .get(&key)
                .map_or(false, |entry| entry.stamp == stamp);
            if !current {
                continue;
            }
            let entry = self.entries.remove(&key).unwrap();
            self.usage -= entry.charge;
            if let Some(evicted_fn) = &self.evicted_fn {
                evicted_fn(key, entry.value);
            }
        }
    }

    /// Drops stale recency positions once they dominate the queue, keeping
    /// queue growth bounded under get-heavy workloads.
    fn maybe_compact(&mut self) {
        if self.recency.len() <= (self.entries.len() * 2).max(64) {
            return;
        }
        let entries = &self.entries;
        self.recency
            .retain(|(key, stamp)| entries.get(key).map_or(false, |entry| entry.stamp == *stamp));
    }
}

struct Stats {
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl Stats {
    fn new() -> Self {
        Stats {
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::SeqCst);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::SeqCst);
    }

    fn get(&self) -> (usize, usize) {
        (
            self.hits.load(Ordering::SeqCst),
            self.misses.load(Ordering::SeqCst),
        )
    }
}
