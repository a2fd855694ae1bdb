//! Bounded LRU + TTL cache for derived data (note titles and backlink sets).
//!
//! Both instances share one capacity budget and one maximum age. Every write
//! runs a cleanup pass; the engine also runs one on a timer. Nothing here
//! writes to the persistence sink except [`DerivedCache::persist`], which the
//! engine calls from its timer tick and at shutdown.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::persist::Persistence;
use crate::time::Clock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    pub created_at: u64,
    pub last_accessed_at: u64,
    pub hit_count: u64,
    /// Monotonic access stamp; orders entries touched within the same millisecond.
    #[serde(default)]
    pub access_seq: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Serializable state of both instances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub titles: HashMap<String, CacheEntry<String>>,
    pub backlinks: HashMap<String, CacheEntry<BTreeSet<String>>>,
    pub stats: CacheStats,
}

/// Read seam used by the reaction aggregator.
pub trait TitleLookup {
    fn lookup_title(&mut self, id: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Title,
    Backlinks,
}

pub struct DerivedCache {
    titles: HashMap<String, CacheEntry<String>>,
    backlinks: HashMap<String, CacheEntry<BTreeSet<String>>>,
    max_size: usize,
    max_age_ms: u64,
    seq: u64,
    stats: CacheStats,
    /// Contents changed since the last successful snapshot.
    dirty: bool,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn Persistence>,
}

impl DerivedCache {
    pub fn new(
        max_size: usize,
        max_age: Duration,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            titles: HashMap::new(),
            backlinks: HashMap::new(),
            max_size,
            max_age_ms: max_age.as_millis() as u64,
            seq: 0,
            stats: CacheStats::default(),
            dirty: false,
            clock,
            sink,
        }
    }

    fn stamp(&mut self) -> (u64, u64) {
        self.seq += 1;
        (self.clock.now_ms(), self.seq)
    }

    fn fresh_entry<T>(&mut self, value: T) -> CacheEntry<T> {
        let (now, seq) = self.stamp();
        CacheEntry {
            value,
            created_at: now,
            last_accessed_at: now,
            hit_count: 0,
            access_seq: seq,
        }
    }

    fn expired(&self, created_at: u64, now: u64) -> bool {
        now.saturating_sub(created_at) > self.max_age_ms
    }

    pub fn set_title(&mut self, id: &str, title: impl Into<String>) {
        let entry = self.fresh_entry(title.into());
        self.titles.insert(id.to_string(), entry);
        self.dirty = true;
        self.cleanup();
    }

    pub fn get_title(&mut self, id: &str) -> Option<String> {
        let (now, seq) = self.stamp();
        let found = touch(&mut self.titles, id, now, seq, self.max_age_ms);
        self.record(found)
    }

    pub fn set_backlinks(&mut self, id: &str, links: BTreeSet<String>) {
        let entry = self.fresh_entry(links);
        self.backlinks.insert(id.to_string(), entry);
        self.dirty = true;
        self.cleanup();
    }

    pub fn get_backlink_set(&mut self, id: &str) -> Option<BTreeSet<String>> {
        let (now, seq) = self.stamp();
        let found = touch(&mut self.backlinks, id, now, seq, self.max_age_ms);
        self.record(found)
    }

    fn record<T>(&mut self, found: Lookup<T>) -> Option<T> {
        match found {
            Lookup::Hit(value) => {
                self.stats.hits += 1;
                Some(value)
            }
            Lookup::Expired => {
                self.stats.evictions += 1;
                self.stats.misses += 1;
                None
            }
            Lookup::Miss => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Record that `from` links to `to`, extending `from`'s set. Not a read:
    /// hit counters and recency are left alone.
    pub fn add_link(&mut self, from: &str, to: &str) {
        let now = self.clock.now_ms();
        let mut links = match self.backlinks.get(from) {
            Some(e) if !self.expired(e.created_at, now) => e.value.clone(),
            _ => BTreeSet::new(),
        };
        if links.insert(to.to_string()) {
            self.set_backlinks(from, links);
        }
    }

    /// Every cached source whose link set contains `id`.
    pub fn get_backlinks(&self, id: &str) -> Vec<String> {
        let now = self.clock.now_ms();
        let mut out: Vec<String> = self
            .backlinks
            .iter()
            .filter(|(_, e)| !self.expired(e.created_at, now) && e.value.contains(id))
            .map(|(from, _)| from.clone())
            .collect();
        out.sort();
        out
    }

    /// Drop expired entries, then least recently accessed ones until the
    /// combined size fits. Returns how many entries were evicted.
    pub fn cleanup(&mut self) -> usize {
        let now = self.clock.now_ms();
        let max_age = self.max_age_ms;
        let before = self.len();
        self.titles
            .retain(|_, e| now.saturating_sub(e.created_at) <= max_age);
        self.backlinks
            .retain(|_, e| now.saturating_sub(e.created_at) <= max_age);
        let mut evicted = before - self.len();

        if self.len() > self.max_size {
            let mut order: Vec<(u64, u64, Slot, String)> = self
                .titles
                .iter()
                .map(|(k, e)| (e.last_accessed_at, e.access_seq, Slot::Title, k.clone()))
                .chain(self.backlinks.iter().map(|(k, e)| {
                    (e.last_accessed_at, e.access_seq, Slot::Backlinks, k.clone())
                }))
                .collect();
            order.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
            let excess = self.len() - self.max_size;
            for (_, _, slot, key) in order.into_iter().take(excess) {
                match slot {
                    Slot::Title => {
                        self.titles.remove(&key);
                    }
                    Slot::Backlinks => {
                        self.backlinks.remove(&key);
                    }
                }
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.stats.evictions += evicted as u64;
            self.dirty = true;
            debug!(evicted, size = self.len(), "cache cleanup");
        }
        evicted
    }

    /// Hand the current state to the persistence collaborator. Failures are
    /// logged and leave the cache dirty so the next tick retries.
    pub fn persist(&mut self) -> bool {
        match self.sink.write_cache(&self.snapshot()) {
            Ok(()) => {
                self.dirty = false;
                true
            }
            Err(e) => {
                warn!("cache snapshot write failed: {e:#}");
                false
            }
        }
    }

    /// [`DerivedCache::persist`] if anything changed since the last snapshot.
    pub fn persist_if_dirty(&mut self) -> bool {
        self.dirty && self.persist()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            titles: self.titles.clone(),
            backlinks: self.backlinks.clone(),
            stats: self.stats(),
        }
    }

    /// Reload persisted entries; expired ones are dropped by the cleanup pass.
    pub fn restore(&mut self, snapshot: CacheSnapshot) {
        self.seq = snapshot
            .titles
            .values()
            .map(|e| e.access_seq)
            .chain(snapshot.backlinks.values().map(|e| e.access_seq))
            .max()
            .unwrap_or(0);
        self.titles = snapshot.titles;
        self.backlinks = snapshot.backlinks;
        self.stats = snapshot.stats;
        self.cleanup();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            ..self.stats
        }
    }

    pub fn len(&self) -> usize {
        self.titles.len() + self.backlinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.titles.clear();
        self.backlinks.clear();
        self.stats = CacheStats::default();
        self.seq = 0;
        self.dirty = true;
    }
}

enum Lookup<T> {
    Hit(T),
    Expired,
    Miss,
}

/// Refresh and return a live entry; an expired one is removed on the spot.
fn touch<T: Clone>(
    map: &mut HashMap<String, CacheEntry<T>>,
    id: &str,
    now: u64,
    seq: u64,
    max_age_ms: u64,
) -> Lookup<T> {
    let Some(entry) = map.get_mut(id) else {
        return Lookup::Miss;
    };
    if now.saturating_sub(entry.created_at) > max_age_ms {
        map.remove(id);
        return Lookup::Expired;
    }
    entry.last_accessed_at = now;
    entry.hit_count += 1;
    entry.access_seq = seq;
    Lookup::Hit(entry.value.clone())
}

impl TitleLookup for DerivedCache {
    fn lookup_title(&mut self, id: &str) -> Option<String> {
        self.get_title(id)
    }
}
