//! Bounded LRU + TTL cache for records and vector entries.
//!
//! Both maps, both dirty sets and the counters live behind one mutex, so
//! every public method is atomic and statistics are a consistent snapshot.
//!
//! Expiry is passive: `get` drops an expired entry and reports a miss.
//! [`KnowledgeCache::sweep_expired`] removes everything already expired.
//! Dirty flags are independent of presence and survive eviction and expiry;
//! they are cleared by a sync pass, an explicit removal or `invalidate`.
//! Each mark carries a generation, and a sync pass only clears a flag whose
//! generation is unchanged since its snapshot, so a write that lands while
//! the pass is fetching keeps both its entry and its flag.

use crate::records::RecordSource;
use crate::types::{KbRecord, RecordId, VectorEntry};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// A cached payload plus its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub payload: T,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    expires_at: Option<Instant>,
    /// Monotonic recency stamp; the smallest value is least recently used
    last_tick: u64,
}

impl<T> CacheEntry<T> {
    fn new(payload: T, ttl: Option<Duration>, tick: u64) -> Self {
        let now = Utc::now();
        Self {
            payload,
            created_at: now,
            last_accessed: now,
            access_count: 1,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
            last_tick: tick,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    fn touch(&mut self, tick: u64) {
        self.last_accessed = Utc::now();
        self.access_count += 1;
        self.last_tick = tick;
    }
}

/// One keyed map with its dirty set.
#[derive(Debug)]
struct Shelf<T> {
    entries: HashMap<RecordId, CacheEntry<T>>,
    /// Dirty identifier -> generation of its latest mark
    dirty: BTreeMap<RecordId, u64>,
}

impl<T> Default for Shelf<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            dirty: BTreeMap::new(),
        }
    }
}

impl<T> Shelf<T> {
    /// Least recently used key; ties go to the lowest key.
    fn lru_key(&self) -> Option<RecordId> {
        self.entries
            .iter()
            .min_by_key(|(id, entry)| (entry.last_tick, **id))
            .map(|(id, _)| *id)
    }

    fn dirty_snapshot(&self) -> Vec<(RecordId, u64)> {
        self.dirty.iter().map(|(id, generation)| (*id, *generation)).collect()
    }

    /// Clear the flag only if it still carries `generation`.
    fn clear_dirty_if(&mut self, id: RecordId, generation: u64) -> bool {
        if self.dirty.get(&id) == Some(&generation) {
            self.dirty.remove(&id);
            true
        } else {
            false
        }
    }

    fn expired_keys(&self, now: Instant) -> Vec<RecordId> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(id, _)| *id)
            .collect()
    }
}

#[derive(Debug, Default)]
struct CacheState {
    records: Shelf<KbRecord>,
    vectors: Shelf<VectorEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
    tick: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Which of the two maps an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Record,
    Vector,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub record_entries: usize,
    pub vector_entries: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate_percent: f64,
    pub dirty_records: usize,
    pub dirty_vectors: usize,
    pub default_ttl_secs: Option<u64>,
}

/// Per-entry diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryInfo {
    pub kind: CacheKind,
    pub id: RecordId,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub expires_in_secs: Option<f64>,
    pub expired: bool,
    pub dirty: bool,
}

/// Outcome of a synchronization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub records_synced: usize,
    pub vectors_synced: usize,
    pub errors: usize,
}

impl SyncReport {
    pub fn synced(&self) -> usize {
        self.records_synced + self.vectors_synced
    }
}

/// Thread-safe cache of records and vector entries.
#[derive(Debug)]
pub struct KnowledgeCache {
    state: Mutex<CacheState>,
    max_size: usize,
    default_ttl: Option<Duration>,
}

/// Result of a shelf lookup, before counters are updated.
enum Lookup<T> {
    Hit(T),
    Miss,
    Expired,
}

impl<T: Clone> Shelf<T> {
    fn lookup(&mut self, id: RecordId, now: Instant, tick: u64) -> Lookup<T> {
        let expired = match self.entries.get(&id) {
            None => return Lookup::Miss,
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            self.entries.remove(&id);
            return Lookup::Expired;
        }

        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.touch(tick);
                Lookup::Hit(entry.payload.clone())
            }
            None => Lookup::Miss,
        }
    }

    /// Insert or replace, evicting the LRU entry when a new key would
    /// exceed `max_size`. Returns the evicted key.
    fn store(&mut self, id: RecordId, entry: CacheEntry<T>, max_size: usize) -> Option<RecordId> {
        let mut evicted = None;
        if !self.entries.contains_key(&id) && self.entries.len() >= max_size {
            if let Some(victim) = self.lru_key() {
                self.entries.remove(&victim);
                evicted = Some(victim);
            }
        }
        self.entries.insert(id, entry);
        evicted
    }
}

impl CacheState {
    fn record_lookup<T>(&mut self, lookup: Lookup<T>, id: RecordId, label: &str) -> Option<T> {
        match lookup {
            Lookup::Hit(payload) => {
                self.hits += 1;
                Some(payload)
            }
            Lookup::Miss => {
                self.misses += 1;
                tracing::debug!("Cache miss for {} {}", label, id);
                None
            }
            Lookup::Expired => {
                self.misses += 1;
                tracing::debug!("Cache entry expired for {} {}", label, id);
                None
            }
        }
    }

    fn record_eviction(&mut self, evicted: Option<RecordId>, label: &str) {
        if let Some(victim) = evicted {
            self.evictions += 1;
            tracing::debug!("Evicted LRU {} {}", label, victim);
        }
    }
}

impl KnowledgeCache {
    /// Create a cache holding at most `max_size` entries per map.
    pub fn new(max_size: usize, default_ttl: Option<Duration>) -> Self {
        let max_size = max_size.max(1);
        tracing::info!(
            "Cache initialized with max_size={}, ttl={:?}",
            max_size,
            default_ttl
        );

        Self {
            state: Mutex::new(CacheState::default()),
            max_size,
            default_ttl,
        }
    }

    pub fn get_record(&self, id: RecordId) -> Option<KbRecord> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let tick = state.next_tick();
        let lookup = state.records.lookup(id, Instant::now(), tick);
        state.record_lookup(lookup, id, "record")
    }

    pub fn get_vector(&self, id: RecordId) -> Option<VectorEntry> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let tick = state.next_tick();
        let lookup = state.vectors.lookup(id, Instant::now(), tick);
        state.record_lookup(lookup, id, "vector entry")
    }

    /// Insert or replace a record; `ttl` overrides the default.
    pub fn put_record(&self, id: RecordId, record: KbRecord, ttl: Option<Duration>) {
        let ttl = ttl.or(self.default_ttl);
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let tick = state.next_tick();
        let evicted = state
            .records
            .store(id, CacheEntry::new(record, ttl, tick), self.max_size);
        state.record_eviction(evicted, "record");
        tracing::debug!("Cached record {}", id);
    }

    /// Insert or replace a vector entry; `ttl` overrides the default.
    pub fn put_vector(&self, id: RecordId, entry: VectorEntry, ttl: Option<Duration>) {
        let ttl = ttl.or(self.default_ttl);
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let tick = state.next_tick();
        let evicted = state
            .vectors
            .store(id, CacheEntry::new(entry, ttl, tick), self.max_size);
        state.record_eviction(evicted, "vector entry");
        tracing::debug!("Cached vector entry {}", id);
    }

    /// Remove a record and clear its dirty flag.
    pub fn remove_record(&self, id: RecordId) -> bool {
        let mut state = self.state.lock();
        state.records.dirty.remove(&id);
        state.records.entries.remove(&id).is_some()
    }

    /// Remove a vector entry and clear its dirty flag.
    pub fn remove_vector(&self, id: RecordId) -> bool {
        let mut state = self.state.lock();
        state.vectors.dirty.remove(&id);
        state.vectors.entries.remove(&id).is_some()
    }

    pub fn mark_record_dirty(&self, id: RecordId) {
        let mut state = self.state.lock();
        let generation = state.next_tick();
        state.records.dirty.insert(id, generation);
        tracing::debug!("Marked record {} dirty", id);
    }

    pub fn mark_vector_dirty(&self, id: RecordId) {
        let mut state = self.state.lock();
        let generation = state.next_tick();
        state.vectors.dirty.insert(id, generation);
        tracing::debug!("Marked vector entry {} dirty", id);
    }

    pub fn clear_record_dirty(&self, id: RecordId) {
        self.state.lock().records.dirty.remove(&id);
    }

    pub fn clear_vector_dirty(&self, id: RecordId) {
        self.state.lock().vectors.dirty.remove(&id);
    }

    /// Snapshot of dirty record identifiers, ascending.
    pub fn dirty_records(&self) -> Vec<RecordId> {
        self.state.lock().records.dirty.keys().copied().collect()
    }

    /// Snapshot of dirty vector identifiers, ascending.
    pub fn dirty_vectors(&self) -> Vec<RecordId> {
        self.state.lock().vectors.dirty.keys().copied().collect()
    }

    /// Dirty vector identifiers with the generation of their latest mark.
    pub fn dirty_vector_generations(&self) -> Vec<(RecordId, u64)> {
        self.state.lock().vectors.dirty_snapshot()
    }

    /// Generation of the current vector mark for `id`, if dirty.
    pub fn vector_dirty_generation(&self, id: RecordId) -> Option<u64> {
        self.state.lock().vectors.dirty.get(&id).copied()
    }

    /// Clear a vector flag only if it was not re-marked since `generation`.
    pub fn clear_vector_dirty_if(&self, id: RecordId, generation: u64) -> bool {
        self.state.lock().vectors.clear_dirty_if(id, generation)
    }

    /// Drop both entries and both dirty flags for `id`.
    pub fn invalidate(&self, id: RecordId) -> bool {
        let mut state = self.state.lock();
        state.records.dirty.remove(&id);
        state.vectors.dirty.remove(&id);
        let removed_record = state.records.entries.remove(&id).is_some();
        let removed_vector = state.vectors.entries.remove(&id).is_some();

        if removed_record || removed_vector {
            tracing::info!("Invalidated cache entries for record {}", id);
        }
        removed_record || removed_vector
    }

    /// Remove every expired entry from both maps.
    pub fn sweep_expired(&self) -> usize {
        let mut state = self.state.lock();
        let now = Instant::now();

        let expired_records = state.records.expired_keys(now);
        for id in &expired_records {
            state.records.entries.remove(id);
        }
        let expired_vectors = state.vectors.expired_keys(now);
        for id in &expired_vectors {
            state.vectors.entries.remove(id);
        }

        let removed = expired_records.len() + expired_vectors.len();
        if removed > 0 {
            tracing::info!("Swept {} expired cache entries", removed);
        }
        removed
    }

    /// Drop all entries and dirty flags. Counters are kept.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let records = state.records.entries.len();
        let vectors = state.vectors.entries.len();
        state.records = Shelf::default();
        state.vectors = Shelf::default();
        tracing::info!(
            "Cleared cache: {} records, {} vector entries",
            records,
            vectors
        );
    }

    /// Refresh every dirty record from the system of record.
    ///
    /// Found records replace the cached copy; records gone upstream are
    /// removed. Both count as synced and clear the flag. Fetch failures are
    /// tallied and keep the flag for the next pass. The lock is not held
    /// while fetching; a record re-marked during its fetch is left as the
    /// newer write made it and stays dirty.
    pub fn sync_records(&self, source: &dyn RecordSource) -> SyncReport {
        let mut report = SyncReport::default();
        let snapshot = self.state.lock().records.dirty_snapshot();

        for (id, generation) in snapshot {
            let fetched = match source.get_record(id) {
                Ok(fetched) => fetched,
                Err(e) => {
                    tracing::error!("Failed to sync record {}: {}", id, e);
                    report.errors += 1;
                    continue;
                }
            };

            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !state.records.clear_dirty_if(id, generation) {
                tracing::debug!("Record {} changed during sync, keeping newer entry", id);
                continue;
            }

            match fetched {
                Some(record) => {
                    let tick = state.next_tick();
                    let evicted = state.records.store(
                        id,
                        CacheEntry::new(record, self.default_ttl, tick),
                        self.max_size,
                    );
                    state.record_eviction(evicted, "record");
                }
                None => {
                    state.records.entries.remove(&id);
                    tracing::debug!("Record {} gone upstream, dropped from cache", id);
                }
            }
            report.records_synced += 1;
        }

        report
    }

    /// Cache-only sync: refresh dirty records, then clear every vector flag
    /// without regenerating anything.
    ///
    /// Re-embedding needs the provider and the index, so
    /// `VectorService::cache_sync` does that instead of calling this.
    pub fn sync(&self, source: &dyn RecordSource) -> SyncReport {
        let vector_snapshot = self.dirty_vector_generations();
        let mut report = self.sync_records(source);

        let mut state = self.state.lock();
        for (id, generation) in vector_snapshot {
            if state.vectors.clear_dirty_if(id, generation) {
                report.vectors_synced += 1;
            }
        }
        report
    }

    /// Consistent statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let total = state.hits + state.misses;
        let hit_rate = if total > 0 {
            state.hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        CacheStats {
            record_entries: state.records.entries.len(),
            vector_entries: state.vectors.entries.len(),
            max_size: self.max_size,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            hit_rate_percent: (hit_rate * 100.0).round() / 100.0,
            dirty_records: state.records.dirty.len(),
            dirty_vectors: state.vectors.dirty.len(),
            default_ttl_secs: self.default_ttl.map(|ttl| ttl.as_secs()),
        }
    }

    /// Per-entry diagnostics, records first, each kind ordered by identifier.
    pub fn entries(&self) -> Vec<CacheEntryInfo> {
        let state = self.state.lock();
        let now = Instant::now();

        let mut infos = describe(&state.records, CacheKind::Record, now);
        infos.extend(describe(&state.vectors, CacheKind::Vector, now));
        infos
    }
}

fn describe<T>(shelf: &Shelf<T>, kind: CacheKind, now: Instant) -> Vec<CacheEntryInfo> {
    let mut infos: Vec<CacheEntryInfo> = shelf
        .entries
        .iter()
        .map(|(id, entry)| CacheEntryInfo {
            kind,
            id: *id,
            created_at: entry.created_at,
            last_accessed: entry.last_accessed,
            access_count: entry.access_count,
            expires_in_secs: entry
                .expires_at
                .map(|at| at.saturating_duration_since(now).as_secs_f64()),
            expired: entry.is_expired(now),
            dirty: shelf.dirty.contains_key(id),
        })
        .collect();
    infos.sort_by_key(|info| info.id);
    infos
}
