//! Fingerprint Cache
//!
//! Content-addressed store of completed planning results with:
//! - Per-entry TTL (expired entries are never served)
//! - LRU eviction once `max_entries` is reached
//! - Conflict detection when a fingerprint is stored twice with different
//!   results
//! - In-flight reservations so each fingerprint is computed at most once
//!   at a time
//!
//! # Design
//!
//! The entry map sits behind a `parking_lot::Mutex` together with ordered
//! recency and expiry indexes, so eviction and sweeping cost O(log n) per
//! removed entry. Every critical section is short and synchronous; no lock
//! is ever held across an `.await`.
//! Reservations live in a separate concurrent map (see [`inflight`]) so a
//! lookup never waits on backend work.
//!
//! Expiry uses `tokio::time::Instant`, which lets tests drive TTLs with a
//! paused clock.

pub mod inflight;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::request::{Fingerprint, PlanningResult};

pub use inflight::{InFlightTable, Reservation, SharedOutcome, Ticket, Waiter};

/// Default time-to-live: 24 hours
pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

/// Default entry bound
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Default interval between background sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// Entries
// ============================================================================

/// A cached planning result
#[derive(Clone, Debug)]
pub struct CacheEntry {
    /// The stored result
    pub result: PlanningResult,
    /// When the entry was stored
    pub created_at: Instant,
    /// First instant at which the entry is no longer served
    pub expires_at: Instant,
    /// Access sequence number (higher = more recent)
    last_accessed: u64,
}

impl CacheEntry {
    /// Whether the entry is past its expiry at `now`
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Result of [`FingerprintCache::store`]
#[derive(Clone, Debug, PartialEq)]
pub enum StoreOutcome {
    /// A new entry was written
    Inserted,
    /// An identical live entry already existed
    Unchanged,
    /// A different live entry already existed; it was kept
    Conflict {
        /// The value that remains cached
        existing: PlanningResult,
    },
}

/// Cache statistics
#[derive(Clone, Debug, Default, Serialize)]
pub struct CacheStats {
    /// Live entries (may include expired entries not yet swept)
    pub entries: usize,
    /// Configured entry bound
    pub max_entries: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found nothing servable
    pub misses: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Entries removed to respect the entry bound
    pub evictions: u64,
    /// Stores rejected because a different result was already cached
    pub conflicts: u64,
    /// Fingerprints currently being computed
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
    conflicts: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

// ============================================================================
// Entry Store
// ============================================================================

/// Entry map plus ordered recency and expiry indexes
///
/// Both indexes are kept in step with `map` so eviction and expiry never
/// scan every entry.
#[derive(Debug, Default)]
struct EntryStore {
    map: HashMap<Fingerprint, CacheEntry>,
    /// Access sequence -> fingerprint, least recent first
    recency: BTreeMap<u64, Fingerprint>,
    /// Soonest expiry first
    expiry: BTreeSet<(Instant, Fingerprint)>,
}

impl EntryStore {
    fn len(&self) -> usize {
        self.map.len()
    }

    fn get(&self, fingerprint: &Fingerprint) -> Option<&CacheEntry> {
        self.map.get(fingerprint)
    }

    fn insert(&mut self, fingerprint: Fingerprint, entry: CacheEntry) {
        self.remove(&fingerprint);
        self.recency.insert(entry.last_accessed, fingerprint.clone());
        self.expiry.insert((entry.expires_at, fingerprint.clone()));
        self.map.insert(fingerprint, entry);
    }

    fn remove(&mut self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let entry = self.map.remove(fingerprint)?;
        self.recency.remove(&entry.last_accessed);
        self.expiry.remove(&(entry.expires_at, fingerprint.clone()));
        Some(entry)
    }

    /// Mark an entry as used at `seq`
    fn touch(&mut self, fingerprint: &Fingerprint, seq: u64) -> Option<&CacheEntry> {
        let entry = self.map.get_mut(fingerprint)?;
        self.recency.remove(&entry.last_accessed);
        entry.last_accessed = seq;
        self.recency.insert(seq, fingerprint.clone());
        Some(entry)
    }

    /// Drop every entry expired at `now`, returning how many went
    fn remove_expired(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some((expires_at, fingerprint)) = self.expiry.first().cloned() {
            if expires_at > now {
                break;
            }
            self.remove(&fingerprint);
            removed += 1;
        }
        removed
    }

    /// Drop the least recently used entry
    fn remove_lru(&mut self) -> Option<Fingerprint> {
        let fingerprint = self.recency.first_key_value().map(|(_, fp)| fp.clone())?;
        self.remove(&fingerprint);
        Some(fingerprint)
    }

    fn clear(&mut self) -> usize {
        let removed = self.map.len();
        self.map.clear();
        self.recency.clear();
        self.expiry.clear();
        removed
    }
}

// ============================================================================
// Fingerprint Cache
// ============================================================================

/// TTL + LRU cache of planning results keyed by fingerprint
#[derive(Debug)]
pub struct FingerprintCache {
    entries: Mutex<EntryStore>,
    max_entries: usize,
    access_seq: AtomicU64,
    counters: Counters,
    inflight: InFlightTable,
}

impl Default for FingerprintCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl FingerprintCache {
    /// Create a cache holding at most `max_entries` results
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(EntryStore::default()),
            max_entries: max_entries.max(1),
            access_seq: AtomicU64::new(0),
            counters: Counters::default(),
            inflight: InFlightTable::new(),
        }
    }

    fn next_seq(&self) -> u64 {
        self.access_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Look up a live result
    ///
    /// Expired entries are removed and reported absent.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<PlanningResult> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired = match entries.get(fingerprint) {
            Some(entry) => entry.is_expired(now),
            None => {
                Counters::bump(&self.counters.misses, 1);
                tracing::debug!(fingerprint = %fingerprint.short(), "Cache miss");
                return None;
            }
        };

        if expired {
            entries.remove(fingerprint);
            Counters::bump(&self.counters.expirations, 1);
            Counters::bump(&self.counters.misses, 1);
            tracing::debug!(fingerprint = %fingerprint.short(), "Cache entry expired");
            return None;
        }

        let seq = self.next_seq();
        let entry = entries.touch(fingerprint, seq)?;
        Counters::bump(&self.counters.hits, 1);
        tracing::debug!(fingerprint = %fingerprint.short(), "Cache hit");
        Some(entry.result.clone())
    }

    /// Store a result under a fingerprint for `ttl`
    ///
    /// A live entry with a different value is kept and reported as a
    /// conflict; an expired entry is replaced.
    pub fn store(
        &self,
        fingerprint: Fingerprint,
        result: PlanningResult,
        ttl: Duration,
    ) -> StoreOutcome {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if let Some(existing) = entries.get(&fingerprint).filter(|e| !e.is_expired(now)) {
            if existing.result == result {
                return StoreOutcome::Unchanged;
            }
            let existing = existing.result.clone();
            Counters::bump(&self.counters.conflicts, 1);
            tracing::warn!(
                fingerprint = %fingerprint.short(),
                "CacheInconsistency: differing result for cached fingerprint, keeping original"
            );
            return StoreOutcome::Conflict { existing };
        }

        if entries.remove(&fingerprint).is_some() {
            Counters::bump(&self.counters.expirations, 1);
        }

        if entries.len() >= self.max_entries {
            self.make_room(&mut entries, now);
        }

        let seq = self.next_seq();
        entries.insert(
            fingerprint,
            CacheEntry {
                result,
                created_at: now,
                expires_at: now + ttl,
                last_accessed: seq,
            },
        );
        StoreOutcome::Inserted
    }

    /// Free at least one slot: expired entries first, then least recently used
    fn make_room(&self, entries: &mut EntryStore, now: Instant) {
        let expired = entries.remove_expired(now);
        Counters::bump(&self.counters.expirations, expired as u64);

        while entries.len() >= self.max_entries {
            let Some(victim) = entries.remove_lru() else {
                break;
            };
            Counters::bump(&self.counters.evictions, 1);
            tracing::debug!(fingerprint = %victim.short(), "Evicted least recently used entry");
        }
    }

    /// Remove one entry
    ///
    /// Returns `true` if an entry was removed.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.lock().remove(fingerprint).is_some()
    }

    /// Remove every entry
    ///
    /// Returns the number of entries removed.
    pub fn clear(&self) -> usize {
        self.entries.lock().clear()
    }

    /// Remove all expired entries
    ///
    /// Returns the number of entries removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let removed = self.entries.lock().remove_expired(now);
        Counters::bump(&self.counters.expirations, removed as u64);
        removed
    }

    /// Spawn a periodic sweep
    ///
    /// The task holds only a weak reference and exits once the cache is
    /// dropped. Abort the handle to stop it earlier.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        let period = interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    tracing::debug!("Cache dropped, sweeper exiting");
                    break;
                };
                let removed = cache.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired cache entries");
                }
            }
        })
    }

    /// Claim the right to compute a fingerprint, or join the current claim
    pub fn reserve(&self, fingerprint: &Fingerprint) -> Reservation {
        self.inflight.reserve(fingerprint)
    }

    /// Number of cached entries (including expired, unswept ones)
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            max_entries: self.max_entries,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            conflicts: self.counters.conflicts.load(Ordering::Relaxed),
            in_flight: self.inflight.len(),
        }
    }
}
