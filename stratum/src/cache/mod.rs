//! Buffer cache: a bounded, sharded, concurrent map from
//! page reference to materialised page, with a per-shard CLOCK
//! sweeper doing background eviction.
//!
//! Each shard owns a [`dashmap::DashMap`] (whose `entry` API gives an
//! atomic per-key "lookup + guard acquisition" compute block — no
//! concurrent eviction can interleave between the lookup and the
//! guard), its own insertion-order ring for the CLOCK hand, and its
//! own background sweeper thread.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::epoch::EpochTracker;
use crate::guard::{Frame, Guard};
use crate::ids::Revision;
use crate::page::Page;
use crate::page::reference::CacheKey;

struct Shard {
    entries: DashMap<CacheKey, Arc<Frame>>,
    order: Mutex<Vec<CacheKey>>,
    hand: AtomicUsize,
    evictions: AtomicU64,
}

impl Shard {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(Vec::new()),
            hand: AtomicUsize::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Sum of resident bytes across unguarded entries; guarded
    /// entries weigh zero so a budget made up
    /// entirely of pinned pages is never treated as evictable.
    fn weight(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| if entry.value().guard_count() > 0 { 0 } else { entry.value().resident_bytes() })
            .sum()
    }

    /// One CLOCK pass: advances the hand until it evicts a page or
    /// has examined every entry without finding one (all hot, guarded,
    /// or above the watermark). Returns whether anything was evicted.
    fn sweep_once(&self, watermark: Revision) -> bool {
        let mut order = self.order.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let len = order.len();
        if len == 0 {
            return false;
        }

        for _ in 0..len {
            let hand = self.hand.load(Ordering::Relaxed) % order.len().max(1);
            let Some(&key) = order.get(hand) else {
                self.hand.store(0, Ordering::Relaxed);
                continue;
            };

            let Some(frame) = self.entries.get(&key).map(|entry| Arc::clone(entry.value())) else {
                order.remove(hand);
                continue;
            };

            if frame.take_hot() {
                self.advance_hand(&order, hand);
                continue;
            }
            if frame.guard_count() > 0 {
                self.advance_hand(&order, hand);
                continue;
            }
            if frame.revision().is_some_and(|revision| revision >= watermark) {
                self.advance_hand(&order, hand);
                continue;
            }

            let Some((_, removed)) = self.entries.remove(&key) else {
                order.remove(hand);
                continue;
            };

            if removed.close() {
                order.remove(hand);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(page_key = ?key.page_key, "page evicted by sweeper");
                return true;
            }

            // Lost the race: a guard was acquired between our check
            // and the close attempt. Self-healing -- put it back and
            // try the next entry.
            self.entries.insert(key, removed);
            self.advance_hand(&order, hand);
        }

        false
    }

    fn advance_hand(&self, order: &[CacheKey], hand: usize) {
        self.hand.store((hand + 1) % order.len().max(1), Ordering::Relaxed);
    }
}

struct Sweeper {
    shard_index: usize,
    interval: Duration,
    stop: Arc<AtomicBool>,
}

/// Process-wide singleton: initialised once
/// per `Database`, shut down when the last database closes.
pub struct BufferCache {
    shards: Vec<Shard>,
    budget_bytes: usize,
    epoch: Arc<EpochTracker>,
    stop: Arc<AtomicBool>,
    sweepers: Mutex<Vec<std::thread::JoinHandle<()>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BufferCache {
    #[must_use]
    pub fn new(shard_count: usize, budget_bytes: usize, sweeper_interval: Duration, epoch: Arc<EpochTracker>) -> Arc<Self> {
        let shard_count = shard_count.max(1);
        let cache = Arc::new(Self {
            shards: (0..shard_count).map(|_| Shard::new()).collect(),
            budget_bytes,
            epoch,
            stop: Arc::new(AtomicBool::new(false)),
            sweepers: Mutex::new(Vec::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        });

        let mut handles = Vec::with_capacity(shard_count);
        for shard_index in 0..shard_count {
            let weak: Weak<Self> = Arc::downgrade(&cache);
            let sweeper = Sweeper {
                shard_index,
                interval: sweeper_interval,
                stop: Arc::clone(&cache.stop),
            };
            handles.push(std::thread::spawn(move || run_sweeper(weak, sweeper)));
        }
        *cache.sweepers.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = handles;

        cache
    }

    fn shard_index(&self, key: CacheKey) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    fn shard(&self, key: CacheKey) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Lock-free lookup; marks the page hot on a hit. `None` if
    /// absent or closed.
    #[must_use]
    pub fn get(&self, key: CacheKey) -> Option<Arc<Frame>> {
        let frame = self.shard(key).entries.get(&key).map(|entry| Arc::clone(entry.value()))?;
        if frame.is_closed() {
            return None;
        }
        frame.mark_hot();
        Some(frame)
    }

    /// Atomic lookup + guard acquisition: the only correct way to
    /// obtain a page for use.
    #[must_use]
    pub fn get_and_guard(&self, key: CacheKey) -> Option<Guard> {
        let Some(entry) = self.shard(key).entries.get(&key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        if entry.value().is_closed() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value().acquire_guard())
    }

    /// Inserts `page` under `key` if absent and returns a guard on the
    /// winning instance either way. This is what makes publishing a
    /// freshly combined page race-free: if another thread won the
    /// race, the losing instance is simply never inserted, so there is
    /// nothing
    /// for the loser to close).
    pub fn insert_if_absent(&self, key: CacheKey, page: Page) -> Guard {
        let shard = self.shard(key);
        let guard = match shard.entries.entry(key) {
            Entry::Occupied(occupied) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                occupied.get().acquire_guard()
            }
            Entry::Vacant(vacant) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let frame = Frame::new(page);
                let guard = frame.acquire_guard();
                vacant.insert(frame);
                shard.order.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(key);
                guard
            }
        };
        self.maybe_evict(shard);
        guard
    }

    /// Unconditional insert-or-replace; re-evaluates
    /// eligibility for eviction immediately, since the weigher may
    /// have changed.
    pub fn put(&self, key: CacheKey, page: Page) {
        let shard = self.shard(key);
        match shard.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                *occupied.get_mut() = Frame::new(page);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Frame::new(page));
                shard.order.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(key);
            }
        }
        self.maybe_evict(shard);
    }

    /// Explicit removal, used by intent-log transfer: afterwards no
    /// cache holds this key.
    pub fn remove(&self, key: CacheKey) {
        if let Some((_, frame)) = self.shard(key).entries.remove(&key) {
            frame.close();
        }
        let shard = self.shard(key);
        let mut order = shard.order.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        order.retain(|&existing| existing != key);
    }

    fn maybe_evict(&self, shard: &Shard) {
        let per_shard_budget = self.budget_bytes / self.shards.len().max(1);
        let watermark = self.epoch.min_active_revision();

        let mut attempts = 0;
        while shard.weight() > per_shard_budget {
            if !shard.sweep_once(watermark) {
                break;
            }
            attempts += 1;
            if attempts > 10_000 {
                break;
            }
        }
    }

    /// Shutdown-time only: exclusive against all other operations.
    /// Stops the sweeper threads and drops every entry without
    /// running `close()`'s guard check -- callers must ensure no
    /// transaction still holds a guard before calling this.
    pub fn clear(&self) {
        self.stop.store(true, Ordering::Release);
        for shard in &self.shards {
            shard.entries.clear();
            shard.order.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clear();
        }
    }

    #[must_use]
    pub fn resident_bytes(&self) -> usize {
        self.shards.iter().map(Shard::weight).sum()
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.shards.iter().map(|shard| shard.evictions.load(Ordering::Relaxed)).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.entries.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs one eviction pass per shard right now, for tests that
    /// can't wait on the background sweeper's interval.
    pub fn sweep_now(&self) {
        let watermark = self.epoch.min_active_revision();
        for shard in &self.shards {
            shard.sweep_once(watermark);
        }
    }
}

impl Drop for BufferCache {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Background sweeper loop for one shard. Holds only a [`Weak`]
/// reference to the cache so the cache's lifetime is never tied to
/// its own sweeper threads: once the last
/// strong `Arc<BufferCache>` drops, the next wakeup's `upgrade()`
/// fails and the thread exits on its own.
fn run_sweeper(cache: Weak<BufferCache>, sweeper: Sweeper) {
    loop {
        std::thread::sleep(sweeper.interval);

        if sweeper.stop.load(Ordering::Acquire) {
            return;
        }

        let Some(cache) = cache.upgrade() else {
            return;
        };

        let watermark = cache.epoch.min_active_revision();
        let shard = &cache.shards[sweeper.shard_index];
        let per_shard_budget = cache.budget_bytes / cache.shards.len().max(1);

        while shard.weight() > per_shard_budget {
            if sweeper.stop.load(Ordering::Acquire) {
                return;
            }
            if !shard.sweep_once(watermark) {
                break;
            }
        }
    }
}
