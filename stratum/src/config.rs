//! Environment / configuration: the single place the
//! storage engine's tunables are threaded through, constructed once
//! per [`crate::database::Database`] and cloned into every subsystem
//! that needs a copy.

use std::time::Duration;

use crate::page::codec::CodecKind;
use crate::page::versioning::VersioningStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageConfig {
    /// Total byte budget for the shared buffer cache, split evenly
    /// across shards.
    pub cache_budget_bytes: usize,
    /// Power-of-two shard count.
    pub shard_count: usize,
    /// How often each shard's sweeper thread wakes up to consider
    /// eviction.
    pub sweeper_interval: Duration,
    /// Default versioning strategy for newly created resources.
    pub versioning_strategy: VersioningStrategy,
    /// Default codec for newly created resources.
    pub codec: CodecKind,
    /// Capacity of the revision epoch tracker.
    pub epoch_capacity: usize,
    /// Gates leak diagnostics (e.g. warning when a transaction closes
    /// with a non-empty "most recent page" map pointing at dead
    /// frames); off by default to avoid the bookkeeping cost in the
    /// hot path.
    pub debug_leak_checks: bool,
}

impl StorageConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cache_budget_bytes: 64 * 1024 * 1024,
            shard_count: 64,
            sweeper_interval: Duration::from_millis(50),
            versioning_strategy: VersioningStrategy::Incremental { restore_window: 3 },
            codec: CodecKind::Zstd,
            epoch_capacity: 1024,
            debug_leak_checks: false,
        }
    }

    #[must_use]
    pub const fn with_cache_budget_bytes(mut self, bytes: usize) -> Self {
        self.cache_budget_bytes = bytes;
        self
    }

    #[must_use]
    pub const fn with_shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count;
        self
    }

    #[must_use]
    pub const fn with_sweeper_interval(mut self, interval: Duration) -> Self {
        self.sweeper_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_versioning_strategy(mut self, strategy: VersioningStrategy) -> Self {
        self.versioning_strategy = strategy;
        self
    }

    #[must_use]
    pub const fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub const fn with_epoch_capacity(mut self, capacity: usize) -> Self {
        self.epoch_capacity = capacity;
        self
    }

    #[must_use]
    pub const fn with_debug_leak_checks(mut self, enabled: bool) -> Self {
        self.debug_leak_checks = enabled;
        self
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new()
    }
}
