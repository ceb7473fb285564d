//! The top-level handle: owns the shared buffer cache,
//! segment allocator and epoch tracker as process-wide singletons
//! scoped to one open database, and lazily opens/caches each
//! [`Resource`] a caller touches.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::allocator::SegmentAllocator;
use crate::cache::BufferCache;
use crate::config::StorageConfig;
use crate::epoch::EpochTracker;
use crate::error::{Result, StratumError};
use crate::ids::{DatabaseId, ResourceId};
use crate::resource::{Resource, ResourceConfig};
use crate::transaction::Transaction;

/// Owns every process-wide singleton this crate needs, scoped to the
/// owning process rather than to any single transaction or resource.
/// A caller typically keeps one `Database` per open database directory
/// for the process lifetime.
pub struct Database {
    id: DatabaseId,
    root: PathBuf,
    config: StorageConfig,
    pub(crate) cache: Arc<BufferCache>,
    pub(crate) epoch: Arc<EpochTracker>,
    allocator: Arc<SegmentAllocator>,
    resources: Mutex<HashMap<ResourceId, Arc<Resource>>>,
}

impl Database {
    /// Opens (creating if absent) the database directory at `root`.
    /// Spawns the buffer cache's sweeper threads immediately; they run
    /// for as long as any `Arc<BufferCache>` clone (including this
    /// `Database`'s own) is alive, and self-terminate once the last
    /// one drops (see [`crate::cache`]'s `run_sweeper`) — there is no
    /// explicit thread-join step required of callers.
    pub fn open(root: &Path, id: DatabaseId, config: StorageConfig) -> Result<Arc<Self>> {
        std::fs::create_dir_all(root).map_err(|e| io_failure(id, &e))?;

        let epoch = Arc::new(EpochTracker::new(config.epoch_capacity));
        let cache = BufferCache::new(config.shard_count, config.cache_budget_bytes, config.sweeper_interval, Arc::clone(&epoch));
        let allocator = Arc::new(SegmentAllocator::new());

        tracing::info!(database_id = ?id, root = %root.display(), "database opened");

        Ok(Arc::new(Self {
            id,
            root: root.to_path_buf(),
            config,
            cache,
            epoch,
            allocator,
            resources: Mutex::new(HashMap::new()),
        }))
    }

    #[must_use]
    pub const fn id(&self) -> DatabaseId {
        self.id
    }

    #[must_use]
    pub const fn config(&self) -> &StorageConfig {
        &self.config
    }

    #[must_use]
    pub const fn allocator(&self) -> &Arc<SegmentAllocator> {
        &self.allocator
    }

    #[must_use]
    pub const fn cache(&self) -> &Arc<BufferCache> {
        &self.cache
    }

    fn resource_dir(&self, resource_id: ResourceId) -> PathBuf {
        self.root.join(format!("resource-{}", resource_id.0))
    }

    /// Opens `resource_id` on first touch, per the database's default
    /// versioning strategy and codec; subsequent calls return the same
    /// cached `Arc<Resource>`.
    pub fn open_resource(&self, resource_id: ResourceId) -> Result<Arc<Resource>> {
        let mut resources = self.resources.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(resource) = resources.get(&resource_id) {
            return Ok(Arc::clone(resource));
        }

        let default_config = ResourceConfig {
            database_id: self.id,
            versioning_strategy: self.config.versioning_strategy,
            codec: self.config.codec,
            dewey_ids_enabled: false,
        };

        let resource = Arc::new(Resource::open(&self.resource_dir(resource_id), resource_id, self.id, default_config)?);
        resources.insert(resource_id, Arc::clone(&resource));
        Ok(resource)
    }

    /// Begins a read-only transaction pinned to `resource_id`'s
    /// current head revision. The returned epoch ticket vetoes
    /// eviction of anything that revision might still need until the
    /// transaction closes.
    pub fn begin_read(&self, resource_id: ResourceId) -> Result<Transaction<'_>> {
        let resource = self.open_resource(resource_id)?;
        let revision = resource.head_revision();
        let ticket = self.epoch.register(revision)?;
        Ok(Transaction::new_read_only(self, resource, revision, ticket))
    }

    /// Begins a read-write transaction based on `resource_id`'s
    /// current head revision; `commit` publishes `head + 1`.
    pub fn begin_write(&self, resource_id: ResourceId) -> Result<Transaction<'_>> {
        let resource = self.open_resource(resource_id)?;
        let base_revision = resource.head_revision();
        let ticket = self.epoch.register(base_revision)?;
        Ok(Transaction::new_read_write(self, resource, base_revision, ticket))
    }
}

fn io_failure(database_id: DatabaseId, error: &std::io::Error) -> StratumError {
    StratumError::IoFailure {
        database_id,
        message: error.to_string(),
    }
}
