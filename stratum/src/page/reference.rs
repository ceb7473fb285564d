//! The identity used for cache keys and parent-to-child links: a page
//! reference and a page fragment key.

use crate::ids::{DatabaseId, LogKey, PageKey, ResourceId, Revision, StorageKey};

/// Logical equality is `(database_id, resource_id, log_key,
/// storage_key)`; `storage_key` is `None` for a page that has not yet
/// been persisted, `log_key` is `None` when the page is not (or is no
/// longer) held in an intent log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageReference {
    database_id: DatabaseId,
    resource_id: ResourceId,
    page_key: PageKey,
    log_key: Option<LogKey>,
    storage_key: Option<StorageKey>,
}

impl PageReference {
    #[must_use]
    pub const fn new(database_id: DatabaseId, resource_id: ResourceId, page_key: PageKey) -> Self {
        Self {
            database_id,
            resource_id,
            page_key,
            log_key: None,
            storage_key: None,
        }
    }

    #[must_use]
    pub const fn database_id(&self) -> DatabaseId {
        self.database_id
    }

    #[must_use]
    pub const fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    #[must_use]
    pub const fn page_key(&self) -> PageKey {
        self.page_key
    }

    #[must_use]
    pub const fn log_key(&self) -> Option<LogKey> {
        self.log_key
    }

    #[must_use]
    pub const fn storage_key(&self) -> Option<StorageKey> {
        self.storage_key
    }

    #[must_use]
    pub const fn with_log_key(mut self, log_key: Option<LogKey>) -> Self {
        self.log_key = log_key;
        self
    }

    #[must_use]
    pub const fn with_storage_key(mut self, storage_key: StorageKey) -> Self {
        self.storage_key = Some(storage_key);
        self
    }

    /// The key used by the shared buffer cache: qualified by database
    /// and resource so no collisions arise across resources, and by
    /// page key alone — the cache holds at most one materialised view
    /// per page key regardless of which fragment produced it.
    #[must_use]
    pub const fn cache_key(&self) -> CacheKey {
        CacheKey {
            database_id: self.database_id,
            resource_id: self.resource_id,
            page_key: self.page_key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub database_id: DatabaseId,
    pub resource_id: ResourceId,
    pub page_key: PageKey,
}

/// Identifies a persisted fragment independent of the current intent
/// log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageFragmentKey {
    pub revision: Revision,
    pub storage_key: StorageKey,
    pub database_id: DatabaseId,
    pub resource_id: ResourceId,
}

#[cfg(test)]
mod tests {
    use super::PageReference;
    use crate::ids::{DatabaseId, PageKey, ResourceId, StorageKey};

    #[test]
    fn cache_key_ignores_log_and_storage_key() {
        let a = PageReference::new(DatabaseId(1), ResourceId(2), PageKey(3));
        let b = a.with_storage_key(StorageKey(99));

        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a, b);
    }
}
