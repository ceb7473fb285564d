//! Instrumented facade: counts operations without touching core
//! logic, wrapping `Database`/`Transaction` with an operation counter
//! the same way the storage layer this crate grew out of wraps its
//! own `Storage`/`Transaction` pair.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::database::Database;
use crate::error::Result;
use crate::ids::{IndexNumber, IndexType, PageKey, ResourceId, Revision, Slot};
use crate::transaction::Transaction;

#[derive(Debug, Default)]
struct Counters {
    page_reads: AtomicU64,
    page_writes: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

/// A point-in-time snapshot of [`InstrumentedDatabase`]'s counters.
/// Cache hits/misses/evictions are read straight off the shared
/// buffer cache, which already tracks them process-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub page_reads: u64,
    pub page_writes: u64,
    pub commits: u64,
    pub rollbacks: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
}

pub struct InstrumentedDatabase {
    inner: Arc<Database>,
    counters: Arc<Counters>,
}

impl InstrumentedDatabase {
    #[must_use]
    pub fn new(inner: Arc<Database>) -> Self {
        Self {
            inner,
            counters: Arc::new(Counters::default()),
        }
    }

    #[must_use]
    pub fn stats(&self) -> Stats {
        Stats {
            page_reads: self.counters.page_reads.load(Ordering::Relaxed),
            page_writes: self.counters.page_writes.load(Ordering::Relaxed),
            commits: self.counters.commits.load(Ordering::Relaxed),
            rollbacks: self.counters.rollbacks.load(Ordering::Relaxed),
            cache_hits: self.inner.cache().hits(),
            cache_misses: self.inner.cache().misses(),
            evictions: self.inner.cache().evictions(),
        }
    }

    pub fn begin_read(&self, resource_id: ResourceId) -> Result<InstrumentedTransaction<'_>> {
        Ok(InstrumentedTransaction {
            inner: self.inner.begin_read(resource_id)?,
            counters: Arc::clone(&self.counters),
        })
    }

    pub fn begin_write(&self, resource_id: ResourceId) -> Result<InstrumentedTransaction<'_>> {
        Ok(InstrumentedTransaction {
            inner: self.inner.begin_write(resource_id)?,
            counters: Arc::clone(&self.counters),
        })
    }
}

pub struct InstrumentedTransaction<'db> {
    inner: Transaction<'db>,
    counters: Arc<Counters>,
}

impl InstrumentedTransaction<'_> {
    #[must_use]
    pub fn revision(&self) -> Revision {
        self.inner.revision()
    }

    pub fn fetch_page(&mut self, index_type: IndexType, index_number: IndexNumber, page_key: PageKey) -> Result<()> {
        self.counters.page_reads.fetch_add(1, Ordering::Relaxed);
        self.inner.fetch_page(index_type, index_number, page_key)
    }

    pub fn read_record(&self, index_type: IndexType, page_key: PageKey, slot: Slot) -> Result<Vec<u8>> {
        self.inner.read_record(index_type, page_key, slot)
    }

    pub fn write_record(&mut self, index_type: IndexType, page_key: PageKey, slot: Slot, payload: Vec<u8>) -> Result<()> {
        self.counters.page_writes.fetch_add(1, Ordering::Relaxed);
        self.inner.write_record(index_type, page_key, slot, payload)
    }

    pub fn commit(self, commit_timestamp_millis: u64) -> Result<Revision> {
        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        self.inner.commit(commit_timestamp_millis)
    }

    pub fn rollback(self) {
        self.counters.rollbacks.fetch_add(1, Ordering::Relaxed);
        self.inner.rollback();
    }
}

#[cfg(test)]
mod tests {
    use super::InstrumentedDatabase;
    use crate::config::StorageConfig;
    use crate::database::Database;
    use crate::ids::{DatabaseId, IndexNumber, IndexType, PageKey, ResourceId, Slot};

    #[test]
    fn counters_track_reads_writes_and_commits() {
        let dir = tempfile::tempdir().unwrap();
        let database = Database::open(dir.path(), DatabaseId(1), StorageConfig::new()).unwrap();
        let instrumented = InstrumentedDatabase::new(database);

        let resource_id = ResourceId(1);
        let page_key = PageKey::of_record(1);
        let slot = Slot::of_record(1);

        let mut writer = instrumented.begin_write(resource_id).unwrap();
        writer.fetch_page(IndexType::DOCUMENT, IndexNumber(0), page_key).unwrap();
        writer.write_record(IndexType::DOCUMENT, page_key, slot, b"v".to_vec()).unwrap();
        writer.commit(0).unwrap();

        let stats = instrumented.stats();
        assert_eq!(stats.page_reads, 1);
        assert_eq!(stats.page_writes, 1);
        assert_eq!(stats.commits, 1);
    }
}
