//! Resource layout on disk: a versioning/codec configuration
//! blob, a log-structured data file, a revisions file mapping
//! revision number to that revision's page directory, and a small
//! UberPage pointing at the active revisions-file head.
//!
//! The higher-level indirect-page tree that would normally route
//! `page_key -> storage_key` per revision is out of this crate's
//! scope. This module carries the minimum routing table that contract
//! still requires: a flat, in-memory [`PageDirectory`] per index type,
//! snapshotted into each revision record so reopening a resource
//! recovers it without re-deriving anything.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{Result, StratumError};
use crate::ids::{DatabaseId, IndexType, PageKey, ResourceId, Revision, StorageKey};
use crate::page::codec::{Codec, CodecKind};
use crate::page::versioning::VersioningStrategy;
use crate::reader::PageReader;
use crate::writer::PageWriter;

/// One entry in a page's fragment chain: which revision produced it,
/// and where its bytes live. Per-page chains are stored newest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentEntry {
    pub revision: Revision,
    pub storage_key: StorageKey,
}

#[derive(Debug, Default, Clone)]
pub struct PageDirectory {
    chains: HashMap<(IndexType, PageKey), Vec<FragmentEntry>>,
}

impl PageDirectory {
    #[must_use]
    pub fn fragment_chain(&self, index_type: IndexType, page_key: PageKey) -> &[FragmentEntry] {
        self.chains.get(&(index_type, page_key)).map_or(&[], Vec::as_slice)
    }

    /// Records a newly-written fragment at the front of its page's
    /// chain: entry 0 is always the most recent contribution.
    pub fn record(&mut self, index_type: IndexType, page_key: PageKey, entry: FragmentEntry) {
        self.chains.entry((index_type, page_key)).or_default().insert(0, entry);
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.chains.len() as u32).to_le_bytes());

        for (&(index_type, page_key), chain) in &self.chains {
            out.push(index_type.as_index() as u8);
            out.extend_from_slice(&page_key.0.to_le_bytes());
            out.extend_from_slice(&(chain.len() as u32).to_le_bytes());
            for entry in chain {
                out.extend_from_slice(&entry.revision.0.to_le_bytes());
                out.extend_from_slice(&entry.storage_key.0.to_le_bytes());
            }
        }

        out
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let read_u32 = |bytes: &[u8], pos: &mut usize| -> Result<u32> {
            let slice = bytes.get(*pos..*pos + 4).ok_or_else(directory_corrupt)?;
            *pos += 4;
            Ok(u32::from_le_bytes(slice.try_into().unwrap()))
        };
        let read_u64 = |bytes: &[u8], pos: &mut usize| -> Result<u64> {
            let slice = bytes.get(*pos..*pos + 8).ok_or_else(directory_corrupt)?;
            *pos += 8;
            Ok(u64::from_le_bytes(slice.try_into().unwrap()))
        };

        let entry_count = read_u32(bytes, &mut pos)?;
        let mut chains = HashMap::new();

        for _ in 0..entry_count {
            let index_type = IndexType::from_index(*bytes.get(pos).ok_or_else(directory_corrupt)?);
            pos += 1;
            let page_key = PageKey(read_u64(bytes, &mut pos)?);
            let chain_len = read_u32(bytes, &mut pos)?;

            let mut chain = Vec::with_capacity(chain_len as usize);
            for _ in 0..chain_len {
                let revision = Revision(read_u64(bytes, &mut pos)?);
                let storage_key = StorageKey(read_u64(bytes, &mut pos)?);
                chain.push(FragmentEntry { revision, storage_key });
            }

            chains.insert((index_type, page_key), chain);
        }

        Ok(Self { chains })
    }
}

fn directory_corrupt() -> StratumError {
    StratumError::CorruptFragment {
        page_key: PageKey(0),
        revision: Revision(0),
        reason: "truncated page directory record",
    }
}

/// Resource configuration blob: versioning strategy, codec,
/// dewey-id flag, storage format, and the assigned database id.
/// Written once at resource creation, read back on every open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceConfig {
    pub database_id: DatabaseId,
    pub versioning_strategy: VersioningStrategy,
    pub codec: CodecKind,
    pub dewey_ids_enabled: bool,
}

impl ResourceConfig {
    fn to_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        out.extend_from_slice(&self.database_id.0.to_le_bytes());

        let (strategy_tag, restore_window): (u8, u32) = match self.versioning_strategy {
            VersioningStrategy::Full => (0, 0),
            VersioningStrategy::Differential => (1, 0),
            VersioningStrategy::Incremental { restore_window } => (2, restore_window),
            VersioningStrategy::SlidingSnapshot { restore_window } => (3, restore_window),
        };
        out.push(strategy_tag);
        out.extend_from_slice(&restore_window.to_le_bytes());

        out.push(match self.codec {
            CodecKind::Identity => 0,
            CodecKind::Zstd => 1,
        });
        out.push(u8::from(self.dewey_ids_enabled));

        out
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 + 1 + 4 + 1 + 1 {
            return Err(config_corrupt());
        }

        let database_id = DatabaseId(u64::from_le_bytes(bytes[0..8].try_into().unwrap()));
        let strategy_tag = bytes[8];
        let restore_window = u32::from_le_bytes(bytes[9..13].try_into().unwrap());
        let versioning_strategy = match strategy_tag {
            0 => VersioningStrategy::Full,
            1 => VersioningStrategy::Differential,
            2 => VersioningStrategy::Incremental { restore_window },
            3 => VersioningStrategy::SlidingSnapshot { restore_window },
            _ => return Err(config_corrupt()),
        };

        let codec = match bytes[13] {
            0 => CodecKind::Identity,
            1 => CodecKind::Zstd,
            _ => return Err(config_corrupt()),
        };
        let dewey_ids_enabled = bytes[14] != 0;

        Ok(Self {
            database_id,
            versioning_strategy,
            codec,
            dewey_ids_enabled,
        })
    }
}

fn config_corrupt() -> StratumError {
    StratumError::CorruptFragment {
        page_key: PageKey(0),
        revision: Revision(0),
        reason: "truncated resource configuration blob",
    }
}

/// A single committed revision's bookkeeping: the page directory
/// snapshot as of that commit, plus a
/// commit timestamp supplied by the caller (this crate never calls
/// `SystemTime::now()` internally, to stay deterministic for tests).
struct RevisionRecord {
    revision: Revision,
    directory: PageDirectory,
    commit_timestamp_millis: u64,
}

/// One open resource: its configuration, data file, and revision
/// history. Shared (`Arc`'d by the caller) across all transactions
/// against it.
pub struct Resource {
    pub id: ResourceId,
    pub config: ResourceConfig,
    dir: PathBuf,
    reader: PageReader,
    writer: PageWriter,
    codec: Box<dyn Codec>,
    revisions: Mutex<Vec<RevisionRecord>>,
    next_revision: AtomicU64,
}

impl Resource {
    /// Opens (creating if absent) a resource directory, reading back
    /// its persisted configuration or assigning and persisting a new
    /// one if absent on open.
    pub fn open(dir: &Path, id: ResourceId, database_id: DatabaseId, default_config: ResourceConfig) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| io_failure(database_id, &e))?;

        let config_path = dir.join("config.bin");
        let config = if config_path.exists() {
            let bytes = std::fs::read(&config_path).map_err(|e| io_failure(database_id, &e))?;
            ResourceConfig::from_bytes(&bytes)?
        } else {
            let config = ResourceConfig { database_id, ..default_config };
            std::fs::write(&config_path, config.to_bytes()).map_err(|e| io_failure(database_id, &e))?;
            config
        };

        let data_file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(dir.join("data.log"))
            .map_err(|e| io_failure(database_id, &e))?;
        let reader_file = OpenOptions::new().read(true).open(dir.join("data.log")).map_err(|e| io_failure(database_id, &e))?;

        let writer = PageWriter::open(data_file, database_id)?;
        let reader = PageReader::open(reader_file, database_id);

        let revisions = load_revisions(dir, database_id)?;
        let next_revision = revisions.last().map_or(1, |record| record.revision.next().0);

        Ok(Self {
            id,
            config,
            dir: dir.to_path_buf(),
            reader,
            writer,
            codec: config.codec.build(),
            revisions: Mutex::new(revisions),
            next_revision: AtomicU64::new(next_revision),
        })
    }

    #[must_use]
    pub const fn database_id(&self) -> DatabaseId {
        self.config.database_id
    }

    #[must_use]
    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    #[must_use]
    pub const fn versioning_strategy(&self) -> VersioningStrategy {
        self.config.versioning_strategy
    }

    /// Current committed head; `Revision::zero()` for a brand new
    /// resource.
    #[must_use]
    pub fn head_revision(&self) -> Revision {
        self.revisions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .last()
            .map_or(Revision::zero(), |record| record.revision)
    }

    #[must_use]
    pub fn next_revision(&self) -> Revision {
        Revision(self.next_revision.load(Ordering::Acquire))
    }

    /// A read-only snapshot of the page directory as committed at
    /// `revision`, or the live (not-yet-committed) directory if
    /// `revision` is the next revision being written. A revision with
    /// no matching record (a fresh resource at revision 0) or a page
    /// never written under this chain key both yield an empty chain,
    /// not an error: reconstructing an unwritten page is simply an
    /// empty page, and `NotFound` is reserved for the record-level
    /// read once a page has actually been materialised.
    #[must_use]
    pub fn fragment_chain(&self, revision: Revision, index_type: IndexType, page_key: PageKey) -> Vec<FragmentEntry> {
        let revisions = self.revisions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        revisions
            .iter()
            .rev()
            .find(|record| record.revision <= revision)
            .map_or_else(Vec::new, |record| record.directory.fragment_chain(index_type, page_key).to_vec())
    }

    pub fn append_fragment(&self, page: &crate::page::Page) -> Result<StorageKey> {
        self.writer.append(page, self.codec.as_ref())
    }

    pub fn load_fragment(&self, storage_key: StorageKey) -> Result<crate::page::Page> {
        self.reader.load(storage_key, self.codec.as_ref())
    }

    /// Commits a new revision: the caller supplies the page directory
    /// mutations that happened during the write (as a full directory
    /// to merge in, newest fragments already recorded by the caller),
    /// appends a revision record, persists it, and publishes the new
    /// head. No partial-commit state is ever observable: the record
    /// is either fully appended or the call fails before anything is
    /// written.
    pub fn commit(&self, mut directory: PageDirectory, commit_timestamp_millis: u64) -> Result<Revision> {
        let mut revisions = self.revisions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let revision = revisions.last().map_or(Revision(1), |record| record.revision.next());

        // Every key the new directory already holds is a page this
        // transaction modified: its fresh fragment was recorded at the
        // front of the chain by `PageDirectory::record`, so the
        // previous revision's chain for that key is appended behind
        // it, not skipped, or the page's older fragments become
        // unreachable. Untouched keys are carried forward unchanged.
        if let Some(previous) = revisions.last() {
            for (&key, chain) in &previous.directory.chains {
                directory.chains.entry(key).or_default().extend(chain.iter().copied());
            }
        }

        // Bound every chain to what a read can ever actually consult:
        // `max_fragments_to_read()` fragments for `combine`, plus the
        // one fragment just past the window that `combine_for_modification`
        // inspects to detect a slot falling out of a sliding snapshot.
        let window = self.versioning_strategy().max_fragments_to_read() as usize;
        for chain in directory.chains.values_mut() {
            chain.truncate(window + 1);
        }

        let record = RevisionRecord {
            revision,
            directory,
            commit_timestamp_millis,
        };
        append_revision_record(&self.dir, self.database_id(), &record)?;
        revisions.push(record);
        self.next_revision.store(revision.next().0, Ordering::Release);

        tracing::info!(%revision, resource_id = ?self.id, "revision committed");
        Ok(revision)
    }
}

/// `[revision][timestamp][directory_len][directory bytes]`, appended
/// to `revisions.log`; the UberPage is simply "read the whole file
/// back, the last record is the head" since revisions are small and
/// this crate targets modest resource counts, not a multi-terabyte
/// revision history.
fn append_revision_record(dir: &Path, database_id: DatabaseId, record: &RevisionRecord) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("revisions.log"))
        .map_err(|e| io_failure(database_id, &e))?;

    let directory_bytes = record.directory.to_bytes();
    file.write_all(&record.revision.0.to_le_bytes()).map_err(|e| io_failure(database_id, &e))?;
    file.write_all(&record.commit_timestamp_millis.to_le_bytes()).map_err(|e| io_failure(database_id, &e))?;
    file.write_all(&(directory_bytes.len() as u64).to_le_bytes()).map_err(|e| io_failure(database_id, &e))?;
    file.write_all(&directory_bytes).map_err(|e| io_failure(database_id, &e))?;
    file.flush().map_err(|e| io_failure(database_id, &e))?;

    std::fs::write(dir.join("uber.bin"), record.revision.0.to_le_bytes()).map_err(|e| io_failure(database_id, &e))?;

    Ok(())
}

fn load_revisions(dir: &Path, database_id: DatabaseId) -> Result<Vec<RevisionRecord>> {
    let path = dir.join("revisions.log");
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut bytes = Vec::new();
    File::open(&path).map_err(|e| io_failure(database_id, &e))?.read_to_end(&mut bytes).map_err(|e| io_failure(database_id, &e))?;

    let mut pos = 0usize;
    let mut records = Vec::new();

    while pos < bytes.len() {
        let revision = Revision(read_u64_at(&bytes, &mut pos)?);
        let commit_timestamp_millis = read_u64_at(&bytes, &mut pos)?;
        let directory_len = read_u64_at(&bytes, &mut pos)? as usize;
        let directory_bytes = bytes.get(pos..pos + directory_len).ok_or_else(revisions_corrupt)?;
        pos += directory_len;

        records.push(RevisionRecord {
            revision,
            directory: PageDirectory::from_bytes(directory_bytes)?,
            commit_timestamp_millis,
        });
    }

    Ok(records)
}

fn read_u64_at(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let slice = bytes.get(*pos..*pos + 8).ok_or_else(revisions_corrupt)?;
    *pos += 8;
    Ok(u64::from_le_bytes(slice.try_into().unwrap()))
}

fn revisions_corrupt() -> StratumError {
    StratumError::CorruptFragment {
        page_key: PageKey(0),
        revision: Revision(0),
        reason: "truncated revisions log",
    }
}

fn io_failure(database_id: DatabaseId, error: &std::io::Error) -> StratumError {
    StratumError::IoFailure {
        database_id,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{FragmentEntry, PageDirectory, Resource, ResourceConfig};
    use crate::ids::{DatabaseId, IndexType, PageKey, ResourceId, Revision, Slot, StorageKey};
    use crate::page::Page;
    use crate::page::codec::CodecKind;
    use crate::page::versioning::VersioningStrategy;

    fn default_config() -> ResourceConfig {
        ResourceConfig {
            database_id: DatabaseId(1),
            versioning_strategy: VersioningStrategy::Incremental { restore_window: 3 },
            codec: CodecKind::Identity,
            dewey_ids_enabled: false,
        }
    }

    #[test]
    fn page_directory_round_trips_through_bytes() {
        let mut directory = PageDirectory::default();
        directory.record(
            IndexType::DOCUMENT,
            PageKey(0),
            FragmentEntry {
                revision: Revision(1),
                storage_key: StorageKey(128),
            },
        );

        let restored = PageDirectory::from_bytes(&directory.to_bytes()).unwrap();
        assert_eq!(
            restored.fragment_chain(IndexType::DOCUMENT, PageKey(0)),
            directory.fragment_chain(IndexType::DOCUMENT, PageKey(0))
        );
    }

    #[test]
    fn resource_config_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let resource = Resource::open(dir.path(), ResourceId(1), DatabaseId(9), default_config()).unwrap();
        assert_eq!(resource.config.database_id, DatabaseId(9));

        let reopened = Resource::open(dir.path(), ResourceId(1), DatabaseId(1), default_config()).unwrap();
        // DatabaseId(1) passed as default is ignored because config.bin already exists.
        assert_eq!(reopened.config.database_id, DatabaseId(9));
    }

    #[test]
    fn commit_then_reopen_recovers_fragment_chain() {
        let dir = tempfile::tempdir().unwrap();
        let resource = Resource::open(dir.path(), ResourceId(1), DatabaseId(1), default_config()).unwrap();

        let mut page = Page::empty(PageKey(0), Revision(1), IndexType::DOCUMENT);
        page.set_slot(Slot(0), b"hello".to_vec());
        let storage_key = resource.append_fragment(&page).unwrap();

        let mut directory = PageDirectory::default();
        directory.record(
            IndexType::DOCUMENT,
            PageKey(0),
            FragmentEntry {
                revision: Revision(1),
                storage_key,
            },
        );
        let revision = resource.commit(directory, 0).unwrap();
        assert_eq!(revision, Revision(1));

        let reopened = Resource::open(dir.path(), ResourceId(1), DatabaseId(1), default_config()).unwrap();
        let chain = reopened.fragment_chain(Revision(1), IndexType::DOCUMENT, PageKey(0));
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].storage_key, storage_key);

        let loaded = reopened.load_fragment(storage_key).unwrap();
        assert_eq!(loaded.slot(Slot(0)), Some(b"hello".as_slice()));
    }
}
