//! Transaction facade: the public surface the record/tree
//! layer consumes. Hides the buffer cache, intent log, epoch tracker
//! and versioning strategy behind "fetch a page, read/write a record,
//! commit or close".

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::database::Database;
use crate::epoch::EpochTicket;
use crate::error::{Result, StratumError};
use crate::guard::{Frame, Guard};
use crate::ids::{IndexNumber, IndexType, PageKey, Revision, Slot};
use crate::intent_log::{IntentLog, PageContainer};
use crate::page::Page;
use crate::page::reference::CacheKey;
use crate::resource::{FragmentEntry, PageDirectory, Resource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// A weak handle to a cache frame a writer last touched for a given
/// `(index_type, index_number)`. Not ownership: always revalidated via
/// `get_and_guard` before use, discarded on instance mismatch or a
/// closed frame.
struct MostRecentSlot {
    page_key: PageKey,
    frame: Weak<Frame>,
}

pub struct Transaction<'db> {
    database: &'db Database,
    resource: Arc<Resource>,
    revision: Revision,
    mode: TransactionMode,
    ticket: Option<EpochTicket>,
    current_guard: Option<Guard>,
    intent_log: Option<IntentLog>,
    most_recent: HashMap<(IndexType, IndexNumber), MostRecentSlot>,
    closed: bool,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new_read_only(database: &'db Database, resource: Arc<Resource>, revision: Revision, ticket: EpochTicket) -> Self {
        Self {
            database,
            resource,
            revision,
            mode: TransactionMode::ReadOnly,
            ticket: Some(ticket),
            current_guard: None,
            intent_log: None,
            most_recent: HashMap::new(),
            closed: false,
        }
    }

    pub(crate) fn new_read_write(database: &'db Database, resource: Arc<Resource>, base_revision: Revision, ticket: EpochTicket) -> Self {
        Self {
            database,
            resource,
            revision: base_revision,
            mode: TransactionMode::ReadWrite,
            ticket: Some(ticket),
            current_guard: None,
            intent_log: Some(IntentLog::new()),
            most_recent: HashMap::new(),
            closed: false,
        }
    }

    #[must_use]
    pub const fn revision(&self) -> Revision {
        self.revision
    }

    #[must_use]
    pub const fn mode(&self) -> TransactionMode {
        self.mode
    }

    #[must_use]
    pub const fn is_writer(&self) -> bool {
        matches!(self.mode, TransactionMode::ReadWrite)
    }

    fn cache_key(&self, page_key: PageKey) -> CacheKey {
        CacheKey {
            database_id: self.resource.database_id(),
            resource_id: self.resource.id,
            page_key,
        }
    }

    /// Releases the transaction's single current guard, if any,
    /// before the cursor moves.
    /// A `FrameReused` signal on release is swallowed here: the
    /// caller re-fetches on its next access regardless, via
    /// `get_and_guard`'s self-healing reload.
    fn release_current_guard(&mut self) {
        if let Some(guard) = self.current_guard.take() {
            let _ = guard.release();
        }
    }

    /// Loads and combines the fragment chain for `page_key` as of
    /// this transaction's revision, without touching any cache.
    fn load_and_combine(&self, index_type: IndexType, page_key: PageKey) -> Result<Page> {
        let strategy = self.resource.versioning_strategy();
        let window = strategy.max_fragments_to_read() as usize;
        let chain = self.resource.fragment_chain(self.revision, index_type, page_key);

        let fragments = chain
            .iter()
            .take(window)
            .map(|entry| self.resource.load_fragment(entry.storage_key))
            .collect::<Result<Vec<_>>>()?;

        Ok(strategy.combine(page_key, self.revision, index_type, &fragments))
    }

    /// Page fetch protocol. Leaves `self.current_guard`
    /// pointing at the requested page on success.
    pub fn fetch_page(&mut self, index_type: IndexType, index_number: IndexNumber, page_key: PageKey) -> Result<()> {
        self.release_current_guard();

        // Writers see their own uncommitted mutations first.
        if self.is_writer() {
            let cache_key = self.cache_key(page_key);
            if self.intent_log.as_ref().is_some_and(|log| log.contains(cache_key)) {
                // The intent log owns these pages outright; there is
                // no frame/guard to acquire, so the transaction simply
                // remembers which page_key its cursor is on and reads
                // straight out of the log from then on.
                self.most_recent.remove(&(index_type, index_number));
                return Ok(());
            }
        }

        // Step 1: validate the "most recent page" slot.
        if let Some(slot) = self.most_recent.get(&(index_type, index_number)) {
            if slot.page_key == page_key {
                if let Some(frame) = slot.frame.upgrade() {
                    if !frame.is_closed() {
                        self.current_guard = Some(frame.acquire_guard());
                        return Ok(());
                    }
                }
                self.most_recent.remove(&(index_type, index_number));
            }
        }

        // Step 2: PATH_SUMMARY writer bypass. Correctness
        // requirement, not an optimisation: different revisions can
        // reuse the same storage key, so the shared cache must never
        // be consulted here.
        if self.is_writer() && index_type.is_path_summary() {
            let page = self.load_and_combine(index_type, page_key)?;
            let frame = Frame::new(page);
            self.current_guard = Some(frame.acquire_guard());
            return Ok(());
        }

        // Step 3: shared cache, with the atomic insert-or-join race
        // handled by `insert_if_absent`.
        let cache_key = self.cache_key(page_key);
        let guard = if let Some(guard) = self.database.cache.get_and_guard(cache_key) {
            guard
        } else {
            let page = self.load_and_combine(index_type, page_key)?;
            self.database.cache.insert_if_absent(cache_key, page)
        };

        self.most_recent.insert(
            (index_type, index_number),
            MostRecentSlot {
                page_key,
                frame: Arc::downgrade(guard.frame()),
            },
        );
        self.current_guard = Some(guard);
        Ok(())
    }

    /// Reads `record_key`'s payload from the page the cursor last
    /// fetched onto. Callers must `fetch_page` first with a matching
    /// `page_key`.
    pub fn read_record(&self, index_type: IndexType, page_key: PageKey, slot: Slot) -> Result<Vec<u8>> {
        if self.is_writer() {
            let cache_key = self.cache_key(page_key);
            if let Some(log) = &self.intent_log {
                if let Some(container) = log.get(cache_key) {
                    return container
                        .complete
                        .slot(slot)
                        .map(<[u8]>::to_vec)
                        .ok_or(StratumError::NotFound {
                            resource_id: self.resource.id,
                            page_key,
                            revision: self.revision,
                        });
                }
            }
        }

        let guard = self.current_guard.as_ref().ok_or(StratumError::ContractViolation("read_record called with no current guard"))?;

        guard
            .with_page(|page| page.slot(slot).map(<[u8]>::to_vec))
            .flatten()
            .ok_or(StratumError::NotFound {
                resource_id: self.resource.id,
                page_key,
                revision: self.revision,
            })
    }

    /// Ensures `page_key` is present in this writer's intent log,
    /// materialising it via combine-for-modification if it isn't
    /// there yet.
    fn ensure_logged(&mut self, index_type: IndexType, page_key: PageKey) -> Result<()> {
        let cache_key = self.cache_key(page_key);
        if self.intent_log.as_ref().is_some_and(|log| log.contains(cache_key)) {
            return Ok(());
        }

        let incoming_guard = if self.current_guard.as_ref().is_some_and(|guard| guard.page_key() == page_key) {
            self.current_guard.take()
        } else {
            None
        };

        let strategy = self.resource.versioning_strategy();
        let window = strategy.max_fragments_to_read() as usize;
        let chain = self.resource.fragment_chain(self.revision, index_type, page_key);

        let in_window: Vec<Page> = chain
            .iter()
            .take(window)
            .map(|entry| self.resource.load_fragment(entry.storage_key))
            .collect::<Result<_>>()?;
        let out_of_window = match chain.get(window) {
            Some(entry) => Some(self.resource.load_fragment(entry.storage_key)?),
            None => None,
        };

        let target_revision = self.revision.next();
        let (complete, delta) = strategy.combine_for_modification(page_key, target_revision, index_type, &in_window, out_of_window.as_ref());

        self.database.cache.remove(cache_key);
        self.intent_log
            .as_mut()
            .expect("ensure_logged is only called from a writer")
            .put(cache_key, incoming_guard, PageContainer::new(complete, delta));

        Ok(())
    }

    /// Writes `payload` at `record_key`, materialising its page into
    /// the intent log on first touch.
    pub fn write_record(&mut self, index_type: IndexType, page_key: PageKey, slot: Slot, payload: Vec<u8>) -> Result<()> {
        if !self.is_writer() {
            return Err(StratumError::ContractViolation("write_record called on a read-only transaction"));
        }

        self.ensure_logged(index_type, page_key)?;

        let cache_key = self.cache_key(page_key);
        let container = self
            .intent_log
            .as_mut()
            .and_then(|log| log.get_mut(cache_key))
            .expect("ensure_logged just inserted this entry");

        container.complete.set_slot(slot, payload.clone());
        container.delta.set_slot(slot, payload);
        Ok(())
    }

    /// Commits the transaction: serialises every delta in the intent
    /// log as a new fragment, updates the page directory, and
    /// publishes the new revision. Returns the published revision.
    /// No partial-commit state is ever observable: either every
    /// fragment and the revision record land, or an error propagates
    /// before the new head is published.
    pub fn commit(mut self, commit_timestamp_millis: u64) -> Result<Revision> {
        if !self.is_writer() {
            return Err(StratumError::ContractViolation("commit called on a read-only transaction"));
        }

        self.release_current_guard();

        let mut directory = PageDirectory::default();
        let log = self.intent_log.take().expect("writer always has an intent log");

        for (cache_key, container) in log.iter() {
            let storage_key = self.resource.append_fragment(&container.delta)?;
            directory.record(
                container.complete.index_type(),
                cache_key.page_key,
                FragmentEntry {
                    revision: self.revision.next(),
                    storage_key,
                },
            );
        }

        let revision = self.resource.commit(directory, commit_timestamp_millis)?;
        self.database.epoch.record_commit(revision);

        self.intent_log = Some(log);
        self.close_inner();

        Ok(revision)
    }

    /// Discards every uncommitted modification. No revision is
    /// published.
    pub fn rollback(mut self) {
        self.close_inner();
    }

    fn close_inner(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.release_current_guard();
        if let Some(log) = self.intent_log.take() {
            log.close();
        }
        if let Some(ticket) = self.ticket.take() {
            self.database.epoch.deregister(ticket);
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.close_inner();
    }
}
