//! Per-writer transaction intent log: an ordered list of
//! page containers, indexed by page reference, that the writing
//! transaction owns exclusively until commit or discard.

use std::collections::HashMap;

use crate::guard::Guard;
use crate::ids::LogKey;
use crate::page::Page;
use crate::page::reference::CacheKey;

/// A pair `(complete_view, modification_delta)` held only in the
/// intent log. `complete` is the logically
/// merged page visible to the writer; `delta` is the subset of slots
/// the writer has actually mutated, which gets serialised at commit.
#[derive(Debug)]
pub struct PageContainer {
    pub complete: Page,
    pub delta: Page,
}

impl PageContainer {
    #[must_use]
    pub const fn new(complete: Page, delta: Page) -> Self {
        Self { complete, delta }
    }

    /// Releases the container. `complete` and `delta` are owned
    /// values once inside the log (invariant (b): no other
    /// transaction can see them), so this has nothing to signal to a
    /// shared cache — it exists so the intent log's `clear`/`close`
    /// have one symmetric close-per-entry call site to log against,
    /// matching the guard/frame close pattern used elsewhere.
    fn close(self) {
        tracing::trace!(page_key = ?self.complete.page_key(), "page container closed");
    }
}

pub struct IntentLog {
    entries: Vec<Option<PageContainer>>,
    by_key: HashMap<CacheKey, LogKey>,
}

impl IntentLog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    /// Inserts `container` keyed by `cache_key`. Per invariant (a), no
    /// shared cache may hold this key afterwards — the caller is
    /// responsible for having removed it there first. `incoming_guard`
    /// is force-released: once the log owns the page, a cache guard
    /// on it is meaningless (the log is the sole owner), and any
    /// `FrameReused` signal from the release is not actionable here.
    pub fn put(&mut self, cache_key: CacheKey, incoming_guard: Option<Guard>, container: PageContainer) -> LogKey {
        if let Some(guard) = incoming_guard {
            drop(guard);
        }

        let log_key = LogKey(self.entries.len());
        self.entries.push(Some(container));
        self.by_key.insert(cache_key, log_key);
        log_key
    }

    #[must_use]
    pub fn get(&self, cache_key: CacheKey) -> Option<&PageContainer> {
        let log_key = *self.by_key.get(&cache_key)?;
        self.entries.get(log_key.0)?.as_ref()
    }

    pub fn get_mut(&mut self, cache_key: CacheKey) -> Option<&mut PageContainer> {
        let log_key = *self.by_key.get(&cache_key)?;
        self.entries.get_mut(log_key.0)?.as_mut()
    }

    #[must_use]
    pub fn contains(&self, cache_key: CacheKey) -> bool {
        self.by_key.contains_key(&cache_key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CacheKey, &PageContainer)> {
        self.by_key
            .iter()
            .filter_map(|(key, log_key)| self.entries[log_key.0].as_ref().map(|container| (key, container)))
    }

    /// Closes every container in reverse insertion order.
    pub fn clear(&mut self) {
        for entry in self.entries.iter_mut().rev() {
            if let Some(container) = entry.take() {
                container.close();
            }
        }
        self.by_key.clear();
    }

    /// Like `clear`, plus whatever log-level bookkeeping a future
    /// extension might add; kept as a distinct call site so callers
    /// say what they mean at the transaction boundary.
    pub fn close(mut self) {
        self.clear();
    }
}

impl Default for IntentLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{IntentLog, PageContainer};
    use crate::ids::{DatabaseId, IndexType, PageKey, ResourceId, Revision};
    use crate::page::Page;
    use crate::page::reference::CacheKey;

    fn key(page_key: u64) -> CacheKey {
        CacheKey {
            database_id: DatabaseId(1),
            resource_id: ResourceId(1),
            page_key: PageKey(page_key),
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let mut log = IntentLog::new();
        let cache_key = key(0);
        let complete = Page::empty(PageKey(0), Revision(1), IndexType::DOCUMENT);
        let delta = complete.clone();

        let log_key = log.put(cache_key, None, PageContainer::new(complete, delta));
        assert_eq!(log_key.0, 0);
        assert!(log.contains(cache_key));
        assert!(log.get(cache_key).is_some());
    }

    #[test]
    fn clear_empties_the_log() {
        let mut log = IntentLog::new();
        let cache_key = key(0);
        let page = Page::empty(PageKey(0), Revision(1), IndexType::DOCUMENT);
        log.put(cache_key, None, PageContainer::new(page.clone(), page));

        log.clear();
        assert!(log.is_empty());
        assert!(!log.contains(cache_key));
    }
}
