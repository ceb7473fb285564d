//! Page frames and the guard / version protocol.
//!
//! A [`Frame`] is the buffer cache's unit of storage: a materialised
//! page plus the atomic `guard_count`/`version` pair the eviction
//! sweeper and the guard protocol both read. Acquiring a [`Guard`]
//! samples `version`; releasing it compares the sample against the
//! current value. A mismatch means the frame was reused (evicted and
//! its memory taken back) while the guard was outstanding, and is
//! surfaced as [`StratumError::FrameReused`] so the caller can retry
//! `get_and_guard` rather than touch stale memory.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{Result, StratumError};
use crate::ids::{PageKey, Revision};
use crate::page::Page;

#[derive(Debug)]
pub struct Frame {
    page_key: PageKey,
    page: RwLock<Option<Page>>,
    guard_count: AtomicU64,
    version: AtomicU64,
    hot: AtomicBool,
    closed: AtomicBool,
}

impl Frame {
    #[must_use]
    pub fn new(page: Page) -> Arc<Self> {
        Arc::new(Self {
            page_key: page.page_key(),
            page: RwLock::new(Some(page)),
            guard_count: AtomicU64::new(0),
            version: AtomicU64::new(0),
            hot: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn page_key(&self) -> PageKey {
        self.page_key
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn guard_count(&self) -> u64 {
        self.guard_count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Clears the hot flag, returning whether it was set. The sweeper
    /// uses this for CLOCK's "second chance": a hot frame is spared
    /// once, then becomes evictable on the next pass.
    pub fn take_hot(&self) -> bool {
        self.hot.swap(false, Ordering::AcqRel)
    }

    pub fn mark_hot(&self) {
        self.hot.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn revision(&self) -> Option<Revision> {
        self.page.read().unwrap_or_else(std::sync::PoisonError::into_inner).as_ref().map(Page::revision)
    }

    #[must_use]
    pub fn resident_bytes(&self) -> usize {
        self.page
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map_or(0, Page::resident_bytes)
    }

    /// Increments `guard_count` and samples `version`, producing a
    /// [`Guard`] bound to this frame. Marks the frame hot so a
    /// concurrent sweep pass spares it at least once.
    #[must_use]
    pub fn acquire_guard(self: &Arc<Self>) -> Guard {
        self.guard_count.fetch_add(1, Ordering::AcqRel);
        self.mark_hot();
        Guard {
            frame: Arc::clone(self),
            sampled_version: self.version(),
            released: false,
        }
    }

    pub fn with_page<T>(&self, f: impl FnOnce(&Page) -> T) -> Option<T> {
        self.page.read().unwrap_or_else(std::sync::PoisonError::into_inner).as_ref().map(f)
    }

    pub fn with_page_mut<T>(&self, f: impl FnOnce(&mut Page) -> T) -> Option<T> {
        self.page.write().unwrap_or_else(std::sync::PoisonError::into_inner).as_mut().map(f)
    }

    /// Atomically bumps the version, drops the page's
    /// backing memory, and marks the frame closed, unless a guard is
    /// outstanding, in which case this is a no-op and the entry must
    /// be left intact (the race is detected but lost, and is
    /// self-healing: the next sweep pass will retry). Returns whether
    /// the close actually happened.
    pub fn close(&self) -> bool {
        if self.guard_count() > 0 {
            tracing::warn!(page_key = ?self.page_key, "close() called on frame with outstanding guards, ignoring");
            return false;
        }
        if self.closed.swap(true, Ordering::AcqRel) {
            return true;
        }
        self.version.fetch_add(1, Ordering::AcqRel);
        *self.page.write().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        tracing::debug!(page_key = ?self.page_key, version = self.version(), "frame closed");
        true
    }

    /// Test-only hook simulating a lost race: force the frame closed
    /// regardless of outstanding guards, to exercise frame-reuse
    /// detection without a real concurrent
    /// sweeper.
    pub fn force_reuse_for_test(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
        *self.page.write().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }
}

/// A short-lived right to access a specific page instance.
/// Single-holder per transaction: a transaction keeps at
/// most one guard, covering its current cursor page.
#[derive(Debug)]
pub struct Guard {
    frame: Arc<Frame>,
    sampled_version: u64,
    released: bool,
}

impl Guard {
    #[must_use]
    pub fn frame(&self) -> &Arc<Frame> {
        &self.frame
    }

    #[must_use]
    pub fn page_key(&self) -> PageKey {
        self.frame.page_key()
    }

    pub fn with_page<T>(&self, f: impl FnOnce(&Page) -> T) -> Option<T> {
        self.frame.with_page(f)
    }

    pub fn with_page_mut<T>(&self, f: impl FnOnce(&mut Page) -> T) -> Option<T> {
        self.frame.with_page_mut(f)
    }

    /// Releases the guard, reporting [`StratumError::FrameReused`] if
    /// the frame's version changed while the guard was outstanding.
    /// Idempotent: a second call is a no-op returning `Ok(())`.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.frame.guard_count.fetch_sub(1, Ordering::AcqRel);

        if self.frame.version() == self.sampled_version {
            Ok(())
        } else {
            Err(StratumError::FrameReused {
                page_key: self.frame.page_key(),
            })
        }
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        if !self.released {
            // Dropping without inspecting the result is deliberate: a
            // cancelled/panicking caller must still release, and a
            // FrameReused signal with nobody left to retry is a no-op.
            let _ = self.release_inner();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Frame;
    use crate::ids::{IndexType, PageKey, Revision};
    use crate::page::Page;

    fn sample_page() -> Page {
        Page::empty(PageKey(1), Revision(1), IndexType::DOCUMENT)
    }

    #[test]
    fn guard_acquire_release_round_trip() {
        let frame = Frame::new(sample_page());
        let guard = frame.acquire_guard();
        assert_eq!(frame.guard_count(), 1);

        guard.release().unwrap();
        assert_eq!(frame.guard_count(), 0);
    }

    #[test]
    fn close_is_noop_while_guarded() {
        let frame = Frame::new(sample_page());
        let guard = frame.acquire_guard();

        assert!(!frame.close());
        assert!(!frame.is_closed());

        guard.release().unwrap();
        assert!(frame.close());
        assert!(frame.is_closed());
    }

    #[test]
    fn close_is_idempotent() {
        let frame = Frame::new(sample_page());
        assert!(frame.close());
        assert!(frame.close());
        assert_eq!(frame.version(), 1);
    }

    #[test]
    fn frame_reuse_is_detected_on_release() {
        let frame = Frame::new(sample_page());
        let guard = frame.acquire_guard();

        frame.force_reuse_for_test();

        let result = guard.release();
        assert!(matches!(result, Err(crate::error::StratumError::FrameReused { .. })));
    }

    #[test]
    fn dropping_a_guard_releases_it() {
        let frame = Frame::new(sample_page());
        {
            let _guard = frame.acquire_guard();
            assert_eq!(frame.guard_count(), 1);
        }
        assert_eq!(frame.guard_count(), 0);
    }
}
