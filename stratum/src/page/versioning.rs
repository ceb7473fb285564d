//! Fragment-combining versioning strategies.
//!
//! Four strategies are supported, differing only in how many
//! fragments a read has to load and how much a write has to persist.
//! The combine contract itself — "smallest-index fragment wins per
//! slot" — is identical across all four and implemented once in
//! [`combine`].

use crate::ids::{IndexType, PageKey, Revision};
use crate::page::Page;

/// Per-resource versioning strategy. `restore_window`
/// (`R`) bounds how many fragments `INCREMENTAL`/`SLIDING_SNAPSHOT`
/// ever need to read to reconstruct a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersioningStrategy {
    Full,
    Differential,
    Incremental { restore_window: u32 },
    SlidingSnapshot { restore_window: u32 },
}

impl VersioningStrategy {
    /// Upper bound on fragments a read needs to load for this
    /// strategy, used by the page reader to cap its fragment walk.
    #[must_use]
    pub const fn max_fragments_to_read(self) -> u32 {
        match self {
            Self::Full => 1,
            Self::Differential => 2,
            Self::Incremental { restore_window } | Self::SlidingSnapshot { restore_window } => restore_window,
        }
    }

    #[must_use]
    pub const fn restore_window(self) -> Option<u32> {
        match self {
            Self::Incremental { restore_window } | Self::SlidingSnapshot { restore_window } => Some(restore_window),
            Self::Full | Self::Differential => None,
        }
    }

    #[must_use]
    pub const fn is_sliding_snapshot(self) -> bool {
        matches!(self, Self::SlidingSnapshot { .. })
    }

    /// Combine contract: for every slot, the result takes the value
    /// from the fragment with the smallest index (`fragments[0]` is
    /// newest) that populates it.
    #[must_use]
    pub fn combine(self, page_key: PageKey, revision: Revision, index_type: IndexType, fragments: &[Page]) -> Page {
        combine_into(page_key, revision, index_type, fragments)
    }

    /// Combine-for-modification contract: `complete` is the plain
    /// combine above; `delta` starts empty and, for
    /// `SLIDING_SNAPSHOT` only, additionally carries forward any slot
    /// that is populated in `out_of_window` (the fragment that just
    /// fell off the restore window) but in none of `in_window` —
    /// without this carry-forward a window collapse would silently
    /// lose that slot's last surviving value.
    #[must_use]
    pub fn combine_for_modification(
        self,
        page_key: PageKey,
        revision: Revision,
        index_type: IndexType,
        in_window: &[Page],
        out_of_window: Option<&Page>,
    ) -> (Page, Page) {
        let complete = combine_into(page_key, revision, index_type, in_window);
        let mut delta = Page::empty(page_key, revision, index_type);

        if self.is_sliding_snapshot() {
            if let Some(old) = out_of_window {
                for slot in old.populated_slots() {
                    let still_covered = in_window.iter().any(|fragment| fragment.is_slot_populated(slot));
                    if still_covered {
                        continue;
                    }
                    if let Some(payload) = old.slot(slot) {
                        delta.set_slot(slot, payload.to_vec());
                    }
                    if let Some(target) = old.overflow(slot) {
                        delta.set_overflow(slot, target);
                    }
                }
            }
        }

        (complete, delta)
    }
}

fn combine_into(page_key: PageKey, revision: Revision, index_type: IndexType, fragments: &[Page]) -> Page {
    let mut result = Page::empty(page_key, revision, index_type);

    // fragments[0] is newest; only fill slots not already populated by
    // an earlier (= newer) fragment, which is exactly "smallest index
    // wins". Iterating via each fragment's populated-slot bitmap keeps
    // the cost proportional to populated slots, not SLOTS_PER_PAGE.
    for fragment in fragments {
        for slot in fragment.populated_slots() {
            if result.is_slot_populated(slot) {
                continue;
            }
            if let Some(payload) = fragment.slot(slot) {
                result.set_slot(slot, payload.to_vec());
            }
            if let Some(target) = fragment.overflow(slot) {
                result.set_overflow(slot, target);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::VersioningStrategy;
    use crate::ids::{IndexType, PageKey, Revision, Slot};
    use crate::page::Page;

    fn page_with(revision: u64, slots: &[(u16, &str)]) -> Page {
        let mut page = Page::empty(PageKey(0), Revision(revision), IndexType::DOCUMENT);
        for &(slot, value) in slots {
            page.set_slot(Slot(slot), value.as_bytes().to_vec());
        }
        page
    }

    #[test]
    fn combine_takes_newest_populated_slot() {
        let newest = page_with(3, &[(0, "new")]);
        let older = page_with(2, &[(0, "old"), (1, "kept")]);

        let combined = VersioningStrategy::Incremental { restore_window: 3 }.combine(
            PageKey(0),
            Revision(3),
            IndexType::DOCUMENT,
            &[newest, older],
        );

        assert_eq!(combined.slot(Slot(0)), Some(b"new".as_slice()));
        assert_eq!(combined.slot(Slot(1)), Some(b"kept".as_slice()));
    }

    #[test]
    fn empty_fragment_list_combines_to_empty_page() {
        let combined = VersioningStrategy::Full.combine(PageKey(0), Revision(1), IndexType::DOCUMENT, &[]);
        assert_eq!(combined.populated_slots().count(), 0);
    }

    #[test]
    fn sliding_snapshot_carries_forward_out_of_window_slot() {
        let in_window = [page_with(3, &[(0, "v3")])];
        let out_of_window = page_with(1, &[(0, "v1"), (2, "still-only-here")]);

        let strategy = VersioningStrategy::SlidingSnapshot { restore_window: 1 };
        let (complete, delta) = strategy.combine_for_modification(
            PageKey(0),
            Revision(4),
            IndexType::DOCUMENT,
            &in_window,
            Some(&out_of_window),
        );

        assert_eq!(complete.slot(Slot(0)), Some(b"v3".as_slice()));
        // slot 0 is covered by the in-window fragment, so it is not
        // carried forward; slot 2 has no other surviving copy.
        assert_eq!(delta.slot(Slot(0)), None);
        assert_eq!(delta.slot(Slot(2)), Some(b"still-only-here".as_slice()));
    }

    #[test]
    fn incremental_does_not_carry_forward() {
        let in_window = [page_with(3, &[(0, "v3")])];
        let out_of_window = page_with(1, &[(2, "orphaned")]);

        let strategy = VersioningStrategy::Incremental { restore_window: 1 };
        let (_, delta) =
            strategy.combine_for_modification(PageKey(0), Revision(4), IndexType::DOCUMENT, &in_window, Some(&out_of_window));

        assert_eq!(delta.populated_slots().count(), 0);
    }
}
