//! Identifiers threaded through the page store: database/resource
//! scoping, the closed set of index types, page keys/slots and the
//! revision numbering used by the versioning strategies.

use std::fmt::{self, Display};

use bytemuck::{Pod, Zeroable};

/// Number of slots a single page can hold.
pub const SLOTS_PER_PAGE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct DatabaseId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct ResourceId(pub u64);

/// Logical page identifier within its index tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct PageKey(pub u64);

impl PageKey {
    #[must_use]
    pub const fn of_record(record_key: u64) -> Self {
        Self(record_key / SLOTS_PER_PAGE as u64)
    }
}

impl Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Offset of a slot within its page (`0..SLOTS_PER_PAGE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(pub u16);

impl Slot {
    #[must_use]
    pub const fn of_record(record_key: u64) -> Self {
        Self((record_key % SLOTS_PER_PAGE as u64) as u16)
    }

    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// On-disk append offset a fragment was written at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct StorageKey(pub u64);

/// Position of a page container inside the writer's current intent log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogKey(pub usize);

/// Revision number. Revision 0 is the empty resource; the first commit
/// produces revision 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct Revision(pub u64);

impl Revision {
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Closed set of logical trees carried by a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct IndexType(u8);

impl IndexType {
    pub const DOCUMENT: Self = Self(0);
    pub const PATH_SUMMARY: Self = Self(1);
    pub const NAME: Self = Self(2);
    pub const PATH: Self = Self(3);
    pub const CAS: Self = Self(4);
    pub const CHANGED_NODES: Self = Self(5);
    pub const RECORD_TO_REVISIONS: Self = Self(6);

    const COUNT: u8 = 7;

    #[must_use]
    pub const fn is_path_summary(self) -> bool {
        self.0 == Self::PATH_SUMMARY.0
    }

    #[must_use]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }

    /// Reconstructs an [`IndexType`] from its stamped on-disk byte.
    /// Unknown values clamp to `DOCUMENT` rather than panicking; a
    /// fragment with a genuinely corrupt header is caught by the
    /// checksum, not by this field.
    #[must_use]
    pub const fn from_index(byte: u8) -> Self {
        if byte < Self::COUNT {
            Self(byte)
        } else {
            Self::DOCUMENT
        }
    }
}

const _: () = assert!(IndexType::COUNT == 7);

/// A secondary index can have more than one instance per resource
/// (e.g. one CAS index per distinct content type); `index_number`
/// disambiguates those instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexNumber(pub u32);

#[cfg(test)]
mod tests {
    use super::{PageKey, Slot, SLOTS_PER_PAGE};

    #[test]
    fn record_key_splits_into_page_and_slot() {
        assert_eq!(PageKey::of_record(0), PageKey(0));
        assert_eq!(Slot::of_record(0), Slot(0));

        assert_eq!(PageKey::of_record(1023), PageKey(0));
        assert_eq!(Slot::of_record(1023), Slot(1023));

        assert_eq!(PageKey::of_record(1024), PageKey(1));
        assert_eq!(Slot::of_record(1024), Slot(0));

        assert_eq!(
            PageKey::of_record(2047),
            PageKey((2047 / SLOTS_PER_PAGE as u64) as u64)
        );
    }
}
