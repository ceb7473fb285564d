//! The materialised, in-memory page: a fixed-capacity container of
//! variable-length slots plus the bookkeeping needed to combine
//! fragments and serialise the result.

pub mod bitmap;
pub mod codec;
pub mod reference;
pub mod versioning;

use std::collections::BTreeMap;

use crate::error::{Result, StratumError};
use crate::ids::{IndexType, PageKey, Revision, Slot, SLOTS_PER_PAGE};
use bitmap::SlotBitmap;

/// A fixed-capacity container of up to [`SLOTS_PER_PAGE`] slots. Each
/// slot holds either a variable-length byte payload or is empty; the
/// populated-slot bitmap always mirrors slot occupancy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    page_key: PageKey,
    revision: Revision,
    index_type: IndexType,
    bitmap: SlotBitmap,
    slots: Vec<Option<Vec<u8>>>,
    /// Out-of-band references for slots whose payload outgrew the
    /// page (e.g. an oversized record stored on its own overflow page).
    overflow: BTreeMap<u16, PageKey>,
    /// Optional dewey-id region, opaque to this layer.
    dewey_ids: Option<Vec<u8>>,
}

impl Page {
    #[must_use]
    pub fn empty(page_key: PageKey, revision: Revision, index_type: IndexType) -> Self {
        Self {
            page_key,
            revision,
            index_type,
            bitmap: SlotBitmap::empty(),
            slots: vec![None; SLOTS_PER_PAGE],
            overflow: BTreeMap::new(),
            dewey_ids: None,
        }
    }

    #[must_use]
    pub const fn page_key(&self) -> PageKey {
        self.page_key
    }

    #[must_use]
    pub const fn revision(&self) -> Revision {
        self.revision
    }

    #[must_use]
    pub const fn index_type(&self) -> IndexType {
        self.index_type
    }

    pub fn set_revision(&mut self, revision: Revision) {
        self.revision = revision;
    }

    #[must_use]
    pub const fn bitmap(&self) -> &SlotBitmap {
        &self.bitmap
    }

    #[must_use]
    pub fn slot(&self, slot: Slot) -> Option<&[u8]> {
        self.slots[slot.as_usize()].as_deref()
    }

    pub fn set_slot(&mut self, slot: Slot, payload: Vec<u8>) {
        self.bitmap.set(slot.as_usize());
        self.slots[slot.as_usize()] = Some(payload);
    }

    pub fn clear_slot(&mut self, slot: Slot) {
        self.bitmap.clear(slot.as_usize());
        self.slots[slot.as_usize()] = None;
        self.overflow.remove(&(slot.0));
    }

    #[must_use]
    pub fn is_slot_populated(&self, slot: Slot) -> bool {
        self.bitmap.is_set(slot.as_usize())
    }

    pub fn set_overflow(&mut self, slot: Slot, target: PageKey) {
        self.overflow.insert(slot.0, target);
    }

    #[must_use]
    pub fn overflow(&self, slot: Slot) -> Option<PageKey> {
        self.overflow.get(&slot.0).copied()
    }

    #[must_use]
    pub const fn overflow_map(&self) -> &BTreeMap<u16, PageKey> {
        &self.overflow
    }

    #[must_use]
    pub fn dewey_ids(&self) -> Option<&[u8]> {
        self.dewey_ids.as_deref()
    }

    pub fn set_dewey_ids(&mut self, region: Vec<u8>) {
        self.dewey_ids = Some(region);
    }

    /// Approximate resident byte size, used by the buffer cache's
    /// weigher.
    #[must_use]
    pub fn resident_bytes(&self) -> usize {
        let slots: usize = self
            .slots
            .iter()
            .filter_map(|slot| slot.as_ref())
            .map(Vec::len)
            .sum();

        size_of::<Self>()
            + slots
            + self.overflow.len() * (size_of::<u16>() + size_of::<PageKey>())
            + self.dewey_ids.as_ref().map_or(0, Vec::len)
    }

    pub fn populated_slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.bitmap.iter_populated().map(|i| Slot(i as u16))
    }

    /// Serialises the page body into its on-disk byte layout: a
    /// header, the dewey-id region, the payload region (walked via the
    /// populated-slot bitmap, so cost is proportional to populated
    /// slots), and the overflow-reference map. `index_type`,
    /// `revision` and `page_key` are part of the cache/fragment key
    /// already, but are also stamped here so a fragment is
    /// self-describing on disk.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.resident_bytes());

        out.push(self.index_type.as_index() as u8);
        out.extend_from_slice(&self.revision.0.to_le_bytes());
        out.extend_from_slice(&self.page_key.0.to_le_bytes());

        let dewey = self.dewey_ids.as_deref().unwrap_or(&[]);
        out.extend_from_slice(&(dewey.len() as u32).to_le_bytes());
        out.extend_from_slice(dewey);

        out.extend_from_slice(&self.bitmap.count_ones().to_le_bytes());
        for slot in self.populated_slots() {
            let payload = self.slot(slot).unwrap_or(&[]);
            out.extend_from_slice(&slot.0.to_le_bytes());
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            out.extend_from_slice(payload);
        }

        out.extend_from_slice(&(self.overflow.len() as u32).to_le_bytes());
        for (&slot, &target) in &self.overflow {
            out.extend_from_slice(&slot.to_le_bytes());
            out.extend_from_slice(&target.0.to_le_bytes());
        }

        out
    }

    /// Inverse of [`Page::to_bytes`]. `database_id`/`resource_id` are
    /// deliberately not part of the wire format: the caller stamps
    /// them from reader context after deserialising.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);

        let index_type = IndexType::from_index(cursor.read_u8()?);
        let revision = Revision(cursor.read_u64()?);
        let page_key = PageKey(cursor.read_u64()?);

        let dewey_len = cursor.read_u32()? as usize;
        let dewey_ids = if dewey_len == 0 {
            None
        } else {
            Some(cursor.read_bytes(dewey_len)?.to_vec())
        };

        let mut page = Self::empty(page_key, revision, index_type);
        page.dewey_ids = dewey_ids;

        let populated = cursor.read_u32()?;
        for _ in 0..populated {
            let slot = Slot(cursor.read_u16()?);
            let len = cursor.read_u32()? as usize;
            let payload = cursor.read_bytes(len)?.to_vec();
            page.set_slot(slot, payload);
        }

        let overflow_count = cursor.read_u32()?;
        for _ in 0..overflow_count {
            let slot = Slot(cursor.read_u16()?);
            let target = PageKey(cursor.read_u64()?);
            page.set_overflow(slot, target);
        }

        Ok(page)
    }
}

/// Minimal byte-cursor for [`Page::from_bytes`]; every read is
/// bounds-checked and reports [`StratumError::CorruptFragment`] on
/// truncation rather than panicking.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(corrupt("length overflow"))?;
        let slice = self.bytes.get(self.pos..end).ok_or(corrupt("truncated fragment"))?;
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_bytes(2)?.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }
}

const fn corrupt(reason: &'static str) -> StratumError {
    StratumError::CorruptFragment {
        page_key: PageKey(0),
        revision: Revision(0),
        reason,
    }
}
