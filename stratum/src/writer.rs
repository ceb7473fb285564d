//! Page writer: serialises a page to a byte region and
//! appends it to the resource's log-structured data file, returning
//! the assigned storage key. The write is an atomic, sequential
//! append — a single mutex around the file's current offset serves
//! that guarantee without needing file locking.

use std::fs::File;
use std::io::Write as _;
use std::sync::Mutex;

use crate::checksum::Checksum;
use crate::error::{Result, StratumError};
use crate::ids::{DatabaseId, StorageKey};
use crate::page::Page;
use crate::page::codec::Codec;

/// `[checksum][decompressed_len][compressed_len][compressed bytes]`:
/// a `[u32 decompressed_length]` plus codec-specific bytes, with a
/// leading checksum so a corrupt region is caught before
/// decompression is even attempted.
pub(crate) const HEADER_LEN: usize = 4 + 4 + 4;

pub(crate) struct FrameHeader {
    pub checksum: Checksum,
    pub decompressed_len: u32,
    pub compressed_len: u32,
}

impl FrameHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.checksum.to_bytes());
        out[4..8].copy_from_slice(&self.decompressed_len.to_le_bytes());
        out[8..12].copy_from_slice(&self.compressed_len.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: [u8; HEADER_LEN]) -> Self {
        Self {
            checksum: Checksum::from_bytes(bytes[0..4].try_into().unwrap()),
            decompressed_len: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            compressed_len: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
        }
    }
}

pub struct PageWriter {
    file: Mutex<File>,
    next_offset: Mutex<u64>,
    database_id: DatabaseId,
}

impl PageWriter {
    pub fn open(file: File, database_id: DatabaseId) -> Result<Self> {
        let len = file.metadata().map_err(|e| io_failure(database_id, &e))?.len();
        Ok(Self {
            file: Mutex::new(file),
            next_offset: Mutex::new(len),
            database_id,
        })
    }

    /// Serialises `page`, compresses it with `codec`, and appends the
    /// framed region at the next offset. Concurrent writers to other
    /// resources are unaffected since each resource owns its own data
    /// file and mutex.
    pub fn append(&self, page: &Page, codec: &dyn Codec) -> Result<StorageKey> {
        let decompressed = page.to_bytes();
        let compressed = codec.compress(&decompressed);
        let checksum = Checksum::of(&decompressed);

        let header = FrameHeader {
            checksum,
            decompressed_len: decompressed.len() as u32,
            compressed_len: compressed.len() as u32,
        };

        let mut offset = self.next_offset.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut file = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let storage_key = StorageKey(*offset);

        file.write_all(&header.to_bytes()).map_err(|e| io_failure(self.database_id, &e))?;
        file.write_all(&compressed).map_err(|e| io_failure(self.database_id, &e))?;
        file.flush().map_err(|e| io_failure(self.database_id, &e))?;

        *offset += (HEADER_LEN + compressed.len()) as u64;

        tracing::debug!(storage_key = storage_key.0, page_key = ?page.page_key(), "page fragment appended");
        Ok(storage_key)
    }
}

pub(crate) fn io_failure(database_id: DatabaseId, error: &std::io::Error) -> StratumError {
    StratumError::IoFailure {
        database_id,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::PageWriter;
    use crate::ids::{DatabaseId, IndexType, PageKey, Revision, Slot};
    use crate::page::Page;
    use crate::page::codec::IdentityCodec;

    #[test]
    fn appends_grow_the_storage_key() {
        let dir = tempfile::tempdir().unwrap();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(dir.path().join("data.log"))
            .unwrap();
        let writer = PageWriter::open(file, DatabaseId(1)).unwrap();

        let mut page = Page::empty(PageKey(0), Revision(1), IndexType::DOCUMENT);
        page.set_slot(Slot(0), b"hello".to_vec());

        let first = writer.append(&page, &IdentityCodec).unwrap();
        let second = writer.append(&page, &IdentityCodec).unwrap();

        assert_eq!(first.0, 0);
        assert!(second.0 > first.0);
    }
}
