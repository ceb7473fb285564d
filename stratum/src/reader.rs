//! Page reader: given a fragment key, loads and
//! deserialises the page it names. The reader never caches — that is
//! the buffer cache's job; this type only knows how to turn bytes on
//! disk into a [`Page`].

use std::fs::File;
use std::io::{Read as _, Seek as _, SeekFrom};
use std::sync::Mutex;

use crate::checksum::Checksum;
use crate::error::{Result, StratumError};
use crate::ids::{DatabaseId, PageKey, Revision, StorageKey};
use crate::page::Page;
use crate::page::codec::Codec;
use crate::writer::{FrameHeader, HEADER_LEN, io_failure};

pub struct PageReader {
    file: Mutex<File>,
    database_id: DatabaseId,
}

impl PageReader {
    #[must_use]
    pub const fn open(file: File, database_id: DatabaseId) -> Self {
        Self {
            file: Mutex::new(file),
            database_id,
        }
    }

    /// Reads, decompresses and deserialises the fragment at
    /// `storage_key`. Checksum and length mismatches surface as
    /// [`StratumError::CorruptFragment`] rather than panicking.
    pub fn load(&self, storage_key: StorageKey, codec: &dyn Codec) -> Result<Page> {
        let mut file = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        file.seek(SeekFrom::Start(storage_key.0)).map_err(|e| io_failure(self.database_id, &e))?;

        let mut header_bytes = [0u8; HEADER_LEN];
        file.read_exact(&mut header_bytes).map_err(|e| io_failure(self.database_id, &e))?;
        let header = FrameHeader::from_bytes(header_bytes);

        let mut compressed = vec![0u8; header.compressed_len as usize];
        file.read_exact(&mut compressed).map_err(|e| io_failure(self.database_id, &e))?;
        drop(file);

        let decompressed = codec.decompress(&compressed, header.decompressed_len as usize)?;

        if Checksum::of(&decompressed) != header.checksum {
            return Err(StratumError::CorruptFragment {
                page_key: PageKey(0),
                revision: Revision(0),
                reason: "checksum mismatch on fragment region",
            });
        }

        Page::from_bytes(&decompressed)
    }
}

#[cfg(test)]
mod tests {
    use super::PageReader;
    use crate::ids::{DatabaseId, IndexType, PageKey, Revision, Slot};
    use crate::page::Page;
    use crate::page::codec::{IdentityCodec, ZstdCodec};
    use crate::writer::PageWriter;

    fn open_rw(path: &std::path::Path) -> std::fs::File {
        std::fs::OpenOptions::new().create(true).read(true).append(true).open(path).unwrap()
    }

    #[test]
    fn write_then_read_round_trips_with_identity_codec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.log");

        let writer = PageWriter::open(open_rw(&path), DatabaseId(1)).unwrap();
        let mut page = Page::empty(PageKey(7), Revision(2), IndexType::DOCUMENT);
        page.set_slot(Slot(3), b"payload".to_vec());

        let storage_key = writer.append(&page, &IdentityCodec).unwrap();

        let reader = PageReader::open(open_rw(&path), DatabaseId(1));
        let loaded = reader.load(storage_key, &IdentityCodec).unwrap();

        assert_eq!(loaded.page_key(), PageKey(7));
        assert_eq!(loaded.revision(), Revision(2));
        assert_eq!(loaded.slot(Slot(3)), Some(b"payload".as_slice()));
    }

    #[test]
    fn write_then_read_round_trips_with_zstd_codec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.log");

        let writer = PageWriter::open(open_rw(&path), DatabaseId(1)).unwrap();
        let mut page = Page::empty(PageKey(0), Revision(1), IndexType::NAME);
        for i in 0..50u16 {
            page.set_slot(Slot(i), vec![i as u8; 16]);
        }

        let codec = ZstdCodec::default();
        let storage_key = writer.append(&page, &codec).unwrap();

        let reader = PageReader::open(open_rw(&path), DatabaseId(1));
        let loaded = reader.load(storage_key, &codec).unwrap();

        assert_eq!(loaded.populated_slots().count(), 50);
        assert_eq!(loaded.slot(Slot(10)), Some(vec![10u8; 16].as_slice()));
    }

    #[test]
    fn two_fragments_are_independently_addressable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.log");
        let writer = PageWriter::open(open_rw(&path), DatabaseId(1)).unwrap();

        let mut first = Page::empty(PageKey(0), Revision(1), IndexType::DOCUMENT);
        first.set_slot(Slot(0), b"first".to_vec());
        let mut second = Page::empty(PageKey(1), Revision(1), IndexType::DOCUMENT);
        second.set_slot(Slot(0), b"second".to_vec());

        let key1 = writer.append(&first, &IdentityCodec).unwrap();
        let key2 = writer.append(&second, &IdentityCodec).unwrap();

        let reader = PageReader::open(open_rw(&path), DatabaseId(1));
        assert_eq!(reader.load(key1, &IdentityCodec).unwrap().slot(Slot(0)), Some(b"first".as_slice()));
        assert_eq!(reader.load(key2, &IdentityCodec).unwrap().slot(Slot(0)), Some(b"second".as_slice()));
    }
}
