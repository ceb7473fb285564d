//! Pluggable fragment compression. Decompression writes
//! into a reusable, thread-local scratch buffer so the common path
//! (decompress-then-deserialise) does not allocate per page.

use std::cell::RefCell;

use crate::error::{Result, StratumError};
use crate::ids::{PageKey, Revision};

pub trait Codec: std::fmt::Debug + Send + Sync {
    fn compress(&self, input: &[u8]) -> Vec<u8>;

    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl Codec for IdentityCodec {
    fn compress(&self, input: &[u8]) -> Vec<u8> {
        input.to_vec()
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        if input.len() != expected_len {
            return Err(StratumError::CorruptFragment {
                page_key: PageKey(0),
                revision: Revision(0),
                reason: "identity codec length mismatch",
            });
        }
        Ok(input.to_vec())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    #[must_use]
    pub const fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::new(3)
    }
}

thread_local! {
    static SCRATCH: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
}

impl Codec for ZstdCodec {
    fn compress(&self, input: &[u8]) -> Vec<u8> {
        zstd::bulk::compress(input, self.level).expect("zstd compression is infallible for in-memory buffers")
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        SCRATCH.with(|scratch| {
            let mut scratch = scratch.borrow_mut();
            scratch.clear();
            scratch.reserve(expected_len);

            zstd::bulk::decompress_to_buffer(input, &mut scratch).map_err(|_| {
                StratumError::CorruptFragment {
                    page_key: PageKey(0),
                    revision: Revision(0),
                    reason: "zstd decompression failed",
                }
            })?;

            if scratch.len() != expected_len {
                return Err(StratumError::CorruptFragment {
                    page_key: PageKey(0),
                    revision: Revision(0),
                    reason: "zstd decompressed length mismatch",
                });
            }

            Ok(scratch.clone())
        })
    }
}

/// Which codec a resource was configured with, persisted in its
/// resource configuration blob so reopening picks the same
/// codec without the caller repeating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Identity,
    Zstd,
}

impl CodecKind {
    #[must_use]
    pub fn build(self) -> Box<dyn Codec> {
        match self {
            Self::Identity => Box::new(IdentityCodec),
            Self::Zstd => Box::new(ZstdCodec::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Codec, IdentityCodec, ZstdCodec};

    #[test]
    fn identity_roundtrips() {
        let codec = IdentityCodec;
        let input = b"some page bytes".to_vec();
        let compressed = codec.compress(&input);
        let decompressed = codec.decompress(&compressed, input.len()).unwrap();

        assert_eq!(decompressed, input);
    }

    #[test]
    fn zstd_roundtrips() {
        let codec = ZstdCodec::default();
        let input = vec![7u8; 4096];
        let compressed = codec.compress(&input);
        assert!(compressed.len() < input.len());

        let decompressed = codec.decompress(&compressed, input.len()).unwrap();
        assert_eq!(decompressed, input);
    }

    #[test]
    fn zstd_rejects_truncated_input() {
        let codec = ZstdCodec::default();
        let compressed = codec.compress(&vec![3u8; 4096]);

        assert!(codec.decompress(&compressed[..compressed.len() / 2], 4096).is_err());
    }
}
