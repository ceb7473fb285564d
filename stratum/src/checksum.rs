use bytemuck::{Pod, Zeroable};

/// CRC32C checksum stored at the front of every on-disk fragment
/// region, matching its `[checksum][payload]` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct Checksum(u32);

impl Checksum {
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(crc32c::crc32c(bytes))
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }

    #[must_use]
    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    pub const fn clear(&mut self) {
        self.0 = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::Checksum;

    #[test]
    fn roundtrips_through_bytes() {
        let checksum = Checksum::of(b"hello, page");
        let roundtripped = Checksum::from_bytes(checksum.to_bytes());

        assert_eq!(checksum, roundtripped);
    }

    #[test]
    fn differs_for_different_input() {
        assert_ne!(Checksum::of(b"a"), Checksum::of(b"b"));
    }
}
