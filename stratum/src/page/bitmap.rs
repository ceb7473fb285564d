//! The populated-slot bitmap carried by every page, and reused as the
//! 128-byte in-window bitmap for the sliding-snapshot versioning
//! strategy.

use bytemuck::{Pod, Zeroable};

use crate::ids::SLOTS_PER_PAGE;

const WORDS: usize = SLOTS_PER_PAGE / u64::BITS as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct SlotBitmap([u64; WORDS]);

const _: () = assert!(size_of::<SlotBitmap>() * 8 == SLOTS_PER_PAGE);

impl SlotBitmap {
    #[must_use]
    pub const fn empty() -> Self {
        Self([0; WORDS])
    }

    #[must_use]
    pub const fn is_set(&self, slot: usize) -> bool {
        debug_assert!(slot < SLOTS_PER_PAGE);
        self.0[slot / 64] & (1 << (slot % 64)) != 0
    }

    pub const fn set(&mut self, slot: usize) {
        debug_assert!(slot < SLOTS_PER_PAGE);
        self.0[slot / 64] |= 1 << (slot % 64);
    }

    pub const fn clear(&mut self, slot: usize) {
        debug_assert!(slot < SLOTS_PER_PAGE);
        self.0[slot / 64] &= !(1 << (slot % 64));
    }

    #[must_use]
    pub fn count_ones(&self) -> u32 {
        self.0.iter().map(|word| word.count_ones()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|word| *word == 0)
    }

    /// Iterates populated slot indices in ascending order. Combine
    /// logic walks this instead of `0..SLOTS_PER_PAGE` so cost is
    /// proportional to populated slots, not page capacity.
    pub fn iter_populated(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().flat_map(|(word_index, word)| {
            let mut word = *word;
            std::iter::from_fn(move || {
                if word == 0 {
                    return None;
                }
                let bit = word.trailing_zeros();
                word &= word - 1;
                Some(word_index * 64 + bit as usize)
            })
        })
    }

    /// Bitwise OR, used when merging a delta's occupancy into a base
    /// bitmap (e.g. the sliding-snapshot out-of-window carry-forward).
    pub fn merge_from(&mut self, other: &Self) {
        for (mine, theirs) in self.0.iter_mut().zip(other.0.iter()) {
            *mine |= theirs;
        }
    }
}

impl Default for SlotBitmap {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::SlotBitmap;

    #[test]
    fn set_get_clear_roundtrip() {
        let mut bitmap = SlotBitmap::empty();
        assert!(bitmap.is_empty());

        bitmap.set(0);
        bitmap.set(63);
        bitmap.set(64);
        bitmap.set(1023);

        assert!(bitmap.is_set(0));
        assert!(bitmap.is_set(63));
        assert!(bitmap.is_set(64));
        assert!(bitmap.is_set(1023));
        assert!(!bitmap.is_set(500));
        assert_eq!(bitmap.count_ones(), 4);

        bitmap.clear(64);
        assert!(!bitmap.is_set(64));
        assert_eq!(bitmap.count_ones(), 3);
    }

    #[test]
    fn iter_populated_is_ascending_and_exhaustive() {
        let mut bitmap = SlotBitmap::empty();
        for slot in [3, 7, 64, 65, 1000, 1023] {
            bitmap.set(slot);
        }

        let collected: Vec<usize> = bitmap.iter_populated().collect();
        assert_eq!(collected, vec![3, 7, 64, 65, 1000, 1023]);
    }

    #[test]
    fn merge_from_is_bitwise_or() {
        let mut a = SlotBitmap::empty();
        a.set(1);

        let mut b = SlotBitmap::empty();
        b.set(2);

        a.merge_from(&b);

        assert!(a.is_set(1));
        assert!(a.is_set(2));
    }

    #[test]
    fn full_page_all_populated() {
        let mut bitmap = SlotBitmap::empty();
        for slot in 0..crate::ids::SLOTS_PER_PAGE {
            bitmap.set(slot);
        }

        assert_eq!(bitmap.count_ones() as usize, crate::ids::SLOTS_PER_PAGE);
        assert_eq!(bitmap.iter_populated().count(), crate::ids::SLOTS_PER_PAGE);
    }
}
