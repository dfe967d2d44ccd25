//! Priority bitmap management for O(1) highest-ready lookup
//!
//! One bit per priority level. The highest ready priority is found with a
//! CLZ (Count Leading Zeros) on the most significant non-empty word.

use crate::config::CFG_PRIO_MAX;
use crate::types::{OsPrio, NOPRIO};

/// Number of words needed for the priority bitmap
const PRIO_TBL_SIZE: usize = CFG_PRIO_MAX.div_ceil(32);

/// Priority bitmap table
///
/// Bit `p % 32` of word `p / 32` is set when at least one thread is ready
/// at priority `p`. Higher priorities live in higher words.
#[derive(Clone, Copy)]
pub struct PrioTable {
    bitmap: [u32; PRIO_TBL_SIZE],
}

impl PrioTable {
    pub const fn new() -> Self {
        PrioTable {
            bitmap: [0; PRIO_TBL_SIZE],
        }
    }

    pub fn init(&mut self) {
        for word in self.bitmap.iter_mut() {
            *word = 0;
        }
    }

    /// Insert a priority into the bitmap
    #[inline]
    pub fn insert(&mut self, prio: OsPrio) {
        let (word, bit) = Self::locate(prio);
        self.bitmap[word] |= bit;
    }

    /// Remove a priority from the bitmap
    #[inline]
    pub fn remove(&mut self, prio: OsPrio) {
        let (word, bit) = Self::locate(prio);
        self.bitmap[word] &= !bit;
    }

    /// Highest priority in the table, `NOPRIO` if it is empty
    #[inline]
    pub fn get_highest(&self) -> OsPrio {
        for (idx, &word) in self.bitmap.iter().enumerate().rev() {
            if word != 0 {
                return (idx * 32 + 31 - word.leading_zeros() as usize) as OsPrio;
            }
        }
        NOPRIO
    }

    /// Check if a specific priority has any ready threads
    #[inline]
    pub fn is_set(&self, prio: OsPrio) -> bool {
        let (word, bit) = Self::locate(prio);
        self.bitmap[word] & bit != 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bitmap.iter().all(|&w| w == 0)
    }

    #[inline(always)]
    fn locate(prio: OsPrio) -> (usize, u32) {
        let prio = prio as usize;
        debug_assert!(prio < CFG_PRIO_MAX);
        (prio / 32, 1 << (prio % 32))
    }
}

impl Default for PrioTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_empty_table() {
        let table = PrioTable::new();
        assert!(table.is_empty());
        assert_eq!(table.get_highest(), NOPRIO);
    }

    #[test]
    fn test_insert_remove() {
        let mut table = PrioTable::new();

        table.insert(5);
        assert!(table.is_set(5));
        assert!(!table.is_set(4));
        assert_eq!(table.get_highest(), 5);

        table.insert(3);
        assert_eq!(table.get_highest(), 5);

        table.remove(5);
        assert_eq!(table.get_highest(), 3);

        table.remove(3);
        assert!(table.is_empty());
    }

    #[test]
    fn test_boundary_priorities() {
        let mut table = PrioTable::new();

        table.insert(31);
        assert_eq!(table.get_highest(), 31);

        table.insert(32);
        assert_eq!(table.get_highest(), 32);

        table.insert(255);
        assert_eq!(table.get_highest(), 255);

        table.remove(255);
        table.remove(32);
        assert_eq!(table.get_highest(), 31);
    }

    #[quickcheck]
    fn highest_is_max(prios: Vec<u8>) {
        let mut table = PrioTable::new();
        for &p in &prios {
            table.insert(p);
        }
        let expected = prios.iter().copied().max().unwrap_or(NOPRIO);
        assert_eq!(table.get_highest(), expected);
    }
}
