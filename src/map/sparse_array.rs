//! Sparse array: values paged by key
//!
//! The key space is cut into pages of `2^page_bits` keys. A page that
//! receives at least one key occupies a run of slots in the value store
//! starting at the page's first key; pages that are skipped cost one entry
//! in the page index and no slots at all.
//!
//! ```text
//! page_starts: [ 0 | 0 | 3 | 3 | 3 | 5 ]      page 1 = slots 0..3
//! values:      [ a  b  c | d  e | f ... ]     pages 2,3 absent (empty range)
//! ```
//!
//! Page `p` covers slots `page_starts[p]..page_starts[p + 1]` (the last page
//! runs to the end of the store). Absent pages are empty ranges, so a miss
//! costs two index reads and never touches the value store.
//!
//! The page index is dense, so keys are capped (see [`SparseArray::max_key`])
//! to keep it bounded.
//!
//! Slots hold `value ^ MISSING_VALUE`, which makes a zeroed slot read back
//! as missing. Gaps inside a page are padded with `pad_to`, and a disk
//! backed value store keeps those gaps as file holes.

use super::{
    check_paged_key, check_value, decode_slot, encode_slot, paged_key_limit, LongMap,
    MAX_PAGED_KEY, MISSING_VALUE,
};
use crate::config::MmapConfig;
use crate::storage::{AppendStore, MmapLongs, RamLongs};
use crate::{Result, StorageError};
use std::path::Path;
use tracing::{debug, trace};

pub struct SparseArray {
    values: Box<dyn AppendStore>,

    /// First slot of every page up to the last written one
    page_starts: Vec<u64>,

    page_bits: u32,
    max_key: i64,
    last_key: Option<i64>,
    entries: u64,
}

impl SparseArray {
    pub const DEFAULT_PAGE_BITS: u32 = 10;

    /// Largest key any sparse array accepts; small pages lower it further.
    pub const MAX_KEY: i64 = MAX_PAGED_KEY;

    pub fn new(values: Box<dyn AppendStore>, page_bits: u32) -> Result<Self> {
        if !(1..=32).contains(&page_bits) {
            return Err(StorageError::InvalidArgument(format!(
                "page_bits must be in 1..=32, got {}",
                page_bits
            )));
        }
        if !values.is_empty() {
            return Err(StorageError::InvalidArgument(
                "sparse array needs an empty value store".into(),
            ));
        }
        Ok(Self {
            values,
            page_starts: Vec::new(),
            page_bits,
            max_key: paged_key_limit(page_bits),
            last_key: None,
            entries: 0,
        })
    }

    pub fn in_memory(page_bits: u32) -> Result<Self> {
        Self::new(Box::new(RamLongs::new()), page_bits)
    }

    /// Values in an mmap file under `dir`.
    pub fn mmap(dir: &Path, page_bits: u32, config: &MmapConfig) -> Result<Self> {
        let values = MmapLongs::create(dir.join("sparse-array-values.bin"), config.clone())?;
        debug!(dir = %dir.display(), page_bits, "created mmap sparse array");
        Self::new(Box::new(values), page_bits)
    }

    pub fn page_size(&self) -> u64 {
        1 << self.page_bits
    }

    /// Largest key this array accepts
    pub fn max_key(&self) -> i64 {
        self.max_key
    }

    /// Pages holding at least one slot
    pub fn materialized_pages(&self) -> usize {
        (0..self.page_starts.len())
            .filter(|&page| {
                let (start, end) = self.page_range(page);
                start < end
            })
            .count()
    }

    #[inline]
    fn page_range(&self, page: usize) -> (u64, u64) {
        let start = self.page_starts[page];
        let end = self
            .page_starts
            .get(page + 1)
            .copied()
            .unwrap_or_else(|| self.values.len());
        (start, end)
    }
}

impl LongMap for SparseArray {
    fn put(&mut self, key: i64, value: i64) -> Result<()> {
        check_value(value)?;
        check_paged_key(key, self.max_key, "sparse array")?;
        match self.last_key {
            Some(last) if key == last => return Ok(()),
            Some(last) if key < last => return Err(StorageError::UnsortedKey { key, last }),
            _ => {}
        }

        let key = key as u64;
        // Bounded by max_key
        let page = (key >> self.page_bits) as usize;
        let offset = key & (self.page_size() - 1);

        if page >= self.page_starts.len() {
            // Skipped pages and the new page all start at the current end
            let start = self.values.len();
            let skipped = page - self.page_starts.len();
            self.page_starts.resize(page + 1, start);
            if skipped > 0 {
                trace!(page, skipped, "sparse array skipped empty pages");
            }
        }

        let slot = self.page_starts[page] + offset;
        self.values.pad_to(slot)?;
        self.values.append(encode_slot(value))?;
        self.last_key = Some(key as i64);
        self.entries += 1;
        Ok(())
    }

    #[inline]
    fn get(&self, key: i64) -> i64 {
        if key < 0 {
            return MISSING_VALUE;
        }
        let key = key as u64;
        let page = key >> self.page_bits;
        if page >= self.page_starts.len() as u64 {
            return MISSING_VALUE;
        }
        let (start, end) = self.page_range(page as usize);
        let slot = start + (key & (self.page_size() - 1));
        if slot >= end {
            return MISSING_VALUE;
        }
        self.values.get(slot).map_or(MISSING_VALUE, decode_slot)
    }

    fn len(&self) -> u64 {
        self.entries
    }

    fn estimate_memory_usage_bytes(&self) -> u64 {
        (self.page_starts.capacity() * std::mem::size_of::<u64>()) as u64
            + self.values.estimate_memory_usage_bytes()
    }

    fn disk_usage_bytes(&self) -> u64 {
        self.values.disk_usage_bytes()
    }

    fn close(&mut self) -> Result<()> {
        self.values.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaps_do_not_materialize_pages() {
        let mut array = SparseArray::in_memory(4).unwrap();
        array.put(1, 10).unwrap();
        array.put(5, 50).unwrap();
        // 16-key pages: jump over ~6000 pages
        array.put(100_000, 7).unwrap();

        assert_eq!(array.materialized_pages(), 2);
        // Page 0 holds slots 0..=5, the far page holds offset 0 only
        assert_eq!(array.values.len(), 6 + 1);

        assert_eq!(array.get(0), MISSING_VALUE);
        assert_eq!(array.get(1), 10);
        assert_eq!(array.get(3), MISSING_VALUE);
        assert_eq!(array.get(5), 50);
        assert_eq!(array.get(6), MISSING_VALUE);
        assert_eq!(array.get(50_000), MISSING_VALUE);
        assert_eq!(array.get(100_000), 7);
        assert_eq!(array.get(100_001), MISSING_VALUE);
    }

    #[test]
    fn test_sentinel_rejected_as_value() {
        let mut array = SparseArray::in_memory(10).unwrap();
        assert!(matches!(
            array.put(1, MISSING_VALUE),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(array.is_empty());
    }

    #[test]
    fn test_negative_and_unsorted_keys() {
        let mut array = SparseArray::in_memory(10).unwrap();
        assert!(array.put(-5, 1).is_err());
        array.put(100, 1).unwrap();
        array.put(100, 2).unwrap();
        assert!(matches!(
            array.put(99, 3),
            Err(StorageError::UnsortedKey { key: 99, last: 100 })
        ));
        assert_eq!(array.get(100), 1);
        assert_eq!(array.get(99), MISSING_VALUE);
        assert_eq!(array.get(-5), MISSING_VALUE);
        assert_eq!(array.len(), 1);
    }

    #[test]
    fn test_zero_and_extreme_values() {
        let mut array = SparseArray::in_memory(10).unwrap();
        array.put(0, 0).unwrap();
        array.put(1, i64::MAX).unwrap();
        array.put(2, i64::MIN + 1).unwrap();
        array.put(3, -1).unwrap();
        assert_eq!(array.multi_get(&[0, 1, 2, 3, 4]), vec![0, i64::MAX, i64::MIN + 1, -1, MISSING_VALUE]);
    }

    #[test]
    fn test_huge_key_rejected_without_growing_index() {
        let mut array = SparseArray::in_memory(10).unwrap();
        array.put(3, 30).unwrap();

        assert!(matches!(array.put(1 << 50, 1), Err(StorageError::InvalidArgument(_))));
        assert!(array.put(SparseArray::MAX_KEY + 1, 1).is_err());
        assert_eq!(array.page_starts.len(), 1);
        assert_eq!(array.get(1 << 50), MISSING_VALUE);
        assert_eq!(array.get(3), 30);
        assert_eq!(array.len(), 1);

        array.put(4, 40).unwrap();
        assert_eq!(array.get(4), 40);
    }

    #[test]
    fn test_small_pages_lower_max_key() {
        let mut array = SparseArray::in_memory(4).unwrap();
        assert_eq!(array.max_key(), (1 << 30) - 1);
        assert!(array.put(1 << 30, 1).is_err());
        assert!(array.page_starts.is_empty());
    }

    #[test]
    fn test_rejects_bad_page_bits() {
        assert!(SparseArray::in_memory(0).is_err());
        assert!(SparseArray::in_memory(33).is_err());
    }
}
