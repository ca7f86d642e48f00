//! Sorted table: parallel key and value columns with binary search
//!
//! Keys are packed into [`SmallLongs`] (~4 bytes per key) and values into a
//! 64-bit store, index for index. Since keys arrive in ascending order the
//! key column is already sorted and lookups are a plain binary search.

use super::{check_value, LongMap, MISSING_VALUE};
use crate::config::MmapConfig;
use crate::storage::small_longs::MAX_SEGMENTS;
use crate::storage::{AppendStore, MmapInts, MmapLongs, RamInts, RamLongs, SmallLongs};
use crate::{Result, StorageError};
use std::path::Path;
use tracing::debug;

pub struct SortedTable {
    keys: SmallLongs,
    values: Box<dyn AppendStore>,
    last_key: Option<i64>,
}

impl SortedTable {
    /// Largest key the packed key column can hold
    pub const MAX_KEY: i64 = ((MAX_SEGMENTS as i64) << 31) - 1;

    pub fn new(keys: SmallLongs, values: Box<dyn AppendStore>) -> Self {
        Self {
            keys,
            values,
            last_key: None,
        }
    }

    pub fn in_memory() -> Self {
        let keys = SmallLongs::new(Box::new(|_: usize| -> Result<Box<dyn AppendStore>> {
            Ok(Box::new(RamInts::new()))
        }));
        Self::new(keys, Box::new(RamLongs::new()))
    }

    /// Keys and values in mmap files under `dir`.
    pub fn mmap(dir: &Path, config: &MmapConfig) -> Result<Self> {
        let key_dir = dir.to_path_buf();
        let key_config = config.clone();
        let keys = SmallLongs::new(Box::new(move |segment: usize| -> Result<Box<dyn AppendStore>> {
            let path = key_dir.join(format!("sorted-table-keys-{}.bin", segment));
            Ok(Box::new(MmapInts::create(path, key_config.clone())?))
        }));
        let values = MmapLongs::create(dir.join("sorted-table-values.bin"), config.clone())?;

        debug!(dir = %dir.display(), "created mmap sorted table");
        Ok(Self::new(keys, Box::new(values)))
    }

    #[inline]
    fn key_at(&self, index: u64) -> i64 {
        // Callers only pass index < len
        self.keys.get(index).unwrap_or(MISSING_VALUE)
    }

    /// First index in `[lo, len)` whose key is >= `key`.
    #[inline]
    fn lower_bound(&self, key: i64, mut lo: u64) -> u64 {
        let mut hi = self.keys.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key_at(mid) < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    #[inline]
    fn value_at_match(&self, key: i64, index: u64) -> i64 {
        if index < self.keys.len() && self.key_at(index) == key {
            self.values.get(index).unwrap_or(MISSING_VALUE)
        } else {
            MISSING_VALUE
        }
    }
}

impl LongMap for SortedTable {
    fn put(&mut self, key: i64, value: i64) -> Result<()> {
        check_value(value)?;
        match self.last_key {
            Some(last) if key == last => return Ok(()),
            Some(last) if key < last => return Err(StorageError::UnsortedKey { key, last }),
            _ => {}
        }
        // Validate before touching either column so they stay aligned
        if !(0..=Self::MAX_KEY).contains(&key) {
            return Err(StorageError::InvalidArgument(format!(
                "sorted table keys must be in 0..={}, got {}",
                Self::MAX_KEY,
                key
            )));
        }

        // A failed value append leaves an orphan key behind; refuse to write
        // past it or every later key would pair with its neighbour's value.
        if self.keys.len() != self.values.len() {
            return Err(StorageError::Corruption(format!(
                "sorted table columns out of sync: {} keys, {} values",
                self.keys.len(),
                self.values.len()
            )));
        }

        self.keys.append(key)?;
        self.values.append(value)?;
        self.last_key = Some(key);
        Ok(())
    }

    fn get(&self, key: i64) -> i64 {
        if key < 0 {
            return MISSING_VALUE;
        }
        let index = self.lower_bound(key, 0);
        self.value_at_match(key, index)
    }

    /// One binary search per key. While the batch is ascending each search
    /// starts at the previous hit instead of at 0.
    fn multi_get(&self, keys: &[i64]) -> Vec<i64> {
        let mut result = Vec::with_capacity(keys.len());
        let mut prev: Option<(i64, u64)> = None;
        for &key in keys {
            if key < 0 {
                result.push(MISSING_VALUE);
                continue;
            }
            let start = match prev {
                Some((prev_key, prev_index)) if key >= prev_key => prev_index,
                _ => 0,
            };
            let index = self.lower_bound(key, start);
            result.push(self.value_at_match(key, index));
            prev = Some((key, index));
        }
        result
    }

    /// Complete key/value pairs
    fn len(&self) -> u64 {
        self.keys.len().min(self.values.len())
    }

    fn estimate_memory_usage_bytes(&self) -> u64 {
        self.keys.estimate_memory_usage_bytes() + self.values.estimate_memory_usage_bytes()
    }

    fn disk_usage_bytes(&self) -> u64 {
        self.keys.disk_usage_bytes() + self.values.disk_usage_bytes()
    }

    fn close(&mut self) -> Result<()> {
        let keys = self.keys.close();
        let values = self.values.close();
        keys.and(values)
    }
}
