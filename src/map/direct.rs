//! Direct map: one sparse file addressed by key
//!
//! Slot `k` of the value file holds the value for key `k`. Skipped key
//! ranges are extended with `pad_to`, which never writes, so they stay
//! holes in the file and cost no disk blocks. A page bitmap remembers which
//! `2^page_bits` key windows were written, so a lookup in an untouched
//! window returns without reading the mapping.

use super::{
    check_paged_key, check_value, decode_slot, encode_slot, paged_key_limit, LongMap,
    MAX_PAGED_KEY, MISSING_VALUE,
};
use crate::config::MmapConfig;
use crate::storage::{AppendStore, MmapLongs};
use crate::{Result, StorageError};
use std::path::Path;
use tracing::debug;

pub struct Direct {
    values: MmapLongs,

    /// One bit per page, set once any key in the page is written
    present_pages: Vec<u64>,

    page_bits: u32,
    max_key: i64,
    last_key: Option<i64>,
    entries: u64,
}

impl Direct {
    /// Largest key any direct map accepts; small pages lower it further,
    /// see [`Direct::max_key`].
    pub const MAX_KEY: i64 = MAX_PAGED_KEY;

    /// Create the backing file at `path` (its directory must exist).
    pub fn create(path: impl AsRef<Path>, page_bits: u32, config: &MmapConfig) -> Result<Self> {
        if !(1..=32).contains(&page_bits) {
            return Err(StorageError::InvalidArgument(format!(
                "page_bits must be in 1..=32, got {}",
                page_bits
            )));
        }
        let values = MmapLongs::create(path.as_ref(), config.clone())?;
        debug!(path = %path.as_ref().display(), page_bits, "created direct map");
        Ok(Self {
            values,
            present_pages: Vec::new(),
            page_bits,
            max_key: paged_key_limit(page_bits),
            last_key: None,
            entries: 0,
        })
    }

    pub fn path(&self) -> &Path {
        self.values.path()
    }

    /// Largest key this map accepts
    pub fn max_key(&self) -> i64 {
        self.max_key
    }

    #[inline]
    fn page_present(&self, page: u64) -> bool {
        let word = (page >> 6) as usize;
        self.present_pages
            .get(word)
            .is_some_and(|bits| bits & (1 << (page & 63)) != 0)
    }

    fn mark_page(&mut self, page: u64) {
        let word = (page >> 6) as usize;
        if word >= self.present_pages.len() {
            self.present_pages.resize(word + 1, 0);
        }
        self.present_pages[word] |= 1 << (page & 63);
    }

    pub fn materialized_pages(&self) -> usize {
        self.present_pages
            .iter()
            .map(|bits| bits.count_ones() as usize)
            .sum()
    }
}

impl LongMap for Direct {
    fn put(&mut self, key: i64, value: i64) -> Result<()> {
        check_value(value)?;
        check_paged_key(key, self.max_key, "direct map")?;
        match self.last_key {
            Some(last) if key == last => return Ok(()),
            Some(last) if key < last => return Err(StorageError::UnsortedKey { key, last }),
            _ => {}
        }

        let slot = key as u64;
        self.values.pad_to(slot)?;
        self.values.append(encode_slot(value))?;
        self.mark_page(slot >> self.page_bits);
        self.last_key = Some(key);
        self.entries += 1;
        Ok(())
    }

    #[inline]
    fn get(&self, key: i64) -> i64 {
        if key < 0 {
            return MISSING_VALUE;
        }
        let slot = key as u64;
        if !self.page_present(slot >> self.page_bits) || slot >= self.values.len() {
            return MISSING_VALUE;
        }
        self.values.get(slot).map_or(MISSING_VALUE, decode_slot)
    }

    fn len(&self) -> u64 {
        self.entries
    }

    fn estimate_memory_usage_bytes(&self) -> u64 {
        (self.present_pages.capacity() * std::mem::size_of::<u64>()) as u64
            + self.values.estimate_memory_usage_bytes()
    }

    fn disk_usage_bytes(&self) -> u64 {
        self.values.disk_usage_bytes()
    }

    fn close(&mut self) -> Result<()> {
        self.values.close()
    }
}
