//! Long-to-long maps for sequentially written keys
//!
//! All variants share one contract ([`LongMap`]):
//! - a single writer calls `put` with non-decreasing keys
//! - afterwards any number of readers call `get` / `multi_get`
//! - unknown keys read as [`MISSING_VALUE`]
//!
//! | variant        | lookup            | footprint                         |
//! |----------------|-------------------|-----------------------------------|
//! | `SortedTable`  | binary search     | ~12 B per entry                   |
//! | `SparseArray`  | O(1) page + slot  | ~8 B per key in touched pages     |
//! | `Direct`       | O(1) slot         | sparse file of 8 B per key        |
//!
//! [`LongLongMap`] picks one from a [`MapConfig`].

pub mod direct;
pub mod sorted_table;
pub mod sparse_array;

pub use direct::Direct;
pub use sorted_table::SortedTable;
pub use sparse_array::SparseArray;

use crate::config::{MapConfig, MapKind, StorageKind};
use crate::{Result, StorageError};
use rayon::prelude::*;
use std::time::Instant;
use tracing::{debug, info};

/// Value returned for keys that were never written.
///
/// Reserved: `put` rejects it as a value.
pub const MISSING_VALUE: i64 = i64::MIN;

/// Largest key accepted by the paged variants ([`SparseArray`], [`Direct`]).
///
/// 2^36 keys cover every OSM node id with room to spare and bound a direct
/// value file to 512 GiB of address space.
pub const MAX_PAGED_KEY: i64 = (1 << 36) - 1;

/// Most pages a paged variant indexes, whatever its page size
const MAX_PAGES: u64 = 1 << 26;

/// Largest key a paged variant with `2^page_bits` keys per page accepts.
pub(crate) fn paged_key_limit(page_bits: u32) -> i64 {
    let by_pages = (MAX_PAGES << page_bits) - 1;
    MAX_PAGED_KEY.min(by_pages as i64)
}

/// Reject keys a paged variant cannot index without unbounded allocation.
#[inline]
pub(crate) fn check_paged_key(key: i64, max_key: i64, variant: &str) -> Result<()> {
    if !(0..=max_key).contains(&key) {
        return Err(StorageError::InvalidArgument(format!(
            "{} keys must be in 0..={}, got {}",
            variant, max_key, key
        )));
    }
    Ok(())
}

/// Write-once, read-many map from `i64` keys to `i64` values.
pub trait LongMap: Send + Sync {
    /// Store `value` for `key`.
    ///
    /// Keys must be non-decreasing across calls. Repeating the previous key
    /// is ignored (the first value wins); a smaller key fails with
    /// [`StorageError::UnsortedKey`].
    fn put(&mut self, key: i64, value: i64) -> Result<()>;

    /// Value for `key`, or [`MISSING_VALUE`].
    fn get(&self, key: i64) -> i64;

    /// Values for `keys`, co-indexed with the input.
    fn multi_get(&self, keys: &[i64]) -> Vec<i64> {
        keys.iter().map(|&key| self.get(key)).collect()
    }

    /// Number of keys stored
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn estimate_memory_usage_bytes(&self) -> u64;

    fn disk_usage_bytes(&self) -> u64;

    /// Release all stores. Safe to call more than once.
    fn close(&mut self) -> Result<()>;
}

#[inline]
pub(crate) fn check_value(value: i64) -> Result<()> {
    if value == MISSING_VALUE {
        return Err(StorageError::InvalidArgument(format!(
            "{} is reserved for missing values",
            MISSING_VALUE
        )));
    }
    Ok(())
}

/// Slot encoding for padded stores: a zeroed slot decodes to MISSING_VALUE.
#[inline]
pub(crate) fn encode_slot(value: i64) -> i64 {
    value ^ MISSING_VALUE
}

#[inline]
pub(crate) fn decode_slot(slot: i64) -> i64 {
    slot ^ MISSING_VALUE
}

/// The map variant owned by a [`LongLongMap`]
pub enum MapVariant {
    SortedTable(SortedTable),
    SparseArray(SparseArray),
    Direct(Direct),
}

impl MapVariant {
    #[inline]
    fn as_map(&self) -> &dyn LongMap {
        match self {
            Self::SortedTable(m) => m,
            Self::SparseArray(m) => m,
            Self::Direct(m) => m,
        }
    }

    #[inline]
    fn as_map_mut(&mut self) -> &mut dyn LongMap {
        match self {
            Self::SortedTable(m) => m,
            Self::SparseArray(m) => m,
            Self::Direct(m) => m,
        }
    }
}

/// Map façade selected by [`MapConfig`].
///
/// ```no_run
/// use longlongmap::{LongLongMap, LongMap, MapConfig, MapKind, MISSING_VALUE};
///
/// let mut map = LongLongMap::new(&MapConfig::new(MapKind::SparseArray))?;
/// map.put(1, 3)?;
/// map.put(2, 4)?;
/// assert_eq!(map.multi_get(&[1, 2, 3]), vec![3, 4, MISSING_VALUE]);
/// map.close()?;
/// # Ok::<(), longlongmap::StorageError>(())
/// ```
pub struct LongLongMap {
    variant: MapVariant,
    kind: MapKind,
    parallel_threshold: usize,
}

impl LongLongMap {
    pub fn new(config: &MapConfig) -> Result<Self> {
        config.validate()?;
        let variant = match (config.kind, config.storage) {
            (MapKind::SortedTable, StorageKind::Ram) => {
                MapVariant::SortedTable(SortedTable::in_memory())
            }
            (MapKind::SortedTable, StorageKind::Mmap) => {
                MapVariant::SortedTable(SortedTable::mmap(config.dir()?, &config.mmap)?)
            }
            (MapKind::SparseArray, StorageKind::Ram) => {
                MapVariant::SparseArray(SparseArray::in_memory(config.page_bits)?)
            }
            (MapKind::SparseArray, StorageKind::Mmap) => {
                MapVariant::SparseArray(SparseArray::mmap(
                    config.dir()?,
                    config.page_bits,
                    &config.mmap,
                )?)
            }
            (MapKind::Direct, _) => {
                let path = config.dir()?.join("direct-values.bin");
                MapVariant::Direct(Direct::create(path, config.page_bits, &config.mmap)?)
            }
        };

        debug!(kind = %config.kind, storage = %config.storage, "created long long map");
        Ok(Self::from_variant(variant, config.parallel_threshold))
    }

    /// Wrap an already built variant.
    pub fn from_variant(variant: MapVariant, parallel_threshold: usize) -> Self {
        let kind = match &variant {
            MapVariant::SortedTable(_) => MapKind::SortedTable,
            MapVariant::SparseArray(_) => MapKind::SparseArray,
            MapVariant::Direct(_) => MapKind::Direct,
        };
        Self {
            variant,
            kind,
            parallel_threshold: parallel_threshold.max(1),
        }
    }

    pub fn kind(&self) -> MapKind {
        self.kind
    }

    /// Release every store, logging the final footprint.
    pub fn close(mut self) -> Result<()> {
        let started = Instant::now();
        let entries = self.len();
        let memory = self.estimate_memory_usage_bytes();
        let disk = self.disk_usage_bytes();
        LongMap::close(&mut self)?;
        info!(
            kind = %self.kind,
            entries,
            memory_bytes = memory,
            disk_bytes = disk,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "closed long long map"
        );
        Ok(())
    }
}

impl LongMap for LongLongMap {
    #[inline]
    fn put(&mut self, key: i64, value: i64) -> Result<()> {
        self.variant.as_map_mut().put(key, value)
    }

    #[inline]
    fn get(&self, key: i64) -> i64 {
        self.variant.as_map().get(key)
    }

    /// Large batches are split into chunks looked up in parallel; lookups
    /// are independent, so the result is the same as a sequential pass.
    fn multi_get(&self, keys: &[i64]) -> Vec<i64> {
        let map = self.variant.as_map();
        if keys.len() < self.parallel_threshold {
            return map.multi_get(keys);
        }
        let threads = rayon::current_num_threads().max(1);
        let chunk = ((keys.len() + threads - 1) / threads).max(1024);
        keys.par_chunks(chunk)
            .map(|part| map.multi_get(part))
            .collect::<Vec<_>>()
            .concat()
    }

    fn len(&self) -> u64 {
        self.variant.as_map().len()
    }

    fn estimate_memory_usage_bytes(&self) -> u64 {
        self.variant.as_map().estimate_memory_usage_bytes()
    }

    fn disk_usage_bytes(&self) -> u64 {
        self.variant.as_map().disk_usage_bytes()
    }

    fn close(&mut self) -> Result<()> {
        self.variant.as_map_mut().close()
    }
}

/// Expected footprint of a map before building it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageEstimate {
    pub memory_bytes: u64,
    pub disk_bytes: u64,
}

/// Estimate memory and disk needed for `entries` keys no larger than
/// `max_key`, assuming the keys are spread evenly.
pub fn estimate_usage(config: &MapConfig, entries: u64, max_key: u64) -> UsageEstimate {
    let page_size = 1u64 << config.page_bits;
    let pages = (max_key / page_size).saturating_add(1);
    let on_disk = config.storage == StorageKind::Mmap;

    match config.kind {
        MapKind::SortedTable => {
            let bytes = entries.saturating_mul(4 + 8);
            if on_disk {
                UsageEstimate {
                    memory_bytes: 0,
                    disk_bytes: bytes,
                }
            } else {
                UsageEstimate {
                    memory_bytes: bytes,
                    disk_bytes: 0,
                }
            }
        }
        MapKind::SparseArray => {
            // A touched page is materialized up to its last key
            let touched = pages.min(entries);
            let slots = touched
                .saturating_mul(page_size)
                .min(max_key.saturating_add(1))
                .max(entries);
            let index = pages.saturating_mul(8);
            if on_disk {
                UsageEstimate {
                    memory_bytes: index,
                    disk_bytes: slots.saturating_mul(8),
                }
            } else {
                UsageEstimate {
                    memory_bytes: index.saturating_add(slots.saturating_mul(8)),
                    disk_bytes: 0,
                }
            }
        }
        MapKind::Direct => UsageEstimate {
            memory_bytes: pages.div_ceil(64).saturating_mul(8),
            disk_bytes: max_key.saturating_add(1).saturating_mul(8),
        },
    }
}
