//! Map configuration
//!
//! Picks the map variant and storage medium, and tunes the paging and mmap
//! segment sizes. Everything here is serde-serializable so a run can load
//! its node map settings from a JSON file.

use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which map variant to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MapKind {
    /// Keys and values in two parallel sequences, binary search on read.
    ///
    /// Smallest footprint for sparse key sets (~12 bytes per entry).
    SortedTable,

    /// Values paged by key; absent pages are never materialized.
    ///
    /// Fastest lookups for dense key ranges (~8 bytes per key in a
    /// touched page).
    SparseArray,

    /// Values in one sparse file addressed directly by key.
    ///
    /// For key spaces too large for RAM; relies on file holes.
    Direct,
}

impl MapKind {
    pub const ALL: [MapKind; 3] = [MapKind::SortedTable, MapKind::SparseArray, MapKind::Direct];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SortedTable => "sorted-table",
            Self::SparseArray => "sparse-array",
            Self::Direct => "direct",
        }
    }

    /// Whether this variant needs a backing file regardless of storage.
    pub fn requires_path(&self) -> bool {
        matches!(self, Self::Direct)
    }
}

impl fmt::Display for MapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MapKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "sorted-table" | "sortedtable" => Ok(Self::SortedTable),
            "sparse-array" | "sparsearray" => Ok(Self::SparseArray),
            "direct" => Ok(Self::Direct),
            other => Err(StorageError::InvalidConfig(format!(
                "unknown map kind '{}', expected one of: sorted-table, sparse-array, direct",
                other
            ))),
        }
    }
}

/// Where the stores of a map keep their slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
    /// Growable in-memory buffers
    #[default]
    Ram,

    /// Memory-mapped files under `MapConfig::path`
    Mmap,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ram => "ram",
            Self::Mmap => "mmap",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ram" | "memory" => Ok(Self::Ram),
            "mmap" | "disk" => Ok(Self::Mmap),
            other => Err(StorageError::InvalidConfig(format!(
                "unknown storage '{}', expected ram or mmap",
                other
            ))),
        }
    }
}

/// Settings for memory-mapped stores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmapConfig {
    /// log2 of the bytes per mapped segment (default 27 = 128MB)
    pub segment_bits: u32,

    /// Delete the backing file when the store is released
    pub delete_on_close: bool,

    /// `msync` mapped segments and `fsync` the file on close
    pub sync_on_close: bool,

    /// Advise the kernel that reads are random (unix only)
    pub madvise_random: bool,
}

impl MmapConfig {
    /// 64KB, the largest allocation granularity among supported platforms
    pub const MIN_SEGMENT_BITS: u32 = 16;
    pub const MAX_SEGMENT_BITS: u32 = 40;

    pub fn with_segment_bits(mut self, bits: u32) -> Self {
        self.segment_bits = bits;
        self
    }

    pub fn with_delete_on_close(mut self, delete: bool) -> Self {
        self.delete_on_close = delete;
        self
    }

    pub fn with_sync_on_close(mut self, sync: bool) -> Self {
        self.sync_on_close = sync;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(Self::MIN_SEGMENT_BITS..=Self::MAX_SEGMENT_BITS).contains(&self.segment_bits) {
            return Err(StorageError::InvalidConfig(format!(
                "segment_bits must be in {}..={}, got {}",
                Self::MIN_SEGMENT_BITS,
                Self::MAX_SEGMENT_BITS,
                self.segment_bits
            )));
        }
        if usize::BITS <= self.segment_bits {
            return Err(StorageError::InvalidConfig(format!(
                "segment_bits {} too large for this platform",
                self.segment_bits
            )));
        }
        Ok(())
    }
}

impl Default for MmapConfig {
    fn default() -> Self {
        Self {
            segment_bits: 27,
            delete_on_close: true,
            sync_on_close: false,
            madvise_random: true,
        }
    }
}

/// Configuration for a [`LongLongMap`](crate::LongLongMap)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    pub kind: MapKind,

    /// Storage for SortedTable and SparseArray (Direct is always mmap)
    #[serde(default)]
    pub storage: StorageKind,

    /// Directory for backing files (required for mmap storage and Direct)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// log2 of keys per page for SparseArray and Direct (default 10)
    pub page_bits: u32,

    /// Batches at least this large are looked up in parallel
    pub parallel_threshold: usize,

    #[serde(default)]
    pub mmap: MmapConfig,
}

impl MapConfig {
    pub const MIN_PAGE_BITS: u32 = 4;
    pub const MAX_PAGE_BITS: u32 = 24;

    pub fn new(kind: MapKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    /// Small mmap segments and sequential lookups
    pub fn for_testing(kind: MapKind, path: impl Into<PathBuf>) -> Self {
        Self::new(kind)
            .with_path(path)
            .with_parallel_threshold(usize::MAX)
            .with_mmap(MmapConfig::default().with_segment_bits(MmapConfig::MIN_SEGMENT_BITS))
    }

    /// Planet-scale node map: sparse array spilled to disk
    pub fn for_planet(path: impl Into<PathBuf>) -> Self {
        Self::new(MapKind::SparseArray)
            .with_storage(StorageKind::Mmap)
            .with_path(path)
            .with_mmap(MmapConfig::default().with_segment_bits(30))
    }

    pub fn with_storage(mut self, storage: StorageKind) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_page_bits(mut self, bits: u32) -> Self {
        self.page_bits = bits;
        self
    }

    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    pub fn with_mmap(mut self, mmap: MmapConfig) -> Self {
        self.mmap = mmap;
        self
    }

    /// Whether the configured map keeps any slots on disk
    pub fn uses_disk(&self) -> bool {
        self.kind.requires_path() || self.storage == StorageKind::Mmap
    }

    pub fn validate(&self) -> Result<()> {
        if !(Self::MIN_PAGE_BITS..=Self::MAX_PAGE_BITS).contains(&self.page_bits) {
            return Err(StorageError::InvalidConfig(format!(
                "page_bits must be in {}..={}, got {}",
                Self::MIN_PAGE_BITS,
                Self::MAX_PAGE_BITS,
                self.page_bits
            )));
        }
        if self.parallel_threshold == 0 {
            return Err(StorageError::InvalidConfig(
                "parallel_threshold must be at least 1".into(),
            ));
        }
        if self.uses_disk() {
            match &self.path {
                None => {
                    return Err(StorageError::InvalidConfig(format!(
                        "{} with {} storage needs a path",
                        self.kind, self.storage
                    )))
                }
                Some(dir) if !dir.is_dir() => {
                    return Err(StorageError::InvalidConfig(format!(
                        "path is not a directory: {}",
                        dir.display()
                    )))
                }
                Some(_) => {}
            }
            self.mmap.validate()?;
        }
        Ok(())
    }

    /// Directory for backing files.
    pub(crate) fn dir(&self) -> Result<&Path> {
        self.path
            .as_deref()
            .ok_or_else(|| StorageError::InvalidConfig(format!("{} needs a path", self.kind)))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            kind: MapKind::SparseArray,
            storage: StorageKind::Ram,
            path: None,
            page_bits: 10,
            parallel_threshold: 1 << 14,
            mmap: MmapConfig::default(),
        }
    }
}
