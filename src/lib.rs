//! Long-to-long map storage engine
//!
//! Resolves planet-scale node IDs to packed 64-bit values (coordinates,
//! offsets) during bulk processing of geographic data.
//!
//! ## Architecture
//! - Storage layer: append-only fixed-width stores in RAM or mmap files
//!   (`storage`), plus a packed encoding for sorted keys (`SmallLongs`)
//! - Map layer: `SortedTable`, `SparseArray` and `Direct`, behind the
//!   `LongLongMap` façade (`map`)
//!
//! ## Contract
//! - one writer, keys in non-decreasing order
//! - many readers once writing is done
//! - unknown keys read as [`MISSING_VALUE`] (`i64::MIN`)

pub mod config;
pub mod map;
pub mod storage;

mod error;

pub use config::{MapConfig, MapKind, MmapConfig, StorageKind};
pub use error::{Result, StorageError};
pub use map::{
    estimate_usage, Direct, LongLongMap, LongMap, MapVariant, SortedTable, SparseArray,
    UsageEstimate, MAX_PAGED_KEY, MISSING_VALUE,
};
pub use storage::{AppendStore, MmapStore, RamStore, SmallLongs};
