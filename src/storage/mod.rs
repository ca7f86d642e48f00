//! Storage layer implementation
//!
//! Append-only fixed-width integer stores, in RAM or memory-mapped files,
//! plus the packed encoding used for sorted key columns.

pub mod append;
pub mod mmap;
pub mod ram;
pub mod small_longs;

pub use append::{AppendStore, Lane};
pub use mmap::{MmapBytes, MmapInts, MmapLongs, MmapStore};
pub use ram::{RamBytes, RamInts, RamLongs, RamStore};
pub use small_longs::{SegmentFactory, SmallLongs};
