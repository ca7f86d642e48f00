//! In-memory append store backed by a growable `Vec`

use super::append::{AppendStore, Lane};
use crate::{Result, StorageError};

/// Growable in-memory store. Capacity doubles as slots are appended.
pub struct RamStore<L: Lane> {
    data: Vec<L>,
}

/// 8-bit in-memory store
pub type RamBytes = RamStore<i8>;
/// 32-bit in-memory store
pub type RamInts = RamStore<i32>;
/// 64-bit in-memory store
pub type RamLongs = RamStore<i64>;

impl<L: Lane> RamStore<L> {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }
}

impl<L: Lane> Default for RamStore<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Lane> AppendStore for RamStore<L> {
    fn append(&mut self, value: i64) -> Result<u64> {
        let lane = L::encode(value)?;
        let index = self.data.len() as u64;
        self.data.push(lane);
        Ok(index)
    }

    #[inline]
    fn get(&self, index: u64) -> Result<i64> {
        self.data
            .get(index as usize)
            .map(|lane| lane.decode())
            .ok_or(StorageError::OutOfBounds {
                index,
                len: self.data.len() as u64,
            })
    }

    #[inline]
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn pad_to(&mut self, len: u64) -> Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| StorageError::InvalidArgument(format!("cannot pad to {} slots", len)))?;
        if len > self.data.len() {
            self.data.resize(len, L::zero());
        }
        Ok(())
    }

    fn estimate_memory_usage_bytes(&self) -> u64 {
        (self.data.capacity() * L::WIDTH) as u64
    }
}
