//! Append-only fixed-width integer stores
//!
//! An [`AppendStore`] is a growable sequence of slots addressed by index.
//! Slots hold one fixed-width [`Lane`] (i8, i32 or i64) and are exposed as
//! `i64`. Indices are handed out in append order starting at 0, and a slot
//! never changes once written.
//!
//! Two backends implement the same contract:
//! - [`RamStore`](super::ram::RamStore): growable in-memory buffer
//! - [`MmapStore`](super::mmap::MmapStore): segments of a memory-mapped file

use crate::{Result, StorageError};

/// Fixed-width integer lane stored in an [`AppendStore`].
pub trait Lane: Copy + Send + Sync + 'static {
    /// Encoded width in bytes
    const WIDTH: usize;

    /// Human readable name, used in encoding errors
    const NAME: &'static str;

    /// Narrow `value` into this lane, failing instead of truncating.
    fn encode(value: i64) -> Result<Self>;

    /// Widen back to `i64`.
    fn decode(self) -> i64;

    /// Write little-endian bytes into `out` (exactly `WIDTH` bytes).
    fn write_le(self, out: &mut [u8]);

    /// Read from little-endian bytes (exactly `WIDTH` bytes).
    fn read_le(bytes: &[u8]) -> Self;

    /// The all-zero slot, which is what unwritten storage reads back as.
    fn zero() -> Self;
}

macro_rules! impl_lane {
    ($ty:ty, $name:expr) => {
        impl Lane for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            const NAME: &'static str = $name;

            #[inline]
            fn encode(value: i64) -> Result<Self> {
                <$ty>::try_from(value).map_err(|_| StorageError::Encoding {
                    value,
                    lane: Self::NAME,
                })
            }

            #[inline]
            fn decode(self) -> i64 {
                self as i64
            }

            #[inline]
            fn write_le(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(bytes);
                <$ty>::from_le_bytes(buf)
            }

            #[inline]
            fn zero() -> Self {
                0
            }
        }
    };
}

impl_lane!(i8, "8-bit lane");
impl_lane!(i32, "32-bit lane");
impl_lane!(i64, "64-bit lane");

/// Append-only sequence of fixed-width slots.
///
/// Writers need `&mut self`; readers only `&self`, and every store is
/// `Send + Sync`, so a fully written store can be read from many threads.
pub trait AppendStore: Send + Sync {
    /// Append `value` as the next slot and return its index.
    fn append(&mut self, value: i64) -> Result<u64>;

    /// Read the slot at `index`.
    ///
    /// Returns [`StorageError::OutOfBounds`] when `index >= len()`.
    fn get(&self, index: u64) -> Result<i64>;

    /// Number of slots appended so far (including padding).
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extend the store to `len` slots. New slots read as zero.
    ///
    /// Disk-backed stores leave the new range as a file hole; nothing is
    /// written until a later `append` lands in it. No-op if the store is
    /// already at least `len` long.
    fn pad_to(&mut self, len: u64) -> Result<()>;

    /// Approximate heap bytes held by this store.
    fn estimate_memory_usage_bytes(&self) -> u64;

    /// Bytes reserved on disk (0 for in-memory stores).
    fn disk_usage_bytes(&self) -> u64 {
        0
    }

    /// Release owned resources. Safe to call more than once.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: AppendStore + ?Sized> AppendStore for Box<S> {
    fn append(&mut self, value: i64) -> Result<u64> {
        (**self).append(value)
    }

    fn get(&self, index: u64) -> Result<i64> {
        (**self).get(index)
    }

    fn len(&self) -> u64 {
        (**self).len()
    }

    fn pad_to(&mut self, len: u64) -> Result<()> {
        (**self).pad_to(len)
    }

    fn estimate_memory_usage_bytes(&self) -> u64 {
        (**self).estimate_memory_usage_bytes()
    }

    fn disk_usage_bytes(&self) -> u64 {
        (**self).disk_usage_bytes()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_encode_in_range() {
        assert_eq!(i8::encode(-128).unwrap(), -128);
        assert_eq!(i8::encode(127).unwrap(), 127);
        assert_eq!(i32::encode(i32::MAX as i64).unwrap(), i32::MAX);
        assert_eq!(i64::encode(i64::MIN).unwrap(), i64::MIN);
    }

    #[test]
    fn test_lane_encode_overflow() {
        let err = i8::encode(128).unwrap_err();
        assert!(matches!(err, StorageError::Encoding { value: 128, lane: "8-bit lane" }));

        let err = i32::encode(i32::MIN as i64 - 1).unwrap_err();
        assert!(matches!(err, StorageError::Encoding { lane: "32-bit lane", .. }));
    }

    #[test]
    fn test_lane_bytes() {
        let mut buf = [0u8; 4];
        (-2i32).write_le(&mut buf);
        assert_eq!(buf, [0xfe, 0xff, 0xff, 0xff]);
        assert_eq!(i32::read_le(&buf), -2);
        assert_eq!(i64::read_le(&[0u8; 8]).decode(), i64::zero().decode());
    }
}
