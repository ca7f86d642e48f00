//! Packed storage for non-decreasing 64-bit values
//!
//! Splits each value into a segment number (`value >> 31`) and a 31-bit
//! offset. Offsets go into one 32-bit store per segment, created lazily.
//! Because input is non-decreasing, each segment holds one contiguous run
//! of indices and a value is rebuilt as `segment << 31 | offset`.
//!
//! This halves the footprint of a sorted key column compared to storing
//! full longs.

use super::append::AppendStore;
use crate::{Result, StorageError};

const SEGMENT_BITS: u32 = 31;
const SEGMENT_MASK: i64 = (1 << SEGMENT_BITS) - 1;

/// Highest segment number accepted (values below 2^41)
pub const MAX_SEGMENTS: usize = 1 << 10;

/// Builds the 32-bit store backing one segment.
pub type SegmentFactory = Box<dyn Fn(usize) -> Result<Box<dyn AppendStore>> + Send + Sync>;

struct Segment {
    /// Segment number (value >> 31)
    id: i64,

    /// Global index of the first slot in this segment
    first_index: u64,

    store: Box<dyn AppendStore>,
}

/// [`AppendStore`] of non-negative, non-decreasing longs packed into
/// 32-bit segments.
pub struct SmallLongs {
    factory: SegmentFactory,

    /// Present segments in ascending id order
    segments: Vec<Segment>,

    len: u64,
}

impl SmallLongs {
    pub fn new(factory: SegmentFactory) -> Self {
        Self {
            factory,
            segments: Vec::new(),
            len: 0,
        }
    }

    /// Number of 32-bit stores allocated so far
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn encoding_error(value: i64) -> StorageError {
        StorageError::Encoding {
            value,
            lane: "small longs (0..2^41)",
        }
    }

    /// Segment holding global `index`; segments are few, so a reverse
    /// linear scan beats anything fancier.
    #[inline]
    fn segment_for(&self, index: u64) -> Option<&Segment> {
        self.segments
            .iter()
            .rev()
            .find(|segment| segment.first_index <= index)
    }
}

impl AppendStore for SmallLongs {
    fn append(&mut self, value: i64) -> Result<u64> {
        if value < 0 {
            return Err(Self::encoding_error(value));
        }
        let id = value >> SEGMENT_BITS;
        if id as usize >= MAX_SEGMENTS {
            return Err(Self::encoding_error(value));
        }

        let needs_segment = match self.segments.last() {
            Some(last) if last.id == id => false,
            Some(last) if last.id > id => {
                return Err(StorageError::InvalidArgument(format!(
                    "small longs must be appended in order: {} after segment {}",
                    value, last.id
                )))
            }
            _ => true,
        };
        if needs_segment {
            let store = (self.factory)(id as usize)?;
            self.segments.push(Segment {
                id,
                first_index: self.len,
                store,
            });
        }

        let index = self.len;
        if let Some(segment) = self.segments.last_mut() {
            segment.store.append(value & SEGMENT_MASK)?;
        }
        self.len += 1;
        Ok(index)
    }

    #[inline]
    fn get(&self, index: u64) -> Result<i64> {
        if index >= self.len {
            return Err(StorageError::OutOfBounds {
                index,
                len: self.len,
            });
        }
        let segment = self.segment_for(index).ok_or(StorageError::OutOfBounds {
            index,
            len: self.len,
        })?;
        let offset = segment.store.get(index - segment.first_index)?;
        Ok((segment.id << SEGMENT_BITS) | offset)
    }

    #[inline]
    fn len(&self) -> u64 {
        self.len
    }

    fn pad_to(&mut self, _len: u64) -> Result<()> {
        Err(StorageError::InvalidArgument(
            "small longs cannot be padded, every slot needs a value".into(),
        ))
    }

    fn estimate_memory_usage_bytes(&self) -> u64 {
        self.segments
            .iter()
            .map(|s| s.store.estimate_memory_usage_bytes())
            .sum::<u64>()
            + (self.segments.capacity() * std::mem::size_of::<Segment>()) as u64
    }

    fn disk_usage_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.store.disk_usage_bytes()).sum()
    }

    fn close(&mut self) -> Result<()> {
        let mut result = Ok(());
        for segment in &mut self.segments {
            if let Err(e) = segment.store.close() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ram::RamInts;

    fn ram_small_longs() -> SmallLongs {
        SmallLongs::new(Box::new(|_: usize| -> Result<Box<dyn AppendStore>> {
            Ok(Box::new(RamInts::new()))
        }))
    }

    #[test]
    fn test_single_segment() {
        let mut longs = ram_small_longs();
        for v in [0i64, 1, 1, 5, 1 << 30] {
            longs.append(v).unwrap();
        }
        assert_eq!(longs.len(), 5);
        assert_eq!(longs.segment_count(), 1);
        assert_eq!(longs.get(2).unwrap(), 1);
        assert_eq!(longs.get(4).unwrap(), 1 << 30);
    }

    #[test]
    fn test_values_across_segments() {
        let mut longs = ram_small_longs();
        let values = [
            3i64,
            (1 << 31) - 1,
            1 << 31,
            (1 << 31) + 7,
            // skips segment 2 entirely
            (3 << 31) + 11,
            10_000_000_000,
        ];
        for v in values {
            longs.append(v).unwrap();
        }

        assert_eq!(longs.segment_count(), 4);
        for (i, v) in values.iter().enumerate() {
            assert_eq!(longs.get(i as u64).unwrap(), *v);
        }
        assert!(matches!(longs.get(6), Err(StorageError::OutOfBounds { .. })));
    }

    #[test]
    fn test_out_of_range_values() {
        let mut longs = ram_small_longs();
        assert!(matches!(longs.append(-1), Err(StorageError::Encoding { .. })));
        assert!(matches!(longs.append(1 << 41), Err(StorageError::Encoding { .. })));
        assert!(longs.is_empty());

        longs.append((1 << 41) - 1).unwrap();
        assert_eq!(longs.get(0).unwrap(), (1 << 41) - 1);
    }

    #[test]
    fn test_segment_order_enforced() {
        let mut longs = ram_small_longs();
        longs.append(5 << 31).unwrap();
        assert!(longs.append(1).is_err());
        assert_eq!(longs.len(), 1);
    }

    #[test]
    fn test_factory_sees_segment_ids() {
        use std::sync::{Arc, Mutex};

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut longs = SmallLongs::new(Box::new(move |id: usize| -> Result<Box<dyn AppendStore>> {
            seen_clone.lock().unwrap().push(id);
            Ok(Box::new(RamInts::new()))
        }));

        longs.append(1).unwrap();
        longs.append(2 << 31).unwrap();
        longs.append(9 << 31).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 2, 9]);
    }
}
