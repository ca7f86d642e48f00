//! Disk-backed append store over a memory-mapped file
//!
//! ## Layout
//!
//! ```text
//! file:  [ segment 0 ][ segment 1 ][ segment 2 ] ...
//!          2^bits B     2^bits B     2^bits B
//! slot i lives at byte i * WIDTH (little-endian)
//! ```
//!
//! Each segment is its own `MmapMut`. Growing the store never remaps an
//! existing segment: the file is extended with `set_len` first and only
//! then is the new segment mapped, so earlier offsets stay valid and a
//! crash mid-growth leaves the file at least as long as the last fully
//! grown segment.
//!
//! Segments are mapped when a slot inside them is first written. Slots in
//! unmapped segments (e.g. ranges skipped with `pad_to`) read as zero and
//! stay holes in the file.
//!
//! The file is released exactly once, by [`MmapStore::close`] or on drop:
//! mappings are dropped, then the file is either truncated to the exact
//! data length (durable) or deleted (transient).

use super::append::{AppendStore, Lane};
use crate::config::MmapConfig;
use crate::{Result, StorageError};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Files never grow past 2^62 bytes, which keeps every segment end
/// representable as a file offset.
const MAX_FILE_BYTES: u64 = 1 << 62;

/// Append store whose slots live in a memory-mapped file.
pub struct MmapStore<L: Lane> {
    path: PathBuf,

    /// `None` once closed
    file: Option<File>,

    /// Mapped segments, `None` until first written
    segments: Vec<Option<MmapMut>>,

    /// log2 of the segment size in bytes
    segment_bits: u32,

    /// Bytes currently reserved by the file
    file_len: u64,

    /// Logical number of slots
    len: u64,

    config: MmapConfig,
    _lane: PhantomData<L>,
}

/// 8-bit mmap store
pub type MmapBytes = MmapStore<i8>;
/// 32-bit mmap store
pub type MmapInts = MmapStore<i32>;
/// 64-bit mmap store
pub type MmapLongs = MmapStore<i64>;

impl<L: Lane> MmapStore<L> {
    /// Create (or truncate) the backing file at `path`.
    ///
    /// The parent directory must already exist.
    pub fn create(path: impl AsRef<Path>, config: MmapConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        debug!(
            path = %path.display(),
            lane = L::NAME,
            segment_bytes = 1u64 << config.segment_bits,
            "created mmap store"
        );

        Ok(Self {
            path,
            file: Some(file),
            segments: Vec::new(),
            segment_bits: config.segment_bits,
            file_len: 0,
            len: 0,
            config,
            _lane: PhantomData,
        })
    }

    /// Reopen a file left behind by a durable store.
    ///
    /// The logical length is derived from the file size, which `close`
    /// truncates to the exact data length. A reopened file is always kept on
    /// close, whatever `delete_on_close` says.
    pub fn open(path: impl AsRef<Path>, config: MmapConfig) -> Result<Self> {
        config.validate()?;
        let config = config.with_delete_on_close(false);
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(StorageError::InvalidArgument(format!(
                "mmap store not found: {}",
                path.display()
            )));
        }
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let file_len = file.metadata()?.len();

        debug!(path = %path.display(), file_len, "reopened mmap store");

        let mut store = Self {
            path,
            file: Some(file),
            segments: Vec::new(),
            segment_bits: config.segment_bits,
            file_len,
            len: file_len / L::WIDTH as u64,
            config,
            _lane: PhantomData,
        };

        // Existing data must be readable through `get`, which never maps.
        let segment_bytes = 1u64 << store.segment_bits;
        let segments = file_len.div_ceil(segment_bytes);
        for segment in 0..segments as usize {
            store.ensure_mapped(segment)?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Byte offset of slot `index`, if it stays below [`MAX_FILE_BYTES`].
    #[inline]
    fn byte_offset(index: u64) -> Result<u64> {
        index
            .checked_mul(L::WIDTH as u64)
            .filter(|&byte| byte < MAX_FILE_BYTES)
            .ok_or_else(|| {
                StorageError::InvalidArgument(format!(
                    "slot {} is beyond the addressable range of a {} mmap store",
                    index,
                    L::NAME
                ))
            })
    }

    /// Segment number and byte offset inside it for slot `index`.
    #[inline]
    fn locate(&self, index: u64) -> Result<(usize, usize)> {
        let byte = Self::byte_offset(index)?;
        let segment = (byte >> self.segment_bits) as usize;
        let offset = (byte & ((1u64 << self.segment_bits) - 1)) as usize;
        Ok((segment, offset))
    }

    /// Make sure `segment` is backed by the file and mapped.
    fn ensure_mapped(&mut self, segment: usize) -> Result<()> {
        if self.segments.get(segment).is_some_and(Option::is_some) {
            return Ok(());
        }

        let file = self
            .file
            .as_ref()
            .ok_or_else(|| StorageError::Closed(self.path.clone()))?;
        let segment_bytes = 1u64 << self.segment_bits;
        let start = segment as u64 * segment_bytes;
        let end = start + segment_bytes;

        // Extend the file before mapping; existing mappings are untouched.
        if self.file_len < end {
            file.set_len(end)?;
            self.file_len = end;
            debug!(path = %self.path.display(), segment, file_len = end, "grew mmap store");
        }

        // SAFETY: the mapping covers [start, end) which lies inside the file
        // we just sized. The file is owned exclusively by this store and no
        // other mapping of this range exists.
        let map = unsafe {
            MmapOptions::new()
                .offset(start)
                .len(segment_bytes as usize)
                .map_mut(file)?
        };

        #[cfg(unix)]
        if self.config.madvise_random {
            map.advise(memmap2::Advice::Random)?;
        }

        if self.segments.len() <= segment {
            self.segments.resize_with(segment + 1, || None);
        }
        self.segments[segment] = Some(map);
        Ok(())
    }
}

impl<L: Lane> AppendStore for MmapStore<L> {
    fn append(&mut self, value: i64) -> Result<u64> {
        if self.is_closed() {
            return Err(StorageError::Closed(self.path.clone()));
        }
        let lane = L::encode(value)?;
        let index = self.len;
        let (segment, offset) = self.locate(index)?;
        self.ensure_mapped(segment)?;
        if let Some(map) = self.segments[segment].as_mut() {
            lane.write_le(&mut map[offset..offset + L::WIDTH]);
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
        if self.is_closed() {
            return Err(StorageError::Closed(self.path.clone()));
        }
        let (segment, offset) = self.locate(index)?;
        let lane = match self.segments.get(segment) {
            Some(Some(map)) => L::read_le(&map[offset..offset + L::WIDTH]),
            _ => L::zero(),
        };
        Ok(lane.decode())
    }

    #[inline]
    fn len(&self) -> u64 {
        self.len
    }

    fn pad_to(&mut self, len: u64) -> Result<()> {
        if self.is_closed() {
            return Err(StorageError::Closed(self.path.clone()));
        }
        if len > self.len {
            // The next append lands at slot `len`
            Self::byte_offset(len)?;
            self.len = len;
        }
        Ok(())
    }

    fn estimate_memory_usage_bytes(&self) -> u64 {
        (self.segments.capacity() * std::mem::size_of::<Option<MmapMut>>()) as u64
    }

    fn disk_usage_bytes(&self) -> u64 {
        self.file_len
    }

    fn close(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };

        let mut result: Result<()> = Ok(());
        if self.config.sync_on_close {
            for map in self.segments.iter().flatten() {
                if let Err(e) = map.flush() {
                    result = Err(e.into());
                    break;
                }
            }
        }

        // Unmap before touching the file length.
        self.segments.clear();

        let released = if self.config.delete_on_close {
            drop(file);
            std::fs::remove_file(&self.path)
        } else {
            let data_len = self.len * L::WIDTH as u64;
            file.set_len(data_len).and_then(|_| {
                if self.config.sync_on_close {
                    file.sync_all()
                } else {
                    Ok(())
                }
            })
        };
        self.file_len = 0;

        debug!(
            path = %self.path.display(),
            slots = self.len,
            deleted = self.config.delete_on_close,
            "closed mmap store"
        );

        result.and(released.map_err(StorageError::from))
    }
}

impl<L: Lane> Drop for MmapStore<L> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), error = %e, "failed to release mmap store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_segments() -> MmapConfig {
        MmapConfig::default().with_segment_bits(MmapConfig::MIN_SEGMENT_BITS)
    }

    #[test]
    fn test_append_and_get() {
        let dir = TempDir::new().unwrap();
        let mut store = MmapLongs::create(dir.path().join("longs.bin"), small_segments()).unwrap();

        assert_eq!(store.append(42).unwrap(), 0);
        assert_eq!(store.append(i64::MIN).unwrap(), 1);
        assert_eq!(store.get(0).unwrap(), 42);
        assert_eq!(store.get(1).unwrap(), i64::MIN);
        assert!(matches!(
            store.get(2),
            Err(StorageError::OutOfBounds { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_growth_across_segments() {
        let dir = TempDir::new().unwrap();
        let mut store = MmapInts::create(dir.path().join("ints.bin"), small_segments()).unwrap();

        // 64KB segments hold 16384 ints; write enough for 5 segments
        let count = 16384 * 5 + 7;
        for i in 0..count {
            assert_eq!(store.append(i as i64 - 1000).unwrap(), i);
        }

        assert_eq!(store.len(), count);
        assert_eq!(store.disk_usage_bytes(), 6 * 65536);
        for i in (0..count).step_by(997) {
            assert_eq!(store.get(i).unwrap(), i as i64 - 1000);
        }
        assert_eq!(store.get(count - 1).unwrap(), count as i64 - 1001);
    }

    #[test]
    fn test_narrow_overflow() {
        let dir = TempDir::new().unwrap();
        let mut store = MmapBytes::create(dir.path().join("bytes.bin"), small_segments()).unwrap();
        store.append(-1).unwrap();

        assert!(matches!(store.append(1 << 20), Err(StorageError::Encoding { .. })));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(0).unwrap(), -1);
    }

    #[test]
    fn test_pad_to_leaves_holes() {
        let dir = TempDir::new().unwrap();
        let mut store = MmapLongs::create(dir.path().join("holes.bin"), small_segments()).unwrap();

        store.append(1).unwrap();
        // Skip far ahead: nothing is mapped in between
        store.pad_to(1_000_000).unwrap();
        assert_eq!(store.append(2).unwrap(), 1_000_000);

        assert_eq!(store.get(0).unwrap(), 1);
        assert_eq!(store.get(500_000).unwrap(), 0);
        assert_eq!(store.get(1_000_000).unwrap(), 2);

        let mapped = store.segments.iter().filter(|s| s.is_some()).count();
        assert_eq!(mapped, 2);
    }

    #[test]
    fn test_transient_file_deleted_on_close() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transient.bin");
        let mut store = MmapLongs::create(&path, small_segments()).unwrap();
        store.append(5).unwrap();
        assert!(path.exists());

        store.close().unwrap();
        assert!(!path.exists());
        assert!(store.is_closed());

        // Second close is a no-op
        store.close().unwrap();
        assert!(matches!(store.get(0), Err(StorageError::Closed(_))));
        assert!(matches!(store.append(1), Err(StorageError::Closed(_))));
    }

    #[test]
    fn test_drop_releases_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dropped.bin");
        {
            let mut store = MmapLongs::create(&path, small_segments()).unwrap();
            store.append(5).unwrap();
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_durable_file_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("durable.bin");
        let config = small_segments().with_delete_on_close(false).with_sync_on_close(true);

        {
            let mut store = MmapLongs::create(&path, config.clone()).unwrap();
            for i in 0..20_000 {
                store.append(i * 3).unwrap();
            }
            store.close().unwrap();
        }

        // Truncated to exactly the written data
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 20_000 * 8);

        let store = MmapLongs::open(&path, config).unwrap();
        assert_eq!(store.len(), 20_000);
        assert_eq!(store.get(0).unwrap(), 0);
        assert_eq!(store.get(19_999).unwrap(), 19_999 * 3);
    }

    #[test]
    fn test_huge_index_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = MmapLongs::create(dir.path().join("huge.bin"), small_segments()).unwrap();
        store.append(7).unwrap();

        // 2^62 slots of 8 bytes wrap around u64; must not alias slot 0
        assert!(matches!(
            store.pad_to(1 << 62),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.pad_to(MAX_FILE_BYTES / 8),
            Err(StorageError::InvalidArgument(_))
        ));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(0).unwrap(), 7);

        assert_eq!(store.append(8).unwrap(), 1);
        assert_eq!(store.get(0).unwrap(), 7);
    }

    #[test]
    fn test_reopened_file_is_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kept.bin");
        let durable = small_segments().with_delete_on_close(false);
        {
            let mut store = MmapLongs::create(&path, durable).unwrap();
            store.append(11).unwrap();
        }

        // Default config deletes on close, but never for a reopened file
        {
            let mut store = MmapLongs::open(&path, small_segments()).unwrap();
            assert_eq!(store.get(0).unwrap(), 11);
            store.append(12).unwrap();
        }
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 2 * 8);
    }

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = MmapLongs::open(dir.path().join("missing.bin"), small_segments());
        assert!(matches!(result, Err(StorageError::InvalidArgument(_))));
    }

    #[test]
    fn test_create_in_missing_dir_fails() {
        let dir = TempDir::new().unwrap();
        let result = MmapLongs::create(dir.path().join("no/such/dir/x.bin"), small_segments());
        assert!(matches!(result, Err(StorageError::Io(_))));
    }
}
