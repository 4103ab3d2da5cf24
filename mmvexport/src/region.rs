//! The memory-mapped backing file.
//!
//! A [`MappedRegion`] owns the mapping for one metrics file. During
//! initialization the writer has it exclusively and fills it through
//! [`MappedRegion::as_mut_slice`]. Once published, it is shared and only
//! touched through [`MappedRegion::store`], which any thread may call.
//!
//! # Safety
//!
//! Stores go through atomic operations on aligned lanes, so concurrent
//! stores to the same slot from different threads are not a data race in
//! the Rust memory model; they may interleave and leave a torn value, which
//! the file format already tolerates. The external reader is a separate
//! process and never synchronizes with us.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};

use memmap2::MmapMut;

use crate::error::{MappingError, Result};

/// A memory-mapped file of fixed length.
#[derive(Debug)]
pub struct MappedRegion {
    mmap: MmapMut,
    path: PathBuf,
}

// SAFETY: the mapping is only mutated through `as_mut_slice` (requires
// `&mut self`) or through atomic stores in `store`, so sharing references
// across threads cannot produce a data race.
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Creates (or truncates) `path`, sizes it to `length` bytes and maps it.
    ///
    /// The new file is zero-filled.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError`] if the file cannot be created, resized or
    /// mapped. Nothing stays mapped on failure.
    pub fn create<P: AsRef<Path>>(path: P, length: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| MappingError::Create {
                path: path.clone(),
                source: e,
            })?;

        file.set_len(length as u64)
            .map_err(|e| MappingError::Resize {
                path: path.clone(),
                length,
                source: e,
            })?;

        // SAFETY: the file was just created and truncated by us and has the
        // requested size. Other processes may map it read-only; they never
        // write to it.
        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| MappingError::Map {
                path: path.clone(),
                source: e,
            })?
        };

        Ok(Self { mmap, path })
    }

    /// Mapping length in bytes.
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Exclusive access for one-shot initialization.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap[..]
    }

    /// Copies `bytes` into the mapping at `offset` using atomic stores.
    ///
    /// Lanes are 8 bytes when both offset and length are 8-aligned, 4 bytes
    /// when 4-aligned, and single bytes otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::BoundsViolation`] if the range leaves the
    /// mapping; nothing is written in that case.
    pub fn store(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check_bounds(offset, bytes.len())?;

        let base = self.mmap.as_ptr().cast_mut();
        let aligned = |align: usize| (base as usize + offset) % align == 0 && bytes.len() % align == 0;

        if aligned(8) {
            for (i, chunk) in bytes.chunks_exact(8).enumerate() {
                let mut lane = [0u8; 8];
                lane.copy_from_slice(chunk);
                // SAFETY: bounds were checked above, the address is 8-aligned,
                // and the mapping outlives this call.
                let atomic = unsafe { AtomicU64::from_ptr(base.add(offset + i * 8).cast::<u64>()) };
                atomic.store(u64::from_ne_bytes(lane), Ordering::Relaxed);
            }
        } else if aligned(4) {
            for (i, chunk) in bytes.chunks_exact(4).enumerate() {
                let mut lane = [0u8; 4];
                lane.copy_from_slice(chunk);
                // SAFETY: bounds were checked above, the address is 4-aligned,
                // and the mapping outlives this call.
                let atomic = unsafe { AtomicU32::from_ptr(base.add(offset + i * 4).cast::<u32>()) };
                atomic.store(u32::from_ne_bytes(lane), Ordering::Relaxed);
            }
        } else {
            for (i, &byte) in bytes.iter().enumerate() {
                // SAFETY: bounds were checked above; bytes have no alignment
                // requirement.
                let atomic = unsafe { AtomicU8::from_ptr(base.add(offset + i)) };
                atomic.store(byte, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reads `length` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::BoundsViolation`] if the range leaves the
    /// mapping.
    pub fn read(&self, offset: usize, length: usize) -> Result<Vec<u8>> {
        self.check_bounds(offset, length)?;
        let base = self.mmap.as_ptr().cast_mut();
        let bytes = (0..length)
            .map(|i| {
                // SAFETY: bounds were checked above.
                let atomic = unsafe { AtomicU8::from_ptr(base.add(offset + i)) };
                atomic.load(Ordering::Relaxed)
            })
            .collect();
        Ok(bytes)
    }

    /// Flushes dirty pages to the backing file.
    ///
    /// Readers that map the file see stores immediately; this only matters
    /// for durability.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::Flush`] if the sync fails.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush().map_err(|e| {
            MappingError::Flush {
                path: self.path.clone(),
                source: e,
            }
            .into()
        })
    }

    fn check_bounds(&self, offset: usize, length: usize) -> Result<()> {
        match offset.checked_add(length) {
            Some(end) if end <= self.mmap.len() => Ok(()),
            _ => Err(MappingError::BoundsViolation {
                offset,
                length,
                size: self.mmap.len(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_create_sizes_and_zero_fills() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.mmv");

        let region = MappedRegion::create(&path, 128).unwrap();
        assert_eq!(region.len(), 128);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 128);
        assert!(region.read(0, 128).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_store_lanes() {
        let dir = tempfile::tempdir().unwrap();
        let region = MappedRegion::create(dir.path().join("r.mmv"), 64).unwrap();

        region.store(8, &42u64.to_ne_bytes()).unwrap();
        region.store(20, &7u32.to_ne_bytes()).unwrap();
        region.store(33, b"abc").unwrap();

        assert_eq!(region.read(8, 8).unwrap(), 42u64.to_ne_bytes());
        assert_eq!(region.read(20, 4).unwrap(), 7u32.to_ne_bytes());
        assert_eq!(region.read(33, 3).unwrap(), b"abc");
        assert_eq!(region.read(32, 1).unwrap(), [0]);
    }

    #[test]
    fn test_store_out_of_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let region = MappedRegion::create(dir.path().join("r.mmv"), 16).unwrap();

        let err = region.store(12, &1u64.to_ne_bytes()).unwrap_err();
        assert!(err.to_string().contains("access beyond mapping"));
        assert!(region.store(usize::MAX, &[1]).is_err());
        assert!(region.read(0, 17).is_err());
        assert!(region.read(0, 16).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_concurrent_disjoint_stores() {
        let dir = tempfile::tempdir().unwrap();
        let region = Arc::new(MappedRegion::create(dir.path().join("r.mmv"), 8 * 8).unwrap());

        let handles: Vec<_> = (0..8u64)
            .map(|slot| {
                let region = Arc::clone(&region);
                thread::spawn(move || {
                    for i in 0..1000u64 {
                        region
                            .store(slot as usize * 8, &(slot * 10_000 + i).to_ne_bytes())
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for slot in 0..8u64 {
            let bytes = region.read(slot as usize * 8, 8).unwrap();
            assert_eq!(u64::from_ne_bytes(bytes.try_into().unwrap()), slot * 10_000 + 999);
        }
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("r.mmv");
        let err = MappedRegion::create(&path, 16).unwrap_err();
        assert!(err.to_string().contains("failed to create"));
    }
}
