//! Memory-mapped file
//!
//! Thin wrapper over a mapping shared with other processes. Every word that
//! is coordinated across writers is accessed through the atomic views below,
//! never through plain loads and stores.
//!
//! The mapping covers the segment's full capacity from the start, while the
//! file behind it grows in chunks. The mapping is never moved, so references
//! into it stay valid for the life of the value. Only bytes below the file's
//! length may be touched; the segment tracks that bound in its header.
//!
//! Read-only queues map with `Mmap` on a file opened without write access.
//! Atomic loads work on such a mapping; every mutating method here fails
//! with `ReadOnly` instead.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64};

use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::error::{Result, TideError};

enum Mapping {
    ReadWrite(MmapMut),
    ReadOnly(Mmap),
}

/// A file mapped shared with other processes
pub struct MappedFile {
    path: PathBuf,
    /// Kept open to grow the file
    file: File,
    mapping: Mapping,
    /// Base of the mapping, captured once so shared references can write
    base: *mut u8,
    len: usize,
}

// Concurrent writers only touch disjoint ranges they won through a CAS on
// the range's header word, and every shared word goes through an atomic.
unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl MappedFile {
    /// Map `len` bytes of `file`; `len` may exceed the current file length
    ///
    /// `file` must have been opened with write access when `writable`.
    pub fn map(path: &Path, file: File, len: u64, writable: bool) -> Result<Self> {
        let len = usize::try_from(len).map_err(|_| {
            TideError::Config(format!("segment capacity {} does not fit in memory", len))
        })?;
        let mut options = MmapOptions::new();
        options.len(len);

        // SAFETY: the file is shared with other processes on purpose; all
        // cross-process mutation follows the header/record CAS protocol.
        let (mapping, base) = if writable {
            let mut mmap = unsafe { options.map_mut(&file)? };
            let base = mmap.as_mut_ptr();
            (Mapping::ReadWrite(mmap), base)
        } else {
            let mmap = unsafe { options.map(&file)? };
            let base = mmap.as_ptr() as *mut u8;
            (Mapping::ReadOnly(mmap), base)
        };

        Ok(Self {
            path: path.to_path_buf(),
            file,
            mapping,
            base,
            len,
        })
    }

    /// Replace the mapping with one of `len` bytes over the same file
    ///
    /// Takes `self` by value, so no reference into the old mapping survives.
    pub fn remap(self, len: u64) -> Result<Self> {
        let writable = self.is_writable();
        let MappedFile { path, file, .. } = self;
        Self::map(&path, file, len, writable)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.mapping, Mapping::ReadWrite(_))
    }

    /// Current length of the file on disk
    pub fn file_len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Extend the file; never shrinks it
    pub fn grow_file(&self, len: u64) -> Result<()> {
        self.ensure_writable()?;
        if self.file_len()? < len {
            self.file.set_len(len)?;
        }
        Ok(())
    }

    /// Atomic view of the 4-byte word at `offset`
    pub fn atomic_u32(&self, offset: u64) -> Result<&AtomicU32> {
        let offset = self.check(offset, 4, 4)?;
        // SAFETY: in bounds, 4-aligned (the mapping is page-aligned), and the
        // mapping outlives the returned reference.
        Ok(unsafe { AtomicU32::from_ptr(self.base.add(offset) as *mut u32) })
    }

    /// Atomic view of the 8-byte word at `offset`
    pub fn atomic_u64(&self, offset: u64) -> Result<&AtomicU64> {
        let offset = self.check(offset, 8, 8)?;
        // SAFETY: as above, with 8-byte alignment.
        Ok(unsafe { AtomicU64::from_ptr(self.base.add(offset) as *mut u64) })
    }

    /// Atomic view of the 4-byte word at `offset`, without bounds checks
    ///
    /// # Safety
    /// `offset` must be 4-aligned and `offset + 4` within the mapping.
    pub unsafe fn atomic_u32_unchecked(&self, offset: u64) -> &AtomicU32 {
        debug_assert!(offset as usize + 4 <= self.len && offset % 4 == 0);
        AtomicU32::from_ptr(self.base.add(offset as usize) as *mut u32)
    }

    /// Atomic view of the 8-byte word at `offset`, without bounds checks
    ///
    /// # Safety
    /// `offset` must be 8-aligned and `offset + 8` within the mapping.
    pub unsafe fn atomic_u64_unchecked(&self, offset: u64) -> &AtomicU64 {
        debug_assert!(offset as usize + 8 <= self.len && offset % 8 == 0);
        AtomicU64::from_ptr(self.base.add(offset as usize) as *mut u64)
    }

    /// Borrow `len` bytes at `offset`
    ///
    /// Only call on ranges that are immutable once published (ready records,
    /// header fields written before the header reached Built).
    pub fn bytes(&self, offset: u64, len: usize) -> Result<&[u8]> {
        let offset = self.check(offset, len, 1)?;
        // SAFETY: bounds checked; see the method docs for mutation.
        Ok(unsafe { std::slice::from_raw_parts(self.base.add(offset), len) })
    }

    /// Copy `src` into the mapping at `offset`
    ///
    /// # Safety
    /// The caller must own `offset..offset + src.len()` exclusively: either
    /// it won the CAS on the record header covering the range, or it holds
    /// the segment header in the Building state.
    pub unsafe fn write_at(&self, offset: u64, src: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let offset = self.check(offset, src.len(), 1)?;
        std::ptr::copy_nonoverlapping(src.as_ptr(), self.base.add(offset), src.len());
        Ok(())
    }

    /// msync the whole mapping
    pub fn flush(&self) -> Result<()> {
        if let Mapping::ReadWrite(mmap) = &self.mapping {
            mmap.flush()?;
        }
        Ok(())
    }

    /// msync a range
    pub fn flush_range(&self, offset: u64, len: usize) -> Result<()> {
        let offset = self.check(offset, len, 1)?;
        if let Mapping::ReadWrite(mmap) = &self.mapping {
            mmap.flush_range(offset, len)?;
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_writable() {
            Ok(())
        } else {
            Err(TideError::ReadOnly)
        }
    }

    fn check(&self, offset: u64, len: usize, align: usize) -> Result<usize> {
        let start = usize::try_from(offset).map_err(|_| self.out_of_bounds(offset, len))?;
        match start.checked_add(len) {
            Some(end) if end <= self.len && start % align == 0 => Ok(start),
            _ => Err(self.out_of_bounds(offset, len)),
        }
    }

    fn out_of_bounds(&self, offset: u64, len: usize) -> TideError {
        TideError::Corrupted {
            path: self.path.clone(),
            position: offset,
            reason: format!(
                "access of {} bytes is outside the {} byte mapping or misaligned",
                len, self.len
            ),
        }
    }
}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFile")
            .field("path", &self.path)
            .field("len", &self.len)
            .field("writable", &self.is_writable())
            .finish()
    }
}
