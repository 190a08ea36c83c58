// Copyright (c) 2026 Driftnet
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Erasable storage partition abstraction.
//!
//! Flash semantics: an erase sets every bit of a sector to 1; a write can
//! only pull bits from 1 to 0. The repository relies on this to burn decay
//! shares and clear flags after a slot was written, without erasing.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Partition not found for the given label.
    #[error("partition not found")]
    NotFound,
    /// Offset/length outside the partition or not erase-aligned.
    #[error("out of range")]
    OutOfRange,
    /// Geometry constraint violated (size, erase alignment).
    #[error("bad geometry")]
    Geometry,
    /// Backing I/O failure.
    #[error("storage io")]
    Io,
}

/// A random-access erasable partition.
pub trait Partition: Send + Sync {
    /// Total size in bytes; a multiple of [`Partition::erase_size`].
    fn size(&self) -> usize;

    /// Erase granularity in bytes.
    fn erase_size(&self) -> usize;

    /// Read `dst.len()` bytes at `offset`.
    fn read(&self, offset: usize, dst: &mut [u8]) -> Result<(), StorageError>;

    /// Program bytes at `offset`. Bit-clearing semantics: the stored value
    /// becomes `old & new`.
    fn write(&self, offset: usize, src: &[u8]) -> Result<(), StorageError>;

    /// Erase `len` bytes at `offset`; both must be erase-aligned.
    fn erase_range(&self, offset: usize, len: usize) -> Result<(), StorageError>;
}

fn check_span(part_size: usize, offset: usize, len: usize) -> Result<(), StorageError> {
    if offset.checked_add(len).map_or(true, |end| end > part_size) {
        return Err(StorageError::OutOfRange);
    }
    Ok(())
}

fn check_erase_span(
    part_size: usize,
    erase_size: usize,
    offset: usize,
    len: usize,
) -> Result<(), StorageError> {
    check_span(part_size, offset, len)?;
    if offset % erase_size != 0 || len % erase_size != 0 {
        return Err(StorageError::OutOfRange);
    }
    Ok(())
}

/// In-memory partition with faithful flash semantics. The unit-test stand-in
/// for the device's flash span.
pub struct MemPartition {
    erase_size: usize,
    cells: Mutex<Vec<u8>>,
}

impl MemPartition {
    /// New fully-erased partition.
    pub fn new(size: usize, erase_size: usize) -> Result<Self, StorageError> {
        if erase_size == 0 || size == 0 || size % erase_size != 0 {
            return Err(StorageError::Geometry);
        }
        Ok(Self {
            erase_size,
            cells: Mutex::new(vec![0xff; size]),
        })
    }
}

impl Partition for MemPartition {
    fn size(&self) -> usize {
        self.cells.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn erase_size(&self) -> usize {
        self.erase_size
    }

    fn read(&self, offset: usize, dst: &mut [u8]) -> Result<(), StorageError> {
        let cells = self.cells.lock().map_err(|_| StorageError::Io)?;
        check_span(cells.len(), offset, dst.len())?;
        dst.copy_from_slice(&cells[offset..offset + dst.len()]);
        Ok(())
    }

    fn write(&self, offset: usize, src: &[u8]) -> Result<(), StorageError> {
        let mut cells = self.cells.lock().map_err(|_| StorageError::Io)?;
        check_span(cells.len(), offset, src.len())?;
        for (cell, byte) in cells[offset..offset + src.len()].iter_mut().zip(src) {
            *cell &= byte;
        }
        Ok(())
    }

    fn erase_range(&self, offset: usize, len: usize) -> Result<(), StorageError> {
        let mut cells = self.cells.lock().map_err(|_| StorageError::Io)?;
        check_erase_span(cells.len(), self.erase_size, offset, len)?;
        cells[offset..offset + len].fill(0xff);
        Ok(())
    }
}

/// Default erase granularity of the file-backed partition.
pub const FILE_ERASE_SIZE: usize = 4096;

/// File-backed partition bound by label under the data directory; the
/// deployment stand-in for a platform partition table lookup.
pub struct FilePartition {
    size: usize,
    file: Mutex<fs::File>,
}

impl FilePartition {
    /// Bind (and create on first boot) `<data_dir>/<label>.part` of `size`
    /// bytes, initialised fully erased.
    pub fn bind(data_dir: &str, label: &str, size: usize) -> Result<Self, StorageError> {
        if size == 0 || size % FILE_ERASE_SIZE != 0 {
            return Err(StorageError::Geometry);
        }
        fs::create_dir_all(data_dir).map_err(|_| StorageError::Io)?;
        let mut path = PathBuf::from(data_dir);
        path.push(format!("{label}.part"));

        let fresh = !path.exists();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|_| StorageError::Io)?;

        if fresh {
            let sector = vec![0xffu8; FILE_ERASE_SIZE];
            for _ in 0..size / FILE_ERASE_SIZE {
                file.write_all(&sector).map_err(|_| StorageError::Io)?;
            }
            file.sync_all().map_err(|_| StorageError::Io)?;
        } else if file.metadata().map_err(|_| StorageError::Io)?.len() != size as u64 {
            return Err(StorageError::Geometry);
        }

        Ok(Self {
            size,
            file: Mutex::new(file),
        })
    }
}

impl Partition for FilePartition {
    fn size(&self) -> usize {
        self.size
    }

    fn erase_size(&self) -> usize {
        FILE_ERASE_SIZE
    }

    fn read(&self, offset: usize, dst: &mut [u8]) -> Result<(), StorageError> {
        check_span(self.size, offset, dst.len())?;
        let mut file = self.file.lock().map_err(|_| StorageError::Io)?;
        file.seek(SeekFrom::Start(offset as u64))
            .map_err(|_| StorageError::Io)?;
        file.read_exact(dst).map_err(|_| StorageError::Io)
    }

    fn write(&self, offset: usize, src: &[u8]) -> Result<(), StorageError> {
        check_span(self.size, offset, src.len())?;
        let mut file = self.file.lock().map_err(|_| StorageError::Io)?;

        // Preserve bit-clearing semantics over the page file.
        let mut current = vec![0u8; src.len()];
        file.seek(SeekFrom::Start(offset as u64))
            .map_err(|_| StorageError::Io)?;
        file.read_exact(&mut current).map_err(|_| StorageError::Io)?;
        for (cell, byte) in current.iter_mut().zip(src) {
            *cell &= byte;
        }

        file.seek(SeekFrom::Start(offset as u64))
            .map_err(|_| StorageError::Io)?;
        file.write_all(&current).map_err(|_| StorageError::Io)
    }

    fn erase_range(&self, offset: usize, len: usize) -> Result<(), StorageError> {
        check_erase_span(self.size, FILE_ERASE_SIZE, offset, len)?;
        let mut file = self.file.lock().map_err(|_| StorageError::Io)?;
        file.seek(SeekFrom::Start(offset as u64))
            .map_err(|_| StorageError::Io)?;
        let sector = vec![0xffu8; FILE_ERASE_SIZE];
        for _ in 0..len / FILE_ERASE_SIZE {
            file.write_all(&sector).map_err(|_| StorageError::Io)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_partition_write_only_clears_bits() {
        let part = MemPartition::new(4096, 2048).expect("mem");
        part.write(0, &[0x0f]).expect("write");
        let mut b = [0u8; 1];
        part.read(0, &mut b).expect("read");
        assert_eq!(b[0], 0x0f);

        // A second program cannot set bits back.
        part.write(0, &[0xf0]).expect("write");
        part.read(0, &mut b).expect("read");
        assert_eq!(b[0], 0x00);

        part.erase_range(0, 2048).expect("erase");
        part.read(0, &mut b).expect("read");
        assert_eq!(b[0], 0xff);
    }

    #[test]
    fn mem_partition_rejects_unaligned_erase() {
        let part = MemPartition::new(4096, 2048).expect("mem");
        assert!(part.erase_range(1, 2048).is_err());
        assert!(part.erase_range(0, 100).is_err());
        assert!(part.erase_range(2048, 4096).is_err());
    }

    #[test]
    fn file_partition_starts_erased_and_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dir_str = dir.path().to_str().unwrap();
        {
            let part = FilePartition::bind(dir_str, "t0", 8192).expect("bind");
            let mut b = [0u8; 4];
            part.read(4096, &mut b).expect("read");
            assert_eq!(b, [0xff; 4]);
            part.write(4096, &[1, 2, 3, 4]).expect("write");
        }
        let part = FilePartition::bind(dir_str, "t0", 8192).expect("rebind");
        let mut b = [0u8; 4];
        part.read(4096, &mut b).expect("read");
        assert_eq!(b, [1, 2, 3, 4]);
    }

    #[test]
    fn file_partition_size_mismatch_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dir_str = dir.path().to_str().unwrap();
        let _ = FilePartition::bind(dir_str, "t1", 4096).expect("bind");
        assert!(FilePartition::bind(dir_str, "t1", 8192).is_err());
    }
}
