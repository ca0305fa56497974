//! Disk snapshot format for embedding vectors.
//!
//! A snapshot is a whole-index serialization of the `EntityId -> vector`
//! map. Writes always go through a temporary file that is atomically renamed
//! into place, so a snapshot on disk is either complete or absent - never a
//! partial write. Reads memory-map the file and decode entries sequentially.
//!
//! # Snapshot Format
//!
//! - Header (16 bytes): magic, version, dimension, entry count
//! - Entries: length-prefixed UTF-8 entity ID followed by the vector
//!   components as little-endian f32

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::types::EntityId;
use crate::vector::types::{VectorDimension, VectorError};

/// Current snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

/// Size of the snapshot header in bytes.
const HEADER_SIZE: usize = 16;

/// Magic bytes to identify embedding snapshot files.
const MAGIC_BYTES: &[u8; 4] = b"EVEC";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// Number of bytes in the entity ID length prefix (u16).
const BYTES_PER_ID_LEN: usize = 2;

/// Errors specific to snapshot I/O.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid snapshot format: {0}")]
    InvalidFormat(String),

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),
}

/// Whole-index snapshot file for a single vector index.
///
/// Owns the on-disk path and the expected vector dimension; does not hold
/// any vector data itself.
#[derive(Debug, Clone)]
pub struct VectorSnapshot {
    path: PathBuf,
    dimension: VectorDimension,
}

impl VectorSnapshot {
    /// Creates a snapshot handle for the given file path.
    pub fn new(path: impl Into<PathBuf>, dimension: VectorDimension) -> Self {
        Self {
            path: path.into(),
            dimension,
        }
    }

    /// Returns the snapshot file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the vector dimension this snapshot was created for.
    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Checks if the snapshot file exists on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Writes a complete snapshot of the given entries.
    ///
    /// The data is staged in a temporary file in the same directory and
    /// renamed over the target path, so concurrent readers never observe a
    /// half-written snapshot.
    pub fn write(&self, entries: &HashMap<EntityId, Vec<f32>>) -> Result<(), SnapshotError> {
        for vector in entries.values() {
            self.dimension.validate_vector(vector)?;
        }

        let parent = self.path.parent().ok_or_else(|| {
            SnapshotError::InvalidFormat(format!(
                "Snapshot path has no parent directory: {}",
                self.path.display()
            ))
        })?;
        std::fs::create_dir_all(parent)?;

        let tmp = NamedTempFile::new_in(parent)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            self.write_header(&mut writer, entries.len())?;
            for (id, vector) in entries {
                let id_bytes = id.as_str().as_bytes();
                if id_bytes.len() > u16::MAX as usize {
                    return Err(SnapshotError::InvalidFormat(format!(
                        "Entity ID too long for snapshot format: {} bytes",
                        id_bytes.len()
                    )));
                }
                writer.write_all(&(id_bytes.len() as u16).to_le_bytes())?;
                writer.write_all(id_bytes)?;
                for &value in vector {
                    writer.write_all(&value.to_le_bytes())?;
                }
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        Ok(())
    }

    /// Reads all entries from the snapshot.
    ///
    /// Returns an error if the file is missing, has a foreign or newer
    /// format, or was written with a different vector dimension.
    pub fn read(&self) -> Result<Vec<(EntityId, Vec<f32>)>, SnapshotError> {
        let file = File::open(&self.path)?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        let (version, dimension, count) = Self::read_header(&mmap)?;
        if version != SNAPSHOT_VERSION {
            return Err(VectorError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                actual: version,
            }
            .into());
        }
        if dimension != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension.get(),
                actual: dimension.get(),
            }
            .into());
        }

        let dim = dimension.get();
        let mut entries = Vec::with_capacity(count);
        let mut offset = HEADER_SIZE;

        for _ in 0..count {
            if offset + BYTES_PER_ID_LEN > mmap.len() {
                return Err(SnapshotError::InvalidFormat(
                    "Snapshot truncated in entry header".to_string(),
                ));
            }
            let id_len = u16::from_le_bytes([mmap[offset], mmap[offset + 1]]) as usize;
            offset += BYTES_PER_ID_LEN;

            let vector_bytes = dim * BYTES_PER_F32;
            if offset + id_len + vector_bytes > mmap.len() {
                return Err(SnapshotError::InvalidFormat(
                    "Snapshot truncated in entry body".to_string(),
                ));
            }

            let id = std::str::from_utf8(&mmap[offset..offset + id_len]).map_err(|_| {
                SnapshotError::InvalidFormat("Entity ID is not valid UTF-8".to_string())
            })?;
            let id = EntityId::new(id);
            offset += id_len;

            let mut vector = Vec::with_capacity(dim);
            for i in 0..dim {
                let at = offset + i * BYTES_PER_F32;
                vector.push(f32::from_le_bytes([
                    mmap[at],
                    mmap[at + 1],
                    mmap[at + 2],
                    mmap[at + 3],
                ]));
            }
            offset += vector_bytes;

            entries.push((id, vector));
        }

        Ok(entries)
    }

    /// Returns the size of the snapshot file in bytes.
    pub fn file_size(&self) -> Result<u64, io::Error> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    fn write_header(&self, writer: &mut impl Write, count: usize) -> Result<(), io::Error> {
        writer.write_all(MAGIC_BYTES)?;
        writer.write_all(&SNAPSHOT_VERSION.to_le_bytes())?;
        writer.write_all(&(self.dimension.get() as u32).to_le_bytes())?;
        writer.write_all(&(count as u32).to_le_bytes())?;
        Ok(())
    }

    fn read_header(mmap: &Mmap) -> Result<(u32, VectorDimension, usize), SnapshotError> {
        if mmap.len() < HEADER_SIZE {
            return Err(SnapshotError::InvalidFormat(
                "File too small to contain header".to_string(),
            ));
        }

        if &mmap[0..4] != MAGIC_BYTES {
            return Err(SnapshotError::InvalidFormat(
                "Invalid magic bytes".to_string(),
            ));
        }

        let version = u32::from_le_bytes([mmap[4], mmap[5], mmap[6], mmap[7]]);

        let dim_value = u32::from_le_bytes([mmap[8], mmap[9], mmap[10], mmap[11]]);
        let dimension = VectorDimension::new(dim_value as usize)?;

        let count = u32::from_le_bytes([mmap[12], mmap[13], mmap[14], mmap[15]]) as usize;

        Ok((version, dimension, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snapshot_in(dir: &TempDir, dim: usize) -> VectorSnapshot {
        VectorSnapshot::new(
            dir.path().join("entries.vec"),
            VectorDimension::new(dim).unwrap(),
        )
    }

    #[test]
    fn test_write_and_read_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot = snapshot_in(&temp_dir, 4);

        let mut entries = HashMap::new();
        entries.insert(EntityId::new("alpha"), vec![1.0, 2.0, 3.0, 4.0]);
        entries.insert(EntityId::new("beta"), vec![5.0, 6.0, 7.0, 8.0]);
        entries.insert(EntityId::new("gamma/delta"), vec![-1.0, 0.5, 0.25, 0.0]);

        snapshot.write(&entries).unwrap();
        assert!(snapshot.exists());

        let loaded: HashMap<EntityId, Vec<f32>> = snapshot.read().unwrap().into_iter().collect();
        assert_eq!(loaded, entries);
    }

    #[test]
    fn test_empty_snapshot_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot = snapshot_in(&temp_dir, 3);

        snapshot.write(&HashMap::new()).unwrap();
        let loaded = snapshot.read().unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_read_missing_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot = snapshot_in(&temp_dir, 3);

        assert!(!snapshot.exists());
        assert!(matches!(snapshot.read(), Err(SnapshotError::Io(_))));
    }

    #[test]
    fn test_dimension_validation_on_write() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot = snapshot_in(&temp_dir, 3);

        let mut entries = HashMap::new();
        entries.insert(EntityId::new("short"), vec![1.0, 2.0]);

        assert!(matches!(
            snapshot.write(&entries),
            Err(SnapshotError::Vector(VectorError::DimensionMismatch { .. }))
        ));
    }

    #[test]
    fn test_dimension_mismatch_on_read() {
        let temp_dir = TempDir::new().unwrap();
        let written = snapshot_in(&temp_dir, 2);

        let mut entries = HashMap::new();
        entries.insert(EntityId::new("x"), vec![1.0, 0.0]);
        written.write(&entries).unwrap();

        let reader = VectorSnapshot::new(
            temp_dir.path().join("entries.vec"),
            VectorDimension::new(4).unwrap(),
        );
        assert!(matches!(
            reader.read(),
            Err(SnapshotError::Vector(VectorError::DimensionMismatch { .. }))
        ));
    }

    #[test]
    fn test_garbage_file_is_invalid_format() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("entries.vec");
        std::fs::write(&path, b"not a snapshot at all").unwrap();

        let snapshot = VectorSnapshot::new(&path, VectorDimension::new(2).unwrap());
        assert!(matches!(
            snapshot.read(),
            Err(SnapshotError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_rewrite_replaces_previous_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot = snapshot_in(&temp_dir, 2);

        let mut first = HashMap::new();
        first.insert(EntityId::new("a"), vec![1.0, 0.0]);
        first.insert(EntityId::new("b"), vec![0.0, 1.0]);
        snapshot.write(&first).unwrap();

        let mut second = HashMap::new();
        second.insert(EntityId::new("c"), vec![0.5, 0.5]);
        snapshot.write(&second).unwrap();

        let loaded: HashMap<EntityId, Vec<f32>> = snapshot.read().unwrap().into_iter().collect();
        assert_eq!(loaded, second);
    }
}
