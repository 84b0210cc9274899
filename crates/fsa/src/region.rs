//! The owned wrapper around one mapped status file.
//!
//! Layout: a 16-byte header (magic, layout version, generation counter,
//! record count, all little-endian u32) followed by `count` fixed-size
//! records. The generation counter is bumped whenever the record array is
//! rebuilt so attached readers can notice a configuration change.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use memmap2::MmapMut;

/// Size of the region header preceding the record array.
pub const WORD_OFFSET: usize = 16;

const MAGIC_OFF: usize = 0;
const VERSION_OFF: usize = 4;
const GENERATION_OFF: usize = 8;
const COUNT_OFF: usize = 12;

/// Current layout version, checked on attach.
pub const LAYOUT_VERSION: u32 = 2;

/// Errors raised when creating or attaching a region.
#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    /// Underlying file I/O failed.
    #[error("region i/o on {path}: {source}")]
    Io {
        /// File that failed.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The magic did not match: not a status file.
    #[error("{path} is not a status region (bad magic {found:#010x})")]
    BadMagic {
        /// File that failed.
        path: String,
        /// Magic actually present.
        found: u32,
    },
    /// The layout version is from a different build generation.
    #[error("{path} has layout version {found}, expected {LAYOUT_VERSION}")]
    VersionMismatch {
        /// File that failed.
        path: String,
        /// Version actually present.
        found: u32,
    },
    /// File length disagrees with header count × record size.
    #[error("{path} is truncated: {len} bytes for {count} records of {record_size}")]
    Truncated {
        /// File that failed.
        path: String,
        /// Actual length.
        len: u64,
        /// Records the header claims.
        count: u32,
        /// Record size expected.
        record_size: usize,
    },
}

/// One mapped file holding a header plus a dense record array.
#[derive(Debug)]
pub struct MappedRegion {
    file: File,
    map: MmapMut,
    record_size: usize,
}

impl MappedRegion {
    /// Creates (truncating) a region sized for `count` records.
    pub fn create(
        path: &Path,
        magic: u32,
        record_size: usize,
        count: usize,
    ) -> Result<Self, RegionError> {
        let io_err = |source| RegionError::Io {
            path: path.display().to_string(),
            source,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(io_err)?;
        let len = WORD_OFFSET + record_size * count;
        file.set_len(len as u64).map_err(io_err)?;
        // SAFETY: the mapping is private to this file, which stays open for
        // the lifetime of the region; concurrent mutation is mediated by
        // the byte-range locks in `lock`.
        let mut map = unsafe { MmapMut::map_mut(&file) }.map_err(io_err)?;
        map[MAGIC_OFF..MAGIC_OFF + 4].copy_from_slice(&magic.to_le_bytes());
        map[VERSION_OFF..VERSION_OFF + 4].copy_from_slice(&LAYOUT_VERSION.to_le_bytes());
        map[GENERATION_OFF..GENERATION_OFF + 4].copy_from_slice(&1u32.to_le_bytes());
        map[COUNT_OFF..COUNT_OFF + 4].copy_from_slice(&(count as u32).to_le_bytes());
        Ok(Self {
            file,
            map,
            record_size,
        })
    }

    /// Attaches to an existing region, validating magic, version and size.
    pub fn attach(path: &Path, magic: u32, record_size: usize) -> Result<Self, RegionError> {
        let io_err = |source| RegionError::Io {
            path: path.display().to_string(),
            source,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(io_err)?;
        let len = file.metadata().map_err(io_err)?.len();
        // SAFETY: as in `create`; the file outlives the mapping.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(io_err)?;
        if len < WORD_OFFSET as u64 {
            return Err(RegionError::Truncated {
                path: path.display().to_string(),
                len,
                count: 0,
                record_size,
            });
        }
        let found_magic = read_u32(&map, MAGIC_OFF);
        if found_magic != magic {
            return Err(RegionError::BadMagic {
                path: path.display().to_string(),
                found: found_magic,
            });
        }
        let found_version = read_u32(&map, VERSION_OFF);
        if found_version != LAYOUT_VERSION {
            return Err(RegionError::VersionMismatch {
                path: path.display().to_string(),
                found: found_version,
            });
        }
        let count = read_u32(&map, COUNT_OFF);
        let expect = (WORD_OFFSET + record_size * count as usize) as u64;
        if len < expect {
            return Err(RegionError::Truncated {
                path: path.display().to_string(),
                len,
                count,
                record_size,
            });
        }
        Ok(Self {
            file,
            map,
            record_size,
        })
    }

    /// Number of records in the array.
    #[must_use]
    pub fn count(&self) -> usize {
        read_u32(&self.map, COUNT_OFF) as usize
    }

    /// Current configuration generation.
    #[must_use]
    pub fn generation(&self) -> u32 {
        read_u32(&self.map, GENERATION_OFF)
    }

    /// Marks a configuration change for attached readers.
    pub fn bump_generation(&mut self) {
        let next = self.generation().wrapping_add(1).max(1);
        self.map[GENERATION_OFF..GENERATION_OFF + 4].copy_from_slice(&next.to_le_bytes());
    }

    /// Record size this region was opened with.
    #[must_use]
    pub const fn record_size(&self) -> usize {
        self.record_size
    }

    /// Byte offset of record `index` within the file.
    #[must_use]
    pub const fn record_offset(&self, index: usize) -> usize {
        WORD_OFFSET + index * self.record_size
    }

    /// Read view of one record.
    #[must_use]
    pub fn record(&self, index: usize) -> &[u8] {
        let off = self.record_offset(index);
        &self.map[off..off + self.record_size]
    }

    /// Write view of one record.
    pub fn record_mut(&mut self, index: usize) -> &mut [u8] {
        let off = self.record_offset(index);
        &mut self.map[off..off + self.record_size]
    }

    /// The backing file, for byte-range locks.
    #[must_use]
    pub const fn file(&self) -> &File {
        &self.file
    }

    /// Flushes dirty pages to the backing file.
    pub fn flush(&self) -> io::Result<()> {
        self.map.flush()
    }
}

pub(crate) fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap_or_default())
}

pub(crate) fn write_u32(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn read_u64(buf: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(buf[off..off + 8].try_into().unwrap_or_default())
}

pub(crate) fn write_u64(buf: &mut [u8], off: usize, value: u64) {
    buf[off..off + 8].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn read_i64(buf: &[u8], off: usize) -> i64 {
    i64::from_le_bytes(buf[off..off + 8].try_into().unwrap_or_default())
}

pub(crate) fn write_i64(buf: &mut [u8], off: usize, value: i64) {
    buf[off..off + 8].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn read_i32(buf: &[u8], off: usize) -> i32 {
    i32::from_le_bytes(buf[off..off + 4].try_into().unwrap_or_default())
}

pub(crate) fn write_i32(buf: &mut [u8], off: usize, value: i32) {
    buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

/// Reads a NUL-terminated string out of a fixed-width field.
pub(crate) fn read_str(buf: &[u8], off: usize, width: usize) -> String {
    let field = &buf[off..off + width];
    let end = field.iter().position(|&b| b == 0).unwrap_or(width);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Writes a string into a fixed-width field, NUL padded and truncated.
pub(crate) fn write_str(buf: &mut [u8], off: usize, width: usize, value: &str) {
    let field = &mut buf[off..off + width];
    field.fill(0);
    let take = value.len().min(width - 1);
    field[..take].copy_from_slice(&value.as_bytes()[..take]);
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: u32 = 0x4653_4131;

    #[test]
    fn create_then_attach_round_trips_header() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("fsa");
        let region = MappedRegion::create(&path, MAGIC, 64, 3).expect("creates");
        assert_eq!(region.count(), 3);
        assert_eq!(region.generation(), 1);
        drop(region);

        let attached = MappedRegion::attach(&path, MAGIC, 64).expect("attaches");
        assert_eq!(attached.count(), 3);
    }

    #[test]
    fn attach_rejects_wrong_magic() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("fsa");
        MappedRegion::create(&path, MAGIC, 64, 1).expect("creates");
        let err = MappedRegion::attach(&path, 0x1234_5678, 64).unwrap_err();
        assert!(matches!(err, RegionError::BadMagic { .. }));
    }

    #[test]
    fn attach_rejects_truncated_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("fsa");
        let region = MappedRegion::create(&path, MAGIC, 64, 4).expect("creates");
        drop(region);
        let file = OpenOptions::new().write(true).open(&path).expect("opens");
        file.set_len((WORD_OFFSET + 64) as u64).expect("truncates");
        let err = MappedRegion::attach(&path, MAGIC, 64).unwrap_err();
        assert!(matches!(err, RegionError::Truncated { .. }));
    }

    #[test]
    fn records_are_independent_and_persistent() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("fsa");
        let mut region = MappedRegion::create(&path, MAGIC, 16, 2).expect("creates");
        region.record_mut(0).fill(0xaa);
        region.record_mut(1).fill(0xbb);
        region.flush().expect("flushes");
        drop(region);

        let attached = MappedRegion::attach(&path, MAGIC, 16).expect("attaches");
        assert!(attached.record(0).iter().all(|&b| b == 0xaa));
        assert!(attached.record(1).iter().all(|&b| b == 0xbb));
    }

    #[test]
    fn generation_bumps_and_never_reaches_zero() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("fsa");
        let mut region = MappedRegion::create(&path, MAGIC, 8, 1).expect("creates");
        region.bump_generation();
        assert_eq!(region.generation(), 2);

        region.map[GENERATION_OFF..GENERATION_OFF + 4]
            .copy_from_slice(&u32::MAX.to_le_bytes());
        region.bump_generation();
        assert_eq!(region.generation(), 1);
    }

    #[test]
    fn string_fields_nul_terminate_and_truncate() {
        let mut buf = [0u8; 8];
        write_str(&mut buf, 0, 8, "toolongvalue");
        assert_eq!(read_str(&buf, 0, 8), "toolong");
        write_str(&mut buf, 0, 8, "ok");
        assert_eq!(read_str(&buf, 0, 8), "ok");
    }
}
