//! The directory retrieval area (one record per retrieve source).

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::region::{
    read_i32, read_i64, read_str, read_u32, write_i32, write_i64, write_str, write_u32,
    MappedRegion, RegionError,
};

const MAGIC: u32 = 0x4146_5241; // "AFRA"

const ALIAS: usize = 0;
const ALIAS_LEN: usize = 40;
const URL: usize = 40;
const URL_LEN: usize = 128;
const HOST_INDEX: usize = 168;
const PRIORITY: usize = 172;
const DISABLED: usize = 173;
const REMOVE: usize = 174;
const NEXT_CHECK: usize = 176;
const RETRY_BACKOFF: usize = 184;
const FILES_QUEUED: usize = 188;

/// Size of one directory record.
pub const DIR_RECORD_SIZE: usize = 192;

/// Start-up description of one retrieve source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DirSeed {
    /// Stable alias used in logs and worker argv.
    pub alias: String,
    /// Source URL to poll.
    pub url: String,
    /// Index of the host record the source belongs to.
    pub host_index: u32,
    /// Message priority assigned to fetched bundles, `'0'..='9'`.
    #[serde(default = "default_priority")]
    pub priority: char,
    /// Seconds between polls.
    #[serde(default = "default_backoff")]
    pub retry_backoff: u32,
    /// Source starts disabled.
    #[serde(default)]
    pub disabled: bool,
    /// Delete the remote original after a successful fetch.
    #[serde(default)]
    pub remove_after_fetch: bool,
}

const fn default_priority() -> char {
    '5'
}
const fn default_backoff() -> u32 {
    60
}

/// The mapped directory retrieval area.
#[derive(Debug)]
pub struct Dra {
    region: MappedRegion,
}

impl Dra {
    /// Creates the area from the configured source table.
    pub fn create(path: &Path, dirs: &[DirSeed]) -> Result<Self, RegionError> {
        let mut region = MappedRegion::create(path, MAGIC, DIR_RECORD_SIZE, dirs.len())?;
        for (i, seed) in dirs.iter().enumerate() {
            let rec = region.record_mut(i);
            write_str(rec, ALIAS, ALIAS_LEN, &seed.alias);
            write_str(rec, URL, URL_LEN, &seed.url);
            write_i32(rec, HOST_INDEX, seed.host_index as i32);
            rec[PRIORITY] = if seed.priority.is_ascii_digit() {
                seed.priority as u8
            } else {
                b'5'
            };
            rec[DISABLED] = u8::from(seed.disabled);
            rec[REMOVE] = u8::from(seed.remove_after_fetch);
            write_u32(rec, RETRY_BACKOFF, seed.retry_backoff);
        }
        region.flush().map_err(|source| RegionError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { region })
    }

    /// Attaches to an existing area.
    pub fn attach(path: &Path) -> Result<Self, RegionError> {
        Ok(Self {
            region: MappedRegion::attach(path, MAGIC, DIR_RECORD_SIZE)?,
        })
    }

    /// Number of retrieve sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.region.count()
    }

    /// True when no sources are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flushes dirty pages.
    pub fn flush(&self) -> io::Result<()> {
        self.region.flush()
    }

    /// Alias of source `i`.
    #[must_use]
    pub fn alias(&self, i: usize) -> String {
        read_str(self.region.record(i), ALIAS, ALIAS_LEN)
    }

    /// Source URL of source `i`.
    #[must_use]
    pub fn url(&self, i: usize) -> String {
        read_str(self.region.record(i), URL, URL_LEN)
    }

    /// Host record the source belongs to.
    #[must_use]
    pub fn host_index(&self, i: usize) -> usize {
        read_i32(self.region.record(i), HOST_INDEX).max(0) as usize
    }

    /// Message priority for fetched bundles.
    #[must_use]
    pub fn priority(&self, i: usize) -> u8 {
        self.region.record(i)[PRIORITY]
    }

    /// True when the operator disabled the source.
    #[must_use]
    pub fn is_disabled(&self, i: usize) -> bool {
        self.region.record(i)[DISABLED] != 0
    }

    /// Enables or disables the source.
    pub fn set_disabled(&mut self, i: usize, disabled: bool) {
        self.region.record_mut(i)[DISABLED] = u8::from(disabled);
    }

    /// True when fetched originals must be deleted at the source.
    #[must_use]
    pub fn remove_after_fetch(&self, i: usize) -> bool {
        self.region.record(i)[REMOVE] != 0
    }

    /// Next poll due time (epoch seconds).
    #[must_use]
    pub fn next_check_time(&self, i: usize) -> i64 {
        read_i64(self.region.record(i), NEXT_CHECK)
    }

    /// Schedules the next poll.
    pub fn set_next_check_time(&mut self, i: usize, when: i64) {
        write_i64(self.region.record_mut(i), NEXT_CHECK, when);
    }

    /// Seconds between polls.
    #[must_use]
    pub fn retry_backoff(&self, i: usize) -> u32 {
        read_u32(self.region.record(i), RETRY_BACKOFF)
    }

    /// Files fetched but not yet dispatched.
    #[must_use]
    pub fn files_queued(&self, i: usize) -> u32 {
        read_u32(self.region.record(i), FILES_QUEUED)
    }

    /// Publishes the fetched-file count.
    pub fn set_files_queued(&mut self, i: usize, value: u32) {
        write_u32(self.region.record_mut(i), FILES_QUEUED, value);
    }
}
