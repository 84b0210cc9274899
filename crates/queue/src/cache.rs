//! The message cache: job-id to evaluated transfer parameters.
//!
//! Entries are created the first time a job-id appears, refreshed when the
//! persisted message file is re-evaluated, and destroyed only at restart or
//! by an explicit garbage collect. Lookups carry a one-entry last-lookup
//! cache because messages arrive clustered by job.

use std::fs;
use std::io;
use std::path::Path;

use rustc_hash::FxHashMap;

use afd_core::ids::JobId;
use afd_core::job::{JobSpec, ProtocolKind};

const FILE_MAGIC: u32 = 0x4146_4d43; // "AFMC"
const FILE_VERSION: u32 = 1;
const HEADER: usize = 16;
const ENTRY_SIZE: usize = 32;

/// Cached per-job transfer parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    /// The rule this entry describes.
    pub job_id: JobId,
    /// Transfer protocol of the destination.
    pub protocol: ProtocolKind,
    /// Destination port.
    pub port: u16,
    /// Index of the destination host record.
    pub host_index: u32,
    /// Seconds after which waiting files are dropped instead of sent.
    pub age_limit: Option<u32>,
    /// Last time a transfer for this job ran.
    pub last_transfer_time: i64,
    /// False once a configuration reload no longer lists the job.
    pub in_current_config: bool,
}

impl CacheEntry {
    /// Builds a cache entry from an evaluated job spec.
    #[must_use]
    pub fn from_spec(spec: &JobSpec, host_index: u32, now: i64) -> Self {
        Self {
            job_id: spec.job_id,
            protocol: spec.destination.protocol,
            port: spec.destination.port,
            host_index,
            age_limit: spec.age_limit,
            last_transfer_time: now,
            in_current_config: true,
        }
    }

    fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0..4].copy_from_slice(&self.job_id.0.to_le_bytes());
        buf[4] = self.protocol.as_u8();
        buf[5] = u8::from(self.in_current_config);
        buf[6..8].copy_from_slice(&self.port.to_le_bytes());
        buf[8..12].copy_from_slice(&self.host_index.to_le_bytes());
        buf[12..16].copy_from_slice(&self.age_limit.unwrap_or(u32::MAX).to_le_bytes());
        buf[16..24].copy_from_slice(&self.last_transfer_time.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; ENTRY_SIZE]) -> Option<Self> {
        let age = u32::from_le_bytes(buf[12..16].try_into().unwrap_or_default());
        Some(Self {
            job_id: JobId(u32::from_le_bytes(buf[0..4].try_into().unwrap_or_default())),
            protocol: ProtocolKind::from_u8(buf[4])?,
            port: u16::from_le_bytes(buf[6..8].try_into().unwrap_or_default()),
            host_index: u32::from_le_bytes(buf[8..12].try_into().unwrap_or_default()),
            age_limit: (age != u32::MAX).then_some(age),
            last_transfer_time: i64::from_le_bytes(buf[16..24].try_into().unwrap_or_default()),
            in_current_config: buf[5] != 0,
        })
    }
}

/// The job-id keyed cache ("mdb").
#[derive(Debug, Default)]
pub struct MessageCache {
    entries: Vec<CacheEntry>,
    index: FxHashMap<JobId, usize>,
    last: Option<(JobId, usize)>,
}

impl MessageCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Access by dense position (the `pos` stored in queue entries).
    #[must_use]
    pub fn get(&self, pos: usize) -> Option<&CacheEntry> {
        self.entries.get(pos)
    }

    /// Looks up a job-id, remembering it for the next call.
    pub fn lookup(&mut self, job_id: JobId) -> Option<(usize, &CacheEntry)> {
        if let Some((cached_id, pos)) = self.last
            && cached_id == job_id
        {
            return Some((pos, &self.entries[pos]));
        }
        let pos = *self.index.get(&job_id)?;
        self.last = Some((job_id, pos));
        Some((pos, &self.entries[pos]))
    }

    /// Inserts or refreshes an entry, returning its position.
    pub fn insert(&mut self, entry: CacheEntry) -> usize {
        if let Some(&pos) = self.index.get(&entry.job_id) {
            self.entries[pos] = entry;
            self.last = Some((entry.job_id, pos));
            return pos;
        }
        let pos = self.entries.len();
        self.index.insert(entry.job_id, pos);
        self.entries.push(entry);
        self.last = Some((entry.job_id, pos));
        pos
    }

    /// Updates the last-transfer time of a job.
    pub fn touch(&mut self, job_id: JobId, now: i64) {
        if let Some(&pos) = self.index.get(&job_id) {
            self.entries[pos].last_transfer_time = now;
        }
    }

    /// Flags every entry whose job-id is absent from `current` as no longer
    /// configured; used by stale-job removal on reload.
    pub fn mark_config(&mut self, current: &dyn Fn(JobId) -> bool) {
        for entry in &mut self.entries {
            entry.in_current_config = current(entry.job_id);
        }
    }

    /// Drops entries not touched since `cutoff` and no longer configured.
    /// Positions shift, so callers must re-resolve stored positions after
    /// a collect; the dispatcher only runs this while the queue is empty.
    pub fn collect_garbage(&mut self, cutoff: i64) {
        self.entries
            .retain(|e| e.in_current_config || e.last_transfer_time >= cutoff);
        self.index.clear();
        for (pos, entry) in self.entries.iter().enumerate() {
            self.index.insert(entry.job_id, pos);
        }
        self.last = None;
    }

    /// Persists the cache.
    pub fn save(&self, path: &Path, generation: u32) -> io::Result<()> {
        let mut buf = Vec::with_capacity(HEADER + self.entries.len() * ENTRY_SIZE);
        buf.extend_from_slice(&FILE_MAGIC.to_le_bytes());
        buf.extend_from_slice(&FILE_VERSION.to_le_bytes());
        buf.extend_from_slice(&generation.to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            buf.extend_from_slice(&entry.encode());
        }
        fs::write(path, buf)
    }

    /// Loads a previously saved cache; missing or corrupt files give an
    /// empty cache.
    pub fn load(path: &Path) -> io::Result<Self> {
        let data = match fs::read(path) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e),
        };
        if data.len() < HEADER
            || data[0..4] != FILE_MAGIC.to_le_bytes()
            || data[4..8] != FILE_VERSION.to_le_bytes()
        {
            return Ok(Self::new());
        }
        let count = u32::from_le_bytes(data[12..16].try_into().unwrap_or_default()) as usize;
        let mut cache = Self::new();
        for i in 0..count {
            let off = HEADER + i * ENTRY_SIZE;
            let Some(raw) = data.get(off..off + ENTRY_SIZE) else {
                break;
            };
            let mut fixed = [0u8; ENTRY_SIZE];
            fixed.copy_from_slice(raw);
            if let Some(entry) = CacheEntry::decode(&fixed) {
                cache.insert(entry);
            }
        }
        Ok(cache)
    }
}
