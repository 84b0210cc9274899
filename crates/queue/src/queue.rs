//! The priority-ordered job queue.
//!
//! A dense array sorted non-decreasing by `msg_number`. The key encodes
//! priority and age, so older low-priority jobs drift past younger ones
//! only when a retry deliberately raises their key. The retry demotion
//! policy keeps a permanently failing host from starving healthy traffic:
//! the first retries add a fixed constant, later ones add a multiple of
//! the entry's creation time.

use std::fs;
use std::io;
use std::path::Path;

use crate::entry::{PidState, QueueEntry};

/// Retries that still use the fixed demotion constant.
pub const RETRY_THRESHOLD: u32 = 3;

/// Fixed key increase for early retries.
const EARLY_DEMOTION: f64 = 60_000_000.0;

const FILE_MAGIC: u32 = 0x4146_5142; // "AFQB"
const FILE_VERSION: u32 = 1;
const HEADER: usize = 16;

/// The dispatcher's job queue.
#[derive(Debug, Default)]
pub struct MsgQueue {
    entries: Vec<QueueEntry>,
}

impl MsgQueue {
    /// An empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Entries currently queued (pending and in flight).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read access to entry `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&QueueEntry> {
        self.entries.get(index)
    }

    /// Write access to entry `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut QueueEntry> {
        self.entries.get_mut(index)
    }

    /// Iterates entries in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    /// Inserts `entry` at the position its `msg_number` dictates and
    /// returns that position. Equal keys insert after their peers, so two
    /// entries never swap relative order on reinsertion.
    pub fn insert(&mut self, entry: QueueEntry) -> usize {
        let pos = self
            .entries
            .partition_point(|e| e.msg_number.total_cmp(&entry.msg_number).is_le());
        self.entries.insert(pos, entry);
        pos
    }

    /// Removes and returns entry `index`.
    pub fn remove(&mut self, index: usize) -> QueueEntry {
        self.entries.remove(index)
    }

    /// Finds the entry a live worker pid owns.
    #[must_use]
    pub fn position_by_pid(&self, pid: i32) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.pid == PidState::Running(pid))
    }

    /// Finds the first pending entry satisfying `pred`, in priority order.
    pub fn first_pending<F>(&self, pred: F) -> Option<usize>
    where
        F: Fn(&QueueEntry) -> bool,
    {
        self.entries
            .iter()
            .position(|e| e.pid.is_pending() && pred(e))
    }

    /// Counts pending entries satisfying `pred`.
    pub fn count_pending<F>(&self, pred: F) -> usize
    where
        F: Fn(&QueueEntry) -> bool,
    {
        self.entries
            .iter()
            .filter(|e| e.pid.is_pending() && pred(e))
            .count()
    }

    /// Scans for a helper candidate: the first pending retrieve entry
    /// satisfying `pred`. Used when a worker signals willingness to do
    /// more work than its own destination currently offers.
    pub fn helper_candidate<F>(&self, pred: F) -> Option<usize>
    where
        F: Fn(&QueueEntry) -> bool,
    {
        self.entries
            .iter()
            .position(|e| e.pid.is_pending() && e.is_retrieve() && pred(e))
    }

    /// Raises the key of entry `index` after a failed attempt and moves the
    /// entry right to its new position, which is returned.
    ///
    /// Entries whose key already exceeds `max_threshold` are left alone, as
    /// are retrieve entries (their position is recomputed from scratch when
    /// they are re-enqueued).
    pub fn demote(&mut self, index: usize, max_threshold: f64) -> usize {
        let entry = &mut self.entries[index];
        if entry.is_retrieve() || entry.msg_number >= max_threshold {
            return index;
        }
        if entry.retries <= RETRY_THRESHOLD {
            entry.msg_number += EARLY_DEMOTION;
        } else {
            entry.msg_number +=
                entry.creation_time as f64 * 10_000.0 * f64::from(entry.retries - RETRY_THRESHOLD);
        }
        // Bounded rightward walk restores the sort without a full re-sort.
        let mut new_index = index;
        while new_index + 1 < self.entries.len()
            && self.entries[new_index].msg_number > self.entries[new_index + 1].msg_number
        {
            self.entries.swap(new_index, new_index + 1);
            new_index += 1;
        }
        new_index
    }

    /// True when the array is sorted non-decreasing by key (the queue-order
    /// invariant the reconciliation pass asserts).
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.entries
            .windows(2)
            .all(|w| w[0].msg_number.total_cmp(&w[1].msg_number).is_le())
    }

    /// Persists the queue with the given configuration generation.
    pub fn save(&self, path: &Path, generation: u32) -> io::Result<()> {
        let mut buf = Vec::with_capacity(HEADER + self.entries.len() * QueueEntry::ENCODED_SIZE);
        buf.extend_from_slice(&FILE_MAGIC.to_le_bytes());
        buf.extend_from_slice(&FILE_VERSION.to_le_bytes());
        buf.extend_from_slice(&generation.to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            buf.extend_from_slice(&entry.encode());
        }
        fs::write(path, buf)
    }

    /// Loads a previously saved queue. Returns the stored generation.
    /// A missing file yields an empty queue with generation 0; corrupt
    /// records are dropped.
    pub fn load(path: &Path) -> io::Result<(Self, u32)> {
        let data = match fs::read(path) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Self::new(), 0)),
            Err(e) => return Err(e),
        };
        if data.len() < HEADER
            || data[0..4] != FILE_MAGIC.to_le_bytes()
            || data[4..8] != FILE_VERSION.to_le_bytes()
        {
            return Ok((Self::new(), 0));
        }
        let generation = u32::from_le_bytes(data[8..12].try_into().unwrap_or_default());
        let count = u32::from_le_bytes(data[12..16].try_into().unwrap_or_default()) as usize;
        let mut queue = Self::new();
        for i in 0..count {
            let off = HEADER + i * QueueEntry::ENCODED_SIZE;
            let Some(raw) = data.get(off..off + QueueEntry::ENCODED_SIZE) else {
                break;
            };
            let mut fixed = [0u8; QueueEntry::ENCODED_SIZE];
            fixed.copy_from_slice(raw);
            if let Some(mut entry) = QueueEntry::decode(&fixed) {
                // A worker pid from the previous life is meaningless now.
                if entry.pid.pid().is_some() {
                    entry.pid = PidState::Pending;
                    entry.connect_pos = -1;
                }
                queue.insert(entry);
            }
        }
        Ok((queue, generation))
    }
}
