//! The error queue: per-job-id retry back-off.
//!
//! A job-id lands here on its second consecutive transient failure and is
//! time-updated by later failures; success removes it. While an entry's
//! `next_retry` lies in the future the dispatcher starts no worker for that
//! job-id, and burst handoffs skip it the same way.

use rustc_hash::FxHashMap;

use afd_core::ids::JobId;

/// One back-off record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorQueueEntry {
    /// When the job first entered the queue.
    pub first_seen: i64,
    /// The worker exit code that put it here.
    pub exit_code: i32,
    /// Earliest time the next attempt may start.
    pub next_retry: i64,
}

/// The job-id keyed back-off map.
#[derive(Debug, Default)]
pub struct ErrorQueue {
    map: FxHashMap<JobId, ErrorQueueEntry>,
}

impl ErrorQueue {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Job-ids currently backing off.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when no job is backing off.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Adds a job, or updates its retry time when already present.
    pub fn add(&mut self, job_id: JobId, exit_code: i32, now: i64, next_retry: i64) {
        self.map
            .entry(job_id)
            .and_modify(|e| {
                e.exit_code = exit_code;
                e.next_retry = next_retry;
            })
            .or_insert(ErrorQueueEntry {
                first_seen: now,
                exit_code,
                next_retry,
            });
    }

    /// Moves the retry time of an existing entry. Returns false when the
    /// job was not queued (callers then decide whether to add it).
    pub fn update_time(&mut self, job_id: JobId, next_retry: i64) -> bool {
        match self.map.get_mut(&job_id) {
            Some(e) => {
                e.next_retry = next_retry;
                true
            }
            None => false,
        }
    }

    /// Removes a job after success. Returns true when it was present.
    pub fn remove(&mut self, job_id: JobId) -> bool {
        self.map.remove(&job_id).is_some()
    }

    /// The record for a job, if any.
    #[must_use]
    pub fn get(&self, job_id: JobId) -> Option<&ErrorQueueEntry> {
        self.map.get(&job_id)
    }

    /// True while starting this job must be held back.
    #[must_use]
    pub fn gates(&self, job_id: JobId, now: i64) -> bool {
        self.map.get(&job_id).is_some_and(|e| e.next_retry > now)
    }

    /// True when any of the given job-ids is queued; drives the host's
    /// error-queue-set status bit.
    pub fn any_queued<I>(&self, job_ids: I) -> bool
    where
        I: IntoIterator<Item = JobId>,
    {
        job_ids.into_iter().any(|id| self.map.contains_key(&id))
    }
}
