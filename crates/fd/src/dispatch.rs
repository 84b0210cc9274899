//! The dispatcher core: all scheduling state and policy.
//!
//! Every method takes the current time explicitly and talks to processes
//! only through the [`Spawner`](crate::launch::Spawner) trait, so the
//! whole job lifecycle (admit, start, reap, retry, burst) runs under
//! test without a single fork.

mod burst;
mod reap;

use std::io::{self, Write};

use afd_core::ids::JobId;
use afd_core::job::JobSpec;
use afd_core::message::MessageRecord;
use afd_core::WorkDir;
use logging::{DeleteRecord, LogWriter};
use queue::{
    special_flag, CacheEntry, ErrorQueue, MessageCache, MsgQueue, PidState, QueueEntry,
};
use tracing::{debug, warn};

use fsa::host::host_status;
use fsa::slot::{ConnectStatus, MAX_SLOTS};
use fsa::{AfdStatus, Dra, Hsa};

use crate::config::FdConfig;
use crate::connection::{Connection, ConnectionTable};
use crate::launch::{LaunchPlan, Spawner};

const LOG_GENERATIONS: usize = 7;

/// What happened to an admitted message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admit {
    /// Queued at the given position.
    Queued(usize),
    /// The job-id could not be resolved; files went to the delete log.
    Dropped,
}

/// The dispatcher.
pub struct Dispatcher {
    pub(crate) work: WorkDir,
    pub(crate) config: FdConfig,
    pub(crate) hsa: Hsa,
    pub(crate) dra: Dra,
    pub(crate) status: AfdStatus,
    pub(crate) queue: MsgQueue,
    pub(crate) cache: MessageCache,
    pub(crate) error_queue: ErrorQueue,
    pub(crate) connections: ConnectionTable,
    delete_log: LogWriter,
    pub(crate) stopping: bool,
}

impl Dispatcher {
    /// Builds the dispatcher, restoring the persisted queue and cache.
    pub fn new(
        work: WorkDir,
        config: FdConfig,
        hsa: Hsa,
        dra: Dra,
        status: AfdStatus,
    ) -> io::Result<Self> {
        let (queue, _generation) = MsgQueue::load(&work.queue_file())?;
        let cache = MessageCache::load(&work.cache_file())?;
        let delete_log = LogWriter::open(&work.log_dir(), "DELETE_LOG", LOG_GENERATIONS)?;
        let max_connections = config.max_connections;
        Ok(Self {
            work,
            config,
            hsa,
            dra,
            status,
            queue,
            cache,
            error_queue: ErrorQueue::new(),
            connections: ConnectionTable::new(max_connections),
            delete_log,
            stopping: false,
        })
    }

    /// Demotion ceiling: keys above this never move again.
    pub(crate) fn max_threshold(now: i64) -> f64 {
        now as f64 * 10_000.0 * 10.0
    }

    /// Number of live workers still unreaped.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.connections.active()
    }

    /// True once a stop command arrived.
    #[must_use]
    pub const fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Stops admitting new work.
    pub fn begin_stop(&mut self) {
        self.stopping = true;
        self.status.set_fd_state(fsa::FdState::Stopping);
    }

    // --- admission --------------------------------------------------------

    /// Admits one message record from the msg channel.
    pub fn admit_message(&mut self, record: &MessageRecord, now: i64) -> Admit {
        let Ok(msg_name) = record.msg_name() else {
            warn!("unrepresentable message name for job {}", record.job_id);
            return Admit::Dropped;
        };
        let pos = match self.cache.lookup(record.job_id) {
            Some((pos, _)) => pos,
            None => match self.insert_cache_entry(record.job_id, now) {
                Some(pos) => pos,
                None => {
                    self.drop_job_files(&msg_name, record, now);
                    return Admit::Dropped;
                }
            },
        };
        let entry = self.cache.get(pos).copied();
        let Some(entry) = entry else {
            return Admit::Dropped;
        };

        let queued = self.queue.insert(QueueEntry {
            msg_name: Some(msg_name),
            msg_number: record.msg_number(),
            creation_time: record.creation_time,
            pos: pos as u32,
            connect_pos: -1,
            pid: PidState::Pending,
            retries: 0,
            files_to_send: record.files_to_send,
            file_size_to_send: record.file_size_to_send.max(0) as u64,
            special: 0,
            msg_priority: record.msg_priority,
        });

        let host = entry.host_index as usize;
        self.hsa.set_jobs_queued(host, self.hsa.jobs_queued(host) + 1);
        if let Ok(_guard) = self.hsa.lock_host_status(host) {
            self.hsa.add_totals(
                host,
                i64::from(record.files_to_send),
                record.file_size_to_send.max(0),
            );
        }
        self.status.set_jobs_in_queue(self.queue.len() as u32);
        Admit::Queued(queued)
    }

    /// Evaluates the persisted message file of a first-seen job-id.
    fn insert_cache_entry(&mut self, job_id: JobId, now: i64) -> Option<usize> {
        let spec = match JobSpec::evaluate(&self.work.msg_file(job_id), job_id) {
            Ok(spec) => spec,
            Err(e) => {
                warn!("message file of {job_id} does not evaluate: {e}");
                return None;
            }
        };
        let host = self.resolve_host(&spec)?;
        Some(
            self.cache
                .insert(CacheEntry::from_spec(&spec, host as u32, now)),
        )
    }

    /// Maps a destination onto a host record: alias first, then whichever
    /// configured hostname matches.
    pub(crate) fn resolve_host(&self, spec: &JobSpec) -> Option<usize> {
        let wanted = &spec.destination.host;
        if let Some(i) = self.hsa.find(wanted) {
            return Some(i);
        }
        let found =
            (0..self.hsa.len()).find(|&i| self.hsa.effective_hostname(i) == *wanted);
        if found.is_none() {
            warn!("no host record matches {wanted:?}");
        }
        found
    }

    /// Moves an unresolvable job's files into the delete log.
    fn drop_job_files(&mut self, msg_name: &afd_core::ids::MsgName, record: &MessageRecord, now: i64) {
        let spool = self.work.outgoing(msg_name);
        if let Ok(entries) = std::fs::read_dir(&spool) {
            for entry in entries.flatten() {
                let size = entry.metadata().map(|m| m.len()).unwrap_or_default();
                let rec = DeleteRecord {
                    time: now,
                    host: String::new(),
                    filename: entry.file_name().to_string_lossy().into_owned(),
                    size,
                    job_id: record.job_id.0,
                    reason: "no such job".to_owned(),
                };
                let _ = self.delete_log.write_line(&rec.to_string());
            }
        }
        let _ = std::fs::remove_dir_all(&spool);
        let _ = self.delete_log.flush();
    }

    // --- start ------------------------------------------------------------

    /// Starts as many pending jobs as global and per-host capacity allow.
    /// Returns the number of workers launched.
    pub fn try_start(&mut self, now: i64, spawner: &mut dyn Spawner) -> usize {
        if self.stopping {
            return 0;
        }
        let mut launched = 0;
        let mut index = 0;
        while index < self.queue.len() {
            if self.connections.active() >= self.connections.capacity() {
                break;
            }
            let Some(entry) = self.queue.get(index) else {
                break;
            };
            if !entry.pid.is_pending() {
                index += 1;
                continue;
            }
            match self.start_one(index, now, spawner) {
                StartOutcome::Started => {
                    launched += 1;
                    index += 1;
                }
                StartOutcome::Deleted => {
                    // The entry is gone; the same index now names the next.
                }
                StartOutcome::Skipped => index += 1,
            }
        }
        self.status.set_jobs_in_queue(self.queue.len() as u32);
        launched
    }

    fn start_one(&mut self, index: usize, now: i64, spawner: &mut dyn Spawner) -> StartOutcome {
        let entry = self.queue.get(index).cloned().expect("caller checked");
        let (host, age_limit, priority) = match &entry.msg_name {
            Some(_) => {
                let Some(cached) = self.cache.get(entry.pos as usize).copied() else {
                    debug!("queue entry without cache entry, dropping");
                    self.remove_entry(index, now);
                    return StartOutcome::Deleted;
                };
                (
                    cached.host_index as usize,
                    cached.age_limit.or(self.config.default_age_limit),
                    entry.msg_priority,
                )
            }
            None => {
                let dir = entry.pos as usize;
                (self.dra.host_index(dir), None, entry.msg_priority)
            }
        };

        let status = self.hsa.host_status(host);
        if status
            & (host_status::DISABLED | host_status::STOP_TRANSFER | host_status::AUTO_PAUSE_QUEUE)
            != 0
        {
            return StartOutcome::Skipped;
        }

        // The error-queue gate holds a backing-off job-id down even when
        // capacity exists.
        if let Some(msg) = &entry.msg_name
            && self.error_queue.gates(msg.job_id, now)
        {
            return StartOutcome::Skipped;
        }

        // Age-limit expiry deletes instead of starting.
        if let Some(age) = age_limit
            && entry.msg_name.is_some()
            && status & host_status::DO_NOT_DELETE_DATA == 0
            && now - entry.creation_time > i64::from(age)
        {
            self.delete_aged_entry(index, host, now);
            return StartOutcome::Deleted;
        }

        if self.hsa.active_transfers(host) >= self.hsa.allowed_transfers(host) {
            return StartOutcome::Skipped;
        }
        let Some(connect_pos) = self.connections.free_slot() else {
            return StartOutcome::Skipped;
        };
        let Some(job_slot) = self.free_job_slot(host) else {
            return StartOutcome::Skipped;
        };

        // Temp-toggle onto the secondary hostname once the primary has
        // burned through its successful-retry budget.
        let mut temp_toggle = false;
        let max_retries = self.hsa.max_successful_retries(host);
        if max_retries > 0
            && self.hsa.has_secondary(host)
            && !self.hsa.is_temp_toggled(host)
            && self.hsa.error_counter(host) >= max_retries
        {
            self.hsa.temp_toggle(host);
            temp_toggle = true;
        }

        let resend = entry.special & special_flag::RESEND != 0;
        let plan = match &entry.msg_name {
            Some(msg) => LaunchPlan::send(
                &self.work,
                msg,
                host,
                job_slot,
                connect_pos,
                entry.retries,
                resend,
                false,
                self.config.default_age_limit,
                priority,
            ),
            None => LaunchPlan::fetch(
                &self.work,
                entry.pos as usize,
                host,
                job_slot,
                connect_pos,
                priority,
            ),
        };
        let pid = match spawner.spawn(&plan) {
            Ok(pid) => pid,
            Err(e) => {
                warn!("cannot start worker: {e}");
                return StartOutcome::Skipped;
            }
        };

        let installed = self.connections.install(Connection {
            host_index: host,
            job_slot,
            pid,
            msg_name: entry.msg_name.clone(),
            dir_index: entry.msg_name.is_none().then_some(entry.pos as usize),
            temp_toggle,
            resend,
        });
        debug_assert_eq!(installed, Some(connect_pos));

        if let Ok(_guard) = self.hsa.lock_connection(host) {
            self.hsa
                .set_active_transfers(host, self.hsa.active_transfers(host) + 1);
        }
        self.hsa.set_slot_pid(host, job_slot, pid);
        self.hsa
            .set_connect_status(host, job_slot, ConnectStatus::Connecting);
        self.hsa
            .set_jobs_queued(host, self.hsa.jobs_queued(host).saturating_sub(1));

        let entry = self.queue.get_mut(index).expect("still present");
        entry.pid = PidState::Running(pid);
        entry.connect_pos = connect_pos as i32;
        StartOutcome::Started
    }

    /// A job slot on `host` with no live worker, if any.
    fn free_job_slot(&self, host: usize) -> Option<usize> {
        let allowed = (self.hsa.allowed_transfers(host) as usize).min(MAX_SLOTS);
        (0..allowed).find(|&k| self.hsa.slot_pid(host, k) < 0)
    }

    /// Deletes an age-expired entry through the delete log (P5).
    fn delete_aged_entry(&mut self, index: usize, host: usize, now: i64) {
        let entry = self.queue.get(index).cloned().expect("caller checked");
        if let Some(msg) = &entry.msg_name {
            let spool = self.work.outgoing(msg);
            if let Ok(entries) = std::fs::read_dir(&spool) {
                for file in entries.flatten() {
                    let size = file.metadata().map(|m| m.len()).unwrap_or_default();
                    let rec = DeleteRecord {
                        time: now,
                        host: self.hsa.alias(host),
                        filename: file.file_name().to_string_lossy().into_owned(),
                        size,
                        job_id: msg.job_id.0,
                        reason: "age limit".to_owned(),
                    };
                    let _ = self.delete_log.write_line(&rec.to_string());
                }
            }
            let _ = std::fs::remove_dir_all(&spool);
            let _ = self.delete_log.flush();
        }
        self.remove_entry(index, now);
    }

    /// Removes a queue entry, keeping the host's pending counters honest.
    pub(crate) fn remove_entry(&mut self, index: usize, _now: i64) -> QueueEntry {
        let entry = self.queue.remove(index);
        if entry.pid.is_pending() {
            if let Some(host) = self.host_of_entry(&entry) {
                self.hsa
                    .set_jobs_queued(host, self.hsa.jobs_queued(host).saturating_sub(1));
            }
        }
        if let Some(host) = self.host_of_entry(&entry) {
            if let Ok(_guard) = self.hsa.lock_host_status(host) {
                self.hsa.add_totals(
                    host,
                    -i64::from(entry.files_to_send),
                    -(entry.file_size_to_send as i64),
                );
            }
        }
        self.status.set_jobs_in_queue(self.queue.len() as u32);
        entry
    }

    pub(crate) fn host_of_entry(&self, entry: &QueueEntry) -> Option<usize> {
        match &entry.msg_name {
            Some(_) => self
                .cache
                .get(entry.pos as usize)
                .map(|c| c.host_index as usize),
            None => Some(self.dra.host_index(entry.pos as usize)),
        }
    }

    // --- periodic work ----------------------------------------------------

    /// Counter reconciliation: never crash on drift, log and self-correct
    /// instead.
    pub fn reconcile(&mut self) {
        for host in 0..self.hsa.len() {
            // Slot/connection agreement.
            let live_slots = (0..MAX_SLOTS)
                .filter(|&k| self.hsa.slot_pid(host, k) >= 0)
                .count() as u32;
            if self.hsa.active_transfers(host) != live_slots {
                debug!(
                    "host {} active_transfers {} != live slots {live_slots}, correcting",
                    self.hsa.alias(host),
                    self.hsa.active_transfers(host),
                );
                if let Ok(_guard) = self.hsa.lock_connection(host) {
                    self.hsa.set_active_transfers(host, live_slots);
                }
            }
            // Pending-count agreement.
            let pending = self
                .queue
                .count_pending(|e| self.host_of_entry(e) == Some(host))
                as u32;
            if self.hsa.jobs_queued(host) != pending {
                debug!(
                    "host {} jobs_queued {} != pending {pending}, correcting",
                    self.hsa.alias(host),
                    self.hsa.jobs_queued(host),
                );
                self.hsa.set_jobs_queued(host, pending);
            }
            self.refresh_trl(host);
        }
    }

    /// Recomputes one host's per-worker rate share.
    pub fn refresh_trl(&mut self, host: usize) {
        let limit = self.hsa.transfer_rate_limit(host);
        let group = self.hsa.trl_group(host).map(|g| {
            let mut group_limit = 0u64;
            let mut group_active = 0u32;
            for other in 0..self.hsa.len() {
                if self.hsa.trl_group(other) == Some(g) {
                    group_limit = group_limit.max(self.hsa.transfer_rate_limit(other));
                    group_active += self.hsa.active_transfers(other);
                }
            }
            (group_limit, group_active)
        });
        let share =
            bandwidth::per_process_share(limit, self.hsa.active_transfers(host), group)
                .unwrap_or(0);
        self.hsa.set_trl_per_process(host, share);
    }

    /// Persists queue, cache and mapped regions.
    pub fn persist(&mut self) -> io::Result<()> {
        let generation = self.hsa.generation();
        self.queue.save(&self.work.queue_file(), generation)?;
        self.cache.save(&self.work.cache_file(), generation)?;
        self.hsa.flush()?;
        self.dra.flush()?;
        self.status.flush()
    }

    /// Soft- or hard-kills every live worker.
    pub fn kill_all(&mut self, hard: bool, spawner: &mut dyn Spawner) {
        let pids: Vec<i32> = self.connections.iter().map(|(_, c)| c.pid).collect();
        for pid in pids {
            spawner.kill(pid, hard);
        }
    }

    /// Writes a wake byte into a parked worker's control channel. The
    /// open is non-blocking: a worker that already left its read end just
    /// misses a wakeup it no longer needs.
    pub(crate) fn wake_worker(&self, connect_pos: usize) {
        use std::os::unix::fs::OpenOptionsExt;
        let path = worker::control::control_fifo_path(&self.work, connect_pos);
        let _ = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .and_then(|mut f| f.write_all(&[worker::control::WAKE]));
    }
}

enum StartOutcome {
    Started,
    Deleted,
    Skipped,
}


#[cfg(test)]
mod tests {
    use super::testutil::{dispatcher, host_seed, stage_message, FakeSpawner};
    use super::*;
    use crate::launch::WorkerKind;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn admitted_message_lands_in_priority_order() {
        let (_tmp, mut d) = dispatcher(&[host_seed("alpha")]);
        let low = stage_message(&d, 1, "alpha", b'7', NOW, &[10]);
        let high = stage_message(&d, 2, "alpha", b'1', NOW, &[10]);

        assert_eq!(d.admit_message(&low, NOW), Admit::Queued(0));
        // The higher-priority (smaller key) message inserts ahead.
        assert_eq!(d.admit_message(&high, NOW), Admit::Queued(0));
        assert!(d.queue.is_ordered());
        assert_eq!(d.hsa.jobs_queued(0), 2);
        assert_eq!(d.hsa.total_file_counter(0), 2);
    }

    #[test]
    fn unknown_job_id_drops_to_the_delete_log() {
        let (_tmp, mut d) = dispatcher(&[host_seed("alpha")]);
        // No message file staged for job 9: evaluation fails.
        let record = MessageRecord {
            creation_time: NOW,
            job_id: JobId(9),
            split_job_counter: 0,
            files_to_send: 1,
            file_size_to_send: 5,
            dir_no: 1,
            unique_number: 9,
            msg_priority: b'5',
            originator: b'A',
        };
        let spool = d.work.outgoing(&record.msg_name().expect("valid"));
        std::fs::create_dir_all(&spool).expect("creates");
        std::fs::write(spool.join("f"), b"12345").expect("writes");

        assert_eq!(d.admit_message(&record, NOW), Admit::Dropped);
        assert!(!spool.exists());
        let log =
            std::fs::read_to_string(d.work.log_dir().join("DELETE_LOG.0")).expect("log");
        assert!(log.contains("no such job"), "{log}");
        assert!(d.queue.is_empty());
    }

    #[test]
    fn happy_path_starts_one_worker_and_respects_capacity() {
        let (_tmp, mut d) = dispatcher(&[host_seed("alpha")]);
        let a = stage_message(&d, 1, "alpha", b'5', NOW, &[100]);
        let b = stage_message(&d, 2, "alpha", b'5', NOW, &[100]);
        d.admit_message(&a, NOW);
        d.admit_message(&b, NOW);

        let mut spawner = FakeSpawner::new();
        // allowed_transfers = 1, so only one worker starts.
        assert_eq!(d.try_start(NOW, &mut spawner), 1);
        assert_eq!(spawner.plans.len(), 1);
        assert_eq!(spawner.plans[0].kind, WorkerKind::Send);
        assert_eq!(d.hsa.active_transfers(0), 1);
        assert_eq!(d.hsa.jobs_queued(0), 1);
        assert_eq!(d.active_connections(), 1);

        // The started entry references the live worker (P2).
        let started = d.queue.iter().find(|e| !e.pid.is_pending()).expect("one");
        let pid = started.pid.pid().expect("running");
        assert_eq!(d.connections.slot_of_pid(pid), Some(0));
        assert_eq!(d.hsa.slot_pid(0, 0), pid);

        // A second start pass launches nothing more.
        assert_eq!(d.try_start(NOW, &mut spawner), 0);
    }

    #[test]
    fn age_expired_entry_is_deleted_not_started() {
        let (_tmp, mut d) = dispatcher(&[host_seed("alpha")]);
        d.config.default_age_limit = Some(10);
        let old = stage_message(&d, 1, "alpha", b'5', NOW - 20, &[50]);
        d.admit_message(&old, NOW);
        assert_eq!(d.hsa.jobs_queued(0), 1);

        let mut spawner = FakeSpawner::new();
        assert_eq!(d.try_start(NOW, &mut spawner), 0);
        assert!(spawner.plans.is_empty());
        assert!(d.queue.is_empty());
        // jobs_queued decremented by exactly one (P4 bookkeeping).
        assert_eq!(d.hsa.jobs_queued(0), 0);
        let log =
            std::fs::read_to_string(d.work.log_dir().join("DELETE_LOG.0")).expect("log");
        assert!(log.contains("age limit"));
    }

    #[test]
    fn do_not_delete_data_suppresses_age_expiry() {
        let (_tmp, mut d) = dispatcher(&[host_seed("alpha")]);
        d.config.default_age_limit = Some(10);
        d.hsa
            .set_host_status_bits(0, host_status::DO_NOT_DELETE_DATA);
        let old = stage_message(&d, 1, "alpha", b'5', NOW - 20, &[50]);
        d.admit_message(&old, NOW);

        let mut spawner = FakeSpawner::new();
        assert_eq!(d.try_start(NOW, &mut spawner), 1);
    }

    #[test]
    fn error_queue_gate_blocks_starting() {
        let (_tmp, mut d) = dispatcher(&[host_seed("alpha")]);
        let record = stage_message(&d, 1, "alpha", b'5', NOW, &[50]);
        d.admit_message(&record, NOW);
        d.error_queue.add(JobId(1), 10, NOW, NOW + 120);

        let mut spawner = FakeSpawner::new();
        assert_eq!(d.try_start(NOW, &mut spawner), 0);
        // Once the back-off elapses the job starts.
        assert_eq!(d.try_start(NOW + 121, &mut spawner), 1);
    }

    #[test]
    fn disabled_and_paused_hosts_are_skipped() {
        let (_tmp, mut d) = dispatcher(&[host_seed("alpha")]);
        let record = stage_message(&d, 1, "alpha", b'5', NOW, &[50]);
        d.admit_message(&record, NOW);

        let mut spawner = FakeSpawner::new();
        d.hsa.set_host_status_bits(0, host_status::AUTO_PAUSE_QUEUE);
        assert_eq!(d.try_start(NOW, &mut spawner), 0);
        d.hsa.clear_host_status_bits(0, host_status::AUTO_PAUSE_QUEUE);
        d.hsa.set_host_status_bits(0, host_status::DISABLED);
        assert_eq!(d.try_start(NOW, &mut spawner), 0);
        d.hsa.clear_host_status_bits(0, host_status::DISABLED);
        assert_eq!(d.try_start(NOW, &mut spawner), 1);
    }

    #[test]
    fn reconcile_corrects_counter_drift() {
        let (_tmp, mut d) = dispatcher(&[host_seed("alpha")]);
        // Drift both counters on purpose.
        d.hsa.set_active_transfers(0, 4);
        d.hsa.set_jobs_queued(0, 9);
        d.reconcile();
        assert_eq!(d.hsa.active_transfers(0), 0);
        assert_eq!(d.hsa.jobs_queued(0), 0);
    }

    #[test]
    fn trl_share_follows_active_transfers() {
        let mut seed = host_seed("alpha");
        seed.transfer_rate_limit = 8_000;
        seed.allowed_transfers = 2;
        let (_tmp, mut d) = dispatcher(&[seed]);
        let a = stage_message(&d, 1, "alpha", b'5', NOW, &[10]);
        let b = stage_message(&d, 2, "alpha", b'5', NOW, &[10]);
        d.admit_message(&a, NOW);
        d.admit_message(&b, NOW);

        let mut spawner = FakeSpawner::new();
        assert_eq!(d.try_start(NOW, &mut spawner), 2);
        d.refresh_trl(0);
        assert_eq!(d.hsa.trl_per_process(0), 4_000);
    }

    #[test]
    fn stopping_admits_nothing_new() {
        let (_tmp, mut d) = dispatcher(&[host_seed("alpha")]);
        let record = stage_message(&d, 1, "alpha", b'5', NOW, &[50]);
        d.admit_message(&record, NOW);
        d.begin_stop();
        let mut spawner = FakeSpawner::new();
        assert_eq!(d.try_start(NOW, &mut spawner), 0);
    }

    #[test]
    fn persist_round_trips_the_queue() {
        let (tmp, mut d) = dispatcher(&[host_seed("alpha")]);
        let record = stage_message(&d, 1, "alpha", b'5', NOW, &[50]);
        d.admit_message(&record, NOW);
        d.persist().expect("persists");

        let work = WorkDir::new(tmp.path());
        let (loaded, _) = MsgQueue::load(&work.queue_file()).expect("loads");
        assert_eq!(loaded.len(), 1);
        let cache = MessageCache::load(&work.cache_file()).expect("loads");
        assert_eq!(cache.len(), 1);
    }
}
