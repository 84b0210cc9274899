//! Retrieve scheduling and the immediate-retry command.

use queue::{PidState, QueueEntry};

use fsa::host::host_status;

use crate::dispatch::Dispatcher;

impl Dispatcher {
    /// Enqueues a retrieve job for every source whose next check is due
    /// (or for all of them when `force` is set). Returns how many were
    /// enqueued.
    pub fn check_retrieve(&mut self, now: i64, force: bool) -> usize {
        let mut added = 0;
        for dir in 0..self.dra.len() {
            if self.dra.is_disabled(dir) {
                continue;
            }
            if !force && self.dra.next_check_time(dir) > now {
                continue;
            }
            // At most one queue entry per source.
            if self
                .queue
                .iter()
                .any(|e| e.is_retrieve() && e.pos as usize == dir)
            {
                continue;
            }
            let host = self.dra.host_index(dir);
            if self.hsa.host_status(host)
                & (host_status::DISABLED | host_status::STOP_TRANSFER)
                != 0
            {
                continue;
            }
            let priority = self.dra.priority(dir);
            // Retrieve jobs never carry retry demotion; priority and the
            // current time place them.
            let msg_number =
                f64::from(priority.saturating_sub(b'0')) * (now as f64 * 10_000.0);
            self.queue.insert(QueueEntry {
                msg_name: None,
                msg_number,
                creation_time: now,
                pos: dir as u32,
                connect_pos: -1,
                pid: PidState::Pending,
                retries: 0,
                files_to_send: 0,
                file_size_to_send: 0,
                special: 0,
                msg_priority: priority,
            });
            self.hsa
                .set_jobs_queued(host, self.hsa.jobs_queued(host) + 1);
            // Reschedule optimistically; the worker moves it again after
            // an actual poll.
            self.dra
                .set_next_check_time(dir, now + i64::from(self.dra.retry_backoff(dir)));
            added += 1;
        }
        added
    }

    /// The retry channel: an operator wants this host attempted now, so
    /// every gate that would hold it back is released.
    pub fn force_retry_host(&mut self, host: usize, now: i64) {
        if host >= self.hsa.len() {
            return;
        }
        let gated: Vec<_> = self
            .queue
            .iter()
            .filter_map(|e| e.msg_name.as_ref())
            .map(|m| m.job_id)
            .filter(|id| self.error_queue.get(*id).is_some())
            .collect();
        for job_id in gated {
            if self.host_of_job(job_id) == Some(host) {
                self.error_queue.update_time(job_id, now);
            }
        }
        self.hsa.set_first_error_time(host, 0);
        if let Ok(_guard) = self.hsa.lock_host_status(host) {
            self.hsa
                .clear_host_status_bits(host, host_status::AUTO_PAUSE_QUEUE);
        }
    }

    fn host_of_job(&mut self, job_id: afd_core::ids::JobId) -> Option<usize> {
        self.cache
            .lookup(job_id)
            .map(|(_, entry)| entry.host_index as usize)
    }
}

#[cfg(test)]
mod tests {
    use crate::dispatch::testutil::{dispatcher, host_seed, stage_message, FakeSpawner};
    use crate::launch::WorkerKind;
    use afd_core::ids::JobId;
    use afd_core::WorkDir;
    use fsa::host::host_status;
    use fsa::{AfdStatus, DirSeed, Dra, Hsa};

    use super::*;
    use crate::config::FdConfig;

    const NOW: i64 = 1_700_000_000;

    fn dispatcher_with_dirs(dirs: &[DirSeed]) -> (tempfile::TempDir, Dispatcher) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let work = WorkDir::new(tmp.path());
        work.create_all().expect("creates");
        let hsa = Hsa::create(&work.fsa_file(), &[host_seed("alpha")]).expect("creates");
        let dra = Dra::create(&work.fra_file(), dirs).expect("creates");
        let status = AfdStatus::create(&work.status_file()).expect("creates");
        let d = Dispatcher::new(work, FdConfig::default(), hsa, dra, status).expect("builds");
        (tmp, d)
    }

    fn dir_seed(alias: &str) -> DirSeed {
        DirSeed {
            alias: alias.into(),
            url: format!("ftp://feed@alpha.example/{alias}"),
            host_index: 0,
            priority: '3',
            retry_backoff: 60,
            disabled: false,
            remove_after_fetch: false,
        }
    }

    #[test]
    fn due_sources_enqueue_one_retrieve_entry() {
        let (_tmp, mut d) = dispatcher_with_dirs(&[dir_seed("gts")]);
        assert_eq!(d.check_retrieve(NOW, false), 1);
        assert_eq!(d.queue.len(), 1);
        assert!(d.queue.get(0).expect("entry").is_retrieve());
        assert_eq!(d.hsa.jobs_queued(0), 1);
        // A second pass enqueues nothing: one entry per source, and the
        // next check moved into the future.
        assert_eq!(d.check_retrieve(NOW + 1, false), 0);
    }

    #[test]
    fn not_yet_due_sources_wait_unless_forced() {
        let (_tmp, mut d) = dispatcher_with_dirs(&[dir_seed("gts")]);
        d.dra.set_next_check_time(0, NOW + 500);
        assert_eq!(d.check_retrieve(NOW, false), 0);
        assert_eq!(d.check_retrieve(NOW, true), 1);
    }

    #[test]
    fn disabled_sources_and_hosts_are_skipped() {
        let (_tmp, mut d) = dispatcher_with_dirs(&[dir_seed("gts")]);
        d.dra.set_disabled(0, true);
        assert_eq!(d.check_retrieve(NOW, true), 0);
        d.dra.set_disabled(0, false);
        d.hsa.set_host_status_bits(0, host_status::STOP_TRANSFER);
        assert_eq!(d.check_retrieve(NOW, true), 0);
    }

    #[test]
    fn retrieve_entries_start_fetch_workers() {
        let (_tmp, mut d) = dispatcher_with_dirs(&[dir_seed("gts")]);
        d.check_retrieve(NOW, false);
        let mut spawner = FakeSpawner::new();
        assert_eq!(d.try_start(NOW, &mut spawner), 1);
        assert_eq!(spawner.plans[0].kind, WorkerKind::Fetch);
        assert!(spawner.plans[0].args.join(" ").contains("--dir-index 0"));
    }

    #[test]
    fn force_retry_clears_the_gates() {
        let (_tmp, mut d) = dispatcher(&[host_seed("alpha")]);
        let record = stage_message(&d, 1, "alpha", b'5', NOW, &[10]);
        d.admit_message(&record, NOW);
        d.error_queue.add(JobId(1), 10, NOW, NOW + 600);
        d.hsa.set_host_status_bits(0, host_status::AUTO_PAUSE_QUEUE);
        d.hsa.set_first_error_time(0, NOW - 50);

        d.force_retry_host(0, NOW);
        assert!(!d.error_queue.gates(JobId(1), NOW));
        assert_eq!(d.hsa.host_status(0) & host_status::AUTO_PAUSE_QUEUE, 0);
        assert_eq!(d.hsa.first_error_time(0), 0);

        let mut spawner = FakeSpawner::new();
        assert_eq!(d.try_start(NOW, &mut spawner), 1);
    }
}
