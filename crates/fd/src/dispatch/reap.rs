//! Worker termination classification.
//!
//! The reap path never aborts on a worker outcome: every exit code maps
//! onto a queue action (clear, requeue, demote, drop) and a host-state
//! update, and an unmatched pid is an invariant violation that is logged
//! and self-corrected, never fatal.

use afd_core::exit::{Outcome, WorkerExit};
use queue::PidState;
use tracing::{debug, info};

use fsa::host::host_status;
use fsa::slot::ConnectStatus;

use super::Dispatcher;
use crate::connection::Connection;

/// Consecutive errors before the queue auto-pauses.
const AUTO_PAUSE_ERRORS: u32 = 10;

impl Dispatcher {
    /// Classifies one reaped worker (§exit handling) and applies the
    /// outcome to queue and host state.
    pub fn handle_exit(&mut self, pid: i32, raw_status: i32, now: i64) {
        let Some(connect_pos) = self.connections.slot_of_pid(pid) else {
            debug!("reaped pid {pid} has no connection slot, ignoring");
            return;
        };
        let connection = self
            .connections
            .release(connect_pos)
            .expect("slot_of_pid said so");
        self.release_host_slot(&connection);

        let Some(index) = self.queue.position_by_pid(pid) else {
            debug!("reaped pid {pid} has no queue entry, counters corrected");
            self.reconcile();
            return;
        };
        if let Some(entry) = self.queue.get_mut(index) {
            entry.retries += 1;
            entry.pid = PidState::Removed;
            entry.connect_pos = -1;
        }

        let outcome = WorkerExit::classify_raw(raw_status);
        match outcome {
            Outcome::Success => self.on_success(&connection, index, now, false),
            Outcome::StillFiles => self.on_success(&connection, index, now, true),
            Outcome::Malformed => self.on_malformed(&connection, index, now),
            Outcome::Transient => {
                self.on_faulty(&connection, index, raw_status, now, false);
            }
            Outcome::SemiPermanent => {
                self.on_faulty(&connection, index, raw_status, now, true);
            }
            Outcome::UnknownFaulty => {
                debug!("worker {pid} exited with unknown status {raw_status}");
                self.on_faulty(&connection, index, raw_status, now, true);
            }
            Outcome::NoFiles => self.on_no_files(&connection, index, now),
            Outcome::Killed => self.on_killed(&connection, index),
        }
        self.status.set_jobs_in_queue(self.queue.len() as u32);
    }

    /// Frees the host-side slot and connection accounting.
    fn release_host_slot(&mut self, connection: &Connection) {
        let host = connection.host_index;
        self.hsa.set_slot_pid(host, connection.job_slot, -1);
        self.hsa
            .set_connect_status(host, connection.job_slot, ConnectStatus::Disconnected);
        if let Ok(_guard) = self.hsa.lock_connection(host) {
            let active = self.hsa.active_transfers(host);
            self.hsa.set_active_transfers(host, active.saturating_sub(1));
        }
        self.refresh_trl(host);
    }

    fn on_success(&mut self, connection: &Connection, index: usize, now: i64, still_files: bool) {
        let host = connection.host_index;
        // A success while temp-toggled switches back to the primary.
        if self.hsa.is_temp_toggled(host) && self.hsa.restore_toggle(host) {
            info!(
                "switching back to primary hostname of {} after successful transfer",
                self.hsa.alias(host)
            );
        }
        self.hsa.set_successful_retries(host, 0);
        self.hsa.set_last_connection(host, now);
        self.hsa.set_first_error_time(host, 0);

        if let Some(msg) = &connection.msg_name
            && self.error_queue.remove(msg.job_id)
            && !self.host_has_error_queued(host)
            && let Ok(_guard) = self.hsa.lock_host_status(host)
        {
            self.hsa
                .clear_host_status_bits(host, host_status::ERROR_QUEUE_SET);
        }

        if still_files {
            // More files arrived for the same message: leave it queued.
            if let Some(entry) = self.queue.get_mut(index) {
                entry.pid = PidState::Pending;
                entry.retries = 0;
            }
            self.hsa
                .set_jobs_queued(host, self.hsa.jobs_queued(host) + 1);
        } else {
            self.remove_entry(index, now);
        }
    }

    fn on_malformed(&mut self, connection: &Connection, index: usize, now: i64) {
        let entry = self.remove_entry(index, now);
        if let Some(msg) = &entry.msg_name {
            // The job itself is broken: its files can never leave.
            let spool = self.work.outgoing(msg);
            let _ = std::fs::remove_dir_all(&spool);
            debug!(
                "dropped malformed job {} for {}",
                msg.job_id,
                self.hsa.alias(connection.host_index)
            );
        }
    }

    fn on_faulty(
        &mut self,
        connection: &Connection,
        index: usize,
        raw_status: i32,
        now: i64,
        demote: bool,
    ) {
        let host = connection.host_index;

        // A failure on the temp-toggled fallback host is expected noise
        // and is not held against the host.
        if !connection.temp_toggle {
            if let Ok(_guard) = self.hsa.lock_error_counter(host) {
                let errors = self.hsa.error_counter(host) + 1;
                self.hsa.set_error_counter(host, errors);
                self.hsa.push_error_history(host, raw_status.clamp(0, 255) as u8);
                if errors >= AUTO_PAUSE_ERRORS
                    && let Ok(_hs) = self.hsa.lock_host_status(host)
                {
                    self.hsa
                        .set_host_status_bits(host, host_status::AUTO_PAUSE_QUEUE);
                }
            }
            if self.hsa.first_error_time(host) == 0 {
                self.hsa.set_first_error_time(host, now);
            }
        }

        // Requeue as pending for the retry machinery.
        let retries = {
            let entry = self.queue.get_mut(index).expect("entry present");
            entry.pid = PidState::Pending;
            entry.connect_pos = -1;
            entry.special |= queue::special_flag::IN_ERROR_QUEUE;
            entry.retries
        };
        self.hsa
            .set_jobs_queued(host, self.hsa.jobs_queued(host) + 1);

        // Error-queue bookkeeping: inserted on the second consecutive
        // failure, time-updated afterwards; the same gate covers normal
        // starts and burst handoffs.
        if let Some(msg) = connection.msg_name.as_ref() {
            let next = now + i64::from(self.hsa.retry_interval(host));
            if !self.error_queue.update_time(msg.job_id, next) && retries >= 2 {
                self.error_queue.add(msg.job_id, raw_status, now, next);
                if let Ok(_guard) = self.hsa.lock_host_status(host) {
                    self.hsa
                        .set_host_status_bits(host, host_status::ERROR_QUEUE_SET);
                }
            }
        }

        let no_ageing =
            self.hsa.protocol_options(host) & fsa::host::protocol_options::NO_AGEING_JOBS != 0;
        if demote && !no_ageing {
            self.queue.demote(index, Self::max_threshold(now));
        }
    }

    fn on_no_files(&mut self, connection: &Connection, index: usize, now: i64) {
        let host = connection.host_index;
        self.remove_entry(index, now);
        // Deadlock guard: nothing waits and the queue is auto-paused, so
        // nothing would ever clear the pause.
        if self.hsa.total_file_counter(host) == 0
            && self.hsa.total_file_size(host) == 0
            && self.hsa.host_status(host) & host_status::AUTO_PAUSE_QUEUE != 0
        {
            if self.hsa.error_counter(host) > 0
                && let Ok(_guard) = self.hsa.lock_error_counter(host)
            {
                self.hsa.set_error_counter(host, 0);
                self.hsa.clear_error_history(host);
            }
            if let Ok(_guard) = self.hsa.lock_host_status(host) {
                self.hsa
                    .clear_host_status_bits(host, host_status::AUTO_PAUSE_QUEUE);
            }
            info!("auto-pause cleared on {} (queue drained)", self.hsa.alias(host));
        }
    }

    fn on_killed(&mut self, connection: &Connection, index: usize) {
        // Administrative kill is not a fault; the job goes back to
        // pending so a restart picks it up.
        if let Some(entry) = self.queue.get_mut(index) {
            entry.pid = PidState::Pending;
            entry.connect_pos = -1;
        }
        self.hsa.set_jobs_queued(
            connection.host_index,
            self.hsa.jobs_queued(connection.host_index) + 1,
        );
    }

    /// True while any queue entry of this host still sits in the error
    /// queue.
    fn host_has_error_queued(&self, host: usize) -> bool {
        self.queue.iter().any(|e| {
            e.msg_name.as_ref().is_some_and(|m| {
                self.host_of_entry(e) == Some(host) && self.error_queue.get(m.job_id).is_some()
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{dispatcher, host_seed, stage_message, FakeSpawner};
    use super::*;
    use afd_core::ids::JobId;

    const NOW: i64 = 1_700_000_000;

    /// Admits one staged message and starts its worker.
    fn start_one(
        d: &mut Dispatcher,
        spawner: &mut FakeSpawner,
        job: u32,
        priority: u8,
    ) -> i32 {
        let record = stage_message(d, job, "alpha", priority, NOW, &[100]);
        d.admit_message(&record, NOW);
        assert_eq!(d.try_start(NOW, spawner), 1);
        d.queue
            .iter()
            .find_map(|e| e.pid.pid())
            .expect("worker running")
    }

    #[test]
    fn success_clears_entry_and_host_error_state() {
        let (_tmp, mut d) = dispatcher(&[host_seed("alpha")]);
        let mut spawner = FakeSpawner::new();
        let pid = start_one(&mut d, &mut spawner, 1, b'5');
        d.hsa.set_first_error_time(0, NOW - 100);

        d.handle_exit(pid, WorkerExit::TransferSuccess.as_i32(), NOW);
        assert!(d.queue.is_empty());
        assert_eq!(d.active_connections(), 0);
        assert_eq!(d.hsa.active_transfers(0), 0);
        assert_eq!(d.hsa.slot_pid(0, 0), -1);
        assert_eq!(d.hsa.first_error_time(0), 0);
        assert_eq!(d.hsa.last_connection(0), NOW);
    }

    #[test]
    fn two_timeouts_build_the_error_queue_back_off() {
        let (_tmp, mut d) = dispatcher(&[host_seed("alpha")]);
        let mut spawner = FakeSpawner::new();

        // First timeout: error state raised, not yet error-queued.
        let pid = start_one(&mut d, &mut spawner, 1, b'5');
        d.handle_exit(pid, WorkerExit::Timeout.as_i32(), NOW);
        assert_eq!(d.hsa.first_error_time(0), NOW);
        assert_eq!(d.hsa.error_counter(0), 1);
        assert!(!d.error_queue.gates(JobId(1), NOW));

        // Second attempt, second timeout: the job-id is gated now.
        assert_eq!(d.try_start(NOW, &mut spawner), 1);
        let pid = d.queue.iter().find_map(|e| e.pid.pid()).expect("running");
        d.handle_exit(pid, WorkerExit::Timeout.as_i32(), NOW + 10);
        assert!(d.error_queue.gates(JobId(1), NOW + 20));
        assert_ne!(d.hsa.host_status(0) & host_status::ERROR_QUEUE_SET, 0);

        // Before the back-off elapses nothing starts despite capacity.
        assert_eq!(d.try_start(NOW + 20, &mut spawner), 0);
        // After it elapses the retry goes out.
        assert_eq!(d.try_start(NOW + 10 + 121, &mut spawner), 1);
    }

    #[test]
    fn error_history_records_the_exit_codes() {
        let (_tmp, mut d) = dispatcher(&[host_seed("alpha")]);
        let mut spawner = FakeSpawner::new();
        let pid = start_one(&mut d, &mut spawner, 1, b'5');
        d.handle_exit(pid, WorkerExit::Connect.as_i32(), NOW);
        assert_eq!(d.hsa.error_history(0)[0], WorkerExit::Connect.as_i32() as u8);
    }

    #[test]
    fn semi_permanent_failure_demotes_the_entry() {
        let (_tmp, mut d) = dispatcher(&[host_seed("alpha"), host_seed("beta")]);
        let mut spawner = FakeSpawner::new();

        // Job on alpha fails; a healthy contemporaneous job sits on beta.
        let failing = stage_message(&d, 1, "alpha", b'5', NOW, &[100]);
        let healthy = stage_message(&d, 2, "beta", b'5', NOW + 1, &[100]);
        d.admit_message(&failing, NOW);
        d.admit_message(&healthy, NOW);
        let before = d.queue.get(0).expect("entry").msg_number;

        assert_eq!(d.try_start(NOW, &mut spawner), 2);
        let pid = d
            .queue
            .iter()
            .find(|e| e.msg_name.as_ref().is_some_and(|m| m.job_id == JobId(1)))
            .and_then(|e| e.pid.pid())
            .expect("running");

        // Fail it through the demotion threshold.
        for round in 0..queue::RETRY_THRESHOLD + 1 {
            d.handle_exit(pid, WorkerExit::Chdir.as_i32(), NOW + i64::from(round));
            let index = d
                .queue
                .iter()
                .position(|e| e.msg_name.as_ref().is_some_and(|m| m.job_id == JobId(1)))
                .expect("still queued");
            if round < queue::RETRY_THRESHOLD {
                // Re-arm for the next round.
                let entry = d.queue.get_mut(index).expect("entry");
                entry.pid = queue::PidState::Running(pid);
                d.connections.install(crate::connection::Connection {
                    host_index: 0,
                    job_slot: 0,
                    pid,
                    msg_name: entry.msg_name.clone(),
                    dir_index: None,
                    temp_toggle: false,
                    resend: false,
                });
                d.hsa.set_slot_pid(0, 0, pid);
            }
        }

        // After RETRY_THRESHOLD+1 failures the key grew past the
        // creation-time scale and the entry sorted behind healthy traffic.
        let entry = d
            .queue
            .iter()
            .find(|e| e.msg_name.as_ref().is_some_and(|m| m.job_id == JobId(1)))
            .expect("still queued");
        assert!(
            entry.msg_number > before + NOW as f64 * 10_000.0,
            "key {} vs {before}",
            entry.msg_number
        );
        assert!(d.queue.is_ordered());
        let last = d.queue.get(d.queue.len() - 1).expect("entry");
        assert_eq!(
            last.msg_name.as_ref().map(|m| m.job_id),
            Some(JobId(1)),
            "failing job must sort last"
        );
    }

    #[test]
    fn no_ageing_hosts_skip_demotion() {
        let mut seed = host_seed("alpha");
        seed.protocol_options = fsa::host::protocol_options::NO_AGEING_JOBS;
        let (_tmp, mut d) = dispatcher(&[seed]);
        let mut spawner = FakeSpawner::new();
        let pid = start_one(&mut d, &mut spawner, 1, b'5');
        let before = d.queue.get(0).expect("entry").msg_number;

        d.handle_exit(pid, WorkerExit::Chdir.as_i32(), NOW);
        assert_eq!(d.queue.get(0).expect("entry").msg_number, before);
    }

    #[test]
    fn malformed_job_is_dropped_with_its_files() {
        let (_tmp, mut d) = dispatcher(&[host_seed("alpha")]);
        let mut spawner = FakeSpawner::new();
        let pid = start_one(&mut d, &mut spawner, 1, b'5');
        let msg = d
            .connections
            .get(0)
            .and_then(|c| c.msg_name.clone());
        let spool = d.work.outgoing(&msg.expect("send job"));
        assert!(spool.exists());

        d.handle_exit(pid, WorkerExit::NoMessageFile.as_i32(), NOW);
        assert!(d.queue.is_empty());
        assert!(!spool.exists());
    }

    #[test]
    fn got_killed_requeues_without_fault() {
        let (_tmp, mut d) = dispatcher(&[host_seed("alpha")]);
        let mut spawner = FakeSpawner::new();
        let pid = start_one(&mut d, &mut spawner, 1, b'5');

        d.handle_exit(pid, WorkerExit::GotKilled.as_i32(), NOW);
        assert_eq!(d.hsa.error_counter(0), 0);
        assert_eq!(d.queue.len(), 1);
        assert!(d.queue.get(0).expect("entry").pid.is_pending());
        assert_eq!(d.hsa.jobs_queued(0), 1);
    }

    #[test]
    fn no_files_clears_a_drained_auto_pause() {
        let (_tmp, mut d) = dispatcher(&[host_seed("alpha")]);
        let mut spawner = FakeSpawner::new();
        let pid = start_one(&mut d, &mut spawner, 1, b'5');
        d.hsa.set_host_status_bits(0, host_status::AUTO_PAUSE_QUEUE);
        d.hsa.set_error_counter(0, 5);

        d.handle_exit(pid, WorkerExit::NoFilesToSend.as_i32(), NOW);
        assert_eq!(d.hsa.host_status(0) & host_status::AUTO_PAUSE_QUEUE, 0);
        assert_eq!(d.hsa.error_counter(0), 0);
        assert!(d.queue.is_empty());
    }

    #[test]
    fn unknown_exit_codes_count_as_faulty() {
        let (_tmp, mut d) = dispatcher(&[host_seed("alpha")]);
        let mut spawner = FakeSpawner::new();
        let pid = start_one(&mut d, &mut spawner, 1, b'5');
        d.handle_exit(pid, 99, NOW);
        assert_eq!(d.hsa.error_counter(0), 1);
        assert_eq!(d.queue.len(), 1);
    }

    #[test]
    fn unmatched_pid_is_survived() {
        let (_tmp, mut d) = dispatcher(&[host_seed("alpha")]);
        d.handle_exit(4242, 0, NOW);
        assert!(d.queue.is_empty());
    }
}
