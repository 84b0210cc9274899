//! Supervisor-side burst handoff.
//!
//! A worker that finished its batch with keep-alive available signals the
//! fin channel with its negated pid and parks in its slot. The dispatcher
//! looks for another pending send job with the same host, protocol type
//! and destination port (and not gated by the error queue), writes that
//! job's message name into the slot, re-points the queue entry at the live
//! worker, and retires the old entry, all without the worker ever
//! reconnecting.

use queue::PidState;
use tracing::debug;

use fsa::slot::transition;

use super::Dispatcher;

impl Dispatcher {
    /// One value read from the fin channel: negative means burst-ready.
    /// Returns true when the value was a burst signal (the caller reaps
    /// normally otherwise).
    pub fn handle_fin(&mut self, value: i32, now: i64) -> bool {
        if value < 0 {
            self.burst_ready(-value, now);
            true
        } else {
            false
        }
    }

    /// Tries to hand a parked worker its next job.
    ///
    /// Returns true when a handoff happened; false leaves the worker to
    /// time out and exit on its own.
    pub fn burst_ready(&mut self, pid: i32, now: i64) -> bool {
        let Some(connect_pos) = self.connections.slot_of_pid(pid) else {
            debug!("burst signal from unknown pid {pid}");
            return false;
        };
        let (host, job_slot) = {
            let c = self.connections.get(connect_pos).expect("live");
            (c.host_index, c.job_slot)
        };
        let Some(cur_index) = self.queue.position_by_pid(pid) else {
            debug!("burst signal from pid {pid} without a queue entry");
            return false;
        };

        // Bursting may be disabled per host.
        if self.hsa.protocol_options(host) & fsa::host::protocol_options::DISABLE_BURSTING != 0 {
            self.release_parked_slot(host, job_slot);
            return false;
        }

        // The current job fixes the {protocol, port} a follow-up must match.
        let Some((cur_protocol, cur_port)) = self
            .queue
            .get(cur_index)
            .and_then(|e| self.cache.get(e.pos as usize))
            .map(|c| (c.protocol, c.port))
        else {
            self.release_parked_slot(host, job_slot);
            return false;
        };

        let next_index = self.queue.first_pending(|e| {
            e.msg_name.is_some()
                && self
                    .cache
                    .get(e.pos as usize)
                    .is_some_and(|c| {
                        c.host_index as usize == host
                            && c.protocol == cur_protocol
                            && c.port == cur_port
                    })
                && e.msg_name
                    .as_ref()
                    .is_none_or(|m| !self.error_queue.gates(m.job_id, now))
        });
        let Some(next_index) = next_index else {
            self.enqueue_helper_job(host, now);
            self.release_parked_slot(host, job_slot);
            return false;
        };

        let next_msg = self
            .queue
            .get(next_index)
            .and_then(|e| e.msg_name.clone())
            .expect("matched entries carry names");
        let next_retries = self.queue.get(next_index).map_or(0, |e| e.retries);

        // Hand over under the slot lock; the worker can only be Parked or
        // already GivingUp here, and GivingUp means we lost the race.
        let handed = match self.hsa.lock_slot(host, job_slot) {
            Ok(_guard) => {
                let (state, nonce) = self.hsa.burst_state(host, job_slot);
                match transition::hand_off(state, nonce) {
                    Ok((next_state, next_nonce)) => {
                        self.hsa.set_handoff_msg(host, job_slot, &next_msg);
                        self.hsa.set_slot_job_id(host, job_slot, next_msg.job_id);
                        self.hsa.set_burst_state(host, job_slot, next_state, next_nonce);
                        true
                    }
                    Err(e) => {
                        debug!("worker {pid} no longer parked: {e:?}");
                        false
                    }
                }
            }
            Err(e) => {
                debug!("cannot lock slot for handoff: {e}");
                false
            }
        };
        if !handed {
            return false;
        }

        // Retire the finished entry first, then point the follow-up entry
        // at the live worker.
        let connect_pos_i32 = connect_pos as i32;
        self.remove_entry(cur_index, now);
        let adjusted = if next_index > cur_index {
            next_index - 1
        } else {
            next_index
        };
        if let Some(entry) = self.queue.get_mut(adjusted) {
            entry.pid = PidState::Running(pid);
            entry.connect_pos = connect_pos_i32;
            entry.special |= queue::special_flag::BURST_REQUEUE;
        }
        self.hsa
            .set_jobs_queued(host, self.hsa.jobs_queued(host).saturating_sub(1));
        self.cache.touch(next_msg.job_id, now);
        if let Some(connection) = self.connections.get_mut(connect_pos) {
            connection.msg_name = Some(next_msg);
        }
        if next_retries > 0 {
            self.hsa
                .set_file_in_use(host, job_slot, &format!("retry {next_retries}"));
        }

        self.status.bump_burst2_counter();
        self.wake_worker(connect_pos);
        true
    }

    /// A willing worker with no same-destination follow-up still means
    /// the host has spare capacity: when one of its retrieve sources has
    /// no queued poll yet, a helper job is enqueued at back-of-queue
    /// priority so the next start pass polls it right away.
    fn enqueue_helper_job(&mut self, host: usize, now: i64) {
        let helper_exists = |dir: usize| {
            self.queue
                .helper_candidate(|e| e.pos as usize == dir)
                .is_some()
        };
        let Some(dir) = (0..self.dra.len()).find(|&dir| {
            self.dra.host_index(dir) == host && !self.dra.is_disabled(dir) && !helper_exists(dir)
        }) else {
            return;
        };
        self.queue.insert(queue::QueueEntry {
            msg_name: None,
            msg_number: now as f64 * 10_000.0 * 200.0,
            creation_time: now,
            pos: dir as u32,
            connect_pos: -1,
            pid: PidState::Pending,
            retries: 0,
            files_to_send: 0,
            file_size_to_send: 0,
            special: queue::special_flag::HELPER_JOB,
            msg_priority: self.dra.priority(dir),
        });
        self.hsa
            .set_jobs_queued(host, self.hsa.jobs_queued(host) + 1);
        debug!("helper retrieve job enqueued for source {}", self.dra.alias(dir));
    }

    /// No follow-up: mark the slot idle so the worker times out cleanly.
    fn release_parked_slot(&mut self, host: usize, job_slot: usize) {
        if let Ok(_guard) = self.hsa.lock_slot(host, job_slot) {
            let (state, nonce) = self.hsa.burst_state(host, job_slot);
            if let Ok((next_state, next_nonce)) = transition::release(state, nonce) {
                self.hsa.set_burst_state(host, job_slot, next_state, next_nonce);
            }
        }
    }

    /// Asks a parked worker to exit now (shutdown path). The transition
    /// only fires while the worker is actually parked.
    pub fn retire_parked(&mut self, host: usize, job_slot: usize) {
        if let Ok(_guard) = self.hsa.lock_slot(host, job_slot) {
            let (state, nonce) = self.hsa.burst_state(host, job_slot);
            if let Ok((next_state, next_nonce)) = transition::retire(state, nonce) {
                self.hsa.set_burst_state(host, job_slot, next_state, next_nonce);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{dispatcher, host_seed, stage_message, FakeSpawner};
    use super::*;
    use afd_core::ids::JobId;
    use fsa::BurstState;

    const NOW: i64 = 1_700_000_000;

    /// Two same-destination jobs, worker started on the first and parked.
    fn parked_fixture() -> (tempfile::TempDir, Dispatcher, i32) {
        let mut seed = host_seed("alpha");
        seed.keep_connected = 60;
        seed.allowed_transfers = 1;
        let (tmp, mut d) = dispatcher(&[seed]);
        let a = stage_message(&d, 1, "alpha", b'5', NOW, &[100]);
        let b = stage_message(&d, 2, "alpha", b'5', NOW + 1, &[100]);
        d.admit_message(&a, NOW);
        d.admit_message(&b, NOW);

        let mut spawner = FakeSpawner::new();
        assert_eq!(d.try_start(NOW, &mut spawner), 1);
        let pid = d.queue.iter().find_map(|e| e.pid.pid()).expect("running");

        // The worker finishes job A and parks, as check-burst would.
        d.hsa.set_burst_state(0, 0, BurstState::Parked, 5);
        (tmp, d, pid)
    }

    #[test]
    fn matching_pending_job_is_handed_over() {
        let (_tmp, mut d, pid) = parked_fixture();
        assert_eq!(d.queue.len(), 2);
        let before_counter = d.status.burst2_counter();

        assert!(d.handle_fin(-pid, NOW));

        // Exactly one entry remains and it rides the live worker.
        assert_eq!(d.queue.len(), 1);
        let entry = d.queue.get(0).expect("entry");
        assert_eq!(entry.pid, PidState::Running(pid));
        assert_eq!(
            entry.msg_name.as_ref().map(|m| m.job_id),
            Some(JobId(2))
        );
        // The slot carries the handoff and the bumped counter.
        let (state, nonce) = d.hsa.burst_state(0, 0);
        assert_eq!(state, BurstState::HandedOff);
        assert_eq!(nonce, 6);
        assert_eq!(
            d.hsa.handoff_msg(0, 0).map(|m| m.job_id),
            Some(JobId(2))
        );
        assert_eq!(d.status.burst2_counter(), before_counter + 1);
        // No second connection was ever opened.
        assert_eq!(d.active_connections(), 1);
        assert_eq!(d.hsa.jobs_queued(0), 0);
    }

    #[test]
    fn no_candidate_releases_the_slot() {
        let mut seed = host_seed("alpha");
        seed.keep_connected = 60;
        let (_tmp, mut d) = dispatcher(&[seed]);
        let a = stage_message(&d, 1, "alpha", b'5', NOW, &[100]);
        d.admit_message(&a, NOW);
        let mut spawner = FakeSpawner::new();
        d.try_start(NOW, &mut spawner);
        let pid = d.queue.iter().find_map(|e| e.pid.pid()).expect("running");
        d.hsa.set_burst_state(0, 0, BurstState::Parked, 1);

        assert!(d.handle_fin(-pid, NOW));
        // Queue untouched, slot released to idle with a bumped nonce.
        assert_eq!(d.queue.len(), 1);
        assert_eq!(d.hsa.burst_state(0, 0), (BurstState::Idle, 2));
    }

    #[test]
    fn error_gated_jobs_are_not_handed_over() {
        let (_tmp, mut d, pid) = parked_fixture();
        d.error_queue.add(JobId(2), 10, NOW, NOW + 300);

        assert!(d.handle_fin(-pid, NOW));
        // The gated job stayed queued; the slot went idle.
        assert_eq!(d.queue.len(), 2);
        assert_eq!(d.hsa.burst_state(0, 0).0, BurstState::Idle);
    }

    #[test]
    fn giving_up_worker_wins_the_race() {
        let (_tmp, mut d, pid) = parked_fixture();
        // The worker gave up just before the dispatcher acted.
        d.hsa.set_burst_state(0, 0, BurstState::GivingUp, 5);

        assert!(d.handle_fin(-pid, NOW));
        // No handoff happened; both entries stand.
        assert_eq!(d.queue.len(), 2);
        assert_eq!(d.hsa.burst_state(0, 0).0, BurstState::GivingUp);
    }

    #[test]
    fn disabled_bursting_never_hands_over() {
        let mut seed = host_seed("alpha");
        seed.keep_connected = 60;
        seed.protocol_options = fsa::host::protocol_options::DISABLE_BURSTING;
        let (_tmp, mut d) = dispatcher(&[seed]);
        let a = stage_message(&d, 1, "alpha", b'5', NOW, &[100]);
        let b = stage_message(&d, 2, "alpha", b'5', NOW + 1, &[100]);
        d.admit_message(&a, NOW);
        d.admit_message(&b, NOW);
        let mut spawner = FakeSpawner::new();
        d.try_start(NOW, &mut spawner);
        let pid = d.queue.iter().find_map(|e| e.pid.pid()).expect("running");
        d.hsa.set_burst_state(0, 0, BurstState::Parked, 0);

        d.burst_ready(pid, NOW);
        assert_eq!(d.queue.len(), 2);
        assert_eq!(d.hsa.burst_state(0, 0).0, BurstState::Idle);
    }

    #[test]
    fn positive_fin_values_are_not_burst_signals() {
        let (_tmp, mut d, pid) = parked_fixture();
        assert!(!d.handle_fin(pid, NOW));
        assert_eq!(d.queue.len(), 2);
    }

    #[test]
    fn retire_parked_flips_a_parked_slot() {
        let (_tmp, mut d, _pid) = parked_fixture();
        d.retire_parked(0, 0);
        assert_eq!(d.hsa.burst_state(0, 0).0, BurstState::Retire);
        // Retiring a non-parked slot is a no-op.
        d.retire_parked(0, 1);
        assert_eq!(d.hsa.burst_state(0, 1).0, BurstState::Idle);
    }
}
