//! End-to-end dispatch over the local-copy protocol.
//!
//! The dispatcher is driven directly and its launches run the real worker
//! logic inline, so a whole deliver-reap cycle executes against a temp
//! working directory without forking.

use std::collections::VecDeque;
use std::io;
use std::path::Path;

use clap::Parser;

use afd_core::ids::{JobId, MsgName};
use afd_core::message::MessageRecord;
use afd_core::WorkDir;
use fd::launch::{LaunchPlan, WorkerKind};
use fd::{Dispatcher, FdConfig, Spawner};
use fsa::{AfdStatus, DirSeed, Dra, HostSeed, Hsa};
use logging::OutputRecord;
use worker::{FetchArgs, SendArgs};

const NOW_PRIORITY: u8 = b'5';

/// Runs every launched worker synchronously in-process.
#[derive(Default)]
struct InlineSpawner {
    next_pid: i32,
    finished: VecDeque<(i32, i32)>,
}

impl Spawner for InlineSpawner {
    fn spawn(&mut self, plan: &LaunchPlan) -> io::Result<i32> {
        let argv0 = match plan.kind {
            WorkerKind::Send => "afd-sf",
            WorkerKind::Fetch => "afd-gf",
        };
        let full: Vec<String> = std::iter::once(argv0.to_owned())
            .chain(plan.args.iter().cloned())
            .collect();
        let code = match plan.kind {
            WorkerKind::Send => worker::run_send(&SendArgs::parse_from(&full)),
            WorkerKind::Fetch => worker::run_fetch(&FetchArgs::parse_from(&full)),
        };
        self.next_pid += 1;
        self.finished.push_back((self.next_pid, code.as_i32()));
        Ok(self.next_pid)
    }

    fn try_reap(&mut self) -> Option<(i32, i32)> {
        self.finished.pop_front()
    }

    fn kill(&mut self, _pid: i32, _hard: bool) {}

    fn has_children(&self) -> bool {
        !self.finished.is_empty()
    }
}

fn localhost_seed() -> HostSeed {
    HostSeed {
        alias: "localhost".into(),
        display_name: None,
        hostname: "localhost".into(),
        hostname_secondary: None,
        allowed_transfers: 1,
        retry_interval: 120,
        transfer_timeout: 30,
        keep_connected: 0,
        max_successful_retries: 0,
        transfer_rate_limit: 0,
        trl_group: None,
        protocol_options: 0,
    }
}

fn build_dispatcher(
    root: &Path,
    hosts: &[HostSeed],
    dirs: &[DirSeed],
) -> (WorkDir, Dispatcher) {
    let work = WorkDir::new(root);
    work.create_all().expect("creates work dir");
    let hsa = Hsa::create(&work.fsa_file(), hosts).expect("creates fsa");
    let dra = Dra::create(&work.fra_file(), dirs).expect("creates fra");
    let status = AfdStatus::create(&work.status_file()).expect("creates status");
    let dispatcher = Dispatcher::new(work.clone(), FdConfig::default(), hsa, dra, status)
        .expect("builds dispatcher");
    (work, dispatcher)
}

fn stage_send_job(work: &WorkDir, target: &Path, job: u32, now: i64, size: usize) -> MessageRecord {
    std::fs::write(
        work.msg_file(JobId(job)),
        format!("file://localhost{}\n", target.display()),
    )
    .expect("writes message file");
    let record = MessageRecord {
        creation_time: now,
        job_id: JobId(job),
        split_job_counter: 0,
        files_to_send: 1,
        file_size_to_send: size as i64,
        dir_no: 1,
        unique_number: job,
        msg_priority: NOW_PRIORITY,
        originator: b'A',
    };
    let spool = work.outgoing(&record.msg_name().expect("fits"));
    std::fs::create_dir_all(&spool).expect("creates spool");
    std::fs::write(spool.join("f"), vec![0x5au8; size]).expect("writes payload");
    record
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[test]
fn single_file_delivery_end_to_end() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let target = tmp.path().join("delivered");
    std::fs::create_dir_all(&target).expect("mkdir");
    let (work, mut dispatcher) = build_dispatcher(&tmp.path().join("afd"), &[localhost_seed()], &[]);
    let now = now_secs();

    let record = stage_send_job(&work, &target, 1, now, 100);
    dispatcher.admit_message(&record, now);
    let mut spawner = InlineSpawner::default();
    assert_eq!(dispatcher.try_start(now, &mut spawner), 1);

    // The inline worker already ran; reap it.
    let (pid, code) = spawner.try_reap().expect("worker finished");
    assert_eq!(code, 0, "worker must exit TRANSFER_SUCCESS");
    dispatcher.handle_exit(pid, code, now);

    // The 100 bytes arrived.
    let delivered = std::fs::read(target.join("f")).expect("delivered file");
    assert_eq!(delivered.len(), 100);

    // Queue drained, connection slot free, host bookkeeping reset.
    assert_eq!(dispatcher.active_connections(), 0);
    let hsa = Hsa::attach(&work.fsa_file()).expect("attaches");
    assert_eq!(hsa.active_transfers(0), 0);
    assert_eq!(hsa.jobs_queued(0), 0);
    assert!(hsa.last_connection(0) >= now);
    let status = AfdStatus::attach(&work.status_file()).expect("attaches");
    assert_eq!(status.jobs_in_queue(), 0);

    // Exactly one output record whose hex size is 64.
    let log = std::fs::read_to_string(work.log_dir().join("OUTPUT_LOG.0")).expect("log");
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("|64|"), "{:?}", lines[0]);
    let parsed = OutputRecord::parse(lines[0]).expect("parses");
    assert_eq!(parsed.size, 100);
    assert_eq!(parsed.host, "localhost");
}

#[test]
fn age_expired_job_is_deleted_instead_of_started() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let target = tmp.path().join("delivered");
    std::fs::create_dir_all(&target).expect("mkdir");
    let (work, mut dispatcher) = build_dispatcher(&tmp.path().join("afd"), &[localhost_seed()], &[]);
    let now = now_secs();

    // Job created 20 s ago with a 10 s age limit in its spec.
    std::fs::write(
        work.msg_file(JobId(1)),
        format!("file://localhost{}\nage-limit 10\n", target.display()),
    )
    .expect("writes message file");
    let record = MessageRecord {
        creation_time: now - 20,
        job_id: JobId(1),
        split_job_counter: 0,
        files_to_send: 1,
        file_size_to_send: 50,
        dir_no: 1,
        unique_number: 1,
        msg_priority: NOW_PRIORITY,
        originator: b'A',
    };
    let spool = work.outgoing(&record.msg_name().expect("fits"));
    std::fs::create_dir_all(&spool).expect("creates spool");
    std::fs::write(spool.join("stale"), vec![0u8; 50]).expect("writes");

    dispatcher.admit_message(&record, now);
    let hsa = Hsa::attach(&work.fsa_file()).expect("attaches");
    assert_eq!(hsa.jobs_queued(0), 1);

    let mut spawner = InlineSpawner::default();
    assert_eq!(dispatcher.try_start(now, &mut spawner), 0);
    // No worker ran, the spool is gone, the delete log has the record,
    // and jobs_queued dropped by one.
    assert!(!spool.exists());
    assert!(spawner.finished.is_empty());
    assert_eq!(hsa.jobs_queued(0), 0);
    let log = std::fs::read_to_string(work.log_dir().join("DELETE_LOG.0")).expect("log");
    assert!(log.contains("age limit"), "{log}");
    assert!(!target.join("stale").exists());
}

#[test]
fn retrieve_cycle_fills_the_incoming_spool() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let remote = tmp.path().join("remote");
    std::fs::create_dir_all(&remote).expect("mkdir");
    std::fs::write(remote.join("obs.synop"), b"observation").expect("writes");

    let dirs = [DirSeed {
        alias: "gts".into(),
        url: format!("file://localhost{}", remote.display()),
        host_index: 0,
        priority: '3',
        retry_backoff: 60,
        disabled: false,
        remove_after_fetch: true,
    }];
    let (work, mut dispatcher) =
        build_dispatcher(&tmp.path().join("afd"), &[localhost_seed()], &dirs);
    let now = now_secs();

    assert_eq!(dispatcher.check_retrieve(now, false), 1);
    let mut spawner = InlineSpawner::default();
    assert_eq!(dispatcher.try_start(now, &mut spawner), 1);
    let (pid, code) = spawner.try_reap().expect("worker finished");
    assert_eq!(code, 0);
    dispatcher.handle_exit(pid, code, now);

    // The file moved from the remote dir into the incoming spool.
    assert!(!remote.join("obs.synop").exists());
    let fetched = std::fs::read(work.incoming_dir().join("gts/obs.synop")).expect("fetched");
    assert_eq!(fetched, b"observation");
    // The source got rescheduled into the future.
    let dra = Dra::attach(&work.fra_file()).expect("attaches");
    assert!(dra.next_check_time(0) > now);
}

#[test]
fn transient_failure_requeues_and_gates_via_the_error_queue() {
    let tmp = tempfile::tempdir().expect("tempdir");
    // Target parent is missing and may not be created: StatTarget failure.
    let target = tmp.path().join("never/created");
    let (work, mut dispatcher) = build_dispatcher(&tmp.path().join("afd"), &[localhost_seed()], &[]);
    let now = now_secs();

    let record = stage_send_job(&work, &target, 1, now, 10);
    dispatcher.admit_message(&record, now);

    let mut spawner = InlineSpawner::default();
    // Two failed rounds: requeue after the first, error-queue gate after
    // the second.
    for round in 0..2 {
        assert_eq!(dispatcher.try_start(now, &mut spawner), 1, "round {round}");
        let (pid, code) = spawner.try_reap().expect("worker finished");
        assert_ne!(code, 0);
        dispatcher.handle_exit(pid, code, now);
    }
    let hsa = Hsa::attach(&work.fsa_file()).expect("attaches");
    assert!(hsa.first_error_time(0) >= now);
    assert!(hsa.error_counter(0) >= 2);
    // Within the retry interval nothing starts even though capacity is
    // free.
    assert_eq!(dispatcher.try_start(now + 1, &mut spawner), 0);
    // Past the interval the job is retried.
    assert_eq!(dispatcher.try_start(now + 121, &mut spawner), 1);

    // The message name still names the same bundle for the retry.
    let msg: MsgName = record.msg_name().expect("fits");
    assert!(work.outgoing(&msg).join("f").exists());
}
