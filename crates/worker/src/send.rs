//! The sf worker: deliver one message's files, then maybe burst.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use bandwidth::RateLimiter;
use afd_core::exit::WorkerExit;
use afd_core::ids::MsgName;
use afd_core::job::{JobSpec, LockStyle, ProtocolKind};
use afd_core::WorkDir;
use fsa::host::{host_status, protocol_options};
use fsa::slot::ConnectStatus;
use fsa::Hsa;
use logging::{DeleteRecord, LogWriter, OutputRecord, Severity, TransferLine};
use protocol::session::{open_session, Interrupt, SendSession, SessionConfig};
use protocol::TransferError;
use tracing::{debug, warn};

use crate::archive;
use crate::args::SendArgs;
use crate::burst::{self, BurstOutcome};
use crate::control::{control_fifo_path, ControlByte, WorkerControl};

const READ_CHUNK: usize = 64 * 1024;

/// Log generations kept for the worker-written logs.
const LOG_GENERATIONS: usize = 7;

/// Runs the send worker to completion and returns its exit code.
pub fn run_send(args: &SendArgs) -> WorkerExit {
    let mut ctx = match Context::build(args) {
        Ok(ctx) => ctx,
        Err(code) => return code,
    };
    let code = ctx.run(args);
    ctx.flush_slot();
    code
}

struct Context {
    work: WorkDir,
    hsa: Hsa,
    host: usize,
    slot: usize,
    display: String,
    transfer_log: LogWriter,
    output_log: LogWriter,
    delete_log: LogWriter,
    control: WorkerControl,
    interrupt: Interrupt,
    pid: i32,
}

struct Delivery {
    files: u32,
    bytes: u64,
}

impl Context {
    fn build(args: &SendArgs) -> Result<Self, WorkerExit> {
        let work = WorkDir::new(&args.work_dir);
        let hsa = Hsa::attach(&work.fsa_file()).map_err(|e| {
            warn!("cannot attach status area: {e}");
            WorkerExit::Syntax
        })?;
        if args.host_index >= hsa.len() {
            warn!("host index {} out of range", args.host_index);
            return Err(WorkerExit::Syntax);
        }
        let log_dir = work.log_dir();
        let open = |base: &str| {
            LogWriter::open(&log_dir, base, LOG_GENERATIONS).map_err(|e| {
                warn!("cannot open {base}: {e}");
                WorkerExit::OpenLocal
            })
        };
        let display = hsa.display_name(args.host_index);
        Ok(Self {
            work: work.clone(),
            hsa,
            host: args.host_index,
            slot: args.slot,
            display,
            transfer_log: open("TRANSFER_LOG")?,
            output_log: open("OUTPUT_LOG")?,
            delete_log: open("DELETE_LOG")?,
            control: WorkerControl::open(&control_fifo_path(&work, args.connect_pos)),
            interrupt: Interrupt::new(),
            pid: std::process::id() as i32,
        })
    }

    fn run(&mut self, args: &SendArgs) -> WorkerExit {
        let Ok(mut msg) = args.msg_name.parse::<MsgName>() else {
            return WorkerExit::Syntax;
        };
        let mut session: Option<Box<dyn SendSession>> = None;
        let mut session_spec: Option<JobSpec> = None;
        let mut retries = args.retries;

        let code = loop {
            let outcome =
                self.deliver(args, &msg, retries, &mut session, &mut session_spec);
            let code = match outcome {
                Ok(_) => WorkerExit::TransferSuccess,
                Err(e) => {
                    self.log_failure(&msg, &e);
                    break e.exit_code();
                }
            };

            // Park for a follow-up job when the host keeps connections.
            if !self.burst_eligible() {
                break code;
            }
            let window = Duration::from_secs(u64::from(self.hsa.keep_connected(self.host)));
            self.hsa
                .set_connect_status(self.host, self.slot, ConnectStatus::BurstActive);
            match burst::wait_for_handoff(
                &mut self.hsa,
                self.host,
                self.slot,
                &mut self.control,
                &self.work,
                self.pid,
                window,
            ) {
                Ok(BurstOutcome::NewMessage(next)) => {
                    msg = next;
                    retries = 0;
                }
                Ok(BurstOutcome::Retire | BurstOutcome::TimedOut) => break code,
                Ok(BurstOutcome::Stopped) => break WorkerExit::GotKilled,
                Err(e) => {
                    debug!("burst wait failed: {e}");
                    break code;
                }
            }
        };

        if let Some(mut s) = session {
            if let Err(e) = s.disconnect() {
                debug!("disconnect failed: {e}");
                if code == WorkerExit::TransferSuccess {
                    return e.exit_code();
                }
            }
        }
        code
    }

    fn burst_eligible(&self) -> bool {
        self.hsa.keep_connected(self.host) > 0
            && self.hsa.protocol_options(self.host) & protocol_options::DISABLE_BURSTING == 0
    }

    /// Delivers one message. Returns the per-message stats.
    fn deliver(
        &mut self,
        args: &SendArgs,
        msg: &MsgName,
        retries: u32,
        session: &mut Option<Box<dyn SendSession>>,
        session_spec: &mut Option<JobSpec>,
    ) -> Result<Delivery, TransferError> {
        let started = Instant::now();
        let now = now_secs();

        let spec = JobSpec::evaluate(&self.work.msg_file(msg.job_id), msg.job_id)
            .map_err(|e| TransferError::new(WorkerExit::NoMessageFile, e.to_string()))?;

        let spool = self.work.outgoing(msg);
        let mut files = archive::spool_files(&spool)
            .map_err(|e| TransferError::io(WorkerExit::OpenFileDir, &e))?;

        // Age-limit expiry drops files into the delete log instead of
        // sending them, unless the host forbids deleting data.
        let age_limit = spec.age_limit.or(args.default_age_limit);
        if let Some(age) = age_limit
            && self.hsa.host_status(self.host) & host_status::DO_NOT_DELETE_DATA == 0
            && now - msg.creation_time > i64::from(age)
        {
            for (path, size) in files.drain(..) {
                let name = file_name_of(&path);
                self.delete_log_record(now, &name, size, msg, "age limit");
                let _ = fs::remove_file(&path);
            }
        }
        if files.is_empty() {
            archive::remove_msg_dir(&spool);
            return Err(TransferError::new(
                WorkerExit::NoFilesToSend,
                "spool directory is empty",
            ));
        }

        let total_files = files.len() as u32;
        let total_bytes: u64 = files.iter().map(|(_, s)| s).sum();
        self.publish_batch(msg, retries, total_files, total_bytes)?;

        // Exec jobs never open a session; everything else connects once
        // and reuses the connection across bursts to the same destination.
        let mut delivered = Delivery { files: 0, bytes: 0 };
        if spec.destination.protocol == ProtocolKind::Exec {
            let template = spec.exec_cmd.clone().unwrap_or_else(|| "false".into());
            for (path, size) in &files {
                self.control_check()?;
                protocol::exec::run_for_file(&template, path)?;
                self.finish_file(&spec, msg, path, *size, &mut delivered, args)?;
            }
        } else {
            if session_spec
                .as_ref()
                .is_none_or(|old| old.destination != spec.destination)
            {
                if let Some(mut old) = session.take() {
                    let _ = old.disconnect();
                }
                let mut config = SessionConfig::new(Duration::from_secs(u64::from(
                    self.hsa.transfer_timeout(self.host),
                )));
                config.protocol_options = self.hsa.protocol_options(self.host);
                config.interrupt = self.interrupt.clone();
                config.counter_dir = Some(self.work.counter_dir());
                let mut fresh = open_session(&spec, config)?;
                fresh.connect()?;
                *session = Some(fresh);
                *session_spec = Some(spec.clone());
            }
            let sess = session
                .as_mut()
                .ok_or_else(|| TransferError::new(WorkerExit::Connect, "session vanished"))?;
            self.hsa
                .set_connect_status(self.host, self.slot, ConnectStatus::Active);

            if spec.lock == LockStyle::LockFile {
                sess.create_dir_lock()?;
            }
            for (path, size) in &files {
                self.control_check()?;
                self.send_one(sess.as_mut(), &spec, path, *size)?;
                self.dispose(&spec, msg, path, *size, args, now)?;
                delivered.files += 1;
                delivered.bytes += size;
                self.update_done_counters(&delivered, total_files, total_bytes);
            }
            if spec.lock == LockStyle::LockFile {
                sess.remove_dir_lock()?;
            }
        }

        archive::remove_msg_dir(&spool);
        self.recover_host_state()?;
        self.summary_line(&delivered, started.elapsed());
        self.hsa.set_last_connection(self.host, now);
        Ok(delivered)
    }

    /// Streams one file through the session, honouring lock discipline and
    /// the per-process rate share.
    fn send_one(
        &mut self,
        session: &mut dyn SendSession,
        spec: &JobSpec,
        path: &Path,
        size: u64,
    ) -> Result<(), TransferError> {
        let name = file_name_of(path);
        let publish_name = spec.publish_name(&name);
        let lock_name = spec.lock.lock_name(&publish_name);

        {
            let _guard = self
                .hsa
                .lock_slot(self.host, self.slot)
                .map_err(|e| TransferError::io(WorkerExit::LockRegion, &e))?;
            self.hsa.set_file_in_use(self.host, self.slot, &name);
            let (a, d, _, _) = self.hsa.slot_bytes(self.host, self.slot);
            self.hsa.set_slot_bytes(self.host, self.slot, a, d, size, 0);
        }

        let mut limiter = match self.hsa.trl_per_process(self.host) {
            0 => None,
            share => Some(RateLimiter::new(share)),
        };

        let mut file =
            fs::File::open(path).map_err(|e| TransferError::io(WorkerExit::OpenLocal, &e))?;
        session.open(&lock_name, size)?;
        let mut buf = vec![0u8; READ_CHUNK];
        let mut sent: u64 = 0;
        loop {
            let want = limiter
                .as_ref()
                .map_or(READ_CHUNK, |l| l.recommended_chunk(READ_CHUNK));
            let n = file
                .read(&mut buf[..want])
                .map_err(|e| TransferError::io(WorkerExit::ReadLocal, &e))?;
            if n == 0 {
                break;
            }
            session.write_chunk(&buf[..n])?;
            sent += n as u64;
            if let Some(limiter) = &mut limiter {
                limiter.register(n);
            }
            let _guard = self
                .hsa
                .lock_slot(self.host, self.slot)
                .map_err(|e| TransferError::io(WorkerExit::LockRegion, &e))?;
            let (a, d, in_use, _) = self.hsa.slot_bytes(self.host, self.slot);
            self.hsa
                .set_slot_bytes(self.host, self.slot, a, d, in_use, sent);
        }
        session.close_file()?;

        if spec.lock == LockStyle::DotVms {
            // Publish with the trailing dot, then strip it.
            let dotted = format!("{publish_name}.");
            session.publish(&lock_name, &dotted)?;
            session.publish(&dotted, &publish_name)?;
        } else {
            session.publish(&lock_name, &publish_name)?;
        }
        session.chmod_chown(&publish_name, spec.chmod, spec.chown.as_deref())?;

        // Local publishes can carry the source timestamp over.
        if spec.destination.protocol == ProtocolKind::Loc
            && self.hsa.protocol_options(self.host) & protocol_options::KEEP_TIME_STAMP != 0
            && let Ok(meta) = fs::metadata(path)
            && let Ok(mtime) = meta.modified()
        {
            let target = Path::new(&spec.destination.path).join(&publish_name);
            let _ = fs::File::options()
                .write(true)
                .open(&target)
                .and_then(|f| f.set_modified(mtime));
        }
        Ok(())
    }

    /// Post-success disposition plus the output-log record.
    fn dispose(
        &mut self,
        spec: &JobSpec,
        msg: &MsgName,
        path: &Path,
        size: u64,
        args: &SendArgs,
        now: i64,
    ) -> Result<Option<String>, TransferError> {
        let name = file_name_of(path);
        let archive_rel = if spec.archive_time > 0 && !args.disable_archive {
            Some(
                archive::archive_file(
                    &self.work,
                    &self.hsa.alias(self.host),
                    msg.job_id,
                    spec.archive_time,
                    path,
                    &name,
                    now,
                )
                .map_err(|e| TransferError::io(WorkerExit::MoveLocal, &e))?,
            )
        } else {
            fs::remove_file(path).map_err(|e| TransferError::io(WorkerExit::MoveLocal, &e))?;
            None
        };
        let record = OutputRecord {
            time: now,
            host: self.hsa.alias(self.host),
            filename: spec.publish_name(&name),
            size,
            duration: 0.0,
            job_id: msg.job_id.0,
            unique_id: format!("{:x}_{:x}_{:x}", msg.creation_time, msg.unique, msg.split),
            archive_path: archive_rel.clone(),
        };
        let _ = self.output_log.write_line(&record.to_string());
        Ok(archive_rel)
    }

    fn finish_file(
        &mut self,
        spec: &JobSpec,
        msg: &MsgName,
        path: &Path,
        size: u64,
        delivered: &mut Delivery,
        args: &SendArgs,
    ) -> Result<(), TransferError> {
        self.dispose(spec, msg, path, size, args, now_secs())?;
        delivered.files += 1;
        delivered.bytes += size;
        Ok(())
    }

    fn publish_batch(
        &mut self,
        msg: &MsgName,
        retries: u32,
        total_files: u32,
        total_bytes: u64,
    ) -> Result<(), TransferError> {
        let _guard = self
            .hsa
            .lock_slot(self.host, self.slot)
            .map_err(|e| TransferError::io(WorkerExit::LockRegion, &e))?;
        self.hsa.set_slot_job_id(self.host, self.slot, msg.job_id);
        self.hsa
            .set_slot_files(self.host, self.slot, total_files, 0);
        self.hsa
            .set_slot_bytes(self.host, self.slot, total_bytes, 0, 0, 0);
        self.hsa
            .set_connect_status(self.host, self.slot, ConnectStatus::Connecting);
        if retries > 0 {
            // A retried job publishes its attempt count where observers
            // look for the file name.
            self.hsa
                .set_file_in_use(self.host, self.slot, &format!("retry {retries}"));
        }
        Ok(())
    }

    fn update_done_counters(&mut self, delivered: &Delivery, total_files: u32, total_bytes: u64) {
        if let Ok(_guard) = self.hsa.lock_slot(self.host, self.slot) {
            self.hsa
                .set_slot_files(self.host, self.slot, total_files, delivered.files);
            self.hsa.set_slot_bytes(
                self.host,
                self.slot,
                total_bytes,
                delivered.bytes,
                0,
                0,
            );
            self.hsa.set_file_in_use(self.host, self.slot, "");
        }
    }

    /// First success on an error-paused host clears the error state and
    /// kicks the scheduler awake.
    fn recover_host_state(&mut self) -> Result<(), TransferError> {
        if self.hsa.error_counter(self.host) > 0 {
            {
                let _guard = self
                    .hsa
                    .lock_error_counter(self.host)
                    .map_err(|e| TransferError::io(WorkerExit::LockRegion, &e))?;
                self.hsa.set_error_counter(self.host, 0);
                self.hsa.clear_error_history(self.host);
                self.hsa.set_first_error_time(self.host, 0);
            }
            {
                let _guard = self
                    .hsa
                    .lock_host_status(self.host)
                    .map_err(|e| TransferError::io(WorkerExit::LockRegion, &e))?;
                self.hsa
                    .clear_host_status_bits(self.host, host_status::AUTO_PAUSE_QUEUE);
            }
            let _ = std::fs::OpenOptions::new()
                .write(true)
                .open(self.work.fifo("wakeup"))
                .and_then(|mut f| f.write_all(&[1]));
        }
        Ok(())
    }

    fn control_check(&mut self) -> Result<(), TransferError> {
        if self.control.poll() == Some(ControlByte::Stop) {
            self.interrupt.set();
        }
        self.interrupt.check()
    }

    fn summary_line(&mut self, delivered: &Delivery, elapsed: Duration) {
        let line = TransferLine {
            severity: Severity::Info,
            host: self.display.clone(),
            slot: self.slot,
            msg: format!(
                "{} file(s), {} bytes, in {:.2} s",
                delivered.files,
                delivered.bytes,
                elapsed.as_secs_f64()
            ),
        };
        let _ = self.transfer_log.write_line(&line.to_string());
        let _ = self.transfer_log.flush();
    }

    /// The {summary, debug, nack} triple every failed transfer emits.
    fn log_failure(&mut self, msg: &MsgName, err: &TransferError) {
        let summary = TransferLine {
            severity: Severity::Error,
            host: self.display.clone(),
            slot: self.slot,
            msg: format!("Disconnected. {}", err.exit_code()),
        };
        let detail = TransferLine {
            severity: Severity::Debug,
            host: self.display.clone(),
            slot: self.slot,
            msg: err.detail().to_owned(),
        };
        let nack = TransferLine {
            severity: Severity::Error,
            host: self.display.clone(),
            slot: self.slot,
            msg: format!("NAK {msg}"),
        };
        for line in [summary, detail, nack] {
            let _ = self.transfer_log.write_line(&line.to_string());
        }
        let _ = self.transfer_log.flush();
    }

    fn delete_log_record(&mut self, now: i64, name: &str, size: u64, msg: &MsgName, why: &str) {
        let record = DeleteRecord {
            time: now,
            host: self.hsa.alias(self.host),
            filename: name.to_owned(),
            size,
            job_id: msg.job_id.0,
            reason: why.to_owned(),
        };
        let _ = self.delete_log.write_line(&record.to_string());
    }

    /// Cancellation contract: clear the published slot state on the way
    /// out, whatever the exit path.
    fn flush_slot(&mut self) {
        if let Ok(_guard) = self.hsa.lock_slot(self.host, self.slot) {
            self.hsa.set_file_in_use(self.host, self.slot, "");
            self.hsa.set_slot_bytes(self.host, self.slot, 0, 0, 0, 0);
            self.hsa
                .set_connect_status(self.host, self.slot, ConnectStatus::Disconnected);
        }
        let _ = self.hsa.flush();
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use afd_core::ids::JobId;
    use fsa::HostSeed;
    use std::path::PathBuf;

    fn workspace() -> (tempfile::TempDir, WorkDir, PathBuf) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let work = WorkDir::new(tmp.path());
        work.create_all().expect("creates");
        let target = tmp.path().join("delivered");
        fs::create_dir_all(&target).expect("mkdir");
        (tmp, work, target)
    }

    fn seed() -> HostSeed {
        HostSeed {
            alias: "local".into(),
            display_name: None,
            hostname: "localhost".into(),
            hostname_secondary: None,
            allowed_transfers: 1,
            retry_interval: 60,
            transfer_timeout: 10,
            keep_connected: 0,
            max_successful_retries: 0,
            transfer_rate_limit: 0,
            trl_group: None,
            protocol_options: 0,
        }
    }

    fn stage_message(work: &WorkDir, target: &std::path::Path, options: &str) -> MsgName {
        let msg = MsgName::new(JobId(0xab), 1, now_secs(), 7, 0).expect("valid");
        fs::write(
            work.msg_file(JobId(0xab)),
            format!("file://localhost{}\n{options}", target.display()),
        )
        .expect("writes message file");
        let spool = work.outgoing(&msg);
        fs::create_dir_all(&spool).expect("creates spool");
        fs::write(spool.join("payload.bin"), vec![0x42u8; 100]).expect("writes payload");
        msg
    }

    fn send_args(work: &WorkDir, msg: &MsgName) -> SendArgs {
        SendArgs {
            work_dir: work.root().to_owned(),
            msg_name: msg.to_string(),
            host_index: 0,
            slot: 0,
            connect_pos: 0,
            retries: 0,
            resend: false,
            disable_archive: false,
            default_age_limit: None,
        }
    }

    #[test]
    fn happy_path_loc_delivery() {
        let (_tmp, work, target) = workspace();
        Hsa::create(&work.fsa_file(), &[seed()]).expect("creates fsa");
        let msg = stage_message(&work, &target, "");

        let code = run_send(&send_args(&work, &msg));
        assert_eq!(code, WorkerExit::TransferSuccess);

        // The file arrived, byte for byte.
        let delivered = fs::read(target.join("payload.bin")).expect("delivered");
        assert_eq!(delivered.len(), 100);
        // The spool directory is gone.
        assert!(!work.outgoing(&msg).exists());
        // Exactly one output-log record with hex size 64.
        let log = fs::read_to_string(work.log_dir().join("OUTPUT_LOG.0")).expect("log");
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 1);
        let record = OutputRecord::parse(lines[0]).expect("parses");
        assert_eq!(record.size, 100);
        assert!(lines[0].contains("|64|"), "{:?}", lines[0]);
        // last_connection moved.
        let hsa = Hsa::attach(&work.fsa_file()).expect("attaches");
        assert!(hsa.last_connection(0) > 0);
    }

    #[test]
    fn dot_lock_discipline_leaves_no_lock_name() {
        let (_tmp, work, target) = workspace();
        Hsa::create(&work.fsa_file(), &[seed()]).expect("creates fsa");
        let msg = stage_message(&work, &target, "lock DOT\n");

        assert_eq!(run_send(&send_args(&work, &msg)), WorkerExit::TransferSuccess);
        assert!(target.join("payload.bin").exists());
        assert!(!target.join(".payload.bin").exists());
    }

    #[test]
    fn archive_keeps_the_delivered_file() {
        let (_tmp, work, target) = workspace();
        Hsa::create(&work.fsa_file(), &[seed()]).expect("creates fsa");
        let msg = stage_message(&work, &target, "archive 3600\n");

        assert_eq!(run_send(&send_args(&work, &msg)), WorkerExit::TransferSuccess);
        let log = fs::read_to_string(work.log_dir().join("OUTPUT_LOG.0")).expect("log");
        let record = OutputRecord::parse(log.lines().next().expect("line")).expect("parses");
        let rel = record.archive_path.expect("archived");
        assert!(work.archive_dir().join(&rel).exists());
    }

    #[test]
    fn missing_message_file_is_malformed() {
        let (_tmp, work, _target) = workspace();
        Hsa::create(&work.fsa_file(), &[seed()]).expect("creates fsa");
        let msg = MsgName::new(JobId(0xff), 1, now_secs(), 1, 0).expect("valid");
        fs::create_dir_all(work.outgoing(&msg)).expect("creates spool");
        fs::write(work.outgoing(&msg).join("f"), b"x").expect("writes");

        assert_eq!(run_send(&send_args(&work, &msg)), WorkerExit::NoMessageFile);
    }

    #[test]
    fn empty_spool_reports_no_files() {
        let (_tmp, work, target) = workspace();
        Hsa::create(&work.fsa_file(), &[seed()]).expect("creates fsa");
        let msg = stage_message(&work, &target, "");
        fs::remove_file(work.outgoing(&msg).join("payload.bin")).expect("removes");

        assert_eq!(run_send(&send_args(&work, &msg)), WorkerExit::NoFilesToSend);
    }

    #[test]
    fn age_limit_drops_into_the_delete_log() {
        let (_tmp, work, target) = workspace();
        Hsa::create(&work.fsa_file(), &[seed()]).expect("creates fsa");
        // A message created far in the past with a short age limit.
        let msg = MsgName::new(JobId(0xab), 1, now_secs() - 1000, 7, 0).expect("valid");
        fs::write(
            work.msg_file(JobId(0xab)),
            format!("file://localhost{}\nage-limit 10\n", target.display()),
        )
        .expect("writes");
        let spool = work.outgoing(&msg);
        fs::create_dir_all(&spool).expect("creates");
        fs::write(spool.join("stale.bin"), b"old").expect("writes");

        assert_eq!(run_send(&send_args(&work, &msg)), WorkerExit::NoFilesToSend);
        assert!(!target.join("stale.bin").exists());
        let log = fs::read_to_string(work.log_dir().join("DELETE_LOG.0")).expect("log");
        let record = DeleteRecord::parse(log.lines().next().expect("line")).expect("parses");
        assert_eq!(record.reason, "age limit");
        assert_eq!(record.filename, "stale.bin");
    }

    #[test]
    fn exec_job_runs_the_template() {
        let (_tmp, work, target) = workspace();
        Hsa::create(&work.fsa_file(), &[seed()]).expect("creates fsa");
        let msg = MsgName::new(JobId(0xcd), 1, now_secs(), 7, 0).expect("valid");
        let touched = target.join("touched");
        fs::write(
            work.msg_file(JobId(0xcd)),
            format!("exec://localhost/\nexec cp %s {}\n", touched.display()),
        )
        .expect("writes");
        let spool = work.outgoing(&msg);
        fs::create_dir_all(&spool).expect("creates");
        fs::write(spool.join("f"), b"payload").expect("writes");

        assert_eq!(run_send(&send_args(&work, &msg)), WorkerExit::TransferSuccess);
        assert_eq!(fs::read(&touched).expect("reads"), b"payload");
    }

    #[test]
    fn failure_writes_the_log_triple() {
        let (_tmp, work, _target) = workspace();
        Hsa::create(&work.fsa_file(), &[seed()]).expect("creates fsa");
        let msg = MsgName::new(JobId(0xab), 1, now_secs(), 7, 0).expect("valid");
        // Target directory does not exist and may not be created.
        fs::write(
            work.msg_file(JobId(0xab)),
            "file://localhost/definitely/not/here\n",
        )
        .expect("writes");
        let spool = work.outgoing(&msg);
        fs::create_dir_all(&spool).expect("creates");
        fs::write(spool.join("f"), b"x").expect("writes");

        assert_eq!(run_send(&send_args(&work, &msg)), WorkerExit::StatTarget);
        let log = fs::read_to_string(work.log_dir().join("TRANSFER_LOG.0")).expect("log");
        let lines: Vec<TransferLine> = log
            .lines()
            .map(|l| TransferLine::parse(l).expect("parses"))
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].severity, Severity::Error);
        assert_eq!(lines[1].severity, Severity::Debug);
        assert!(lines[2].msg.starts_with("NAK "));
    }

    #[test]
    fn error_paused_host_recovers_on_success() {
        let (_tmp, work, target) = workspace();
        let mut hsa = Hsa::create(&work.fsa_file(), &[seed()]).expect("creates fsa");
        hsa.set_error_counter(0, 3);
        hsa.push_error_history(0, 10);
        hsa.set_host_status_bits(0, host_status::AUTO_PAUSE_QUEUE);
        hsa.flush().expect("flushes");
        drop(hsa);

        let msg = stage_message(&work, &target, "");
        assert_eq!(run_send(&send_args(&work, &msg)), WorkerExit::TransferSuccess);

        let hsa = Hsa::attach(&work.fsa_file()).expect("attaches");
        assert_eq!(hsa.error_counter(0), 0);
        assert_eq!(hsa.error_history(0), [0; fsa::host::ERROR_HISTORY_LEN]);
        assert_eq!(hsa.host_status(0) & host_status::AUTO_PAUSE_QUEUE, 0);
    }

    #[test]
    fn rename_rule_changes_the_published_name() {
        let (_tmp, work, target) = workspace();
        Hsa::create(&work.fsa_file(), &[seed()]).expect("creates fsa");
        let msg = stage_message(&work, &target, "rename *.bin *.dat\n");

        assert_eq!(run_send(&send_args(&work, &msg)), WorkerExit::TransferSuccess);
        assert!(target.join("payload.dat").exists());
        assert!(!target.join("payload.bin").exists());
    }
}
