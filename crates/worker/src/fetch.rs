//! The gf worker: poll one retrieve source and pull its files in.

use std::fs;
use std::time::Instant;

use afd_core::exit::WorkerExit;
use afd_core::job::Destination;
use afd_core::WorkDir;
use fsa::slot::ConnectStatus;
use fsa::{Dra, Hsa};
use logging::{InputRecord, LogWriter, Severity, TransferLine};
use protocol::session::{Interrupt, SessionConfig};
use protocol::{open_fetch_session, TransferError};
use tracing::warn;

use crate::args::FetchArgs;
use crate::control::{control_fifo_path, ControlByte, WorkerControl};

const LOG_GENERATIONS: usize = 7;

/// Runs the retrieve worker to completion and returns its exit code.
pub fn run_fetch(args: &FetchArgs) -> WorkerExit {
    let work = WorkDir::new(&args.work_dir);
    let mut hsa = match Hsa::attach(&work.fsa_file()) {
        Ok(hsa) => hsa,
        Err(e) => {
            warn!("cannot attach host status area: {e}");
            return WorkerExit::Syntax;
        }
    };
    let mut dra = match Dra::attach(&work.fra_file()) {
        Ok(dra) => dra,
        Err(e) => {
            warn!("cannot attach directory area: {e}");
            return WorkerExit::Syntax;
        }
    };
    if args.dir_index >= dra.len() || args.host_index >= hsa.len() {
        return WorkerExit::Syntax;
    }
    match fetch_inner(args, &work, &mut hsa, &mut dra) {
        Ok(code) => code,
        Err(e) => {
            log_failure(&work, &hsa, args, &e);
            if let Ok(_guard) = hsa.lock_slot(args.host_index, args.slot) {
                hsa.set_connect_status(args.host_index, args.slot, ConnectStatus::Disconnected);
            }
            e.exit_code()
        }
    }
}

fn fetch_inner(
    args: &FetchArgs,
    work: &WorkDir,
    hsa: &mut Hsa,
    dra: &mut Dra,
) -> Result<WorkerExit, TransferError> {
    let started = Instant::now();
    let source = Destination::parse(&dra.url(args.dir_index))
        .map_err(|e| TransferError::new(WorkerExit::Syntax, e.to_string()))?;

    let mut config = SessionConfig::new(std::time::Duration::from_secs(u64::from(
        hsa.transfer_timeout(args.host_index),
    )));
    config.protocol_options = hsa.protocol_options(args.host_index);
    let interrupt = Interrupt::new();
    config.interrupt = interrupt.clone();

    let mut control = WorkerControl::open(&control_fifo_path(work, args.connect_pos));
    let mut session = open_fetch_session(&source, config)?;

    hsa.set_connect_status(args.host_index, args.slot, ConnectStatus::Connecting);
    session.connect()?;
    hsa.set_connect_status(args.host_index, args.slot, ConnectStatus::Active);

    let offered = session.list()?;
    if offered.is_empty() {
        session.disconnect()?;
        return Err(TransferError::new(
            WorkerExit::NoFilesToSend,
            "source offers nothing",
        ));
    }

    // One spool directory per source alias; the scanner picks it up from
    // there and generates messages.
    let alias = dra.alias(args.dir_index);
    let spool = work.incoming_dir().join(&alias);
    fs::create_dir_all(&spool).map_err(|e| TransferError::io(WorkerExit::WriteLocal, &e))?;

    let mut input_log = LogWriter::open(&work.log_dir(), "INPUT_LOG", LOG_GENERATIONS)
        .map_err(|e| TransferError::io(WorkerExit::OpenLocal, &e))?;

    let remove_after = dra.remove_after_fetch(args.dir_index);
    let mut fetched = 0u32;
    let mut fetched_bytes = 0u64;
    for file in &offered {
        if control.poll() == Some(ControlByte::Stop) {
            interrupt.set();
        }
        interrupt.check()?;

        // Land under a dot name, then publish into the spool.
        let lock_path = spool.join(format!(".{}", file.name));
        let final_path = spool.join(&file.name);
        let mut out = fs::File::create(&lock_path)
            .map_err(|e| TransferError::io(WorkerExit::WriteLocal, &e))?;
        let size = session.retrieve(&file.name, &mut out)?;
        drop(out);
        fs::rename(&lock_path, &final_path)
            .map_err(|e| TransferError::io(WorkerExit::Rename, &e))?;
        if remove_after {
            session.delete(&file.name)?;
        }

        let record = InputRecord {
            time: now_secs(),
            filename: file.name.clone(),
            size,
            dir_no: args.dir_index as u16,
            unique: fetched,
        };
        let _ = input_log.write_line(&record.to_string());

        fetched += 1;
        fetched_bytes += size;
        if let Ok(_guard) = hsa.lock_slot(args.host_index, args.slot) {
            hsa.set_slot_files(args.host_index, args.slot, offered.len() as u32, fetched);
            hsa.set_slot_bytes(args.host_index, args.slot, 0, fetched_bytes, 0, 0);
            hsa.set_file_in_use(args.host_index, args.slot, &file.name);
        }
    }
    let _ = input_log.flush();
    session.disconnect()?;

    dra.set_files_queued(args.dir_index, fetched);
    dra.set_next_check_time(
        args.dir_index,
        now_secs() + i64::from(dra.retry_backoff(args.dir_index)),
    );
    let _ = dra.flush();

    if let Ok(_guard) = hsa.lock_slot(args.host_index, args.slot) {
        hsa.set_file_in_use(args.host_index, args.slot, "");
        hsa.set_connect_status(args.host_index, args.slot, ConnectStatus::Disconnected);
    }
    hsa.set_last_connection(args.host_index, now_secs());

    if let Ok(mut transfer_log) =
        LogWriter::open(&work.log_dir(), "TRANSFER_LOG", LOG_GENERATIONS)
    {
        let line = TransferLine {
            severity: Severity::Info,
            host: hsa.display_name(args.host_index),
            slot: args.slot,
            msg: format!(
                "Retrieved {fetched} file(s), {fetched_bytes} bytes, in {:.2} s from {alias}",
                started.elapsed().as_secs_f64()
            ),
        };
        let _ = transfer_log.write_line(&line.to_string());
        let _ = transfer_log.flush();
    }
    Ok(WorkerExit::TransferSuccess)
}

fn log_failure(work: &WorkDir, hsa: &Hsa, args: &FetchArgs, err: &TransferError) {
    if let Ok(mut transfer_log) =
        LogWriter::open(&work.log_dir(), "TRANSFER_LOG", LOG_GENERATIONS)
    {
        let host = hsa.display_name(args.host_index);
        for line in [
            TransferLine {
                severity: Severity::Error,
                host: host.clone(),
                slot: args.slot,
                msg: format!("Disconnected. {}", err.exit_code()),
            },
            TransferLine {
                severity: Severity::Debug,
                host,
                slot: args.slot,
                msg: err.detail().to_owned(),
            },
        ] {
            let _ = transfer_log.write_line(&line.to_string());
        }
        let _ = transfer_log.flush();
    }
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
