//! The event loop: channels, clock and processes wired to the dispatcher.

use std::io;
use std::time::{Duration, Instant};

use afd_core::WorkDir;
use tracing::{debug, error, info, warn};

use fsa::{ActiveFile, AfdStatus, Dra, FdState, Hsa};

use crate::channels::{create_fifos, Channels};
use crate::commands::Command;
use crate::config::{FdConfig, Tables};
use crate::dispatch::Dispatcher;
use crate::launch::{ProcessSpawner, Spawner};

/// Ticks between reconciliation/persist passes.
const HOUSEKEEPING_TICKS: u32 = 30;

/// Escalation delay of a QUICK_STOP, instead of the configured one.
const QUICK_KILL_DELAY: Duration = Duration::from_secs(2);

fn region_err(e: fsa::region::RegionError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Builds every shared region and runs the dispatcher until a stop
/// command (or an external shutdown request) completes.
pub fn run(work: &WorkDir, tables: &Tables) -> io::Result<()> {
    let config = tables.fd.clone().unwrap_or_default();
    work.create_all()?;
    create_fifos(work, config.max_connections)?;

    let hsa = Hsa::create(&work.fsa_file(), &tables.hosts).map_err(region_err)?;
    let dra = Dra::create(&work.fra_file(), &tables.dirs).map_err(region_err)?;
    let mut status = AfdStatus::create(&work.status_file()).map_err(region_err)?;
    status.set_fd_state(FdState::On);
    let mut active = ActiveFile::create(&work.active_file(), config.max_connections)?;
    active.set_pid(0, std::process::id() as i32);
    active.flush()?;

    let mut channels = Channels::open(work)?;
    let mut spawner = ProcessSpawner::new()?;
    let mut dispatcher = Dispatcher::new(work.clone(), config.clone(), hsa, dra, status)?;
    info!(
        hosts = tables.hosts.len(),
        dirs = tables.dirs.len(),
        max_connections = config.max_connections,
        "dispatcher up"
    );

    let outcome = event_loop(
        &config,
        &mut dispatcher,
        &mut channels,
        &mut spawner,
        &mut active,
    );

    dispatcher.persist()?;
    dispatcher.status.set_fd_state(FdState::Off);
    dispatcher.status.flush()?;
    active.set_pid(0, -1);
    active.flush()?;
    info!("dispatcher down");
    outcome
}

struct StopState {
    mode: Command,
    since: Instant,
    soft_killed: bool,
    hard_killed: bool,
}

#[allow(clippy::cognitive_complexity)]
fn event_loop(
    config: &FdConfig,
    dispatcher: &mut Dispatcher,
    channels: &mut Channels,
    spawner: &mut ProcessSpawner,
    active: &mut ActiveFile,
) -> io::Result<()> {
    let mut stop: Option<StopState> = None;
    let mut ticks: u32 = 0;

    loop {
        let ready = channels.poll(config.poll_timeout(spawner.has_children()))?;
        let now = now_secs();

        if ready.cmd {
            for byte in channels.read_commands() {
                match Command::from_u8(byte) {
                    Some(cmd) if cmd.is_stop() => {
                        info!("stop command {cmd:?}");
                        stop.get_or_insert_with(|| StopState {
                            mode: cmd,
                            since: Instant::now(),
                            soft_killed: false,
                            hard_killed: false,
                        });
                        dispatcher.begin_stop();
                    }
                    Some(Command::ForceRemoteDirCheck) => {
                        dispatcher.check_retrieve(now, true);
                    }
                    Some(Command::CheckFsaEntries) => dispatcher.reconcile(),
                    Some(Command::FsaAboutToChange | Command::FlushMsgFifoDumpQueue) => {
                        dispatcher.persist()?;
                    }
                    Some(Command::RereadLocInterfaceFile) => {
                        debug!("local interface file reread requested");
                    }
                    Some(_) | None => debug!("unknown command byte {byte}"),
                }
            }
        }
        if ready.msg && stop.is_none() {
            for record in channels.read_messages() {
                dispatcher.admit_message(&record, now);
            }
        }
        if ready.fin {
            for value in channels.read_fin() {
                dispatcher.handle_fin(value, now);
            }
        }
        if ready.retry {
            for host in channels.read_retry() {
                if host >= 0 {
                    dispatcher.force_retry_host(host as usize, now);
                }
            }
        }
        if ready.trl {
            for host in channels.read_trl() {
                if host >= 0 && (host as usize) < dispatcher.hsa.len() {
                    dispatcher.refresh_trl(host as usize);
                }
            }
        }
        if ready.delete {
            let payload = channels.read_delete();
            debug!("delete helper payload of {} bytes", payload.len());
        }
        if ready.wakeup {
            channels.drain_wakeup();
        }

        // Reap whatever finished, whether or not fin announced it.
        while let Some((pid, code)) = spawner.try_reap() {
            dispatcher.handle_exit(pid, code, now);
        }

        // External tools request shutdown through the active file.
        if stop.is_none() && active.shutdown_requested() {
            info!("shutdown requested through AFD_ACTIVE");
            stop = Some(StopState {
                mode: Command::Stop,
                since: Instant::now(),
                soft_killed: false,
                hard_killed: false,
            });
            dispatcher.begin_stop();
        }

        if let Some(state) = &mut stop {
            if drive_shutdown(config, dispatcher, spawner, state) {
                return Ok(());
            }
            continue;
        }

        dispatcher.check_retrieve(now, false);
        dispatcher.try_start(now, spawner);

        ticks += 1;
        if ticks >= HOUSEKEEPING_TICKS {
            ticks = 0;
            dispatcher.reconcile();
            if let Err(e) = dispatcher.persist() {
                warn!("persist failed: {e}");
            }
        }
    }
}

/// Advances the shutdown state machine; true when fully drained.
fn drive_shutdown(
    config: &FdConfig,
    dispatcher: &mut Dispatcher,
    spawner: &mut ProcessSpawner,
    state: &mut StopState,
) -> bool {
    if dispatcher.active_connections() == 0 && !spawner.has_children() {
        return true;
    }
    let elapsed = state.since.elapsed();
    match state.mode {
        Command::SaveStop => {
            // Drain within the budget, then fall back to a normal stop.
            if elapsed >= Duration::from_secs(config.fd_timeout_secs) {
                warn!("drain budget exhausted, escalating to STOP");
                state.mode = Command::Stop;
                state.since = Instant::now();
            }
        }
        _ => {
            let delay = if state.mode == Command::QuickStop {
                QUICK_KILL_DELAY
            } else {
                Duration::from_secs(config.kill_delay_secs)
            };
            if !state.soft_killed {
                // Parked workers get the retire order; the rest the soft
                // signal.
                let slots: Vec<(usize, usize)> = dispatcher
                    .connections
                    .iter()
                    .map(|(_, c)| (c.host_index, c.job_slot))
                    .collect();
                for (host, slot) in slots {
                    dispatcher.retire_parked(host, slot);
                }
                dispatcher.kill_all(false, spawner);
                state.soft_killed = true;
            } else if !state.hard_killed && elapsed >= delay {
                error!("workers survived the soft kill, escalating");
                dispatcher.kill_all(true, spawner);
                state.hard_killed = true;
            }
        }
    }
    false
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
