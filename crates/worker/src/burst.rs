//! Worker-side burst handshake.
//!
//! After delivering its batch a worker may park instead of exiting: it
//! writes the parked state into its slot, signals the dispatcher through
//! the fin channel with its negated pid, and waits a bounded time for
//! either a follow-up message name or a retire order. The give-up path is
//! nonce-checked under the slot lock, so a worker that decided to leave
//! can never race a dispatcher that decided to hand it work.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use afd_core::ids::MsgName;
use afd_core::WorkDir;
use fsa::slot::transition;
use fsa::{BurstState, Hsa};

use crate::control::{ControlByte, WorkerControl};

/// How the park ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BurstOutcome {
    /// The dispatcher handed over another message.
    NewMessage(MsgName),
    /// The dispatcher wants the worker gone now.
    Retire,
    /// Nobody came; the worker gave up cleanly.
    TimedOut,
    /// A stop request arrived on the control channel.
    Stopped,
}

/// Poll interval while parked.
const PARK_POLL: Duration = Duration::from_millis(50);

/// Writes the (negated, for burst-ready) pid into the fin channel.
pub fn signal_fin(work: &WorkDir, pid: i32) -> io::Result<()> {
    let mut fifo = std::fs::OpenOptions::new()
        .write(true)
        .open(work.fifo("fin"))?;
    fifo.write_all(&pid.to_le_bytes())
}

/// Parks in the slot and waits for the dispatcher's verdict.
pub fn wait_for_handoff(
    hsa: &mut Hsa,
    host: usize,
    slot: usize,
    control: &mut WorkerControl,
    work: &WorkDir,
    pid: i32,
    window: Duration,
) -> io::Result<BurstOutcome> {
    // Park under the slot lock and remember the nonce we parked with.
    let observed = {
        let _guard = hsa.lock_slot(host, slot)?;
        let (state, nonce) = hsa.burst_state(host, slot);
        match transition::park(state, nonce) {
            Ok((next, nonce)) => {
                hsa.set_burst_state(host, slot, next, nonce);
                nonce
            }
            Err(_) => return Ok(BurstOutcome::TimedOut),
        }
    };

    // Burst-ready signal: negative pid on the fin channel.
    signal_fin(work, -pid)?;

    let deadline = Instant::now() + window;
    loop {
        if control.poll() == Some(ControlByte::Stop) {
            return Ok(BurstOutcome::Stopped);
        }
        let (state, _) = hsa.burst_state(host, slot);
        match state {
            BurstState::HandedOff => {
                let _guard = hsa.lock_slot(host, slot)?;
                let msg = hsa.handoff_msg(host, slot);
                let (_, nonce) = hsa.burst_state(host, slot);
                hsa.set_burst_state(host, slot, BurstState::Idle, nonce);
                if let Some(msg) = msg {
                    return Ok(BurstOutcome::NewMessage(msg));
                }
                // A handoff without a message name is dispatcher drift;
                // treat it like a timeout.
                return Ok(BurstOutcome::TimedOut);
            }
            BurstState::Retire => {
                let _guard = hsa.lock_slot(host, slot)?;
                let (_, nonce) = hsa.burst_state(host, slot);
                hsa.set_burst_state(host, slot, BurstState::Idle, nonce);
                return Ok(BurstOutcome::Retire);
            }
            _ => {}
        }
        if Instant::now() >= deadline {
            let _guard = hsa.lock_slot(host, slot)?;
            let (state, nonce) = hsa.burst_state(host, slot);
            match transition::give_up(state, nonce, observed) {
                Ok((next, nonce)) => {
                    hsa.set_burst_state(host, slot, next, nonce);
                    return Ok(BurstOutcome::TimedOut);
                }
                // The dispatcher got there first; loop once more and take
                // whatever it decided.
                Err(_) => continue,
            }
        }
        std::thread::sleep(PARK_POLL);
    }
}
