//! The per-worker control channel.
//!
//! One named fifo per connection slot. The dispatcher writes a single byte
//! to wake a parked worker ([`ControlByte::Wake`]) or to request orderly
//! termination ([`ControlByte::Stop`]); the worker polls between files and
//! while parked.

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Control bytes understood by a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlByte {
    /// A burst handoff is waiting in the slot.
    Wake,
    /// Flush state and exit with `GotKilled`.
    Stop,
}

/// Byte value of [`ControlByte::Wake`] on the wire.
pub const WAKE: u8 = 1;
/// Byte value of [`ControlByte::Stop`] on the wire.
pub const STOP: u8 = 2;

/// The fifo path for a connection slot.
#[must_use]
pub fn control_fifo_path(work: &afd_core::WorkDir, connect_pos: usize) -> PathBuf {
    work.fifo(&format!("worker_{connect_pos}"))
}

/// The worker-side reader.
#[derive(Debug)]
pub struct WorkerControl {
    fifo: Option<File>,
}

impl WorkerControl {
    /// Opens the fifo non-blocking; a missing fifo yields a control that
    /// never reports anything (hand-run workers).
    #[must_use]
    pub fn open(path: &Path) -> Self {
        let fifo = File::options()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .ok();
        Self { fifo }
    }

    /// A control that never fires, for tests and hand runs.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { fifo: None }
    }

    /// Drains the fifo and returns the most significant byte seen: a stop
    /// request wins over any number of wakeups.
    pub fn poll(&mut self) -> Option<ControlByte> {
        let fifo = self.fifo.as_mut()?;
        let mut seen: Option<ControlByte> = None;
        let mut buf = [0u8; 16];
        loop {
            match fifo.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for &b in &buf[..n] {
                        match b {
                            STOP => return Some(ControlByte::Stop),
                            WAKE => seen = Some(ControlByte::Wake),
                            _ => {}
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
        seen
    }
}
