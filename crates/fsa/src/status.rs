//! The small `afd_status` region: dispatcher state and global counters.

use std::io;
use std::path::Path;

use crate::region::{read_u32, write_u32, MappedRegion, RegionError};

const MAGIC: u32 = 0x4146_5354; // "AFST"

const FD_STATE: usize = 0;
const BURST2_COUNTER: usize = 4;
const JOBS_IN_QUEUE: usize = 8;

const RECORD_SIZE: usize = 16;

/// Dispatcher liveness as recorded in the status region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FdState {
    /// Not running.
    Off = 0,
    /// Running normally.
    On = 1,
    /// Draining for shutdown.
    Stopping = 2,
}

impl FdState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::On,
            2 => Self::Stopping,
            _ => Self::Off,
        }
    }
}

/// The mapped status region.
#[derive(Debug)]
pub struct AfdStatus {
    region: MappedRegion,
}

impl AfdStatus {
    /// Creates the region.
    pub fn create(path: &Path) -> Result<Self, RegionError> {
        Ok(Self {
            region: MappedRegion::create(path, MAGIC, RECORD_SIZE, 1)?,
        })
    }

    /// Attaches to an existing region.
    pub fn attach(path: &Path) -> Result<Self, RegionError> {
        Ok(Self {
            region: MappedRegion::attach(path, MAGIC, RECORD_SIZE)?,
        })
    }

    /// Dispatcher state.
    #[must_use]
    pub fn fd_state(&self) -> FdState {
        FdState::from_u8(self.region.record(0)[FD_STATE])
    }

    /// Publishes the dispatcher state.
    pub fn set_fd_state(&mut self, state: FdState) {
        self.region.record_mut(0)[FD_STATE] = state as u8;
    }

    /// Connections reused through the burst handshake since start.
    #[must_use]
    pub fn burst2_counter(&self) -> u32 {
        read_u32(self.region.record(0), BURST2_COUNTER)
    }

    /// Counts one successful burst handoff.
    pub fn bump_burst2_counter(&mut self) {
        let next = self.burst2_counter().wrapping_add(1);
        write_u32(self.region.record_mut(0), BURST2_COUNTER, next);
    }

    /// Queue depth published for observers.
    #[must_use]
    pub fn jobs_in_queue(&self) -> u32 {
        read_u32(self.region.record(0), JOBS_IN_QUEUE)
    }

    /// Publishes the queue depth.
    pub fn set_jobs_in_queue(&mut self, value: u32) {
        write_u32(self.region.record_mut(0), JOBS_IN_QUEUE, value);
    }

    /// Flushes dirty pages.
    pub fn flush(&self) -> io::Result<()> {
        self.region.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_and_counters_round_trip() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("afd_status");
        let mut status = AfdStatus::create(&path).expect("creates");
        assert_eq!(status.fd_state(), FdState::Off);
        status.set_fd_state(FdState::On);
        status.bump_burst2_counter();
        status.bump_burst2_counter();
        status.set_jobs_in_queue(5);
        status.flush().expect("flushes");

        let attached = AfdStatus::attach(&path).expect("attaches");
        assert_eq!(attached.fd_state(), FdState::On);
        assert_eq!(attached.burst2_counter(), 2);
        assert_eq!(attached.jobs_in_queue(), 5);
    }
}
