//! The `AFD_ACTIVE` process table and shared shutdown flag.
//!
//! Layout: `(max_proc + 1)` pids (i32, slot 0 is the dispatcher itself),
//! one u32 holding `max_proc`, then two flag bytes: {hostname-set,
//! shared-shutdown}. External tools write [`SHUTDOWN`] into the trailing
//! byte to request an orderly exit; the dispatcher polls it every tick.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use memmap2::MmapMut;

/// Value of the shared-shutdown byte requesting exit.
pub const SHUTDOWN: u8 = 4;

/// The mapped `AFD_ACTIVE` file.
#[derive(Debug)]
pub struct ActiveFile {
    _file: File,
    map: MmapMut,
    max_proc: usize,
}

impl ActiveFile {
    fn len_for(max_proc: usize) -> usize {
        (max_proc + 1) * 4 + 4 + 2
    }

    /// Creates (truncating) the file for `max_proc` worker slots.
    pub fn create(path: &Path, max_proc: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(Self::len_for(max_proc) as u64)?;
        // SAFETY: mapping a file this handle keeps open.
        let mut map = unsafe { MmapMut::map_mut(&file) }?;
        let off = (max_proc + 1) * 4;
        map[off..off + 4].copy_from_slice(&(max_proc as u32).to_le_bytes());
        let mut this = Self {
            _file: file,
            map,
            max_proc,
        };
        for i in 0..=max_proc {
            this.set_pid(i, -1);
        }
        Ok(this)
    }

    /// Attaches to an existing file, reading `max_proc` from it.
    pub fn attach(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        // SAFETY: as in `create`.
        let map = unsafe { MmapMut::map_mut(&file) }?;
        if len < Self::len_for(0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "AFD_ACTIVE too short",
            ));
        }
        let count_off = len - 6;
        let max_proc =
            u32::from_le_bytes(map[count_off..count_off + 4].try_into().unwrap_or_default())
                as usize;
        if len != Self::len_for(max_proc) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "AFD_ACTIVE length disagrees with its process count",
            ));
        }
        Ok(Self {
            _file: file,
            map,
            max_proc,
        })
    }

    /// Worker slots tracked (excluding the dispatcher's own slot 0).
    #[must_use]
    pub const fn max_proc(&self) -> usize {
        self.max_proc
    }

    /// The pid stored in slot `i` (0 = dispatcher), or -1.
    #[must_use]
    pub fn pid(&self, i: usize) -> i32 {
        let off = i * 4;
        i32::from_le_bytes(self.map[off..off + 4].try_into().unwrap_or_default())
    }

    /// Stores a pid in slot `i`; -1 clears it.
    pub fn set_pid(&mut self, i: usize, pid: i32) {
        assert!(i <= self.max_proc, "active-file slot out of range");
        let off = i * 4;
        self.map[off..off + 4].copy_from_slice(&pid.to_le_bytes());
    }

    /// True once the hostname flag byte has been set.
    #[must_use]
    pub fn hostname_set(&self) -> bool {
        self.map[Self::len_for(self.max_proc) - 2] != 0
    }

    /// Records that the canonical hostname was written out.
    pub fn mark_hostname_set(&mut self) {
        let off = Self::len_for(self.max_proc) - 2;
        self.map[off] = 1;
    }

    /// True when an external tool requested shutdown.
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.map[Self::len_for(self.max_proc) - 1] == SHUTDOWN
    }

    /// Requests shutdown the way an external tool would.
    pub fn request_shutdown(&mut self) {
        let off = Self::len_for(self.max_proc) - 1;
        self.map[off] = SHUTDOWN;
    }

    /// Flushes dirty pages.
    pub fn flush(&self) -> io::Result<()> {
        self.map.flush()
    }
}
