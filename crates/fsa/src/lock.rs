//! Scoped byte-range advisory locks.
//!
//! Updaters of a status region hold a write lock on the well-known offsets
//! of the counters they mutate; read-only consumers may take shared locks.
//! The guard releases on drop, so every exit path unlocks.

use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

/// Advisory lock kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockKind {
    /// Shared (read) lock.
    Shared,
    /// Exclusive (write) lock.
    Exclusive,
}

/// A held byte range; unlocks on drop.
#[derive(Debug)]
pub struct RegionGuard {
    fd: RawFd,
    start: i64,
    len: i64,
}

fn flock(kind: i32, start: i64, len: i64) -> libc::flock {
    // SAFETY: all-zero is a valid flock value; fields are set below.
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = kind as i16;
    fl.l_whence = libc::SEEK_SET as i16;
    fl.l_start = start;
    fl.l_len = len;
    fl
}

/// Blocks until the byte range `[start, start+len)` of `file` is locked.
pub fn lock_region(
    file: &File,
    kind: LockKind,
    start: u64,
    len: u64,
) -> io::Result<RegionGuard> {
    let l_type = match kind {
        LockKind::Shared => libc::F_RDLCK,
        LockKind::Exclusive => libc::F_WRLCK,
    };
    let fl = flock(l_type, start as i64, len as i64);
    // SAFETY: fl is a fully initialised flock and fd is valid for `file`.
    let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLKW, &fl) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(RegionGuard {
        fd: file.as_raw_fd(),
        start: start as i64,
        len: len as i64,
    })
}

/// Non-blocking variant; returns `Ok(None)` when the range is busy.
pub fn try_lock_region(
    file: &File,
    kind: LockKind,
    start: u64,
    len: u64,
) -> io::Result<Option<RegionGuard>> {
    let l_type = match kind {
        LockKind::Shared => libc::F_RDLCK,
        LockKind::Exclusive => libc::F_WRLCK,
    };
    let fl = flock(l_type, start as i64, len as i64);
    // SAFETY: as in `lock_region`.
    let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &fl) };
    if rc == -1 {
        let err = io::Error::last_os_error();
        return match err.raw_os_error() {
            Some(libc::EACCES | libc::EAGAIN) => Ok(None),
            _ => Err(err),
        };
    }
    Ok(Some(RegionGuard {
        fd: file.as_raw_fd(),
        start: start as i64,
        len: len as i64,
    }))
}

impl Drop for RegionGuard {
    fn drop(&mut self) {
        let fl = flock(libc::F_UNLCK, self.start, self.len);
        // SAFETY: unlocking a range we hold; failure leaves the lock to die
        // with the descriptor.
        unsafe {
            let _ = libc::fcntl(self.fd, libc::F_SETLK, &fl);
        }
    }
}
