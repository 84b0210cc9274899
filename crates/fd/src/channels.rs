//! The named byte channels and their poll multiplexing.
//!
//! Every channel is a fifo under `${work}/fifodir/`, opened read-write so
//! it survives writers coming and going, and non-blocking so the event
//! loop never stalls on a half-written record. Partial reads buffer until
//! a whole record is available.

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::Duration;

use afd_core::message::{MessageRecord, MAX_BIN_MSG_LENGTH};
use afd_core::WorkDir;
use tracing::debug;

/// The channel set the dispatcher multiplexes.
#[derive(Debug)]
pub struct Channels {
    cmd: Channel,
    msg: Channel,
    fin: Channel,
    retry: Channel,
    delete: Channel,
    trl: Channel,
    wakeup: Channel,
}

/// What a poll round reported readable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ready {
    /// cmd channel has bytes.
    pub cmd: bool,
    /// msg channel has bytes.
    pub msg: bool,
    /// fin channel has bytes.
    pub fin: bool,
    /// retry channel has bytes.
    pub retry: bool,
    /// delete channel has bytes.
    pub delete: bool,
    /// trl-calc channel has bytes.
    pub trl: bool,
    /// wake-up channel has bytes.
    pub wakeup: bool,
}

impl Ready {
    /// True when nothing was readable (the poll timed out).
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        !(self.cmd
            || self.msg
            || self.fin
            || self.retry
            || self.delete
            || self.trl
            || self.wakeup)
    }
}

#[derive(Debug)]
struct Channel {
    file: File,
    buf: Vec<u8>,
}

impl Channel {
    fn open(path: &Path) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)?;
        Ok(Self {
            file,
            buf: Vec::new(),
        })
    }

    /// Drains whatever is readable into the internal buffer.
    fn fill(&mut self) {
        let mut chunk = [0u8; 4096];
        loop {
            match self.file.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("channel read: {e}");
                    break;
                }
            }
        }
    }

    /// Takes complete fixed-size records off the front of the buffer.
    fn take_records(&mut self, size: usize) -> Vec<Vec<u8>> {
        self.fill();
        let whole = self.buf.len() / size;
        let mut out = Vec::with_capacity(whole);
        for i in 0..whole {
            out.push(self.buf[i * size..(i + 1) * size].to_vec());
        }
        self.buf.drain(..whole * size);
        out
    }

    fn take_bytes(&mut self) -> Vec<u8> {
        self.fill();
        std::mem::take(&mut self.buf)
    }
}

/// Creates every fifo the dispatcher and its workers use.
pub fn create_fifos(work: &WorkDir, max_connections: usize) -> io::Result<()> {
    let mut names: Vec<String> = ["cmd", "msg", "fin", "retry", "delete", "trl", "wakeup"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
    for i in 0..max_connections {
        names.push(format!("worker_{i}"));
    }
    for name in names {
        let path = work.fifo(&name);
        if path.exists() {
            continue;
        }
        let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "nul in fifo path"))?;
        // SAFETY: c_path is a valid NUL-terminated path.
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
        if rc == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EEXIST) {
                return Err(err);
            }
        }
    }
    Ok(())
}

impl Channels {
    /// Opens the channel set (fifos must exist).
    pub fn open(work: &WorkDir) -> io::Result<Self> {
        Ok(Self {
            cmd: Channel::open(&work.fifo("cmd"))?,
            msg: Channel::open(&work.fifo("msg"))?,
            fin: Channel::open(&work.fifo("fin"))?,
            retry: Channel::open(&work.fifo("retry"))?,
            delete: Channel::open(&work.fifo("delete"))?,
            trl: Channel::open(&work.fifo("trl"))?,
            wakeup: Channel::open(&work.fifo("wakeup"))?,
        })
    }

    /// Waits for any channel to become readable, up to `timeout`.
    pub fn poll(&self, timeout: Duration) -> io::Result<Ready> {
        let files = [
            &self.cmd.file,
            &self.msg.file,
            &self.fin.file,
            &self.retry.file,
            &self.delete.file,
            &self.trl.file,
            &self.wakeup.file,
        ];
        let mut fds: Vec<libc::pollfd> = files
            .iter()
            .map(|f| libc::pollfd {
                fd: f.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        // SAFETY: fds points at a live, correctly sized pollfd array.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, millis) };
        if rc == -1 {
            let err = io::Error::last_os_error();
            // EINTR is transient-local: report an idle round and go on.
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(Ready::default());
            }
            return Err(err);
        }
        let readable = |i: usize| fds[i].revents & libc::POLLIN != 0;
        Ok(Ready {
            cmd: readable(0),
            msg: readable(1),
            fin: readable(2),
            retry: readable(3),
            delete: readable(4),
            trl: readable(5),
            wakeup: readable(6),
        })
    }

    /// Command bytes waiting on the cmd channel.
    pub fn read_commands(&mut self) -> Vec<u8> {
        self.cmd.take_bytes()
    }

    /// Whole message records waiting on the msg channel.
    pub fn read_messages(&mut self) -> Vec<MessageRecord> {
        self.msg
            .take_records(MAX_BIN_MSG_LENGTH)
            .into_iter()
            .filter_map(|raw| match MessageRecord::decode(&raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!("dropping undecodable message record: {e}");
                    None
                }
            })
            .collect()
    }

    /// Pid values waiting on the fin channel (negative = burst-ready).
    pub fn read_fin(&mut self) -> Vec<i32> {
        Self::i32s(self.fin.take_records(4))
    }

    /// Host indices on the retry channel.
    pub fn read_retry(&mut self) -> Vec<i32> {
        Self::i32s(self.retry.take_records(4))
    }

    /// Host indices on the trl-calc channel.
    pub fn read_trl(&mut self) -> Vec<i32> {
        Self::i32s(self.trl.take_records(4))
    }

    /// Opaque payload on the delete channel.
    pub fn read_delete(&mut self) -> Vec<u8> {
        self.delete.take_bytes()
    }

    /// Drains the wake-up channel; content is irrelevant.
    pub fn drain_wakeup(&mut self) {
        let _ = self.wakeup.take_bytes();
    }

    fn i32s(records: Vec<Vec<u8>>) -> Vec<i32> {
        records
            .into_iter()
            .map(|raw| i32::from_le_bytes(raw.try_into().unwrap_or_default()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fifo_workspace() -> (tempfile::TempDir, WorkDir) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let work = WorkDir::new(tmp.path());
        work.create_all().expect("creates");
        create_fifos(&work, 2).expect("fifos");
        (tmp, work)
    }

    #[test]
    fn create_fifos_is_idempotent() {
        let (_tmp, work) = fifo_workspace();
        create_fifos(&work, 2).expect("again");
        assert!(work.fifo("cmd").exists());
        assert!(work.fifo("worker_1").exists());
    }

    #[test]
    fn poll_times_out_idle() {
        let (_tmp, work) = fifo_workspace();
        let channels = Channels::open(&work).expect("opens");
        let ready = channels.poll(Duration::from_millis(10)).expect("polls");
        assert!(ready.is_idle());
    }

    #[test]
    fn fin_values_round_trip_through_the_fifo() {
        let (_tmp, work) = fifo_workspace();
        let mut channels = Channels::open(&work).expect("opens");

        let mut writer = std::fs::OpenOptions::new()
            .write(true)
            .open(work.fifo("fin"))
            .expect("opens for write");
        writer.write_all(&1234i32.to_le_bytes()).expect("writes");
        writer.write_all(&(-77i32).to_le_bytes()).expect("writes");

        let ready = channels.poll(Duration::from_millis(100)).expect("polls");
        assert!(ready.fin);
        assert_eq!(channels.read_fin(), vec![1234, -77]);
        // Drained.
        assert!(channels.read_fin().is_empty());
    }

    #[test]
    fn partial_message_records_buffer_until_complete() {
        use afd_core::ids::JobId;
        let (_tmp, work) = fifo_workspace();
        let mut channels = Channels::open(&work).expect("opens");
        let record = MessageRecord {
            creation_time: 1_700_000_000,
            job_id: JobId(5),
            split_job_counter: 0,
            files_to_send: 1,
            file_size_to_send: 10,
            dir_no: 0,
            unique_number: 1,
            msg_priority: b'5',
            originator: b'A',
        };
        let encoded = record.encode();

        let mut writer = std::fs::OpenOptions::new()
            .write(true)
            .open(work.fifo("msg"))
            .expect("opens for write");
        // First half only: nothing decodable yet.
        writer.write_all(&encoded[..20]).expect("writes");
        assert!(channels.read_messages().is_empty());
        // Second half completes the record.
        writer.write_all(&encoded[20..]).expect("writes");
        let decoded = channels.read_messages();
        assert_eq!(decoded, vec![record]);
    }

    #[test]
    fn command_bytes_pass_through(){
        let (_tmp, work) = fifo_workspace();
        let mut channels = Channels::open(&work).expect("opens");
        let mut writer = std::fs::OpenOptions::new()
            .write(true)
            .open(work.fifo("cmd"))
            .expect("opens for write");
        writer.write_all(&[6, 7]).expect("writes");
        assert_eq!(channels.read_commands(), vec![6, 7]);
    }
}
