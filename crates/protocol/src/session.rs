//! The generic send-session contract and shared transport plumbing.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use afd_core::exit::WorkerExit;
use afd_core::job::{JobSpec, ProtocolKind};

use crate::error::TransferError;

/// Cooperative cancellation token shared with the worker's control channel.
///
/// Blocking I/O runs with read/write deadlines, so the token is observed
/// between chunks rather than interrupting a syscall.
#[derive(Clone, Debug, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    /// A fresh, unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once cancellation was requested.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Fails with `GotKilled` once cancellation was requested.
    pub fn check(&self) -> Result<(), TransferError> {
        if self.is_set() {
            Err(TransferError::new(
                WorkerExit::GotKilled,
                "termination requested",
            ))
        } else {
            Ok(())
        }
    }
}

/// Everything a session needs beyond the job spec itself.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Per-transfer timeout, from the host record.
    pub timeout: Duration,
    /// Host protocol-option bits (passive FTP and friends).
    pub protocol_options: u32,
    /// Cancellation token.
    pub interrupt: Interrupt,
    /// Where the WMO channel counter files live, when counters are in use.
    pub counter_dir: Option<std::path::PathBuf>,
}

impl SessionConfig {
    /// A config with the given timeout and no options.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            protocol_options: 0,
            interrupt: Interrupt::new(),
            counter_dir: None,
        }
    }
}

/// One protocol-specific send connection.
///
/// The worker drives the phases in order: `connect`, then per file
/// `open` / `write_chunk`* / `close_file` / `publish`, and finally
/// `disconnect`. Sessions map every failure onto the worker exit code the
/// dispatcher will classify.
pub trait SendSession {
    /// Connects and authenticates.
    fn connect(&mut self) -> Result<(), TransferError>;

    /// Opens the remote file under its lock name.
    fn open(&mut self, lock_name: &str, size: u64) -> Result<(), TransferError>;

    /// Streams one chunk of file content.
    fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransferError>;

    /// Completes the current file's data.
    fn close_file(&mut self) -> Result<(), TransferError>;

    /// Atomically renames the lock name to the publish name.
    fn publish(&mut self, lock_name: &str, final_name: &str) -> Result<(), TransferError>;

    /// Applies mode/owner to the published file where the protocol can.
    fn chmod_chown(
        &mut self,
        _final_name: &str,
        _mode: Option<u32>,
        _owner: Option<&str>,
    ) -> Result<(), TransferError> {
        Ok(())
    }

    /// Creates the per-connection `LOCKFILE`, for jobs using that style.
    fn create_dir_lock(&mut self) -> Result<(), TransferError> {
        Ok(())
    }

    /// Removes the per-connection `LOCKFILE`.
    fn remove_dir_lock(&mut self) -> Result<(), TransferError> {
        Ok(())
    }

    /// Disconnects in an orderly way.
    fn disconnect(&mut self) -> Result<(), TransferError>;
}

/// Builds the session matching the job's protocol.
pub fn open_session(
    spec: &JobSpec,
    config: SessionConfig,
) -> Result<Box<dyn SendSession>, TransferError> {
    Ok(match spec.destination.protocol {
        ProtocolKind::Ftp => Box::new(crate::ftp::FtpSession::new(spec, config)),
        ProtocolKind::Sftp => Box::new(crate::sftp::SftpSession::new(spec, config)),
        ProtocolKind::Scp => Box::new(crate::sftp::ScpSession::new(spec, config)),
        ProtocolKind::Smtp => Box::new(crate::smtp::SmtpSession::new(spec, config)),
        ProtocolKind::Http => Box::new(crate::http::HttpSession::new(spec, config)),
        ProtocolKind::Wmo => Box::new(crate::wmo::WmoSession::new(spec, config, None)),
        ProtocolKind::Loc => Box::new(crate::loc::LocSession::new(spec)),
        ProtocolKind::Exec => {
            return Err(TransferError::new(
                WorkerExit::Syntax,
                "exec jobs do not open a session",
            ));
        }
    })
}

/// Connects a TCP stream with the per-transfer timeout applied to the
/// connect itself and to every subsequent read and write.
pub(crate) fn connect_stream(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<TcpStream, TransferError> {
    let addrs: Vec<_> = (host, port)
        .to_socket_addrs()
        .map_err(|e| TransferError::new(WorkerExit::Connect, format!("resolve {host}: {e}")))?
        .collect();
    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream
                    .set_read_timeout(Some(timeout))
                    .and_then(|()| stream.set_write_timeout(Some(timeout)))
                    .map_err(|e| TransferError::io(WorkerExit::Connect, &e))?;
                return Ok(stream);
            }
            Err(e) => last_err = e,
        }
    }
    Err(TransferError::io(WorkerExit::Connect, &last_err))
}

/// Line-oriented command channel used by the FTP/SMTP/HTTP sessions.
#[derive(Debug)]
pub(crate) struct TextChannel {
    reader: BufReader<TcpStream>,
}

impl TextChannel {
    pub(crate) fn new(stream: TcpStream) -> io::Result<Self> {
        Ok(Self {
            reader: BufReader::new(stream),
        })
    }

    pub(crate) fn stream(&self) -> &TcpStream {
        self.reader.get_ref()
    }

    /// Sends one CRLF-terminated command line.
    pub(crate) fn send_line(&mut self, line: &str) -> io::Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\r\n")
    }

    /// Reads one line, stripping the CRLF.
    pub(crate) fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the control channel",
            ));
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    /// Reads one (possibly multi-line) numeric reply and returns its code
    /// plus the final line. Multi-line replies use the `xyz-` continuation
    /// convention.
    pub(crate) fn read_reply(&mut self) -> io::Result<(u16, String)> {
        let first = self.read_line()?;
        let code = parse_reply_code(&first)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, first.clone()))?;
        let mut line = first;
        while line.len() >= 4 && line.as_bytes()[3] == b'-' {
            line = self.read_line()?;
            // Continuation ends at a line starting with the same code and
            // a space; intermediate lines are skipped.
            if parse_reply_code(&line) != Some(code) {
                continue;
            }
        }
        Ok((code, line))
    }

    /// Reads exactly `buf.len()` bytes.
    pub(crate) fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.reader.read_exact(buf)
    }
}

fn parse_reply_code(line: &str) -> Option<u16> {
    if line.len() < 3 {
        return None;
    }
    line[..3].parse().ok()
}
