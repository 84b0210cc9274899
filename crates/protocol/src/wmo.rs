//! The WMO-over-TCP send session.
//!
//! Each file travels as one bulletin: a 10-byte indicator (`%08u` payload
//! length plus a two-byte type, `BI`, `AN` or `FX`), an optional header
//! synthesised from the file name with an optional three-digit channel
//! counter, the file content, and a CR-CR-LF-ETX trailer. The receiving
//! side may acknowledge each bulletin; with `check-reply` on, a negative
//! or garbled acknowledgement fails the file.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;

use afd_core::exit::WorkerExit;
use afd_core::job::JobSpec;

use crate::error::TransferError;
use crate::session::{connect_stream, SendSession, SessionConfig};

pub mod counter;

pub use counter::WmoCounter;

const SOH: u8 = 0x01;
const ETX: u8 = 0x03;
const CR: u8 = 0x0d;
const LF: u8 = 0x0a;

/// Bulletin payload type carried in the indicator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BulletinType {
    /// Binary.
    Binary,
    /// Alphanumeric.
    Alphanumeric,
    /// Facsimile.
    Fax,
}

impl BulletinType {
    const fn tag(self) -> &'static [u8; 2] {
        match self {
            Self::Binary => b"BI",
            Self::Alphanumeric => b"AN",
            Self::Fax => b"FX",
        }
    }
}

/// One WMO socket connection.
#[derive(Debug)]
pub struct WmoSession {
    host: String,
    port: u16,
    with_header: bool,
    with_counter: bool,
    check_reply: bool,
    bulletin_type: BulletinType,
    config: SessionConfig,
    counter: Option<WmoCounter>,
    stream: Option<TcpStream>,
}

impl WmoSession {
    /// Prepares a session; `counter` supplies the channel counter when the
    /// job asks for one.
    #[must_use]
    pub fn new(spec: &JobSpec, config: SessionConfig, counter: Option<WmoCounter>) -> Self {
        Self {
            host: spec.destination.host.clone(),
            port: spec.destination.port,
            with_header: spec.wmo_with_header,
            with_counter: spec.wmo_with_counter,
            check_reply: spec.wmo_check_reply,
            bulletin_type: BulletinType::Binary,
            config,
            counter,
            stream: None,
        }
    }

    /// Opens the per-host counter file under `counter_dir` and attaches it.
    pub fn attach_counter(&mut self, counter_dir: &Path) -> Result<(), TransferError> {
        let path = counter_dir.join(format!("{}.{}", self.host, self.port));
        self.counter = Some(
            WmoCounter::open(&path)
                .map_err(|e| TransferError::io(WorkerExit::OpenLocal, &e))?,
        );
        Ok(())
    }

    fn stream(&mut self) -> Result<&mut TcpStream, TransferError> {
        self.stream
            .as_mut()
            .ok_or_else(|| TransferError::new(WorkerExit::Connect, "socket not connected"))
    }
}

impl SendSession for WmoSession {
    fn connect(&mut self) -> Result<(), TransferError> {
        if self.with_counter
            && self.counter.is_none()
            && let Some(dir) = self.config.counter_dir.clone()
        {
            self.attach_counter(&dir)?;
        }
        self.stream = Some(connect_stream(&self.host, self.port, self.config.timeout)?);
        self.config.interrupt.check()
    }

    fn open(&mut self, lock_name: &str, size: u64) -> Result<(), TransferError> {
        let header = if self.with_header {
            let count = match (&mut self.counter, self.with_counter) {
                (Some(counter), true) => Some(
                    counter
                        .next()
                        .map_err(|e| TransferError::io(WorkerExit::WriteLocal, &e))?,
                ),
                _ => None,
            };
            bulletin_header(lock_name, count)
        } else {
            Vec::new()
        };
        let envelope = envelope_indicator(header.len() as u64 + size + 4, self.bulletin_type);
        let stream = self.stream()?;
        stream
            .write_all(&envelope)
            .and_then(|()| stream.write_all(&header))
            .map_err(|e| TransferError::io(WorkerExit::WriteRemote, &e))
    }

    fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.config.interrupt.check()?;
        let stream = self.stream()?;
        stream
            .write_all(data)
            .map_err(|e| TransferError::io(WorkerExit::WriteRemote, &e))
    }

    fn close_file(&mut self) -> Result<(), TransferError> {
        let check_reply = self.check_reply;
        let stream = self.stream()?;
        stream
            .write_all(&[CR, CR, LF, ETX])
            .map_err(|e| TransferError::io(WorkerExit::WriteRemote, &e))?;
        if check_reply {
            let mut reply = [0u8; 10];
            stream
                .read_exact(&mut reply)
                .map_err(|e| TransferError::io(WorkerExit::CheckReply, &e))?;
            if &reply[8..10] != b"AK" {
                return Err(TransferError::new(
                    WorkerExit::CheckReply,
                    format!("negative acknowledgement: {:?}", &reply[8..10]),
                ));
            }
        }
        Ok(())
    }

    fn publish(&mut self, _lock_name: &str, _final_name: &str) -> Result<(), TransferError> {
        // A bulletin is published the moment its trailer is on the wire.
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransferError> {
        if let Some(stream) = self.stream.take() {
            stream
                .shutdown(std::net::Shutdown::Both)
                .map_err(|e| TransferError::io(WorkerExit::Quit, &e))?;
        }
        Ok(())
    }
}

/// Builds the 10-byte length + type indicator.
fn envelope_indicator(payload_len: u64, bulletin_type: BulletinType) -> [u8; 10] {
    let mut out = [0u8; 10];
    let digits = format!("{:08}", payload_len.min(99_999_999));
    out[..8].copy_from_slice(digits.as_bytes());
    out[8..].copy_from_slice(bulletin_type.tag());
    out
}

/// Synthesises the bulletin header from the file name: SOH CR CR LF, the
/// name stem with underscores as spaces, the optional three-digit counter,
/// CR CR LF.
fn bulletin_header(file_name: &str, counter: Option<u32>) -> Vec<u8> {
    let stem = file_name.split('.').next().unwrap_or(file_name);
    let mut out = vec![SOH, CR, CR, LF];
    for b in stem.bytes() {
        out.push(if b == b'_' { b' ' } else { b });
    }
    if let Some(n) = counter {
        out.push(b' ');
        out.extend_from_slice(format!("{:03}", n % 1000).as_bytes());
    }
    out.extend_from_slice(&[CR, CR, LF]);
    out
}
