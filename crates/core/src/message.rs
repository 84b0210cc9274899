//! The fixed-size binary message record.
//!
//! The directory scanner announces every new bundle of files by writing one
//! of these records into the `msg` channel. The layout is naturally padded
//! and always [`MAX_BIN_MSG_LENGTH`] bytes long so the dispatcher can read
//! whole records without framing.
//!
//! # Layout
//!
//! | offset | type | field |
//! |---|---|---|
//! | 0  | i64 | creation_time |
//! | 8  | u32 | job_id |
//! | 12 | u32 | split_job_counter |
//! | 16 | u32 | files_to_send |
//! | 20 | -   | padding |
//! | 24 | i64 | file_size_to_send |
//! | 32 | u16 | dir_no |
//! | 34 | -   | padding |
//! | 36 | u32 | unique_number |
//! | 40 | u8  | msg_priority (`'0'..='9'`) |
//! | 41 | u8  | originator |
//! | 42 | -   | padding |
//!
//! All integers are little endian. Padding bytes are written as zero and
//! ignored on decode.

use thiserror::Error;

use crate::ids::{JobId, MsgName, MsgNameError};

/// Total encoded length of one message record.
pub const MAX_BIN_MSG_LENGTH: usize = 48;

/// Errors produced while decoding a message record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageDecodeError {
    /// Fewer than [`MAX_BIN_MSG_LENGTH`] bytes were available.
    #[error("short message record: got {0} bytes, need {MAX_BIN_MSG_LENGTH}")]
    Short(usize),
    /// The priority byte was outside `'0'..='9'`.
    #[error("invalid message priority byte {0:#04x}")]
    BadPriority(u8),
}

/// One unit-of-work announcement from the directory scanner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageRecord {
    /// Seconds since the epoch at which the bundle was created.
    pub creation_time: i64,
    /// The distribution rule the bundle belongs to.
    pub job_id: JobId,
    /// Split counter when an input burst was split into several messages.
    pub split_job_counter: u32,
    /// Number of files waiting in the outgoing spool.
    pub files_to_send: u32,
    /// Total byte size of those files.
    pub file_size_to_send: i64,
    /// Source directory number.
    pub dir_no: u16,
    /// Per-second uniquifier.
    pub unique_number: u32,
    /// `'0'` (runs first) through `'9'` (runs last).
    pub msg_priority: u8,
    /// Tag identifying which producer wrote the record.
    pub originator: u8,
}

impl MessageRecord {
    /// Encodes the record into its fixed wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; MAX_BIN_MSG_LENGTH] {
        let mut buf = [0u8; MAX_BIN_MSG_LENGTH];
        buf[0..8].copy_from_slice(&self.creation_time.to_le_bytes());
        buf[8..12].copy_from_slice(&self.job_id.0.to_le_bytes());
        buf[12..16].copy_from_slice(&self.split_job_counter.to_le_bytes());
        buf[16..20].copy_from_slice(&self.files_to_send.to_le_bytes());
        buf[24..32].copy_from_slice(&self.file_size_to_send.to_le_bytes());
        buf[32..34].copy_from_slice(&self.dir_no.to_le_bytes());
        buf[36..40].copy_from_slice(&self.unique_number.to_le_bytes());
        buf[40] = self.msg_priority;
        buf[41] = self.originator;
        buf
    }

    /// Decodes one record from the front of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, MessageDecodeError> {
        if buf.len() < MAX_BIN_MSG_LENGTH {
            return Err(MessageDecodeError::Short(buf.len()));
        }
        let priority = buf[40];
        if !priority.is_ascii_digit() {
            return Err(MessageDecodeError::BadPriority(priority));
        }
        let le_i64 = |r: std::ops::Range<usize>| {
            i64::from_le_bytes(buf[r].try_into().unwrap_or_default())
        };
        let le_u32 = |r: std::ops::Range<usize>| {
            u32::from_le_bytes(buf[r].try_into().unwrap_or_default())
        };
        Ok(Self {
            creation_time: le_i64(0..8),
            job_id: JobId(le_u32(8..12)),
            split_job_counter: le_u32(12..16),
            files_to_send: le_u32(16..20),
            file_size_to_send: le_i64(24..32),
            dir_no: u16::from_le_bytes(buf[32..34].try_into().unwrap_or_default()),
            unique_number: le_u32(36..40),
            msg_priority: priority,
            originator: buf[41],
        })
    }

    /// The message name this record maps to in the outgoing spool.
    pub fn msg_name(&self) -> Result<MsgName, MsgNameError> {
        MsgName::new(
            self.job_id,
            self.dir_no,
            self.creation_time,
            self.unique_number,
            self.split_job_counter,
        )
    }

    /// The priority ordering key for this record.
    ///
    /// `(priority − '0') × (creation_time × 10 000 + unique + split)`; a
    /// smaller key is dispatched first. Priority `'0'` therefore always
    /// sorts ahead of everything else.
    #[must_use]
    pub fn msg_number(&self) -> f64 {
        f64::from(self.msg_priority - b'0')
            * (self.creation_time as f64 * 10_000.0
                + f64::from(self.unique_number)
                + f64::from(self.split_job_counter))
    }
}
