//! The log record schemas.
//!
//! One line per record. The leading field is the event time in lower-case
//! hex, left-justified to ten columns; the remaining fields are joined by
//! the single [`SEPARATOR`] byte. Numeric fields are hex, durations are
//! fixed-point seconds.

use std::fmt;

use thiserror::Error;

/// The single separator byte used across all log record schemas.
pub const SEPARATOR: char = '|';

/// Severity sign of a transfer-log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Informational.
    Info,
    /// Something degraded but the transfer went on.
    Warn,
    /// The transfer failed.
    Error,
    /// Debug detail.
    Debug,
}

impl Severity {
    const fn sign(self) -> char {
        match self {
            Self::Info => 'I',
            Self::Warn => 'W',
            Self::Error => 'E',
            Self::Debug => 'D',
        }
    }

    const fn from_sign(sign: char) -> Option<Self> {
        Some(match sign {
            'I' => Self::Info,
            'W' => Self::Warn,
            'E' => Self::Error,
            'D' => Self::Debug,
            _ => return None,
        })
    }
}

/// Errors raised when parsing a record line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordParseError {
    /// The line did not have the expected field count.
    #[error("malformed record line: {0:?}")]
    Malformed(String),
    /// A numeric field failed to parse.
    #[error("bad {field} field in record: {value:?}")]
    BadField {
        /// Field name.
        field: &'static str,
        /// Offending text.
        value: String,
    },
}

fn bad(field: &'static str, value: &str) -> RecordParseError {
    RecordParseError::BadField {
        field,
        value: value.to_owned(),
    }
}

fn split_time(line: &str) -> Result<(i64, &str), RecordParseError> {
    let pos = memchr::memchr(b' ', line.as_bytes())
        .ok_or_else(|| RecordParseError::Malformed(line.to_owned()))?;
    let (time_text, rest) = (&line[..pos], &line[pos + 1..]);
    let time = i64::from_str_radix(time_text.trim_end(), 16)
        .map_err(|_| bad("time", time_text))?;
    Ok((time, rest))
}

/// One delivered file.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputRecord {
    /// Delivery time (epoch seconds).
    pub time: i64,
    /// Destination host alias.
    pub host: String,
    /// Published file name.
    pub filename: String,
    /// File size in bytes.
    pub size: u64,
    /// Transfer duration in seconds.
    pub duration: f64,
    /// The rule that delivered it.
    pub job_id: u32,
    /// Unique id tying the record to its input-log record.
    pub unique_id: String,
    /// Where the file was archived, when archiving was on.
    pub archive_path: Option<String>,
}

impl fmt::Display for OutputRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10x} {}{SEPARATOR}{}{SEPARATOR}{:x}{SEPARATOR}{:.2}{SEPARATOR}{:x}{SEPARATOR}{}",
            self.time, self.host, self.filename, self.size, self.duration, self.job_id,
            self.unique_id,
        )?;
        if let Some(archive) = &self.archive_path {
            write!(f, "{SEPARATOR}{archive}")?;
        }
        Ok(())
    }
}

impl OutputRecord {
    /// Parses a rendered record line.
    pub fn parse(line: &str) -> Result<Self, RecordParseError> {
        let (time, rest) = split_time(line)?;
        let fields: Vec<&str> = rest.split(SEPARATOR).collect();
        if fields.len() != 6 && fields.len() != 7 {
            return Err(RecordParseError::Malformed(line.to_owned()));
        }
        Ok(Self {
            time,
            host: fields[0].to_owned(),
            filename: fields[1].to_owned(),
            size: u64::from_str_radix(fields[2], 16).map_err(|_| bad("size", fields[2]))?,
            duration: fields[3].parse().map_err(|_| bad("duration", fields[3]))?,
            job_id: u32::from_str_radix(fields[4], 16).map_err(|_| bad("job_id", fields[4]))?,
            unique_id: fields[5].to_owned(),
            archive_path: fields.get(6).map(|s| (*s).to_owned()),
        })
    }
}

/// One file picked up from a monitored directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputRecord {
    /// Pickup time (epoch seconds).
    pub time: i64,
    /// File name as found.
    pub filename: String,
    /// File size in bytes.
    pub size: u64,
    /// Source directory number.
    pub dir_no: u16,
    /// Per-second uniquifier.
    pub unique: u32,
}

impl fmt::Display for InputRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10x} {}{SEPARATOR}{:x}{SEPARATOR}{:x}{SEPARATOR}{:x}",
            self.time, self.filename, self.size, self.dir_no, self.unique,
        )
    }
}

impl InputRecord {
    /// Parses a rendered record line.
    pub fn parse(line: &str) -> Result<Self, RecordParseError> {
        let (time, rest) = split_time(line)?;
        let fields: Vec<&str> = rest.split(SEPARATOR).collect();
        let [filename, size, dir_no, unique] = fields[..] else {
            return Err(RecordParseError::Malformed(line.to_owned()));
        };
        Ok(Self {
            time,
            filename: filename.to_owned(),
            size: u64::from_str_radix(size, 16).map_err(|_| bad("size", size))?,
            dir_no: u16::from_str_radix(dir_no, 16).map_err(|_| bad("dir_no", dir_no))?,
            unique: u32::from_str_radix(unique, 16).map_err(|_| bad("unique", unique))?,
        })
    }
}

/// One production event, body as supplied by the producer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductionRecord {
    /// Event time (epoch seconds).
    pub time: i64,
    /// Opaque body.
    pub body: String,
}

impl fmt::Display for ProductionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<10x} {}", self.time, self.body)
    }
}

impl ProductionRecord {
    /// Parses a rendered record line.
    pub fn parse(line: &str) -> Result<Self, RecordParseError> {
        let (time, rest) = split_time(line)?;
        Ok(Self {
            time,
            body: rest.to_owned(),
        })
    }
}

/// One file dropped instead of delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteRecord {
    /// Drop time (epoch seconds).
    pub time: i64,
    /// Destination host alias the file was queued for.
    pub host: String,
    /// File name.
    pub filename: String,
    /// File size in bytes.
    pub size: u64,
    /// The rule the file belonged to.
    pub job_id: u32,
    /// Why it was dropped.
    pub reason: String,
}

impl fmt::Display for DeleteRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10x} {}{SEPARATOR}{}{SEPARATOR}{:x}{SEPARATOR}{:x}{SEPARATOR}{}",
            self.time, self.host, self.filename, self.size, self.job_id, self.reason,
        )
    }
}

impl DeleteRecord {
    /// Parses a rendered record line.
    pub fn parse(line: &str) -> Result<Self, RecordParseError> {
        let (time, rest) = split_time(line)?;
        let fields: Vec<&str> = rest.split(SEPARATOR).collect();
        let [host, filename, size, job_id, reason] = fields[..] else {
            return Err(RecordParseError::Malformed(line.to_owned()));
        };
        Ok(Self {
            time,
            host: host.to_owned(),
            filename: filename.to_owned(),
            size: u64::from_str_radix(size, 16).map_err(|_| bad("size", size))?,
            job_id: u32::from_str_radix(job_id, 16).map_err(|_| bad("job_id", job_id))?,
            reason: reason.to_owned(),
        })
    }
}

/// One status line of the transfer log: `<sign> hostname[slot]: msg`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferLine {
    /// Line severity.
    pub severity: Severity,
    /// Host display name.
    pub host: String,
    /// Job slot the worker occupies.
    pub slot: usize,
    /// Free text.
    pub msg: String,
}

impl fmt::Display for TransferLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{}> {}[{}]: {}",
            self.severity.sign(),
            self.host,
            self.slot,
            self.msg
        )
    }
}

impl TransferLine {
    /// Parses a rendered line.
    pub fn parse(line: &str) -> Result<Self, RecordParseError> {
        let malformed = || RecordParseError::Malformed(line.to_owned());
        let rest = line.strip_prefix('<').ok_or_else(malformed)?;
        let (sign, rest) = rest.split_once("> ").ok_or_else(malformed)?;
        let severity = sign
            .chars()
            .next()
            .and_then(Severity::from_sign)
            .ok_or_else(malformed)?;
        let (host, rest) = rest.split_once('[').ok_or_else(malformed)?;
        let (slot, msg) = rest.split_once("]: ").ok_or_else(malformed)?;
        Ok(Self {
            severity,
            host: host.to_owned(),
            slot: slot.parse().map_err(|_| bad("slot", slot))?,
            msg: msg.to_owned(),
        })
    }
}
