//! Message names and job identifiers.
//!
//! A message name is the 30-byte identifier
//! `<job-id-hex>/<dir-no-hex>/<creation-time-hex>_<unique-hex>_<split-hex>`
//! that names one bundle of files in the outgoing spool. Retrieve jobs have
//! no message name.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Maximum rendered length of a message name, including nothing else.
pub const MAX_MSG_NAME_LENGTH: usize = 30;

/// Identifies a configured distribution rule (a "JID").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u32);

impl JobId {
    /// Renders the id the way it appears in message file names.
    #[must_use]
    pub fn as_hex(self) -> String {
        format!("{:x}", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:x}", self.0)
    }
}

/// Errors produced when parsing a message name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MsgNameError {
    /// The name did not contain the expected `/` and `_` separators.
    #[error("malformed message name: {0:?}")]
    Malformed(String),
    /// One of the hex fields did not parse.
    #[error("invalid hex field {field} in message name: {value:?}")]
    BadField {
        /// Which field failed.
        field: &'static str,
        /// The offending text.
        value: String,
    },
    /// The rendered form exceeds [`MAX_MSG_NAME_LENGTH`].
    #[error("message name longer than {MAX_MSG_NAME_LENGTH} bytes")]
    TooLong,
}

/// The identifier of one unit of work in the outgoing spool.
///
/// Rendered as `<job-id>/<dir-no>/<creation-time>_<unique>_<split>` with all
/// fields in lower-case hex. The rendered form is also the name of the
/// per-message directory under `files/outgoing/`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MsgName {
    /// The distribution rule this work belongs to.
    pub job_id: JobId,
    /// Source directory number.
    pub dir_no: u16,
    /// Seconds since the epoch at which the message was created.
    pub creation_time: i64,
    /// Per-second uniquifier assigned by the scanner.
    pub unique: u32,
    /// Split counter when one input burst was split into several messages.
    pub split: u32,
}

impl MsgName {
    /// Builds a message name, verifying the rendered length bound.
    pub fn new(
        job_id: JobId,
        dir_no: u16,
        creation_time: i64,
        unique: u32,
        split: u32,
    ) -> Result<Self, MsgNameError> {
        let name = Self {
            job_id,
            dir_no,
            creation_time,
            unique,
            split,
        };
        if name.to_string().len() > MAX_MSG_NAME_LENGTH {
            return Err(MsgNameError::TooLong);
        }
        Ok(name)
    }

    /// Copies the rendered name into a fixed 30-byte buffer, NUL padded.
    #[must_use]
    pub fn to_fixed(&self) -> [u8; MAX_MSG_NAME_LENGTH] {
        let mut out = [0u8; MAX_MSG_NAME_LENGTH];
        let rendered = self.to_string();
        out[..rendered.len()].copy_from_slice(rendered.as_bytes());
        out
    }

    /// Parses a name back out of a fixed NUL-padded buffer.
    ///
    /// Returns `None` for an all-NUL buffer (the retrieve-job case).
    pub fn from_fixed(buf: &[u8; MAX_MSG_NAME_LENGTH]) -> Result<Option<Self>, MsgNameError> {
        if buf[0] == 0 {
            return Ok(None);
        }
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        let text = std::str::from_utf8(&buf[..end])
            .map_err(|_| MsgNameError::Malformed(String::from_utf8_lossy(buf).into_owned()))?;
        text.parse().map(Some)
    }
}

impl fmt::Display for MsgName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:x}/{:x}/{:x}_{:x}_{:x}",
            self.job_id.0, self.dir_no, self.creation_time, self.unique, self.split
        )
    }
}

impl FromStr for MsgName {
    type Err = MsgNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > MAX_MSG_NAME_LENGTH {
            return Err(MsgNameError::TooLong);
        }
        let mut slash = s.splitn(3, '/');
        let (Some(jid), Some(dir), Some(rest)) = (slash.next(), slash.next(), slash.next()) else {
            return Err(MsgNameError::Malformed(s.to_owned()));
        };
        let mut under = rest.splitn(3, '_');
        let (Some(ct), Some(unique), Some(split)) = (under.next(), under.next(), under.next())
        else {
            return Err(MsgNameError::Malformed(s.to_owned()));
        };
        let field = |field: &'static str, value: &str| MsgNameError::BadField {
            field,
            value: value.to_owned(),
        };
        Ok(Self {
            job_id: JobId(u32::from_str_radix(jid, 16).map_err(|_| field("job_id", jid))?),
            dir_no: u16::from_str_radix(dir, 16).map_err(|_| field("dir_no", dir))?,
            creation_time: i64::from_str_radix(ct, 16).map_err(|_| field("creation_time", ct))?,
            unique: u32::from_str_radix(unique, 16).map_err(|_| field("unique", unique))?,
            split: u32::from_str_radix(split, 16).map_err(|_| field("split", split))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_all_fields_in_hex() {
        let name = MsgName::new(JobId(0xdead), 3, 0x68ab_cdef, 0x2a, 1).expect("valid name");
        assert_eq!(name.to_string(), "dead/3/68abcdef_2a_1");
    }

    #[test]
    fn round_trips_through_display_and_parse() {
        let name = MsgName::new(JobId(123_456), 42, 1_700_000_321, 99, 7).expect("valid name");
        let parsed: MsgName = name.to_string().parse().expect("parses back");
        assert_eq!(parsed, name);
    }

    #[test]
    fn fixed_buffer_round_trip() {
        let name = MsgName::new(JobId(1), 0, 0x1000, 0, 0).expect("valid name");
        let buf = name.to_fixed();
        let back = MsgName::from_fixed(&buf).expect("parses").expect("non-empty");
        assert_eq!(back, name);
    }

    #[test]
    fn all_nul_buffer_is_retrieve_job() {
        let buf = [0u8; MAX_MSG_NAME_LENGTH];
        assert_eq!(MsgName::from_fixed(&buf).expect("parses"), None);
    }

    #[test]
    fn rejects_missing_separators() {
        assert!(matches!(
            "deadbeef".parse::<MsgName>(),
            Err(MsgNameError::Malformed(_))
        ));
        assert!(matches!(
            "a/b/c".parse::<MsgName>(),
            Err(MsgNameError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_non_hex_fields() {
        let err = "zz/1/2_3_4".parse::<MsgName>().unwrap_err();
        assert_eq!(
            err,
            MsgNameError::BadField {
                field: "job_id",
                value: "zz".into()
            }
        );
    }

    #[test]
    fn rejects_over_long_names() {
        let long = "f".repeat(MAX_MSG_NAME_LENGTH + 1);
        assert_eq!(long.parse::<MsgName>().unwrap_err(), MsgNameError::TooLong);
    }

    #[test]
    fn job_id_hex_rendering() {
        assert_eq!(JobId(0x1f2).as_hex(), "1f2");
        assert_eq!(JobId(0x1f2).to_string(), "#1f2");
    }
}
