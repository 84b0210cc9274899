//! One queue entry and its persisted form.

use afd_core::ids::{MsgName, MAX_MSG_NAME_LENGTH};

/// Special-flag bits carried by a queue entry.
pub mod special_flag {
    /// Operator-requested resend of already delivered files.
    pub const RESEND: u8 = 1;
    /// Synthetic helper job enqueued for a willing worker.
    pub const HELPER_JOB: u8 = 1 << 1;
    /// Entry was requeued while a burst handoff was in flight.
    pub const BURST_REQUEUE: u8 = 1 << 2;
    /// The entry's job-id currently sits in the error queue.
    pub const IN_ERROR_QUEUE: u8 = 1 << 3;
}

/// Scheduling state of a queue entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PidState {
    /// Waiting to be started.
    Pending,
    /// Start failed; entry awaits cleanup.
    Removed,
    /// A live worker with this pid owns the entry.
    Running(i32),
}

impl PidState {
    /// The pid if a worker owns the entry.
    #[must_use]
    pub const fn pid(self) -> Option<i32> {
        match self {
            Self::Running(pid) => Some(pid),
            Self::Pending | Self::Removed => None,
        }
    }

    /// True while the entry waits to be started.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }

    const fn encode(self) -> i32 {
        match self {
            Self::Pending => 0,
            Self::Removed => -1,
            Self::Running(pid) => pid,
        }
    }

    const fn decode(value: i32) -> Self {
        match value {
            0 => Self::Pending,
            v if v < 0 => Self::Removed,
            pid => Self::Running(pid),
        }
    }
}

/// The object the dispatcher schedules.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueEntry {
    /// Bundle identifier; `None` for retrieve jobs.
    pub msg_name: Option<MsgName>,
    /// Priority key; smaller runs first. Only ever raised after creation.
    pub msg_number: f64,
    /// When the bundle was created.
    pub creation_time: i64,
    /// Index into the message cache (send) or the directory area (retrieve).
    pub pos: u32,
    /// Index into the live-worker table, or -1.
    pub connect_pos: i32,
    /// Scheduling state.
    pub pid: PidState,
    /// Failed attempts so far.
    pub retries: u32,
    /// Files waiting in the bundle.
    pub files_to_send: u32,
    /// Bytes waiting in the bundle.
    pub file_size_to_send: u64,
    /// [`special_flag`] bits.
    pub special: u8,
    /// Message priority byte, `'0'..='9'`.
    pub msg_priority: u8,
}

impl QueueEntry {
    /// Encoded size of one persisted entry.
    pub const ENCODED_SIZE: usize = 88;

    /// True for retrieve jobs, which never carry a message name.
    #[must_use]
    pub const fn is_retrieve(&self) -> bool {
        self.msg_name.is_none()
    }

    /// Encodes the entry into its persisted form.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut buf = [0u8; Self::ENCODED_SIZE];
        if let Some(name) = &self.msg_name {
            buf[..MAX_MSG_NAME_LENGTH].copy_from_slice(&name.to_fixed());
        }
        buf[32..40].copy_from_slice(&self.msg_number.to_bits().to_le_bytes());
        buf[40..48].copy_from_slice(&self.creation_time.to_le_bytes());
        buf[48..52].copy_from_slice(&self.pos.to_le_bytes());
        buf[52..56].copy_from_slice(&self.connect_pos.to_le_bytes());
        buf[56..60].copy_from_slice(&self.pid.encode().to_le_bytes());
        buf[60..64].copy_from_slice(&self.retries.to_le_bytes());
        buf[64..68].copy_from_slice(&self.files_to_send.to_le_bytes());
        buf[72..80].copy_from_slice(&self.file_size_to_send.to_le_bytes());
        buf[80] = self.special;
        buf[81] = self.msg_priority;
        buf
    }

    /// Decodes a persisted entry. Returns `None` when the message-name
    /// field is unparsable (a corrupt record is dropped, not fatal).
    #[must_use]
    pub fn decode(buf: &[u8; Self::ENCODED_SIZE]) -> Option<Self> {
        let mut name = [0u8; MAX_MSG_NAME_LENGTH];
        name.copy_from_slice(&buf[..MAX_MSG_NAME_LENGTH]);
        let msg_name = MsgName::from_fixed(&name).ok()?;
        let u32_at =
            |off: usize| u32::from_le_bytes(buf[off..off + 4].try_into().unwrap_or_default());
        let i32_at =
            |off: usize| i32::from_le_bytes(buf[off..off + 4].try_into().unwrap_or_default());
        Some(Self {
            msg_name,
            msg_number: f64::from_bits(u64::from_le_bytes(
                buf[32..40].try_into().unwrap_or_default(),
            )),
            creation_time: i64::from_le_bytes(buf[40..48].try_into().unwrap_or_default()),
            pos: u32_at(48),
            connect_pos: i32_at(52),
            pid: PidState::decode(i32_at(56)),
            retries: u32_at(60),
            files_to_send: u32_at(64),
            file_size_to_send: u64::from_le_bytes(buf[72..80].try_into().unwrap_or_default()),
            special: buf[80],
            msg_priority: if buf[81].is_ascii_digit() { buf[81] } else { b'9' },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afd_core::ids::JobId;

    fn entry() -> QueueEntry {
        QueueEntry {
            msg_name: Some(MsgName::new(JobId(9), 2, 0x1234, 5, 0).expect("valid")),
            msg_number: 123_456.75,
            creation_time: 0x1234,
            pos: 3,
            connect_pos: -1,
            pid: PidState::Pending,
            retries: 2,
            files_to_send: 4,
            file_size_to_send: 1024,
            special: special_flag::RESEND,
            msg_priority: b'4',
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let e = entry();
        let decoded = QueueEntry::decode(&e.encode()).expect("decodes");
        assert_eq!(decoded, e);
    }

    #[test]
    fn retrieve_entry_round_trips_without_name() {
        let mut e = entry();
        e.msg_name = None;
        e.pid = PidState::Running(321);
        let decoded = QueueEntry::decode(&e.encode()).expect("decodes");
        assert!(decoded.is_retrieve());
        assert_eq!(decoded.pid, PidState::Running(321));
    }

    #[test]
    fn pid_state_encoding() {
        assert_eq!(PidState::decode(PidState::Pending.encode()), PidState::Pending);
        assert_eq!(PidState::decode(PidState::Removed.encode()), PidState::Removed);
        assert_eq!(
            PidState::decode(PidState::Running(77).encode()),
            PidState::Running(77)
        );
        assert!(PidState::Pending.is_pending());
        assert_eq!(PidState::Running(77).pid(), Some(77));
        assert_eq!(PidState::Pending.pid(), None);
    }
}
