//! The one-byte command vocabulary of the cmd channel.

/// Commands external tools write into the cmd channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Re-read the local interface file.
    RereadLocInterfaceFile = 1,
    /// The host table is about to be replaced; quiesce access.
    FsaAboutToChange = 2,
    /// Flush buffered messages and dump the queue for inspection.
    FlushMsgFifoDumpQueue = 3,
    /// Poll every retrieve source now, ignoring next-check times.
    ForceRemoteDirCheck = 4,
    /// Run the consistency reconciliation over the host entries.
    CheckFsaEntries = 5,
    /// Stop admitting work, drain, then exit.
    SaveStop = 6,
    /// Stop now: terminate workers, sync state, exit.
    Stop = 7,
    /// Stop immediately with the short kill escalation.
    QuickStop = 8,
}

impl Command {
    /// Decodes a byte from the channel.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::RereadLocInterfaceFile,
            2 => Self::FsaAboutToChange,
            3 => Self::FlushMsgFifoDumpQueue,
            4 => Self::ForceRemoteDirCheck,
            5 => Self::CheckFsaEntries,
            6 => Self::SaveStop,
            7 => Self::Stop,
            8 => Self::QuickStop,
            _ => return None,
        })
    }

    /// True for the three stop variants.
    #[must_use]
    pub const fn is_stop(self) -> bool {
        matches!(self, Self::SaveStop | Self::Stop | Self::QuickStop)
    }
}
