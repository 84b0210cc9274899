//! Worker exit codes and their dispatcher-side classification.
//!
//! Every transfer worker terminates with one code from this closed set; the
//! supervisor's reap path switches on the classification to decide whether
//! the queue entry is removed, requeued, demoted, or dropped. The numeric
//! values are exported for scripting and must never be reused.

use std::fmt;

/// Exit codes returned by the sf/gf transfer workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum WorkerExit {
    /// Every file in the batch was delivered.
    TransferSuccess = 0,

    /// Worker argument list was malformed.
    Syntax = 1,
    /// The message file for the job-id is missing.
    NoMessageFile = 2,
    /// The job-id could not be resolved at all.
    JidNumber = 3,
    /// The per-message outgoing directory does not exist.
    OpenFileDir = 4,

    /// Nothing left to send, most likely age-limit deletion got there first.
    NoFilesToSend = 5,
    /// Batch delivered but more files arrived for the same message meanwhile.
    StillFilesToSend = 6,

    /// Transfer timeout expired.
    Timeout = 10,
    /// Could not reach the remote host.
    Connect = 11,
    /// Connection reset by peer mid-transfer.
    ConnectionReset = 12,
    /// Remote refused the connection.
    ConnectionRefused = 13,
    /// TLS or protocol-level authentication failed.
    Auth = 14,
    /// Setting the transfer type failed.
    TypeSet = 15,
    /// The data-channel command was rejected.
    Data = 16,
    /// Local read failed.
    ReadLocal = 17,
    /// Local write failed.
    WriteLocal = 18,
    /// Remote read failed.
    ReadRemote = 19,
    /// Remote size query failed or was rejected.
    Size = 20,
    /// Remote date/keep-timestamp operation failed.
    Date = 21,
    /// Opening the local file failed.
    OpenLocal = 22,
    /// Creating the remote lock name failed.
    WriteLock = 23,
    /// Removing the connection lock file failed.
    RemoveLockfile = 24,
    /// Orderly disconnect failed.
    Quit = 25,
    /// Local rename failed.
    Rename = 26,
    /// Waiting on the worker command channel failed.
    SelectWait = 27,
    /// Broken pipe while streaming.
    SigPipe = 28,
    /// Could not stat a local file.
    Stat = 29,
    /// Locking a status-area region failed.
    LockRegion = 30,
    /// Unlocking a status-area region failed.
    UnlockRegion = 31,
    /// The acknowledgement reply was negative or garbled.
    CheckReply = 32,
    /// Mail envelope was rejected.
    Mail = 33,
    /// chown after publish failed.
    Chown = 34,

    /// Remote rejected the sender address.
    RemoteUser = 40,
    /// User name wrong.
    User = 41,
    /// Password wrong.
    Password = 42,
    /// Changing to the remote target directory failed.
    Chdir = 43,
    /// Closing the remote file failed.
    CloseRemote = 44,
    /// Creating the remote target directory failed.
    Mkdir = 45,
    /// Local move into place failed.
    MoveLocal = 46,
    /// Target directory cannot be accessed.
    StatTarget = 47,
    /// Remote write failed.
    WriteRemote = 48,
    /// Remote rename-on-publish failed.
    MoveRemote = 49,
    /// Opening the remote file failed.
    OpenRemote = 50,
    /// Remote directory listing failed.
    List = 51,
    /// The per-file exec command failed.
    Exec = 52,
    /// Local and remote sizes disagree after transfer.
    FileSizeMatch = 53,

    /// Worker was killed administratively; not counted as faulty.
    GotKilled = 60,
}

/// Dispatcher-side grouping of [`WorkerExit`] codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Clear the queue entry, reset the host error state.
    Success,
    /// Success, but the same message has more files; keep the entry.
    StillFiles,
    /// The job itself is broken: drop entry and remove the file directory.
    Malformed,
    /// Transient failure: error-queue the job and retry later.
    Transient,
    /// Semi-permanent failure: demote the entry unless ageing is disabled.
    SemiPermanent,
    /// Nothing to send; clear auto-pause if the host queue drained.
    NoFiles,
    /// Administrative kill; not faulty.
    Killed,
    /// Code outside the closed set; treated as fatal-faulty.
    UnknownFaulty,
}

impl WorkerExit {
    /// Returns the numeric process exit code.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Maps a raw process exit status back into the closed set.
    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => Self::TransferSuccess,
            1 => Self::Syntax,
            2 => Self::NoMessageFile,
            3 => Self::JidNumber,
            4 => Self::OpenFileDir,
            5 => Self::NoFilesToSend,
            6 => Self::StillFilesToSend,
            10 => Self::Timeout,
            11 => Self::Connect,
            12 => Self::ConnectionReset,
            13 => Self::ConnectionRefused,
            14 => Self::Auth,
            15 => Self::TypeSet,
            16 => Self::Data,
            17 => Self::ReadLocal,
            18 => Self::WriteLocal,
            19 => Self::ReadRemote,
            20 => Self::Size,
            21 => Self::Date,
            22 => Self::OpenLocal,
            23 => Self::WriteLock,
            24 => Self::RemoveLockfile,
            25 => Self::Quit,
            26 => Self::Rename,
            27 => Self::SelectWait,
            28 => Self::SigPipe,
            29 => Self::Stat,
            30 => Self::LockRegion,
            31 => Self::UnlockRegion,
            32 => Self::CheckReply,
            33 => Self::Mail,
            34 => Self::Chown,
            40 => Self::RemoteUser,
            41 => Self::User,
            42 => Self::Password,
            43 => Self::Chdir,
            44 => Self::CloseRemote,
            45 => Self::Mkdir,
            46 => Self::MoveLocal,
            47 => Self::StatTarget,
            48 => Self::WriteRemote,
            49 => Self::MoveRemote,
            50 => Self::OpenRemote,
            51 => Self::List,
            52 => Self::Exec,
            53 => Self::FileSizeMatch,
            60 => Self::GotKilled,
            _ => return None,
        })
    }

    /// Classifies a raw exit status, folding unknown codes into
    /// [`Outcome::UnknownFaulty`].
    #[must_use]
    pub const fn classify_raw(value: i32) -> Outcome {
        match Self::from_i32(value) {
            Some(code) => code.classify(),
            None => Outcome::UnknownFaulty,
        }
    }

    /// The dispatcher-side grouping of this code.
    #[must_use]
    pub const fn classify(self) -> Outcome {
        match self {
            Self::TransferSuccess => Outcome::Success,
            Self::StillFilesToSend => Outcome::StillFiles,
            Self::Syntax | Self::NoMessageFile | Self::JidNumber => Outcome::Malformed,
            Self::OpenFileDir
            | Self::Timeout
            | Self::Connect
            | Self::ConnectionReset
            | Self::ConnectionRefused
            | Self::Auth
            | Self::TypeSet
            | Self::Data
            | Self::ReadLocal
            | Self::WriteLocal
            | Self::ReadRemote
            | Self::Size
            | Self::Date
            | Self::OpenLocal
            | Self::WriteLock
            | Self::RemoveLockfile
            | Self::Quit
            | Self::Rename
            | Self::SelectWait
            | Self::SigPipe
            | Self::Stat
            | Self::LockRegion
            | Self::UnlockRegion
            | Self::CheckReply
            | Self::Mail
            | Self::Chown => Outcome::Transient,
            Self::RemoteUser
            | Self::User
            | Self::Password
            | Self::Chdir
            | Self::CloseRemote
            | Self::Mkdir
            | Self::MoveLocal
            | Self::StatTarget
            | Self::WriteRemote
            | Self::MoveRemote
            | Self::OpenRemote
            | Self::List
            | Self::Exec
            | Self::FileSizeMatch => Outcome::SemiPermanent,
            Self::NoFilesToSend => Outcome::NoFiles,
            Self::GotKilled => Outcome::Killed,
        }
    }

    /// Short description used in transfer-log disconnect lines.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::TransferSuccess => "transfer success",
            Self::Syntax => "syntax error in worker call",
            Self::NoMessageFile => "message file missing",
            Self::JidNumber => "failed to determine job id",
            Self::OpenFileDir => "file directory does not exist",
            Self::NoFilesToSend => "no files to send",
            Self::StillFilesToSend => "still files to send",
            Self::Timeout => "transfer timeout",
            Self::Connect => "failed to connect",
            Self::ConnectionReset => "connection reset by peer",
            Self::ConnectionRefused => "connection refused",
            Self::Auth => "authentication failed",
            Self::TypeSet => "setting transfer type failed",
            Self::Data => "data command failed",
            Self::ReadLocal => "local read error",
            Self::WriteLocal => "local write error",
            Self::ReadRemote => "remote read error",
            Self::Size => "size query failed",
            Self::Date => "date operation failed",
            Self::OpenLocal => "failed to open local file",
            Self::WriteLock => "failed to create lock name",
            Self::RemoveLockfile => "failed to remove lock file",
            Self::Quit => "failed to disconnect",
            Self::Rename => "local rename failed",
            Self::SelectWait => "wait on command channel failed",
            Self::SigPipe => "broken pipe",
            Self::Stat => "could not stat local file",
            Self::LockRegion => "failed to lock region",
            Self::UnlockRegion => "failed to unlock region",
            Self::CheckReply => "negative or garbled acknowledgement",
            Self::Mail => "mail envelope rejected",
            Self::Chown => "chown failed",
            Self::RemoteUser => "sender address rejected",
            Self::User => "user name wrong",
            Self::Password => "password wrong",
            Self::Chdir => "failed to change remote directory",
            Self::CloseRemote => "failed to close remote file",
            Self::Mkdir => "failed to create remote directory",
            Self::MoveLocal => "local move failed",
            Self::StatTarget => "failed to access target directory",
            Self::WriteRemote => "remote write error",
            Self::MoveRemote => "remote rename failed",
            Self::OpenRemote => "failed to open remote file",
            Self::List => "remote listing failed",
            Self::Exec => "exec command failed",
            Self::FileSizeMatch => "file size mismatch after transfer",
            Self::GotKilled => "killed administratively",
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl From<WorkerExit> for std::process::ExitCode {
    fn from(code: WorkerExit) -> Self {
        Self::from(code.as_i32().clamp(0, 255) as u8)
    }
}
