//! The on-disk working-directory layout.
//!
//! Everything the engine touches lives under one work directory:
//!
//! ```text
//! ${work}/fifodir/          named channels, msg_queue, msg_cache, AFD_ACTIVE
//! ${work}/messages/         persisted message files, one per job-id
//! ${work}/files/outgoing/   one directory per message name
//! ${work}/files/incoming/   retrieve spool
//! ${work}/archive/          delivered files kept for their archive time
//! ${work}/counter/          WMO channel counter files
//! ${work}/log/              rolled log files
//! ```

use std::io;
use std::path::{Path, PathBuf};

use crate::ids::{JobId, MsgName};

/// Resolves well-known paths under the AFD working directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    /// Environment variable consulted when no `--work-dir` is given.
    pub const ENV: &'static str = "AFD_WORK_DIR";

    /// Wraps an existing root path.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves the work dir from an explicit argument or [`Self::ENV`].
    pub fn resolve(arg: Option<PathBuf>) -> io::Result<Self> {
        let root = match arg {
            Some(p) => p,
            None => std::env::var_os(Self::ENV).map(PathBuf::from).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no --work-dir given and {} is unset", Self::ENV),
                )
            })?,
        };
        Ok(Self::new(root))
    }

    /// The root itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Channel and state-file directory.
    #[must_use]
    pub fn fifo_dir(&self) -> PathBuf {
        self.root.join("fifodir")
    }

    /// Persisted message files.
    #[must_use]
    pub fn messages_dir(&self) -> PathBuf {
        self.root.join("messages")
    }

    /// The message file of one job-id.
    #[must_use]
    pub fn msg_file(&self, job_id: JobId) -> PathBuf {
        self.messages_dir().join(job_id.as_hex())
    }

    /// Root of the outgoing spool.
    #[must_use]
    pub fn outgoing_dir(&self) -> PathBuf {
        self.root.join("files").join("outgoing")
    }

    /// The per-message bundle directory.
    #[must_use]
    pub fn outgoing(&self, msg: &MsgName) -> PathBuf {
        self.outgoing_dir().join(msg.to_string())
    }

    /// Root of the retrieve spool.
    #[must_use]
    pub fn incoming_dir(&self) -> PathBuf {
        self.root.join("files").join("incoming")
    }

    /// Archive root for delivered files.
    #[must_use]
    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("archive")
    }

    /// WMO channel counter files.
    #[must_use]
    pub fn counter_dir(&self) -> PathBuf {
        self.root.join("counter")
    }

    /// Rolled log files.
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.root.join("log")
    }

    /// The persisted job queue.
    #[must_use]
    pub fn queue_file(&self) -> PathBuf {
        self.fifo_dir().join("msg_queue")
    }

    /// The persisted message cache.
    #[must_use]
    pub fn cache_file(&self) -> PathBuf {
        self.fifo_dir().join("msg_cache")
    }

    /// The mapped host status area.
    #[must_use]
    pub fn fsa_file(&self) -> PathBuf {
        self.fifo_dir().join("fsa")
    }

    /// The mapped directory retrieval area.
    #[must_use]
    pub fn fra_file(&self) -> PathBuf {
        self.fifo_dir().join("fra")
    }

    /// The process table + shutdown flag file.
    #[must_use]
    pub fn active_file(&self) -> PathBuf {
        self.fifo_dir().join("AFD_ACTIVE")
    }

    /// The dispatcher state + global counters region.
    #[must_use]
    pub fn status_file(&self) -> PathBuf {
        self.fifo_dir().join("afd_status")
    }

    /// One of the named byte channels.
    #[must_use]
    pub fn fifo(&self, name: &str) -> PathBuf {
        self.fifo_dir().join(format!("{name}.fifo"))
    }

    /// Creates the whole directory skeleton.
    pub fn create_all(&self) -> io::Result<()> {
        for dir in [
            self.fifo_dir(),
            self.messages_dir(),
            self.outgoing_dir(),
            self.incoming_dir(),
            self.archive_dir(),
            self.counter_dir(),
            self.log_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
