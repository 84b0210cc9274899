//! Dispatcher configuration and the host/directory table.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use fsa::{DirSeed, HostSeed};

/// Runtime knobs of the dispatcher.
#[derive(Clone, Debug, Deserialize)]
pub struct FdConfig {
    /// Workers alive at once across all hosts.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Age limit applied to jobs whose spec carries none, in seconds.
    #[serde(default)]
    pub default_age_limit: Option<u32>,
    /// Queue rescan period while idle, in seconds.
    #[serde(default = "default_rescan")]
    pub rescan_secs: u64,
    /// Drain budget of a SAVE_STOP before escalating, in seconds.
    #[serde(default = "default_fd_timeout")]
    pub fd_timeout_secs: u64,
    /// Soft-to-hard kill delay during shutdown, in seconds.
    #[serde(default = "default_kill_delay")]
    pub kill_delay_secs: u64,
}

const fn default_max_connections() -> usize {
    30
}
const fn default_rescan() -> u64 {
    5
}
const fn default_fd_timeout() -> u64 {
    300
}
const fn default_kill_delay() -> u64 {
    15
}

impl Default for FdConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            default_age_limit: None,
            rescan_secs: default_rescan(),
            fd_timeout_secs: default_fd_timeout(),
            kill_delay_secs: default_kill_delay(),
        }
    }
}

impl FdConfig {
    /// The event-loop timeout: short while zombies may be pending, the
    /// rescan period otherwise.
    #[must_use]
    pub fn poll_timeout(&self, zombies_pending: bool) -> Duration {
        if zombies_pending {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(self.rescan_secs)
        }
    }
}

/// The host and directory table loaded at start.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Tables {
    /// Destination hosts.
    #[serde(default)]
    pub hosts: Vec<HostSeed>,
    /// Retrieve sources.
    #[serde(default)]
    pub dirs: Vec<DirSeed>,
    /// Dispatcher knobs.
    #[serde(default)]
    pub fd: Option<FdConfig>,
}

impl Tables {
    /// Loads the table file.
    pub fn load(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
