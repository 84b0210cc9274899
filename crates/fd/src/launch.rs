//! Worker launch: argv construction and process spawning.
//!
//! The spawner is a trait so every scheduling decision in the dispatcher
//! can be exercised in tests without forking; the real implementation
//! spawns the `afd-sf` / `afd-gf` binaries installed next to the
//! dispatcher.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use afd_core::ids::MsgName;
use afd_core::WorkDir;
use tracing::debug;

/// Which worker binary a launch uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerKind {
    /// `afd-sf`, the send worker.
    Send,
    /// `afd-gf`, the retrieve worker.
    Fetch,
}

/// Everything needed to start one worker.
#[derive(Clone, Debug, PartialEq)]
pub struct LaunchPlan {
    /// Which binary.
    pub kind: WorkerKind,
    /// Full argv after the program name.
    pub args: Vec<String>,
    /// Message priority, for the optional nice adjustment.
    pub priority: u8,
}

impl LaunchPlan {
    /// Builds the argv of a send worker.
    #[must_use]
    pub fn send(
        work: &WorkDir,
        msg: &MsgName,
        host_index: usize,
        job_slot: usize,
        connect_pos: usize,
        retries: u32,
        resend: bool,
        disable_archive: bool,
        default_age_limit: Option<u32>,
        priority: u8,
    ) -> Self {
        let mut args = vec![
            "--work-dir".to_owned(),
            work.root().display().to_string(),
            "--msg-name".to_owned(),
            msg.to_string(),
            "--host-index".to_owned(),
            host_index.to_string(),
            "--slot".to_owned(),
            job_slot.to_string(),
            "--connect-pos".to_owned(),
            connect_pos.to_string(),
            "--retries".to_owned(),
            retries.to_string(),
        ];
        if resend {
            args.push("--resend".to_owned());
        }
        if disable_archive {
            args.push("--disable-archive".to_owned());
        }
        if let Some(age) = default_age_limit {
            args.push("--default-age-limit".to_owned());
            args.push(age.to_string());
        }
        Self {
            kind: WorkerKind::Send,
            args,
            priority,
        }
    }

    /// Builds the argv of a retrieve worker.
    #[must_use]
    pub fn fetch(
        work: &WorkDir,
        dir_index: usize,
        host_index: usize,
        job_slot: usize,
        connect_pos: usize,
        priority: u8,
    ) -> Self {
        Self {
            kind: WorkerKind::Fetch,
            args: vec![
                "--work-dir".to_owned(),
                work.root().display().to_string(),
                "--dir-index".to_owned(),
                dir_index.to_string(),
                "--host-index".to_owned(),
                host_index.to_string(),
                "--slot".to_owned(),
                job_slot.to_string(),
                "--connect-pos".to_owned(),
                connect_pos.to_string(),
            ],
            priority,
        }
    }
}

/// Process control as the dispatcher sees it.
pub trait Spawner {
    /// Starts a worker, returning its pid.
    fn spawn(&mut self, plan: &LaunchPlan) -> io::Result<i32>;

    /// Reaps one finished worker, if any: `(pid, raw exit status)`.
    fn try_reap(&mut self) -> Option<(i32, i32)>;

    /// Sends the soft (or hard) termination to a worker.
    fn kill(&mut self, pid: i32, hard: bool);

    /// True while any child is unreaped.
    fn has_children(&self) -> bool;
}

/// The real spawner.
#[derive(Debug)]
pub struct ProcessSpawner {
    sf_binary: PathBuf,
    gf_binary: PathBuf,
    children: HashMap<i32, Child>,
}

impl ProcessSpawner {
    /// Locates the worker binaries next to the running dispatcher.
    pub fn new() -> io::Result<Self> {
        let me = std::env::current_exe()?;
        let dir = me.parent().unwrap_or_else(|| std::path::Path::new("."));
        Ok(Self {
            sf_binary: dir.join("afd-sf"),
            gf_binary: dir.join("afd-gf"),
            children: HashMap::new(),
        })
    }

    /// Uses explicit binary paths (tests, unusual installs).
    #[must_use]
    pub fn with_binaries(sf_binary: PathBuf, gf_binary: PathBuf) -> Self {
        Self {
            sf_binary,
            gf_binary,
            children: HashMap::new(),
        }
    }

    /// Raises a child's scheduling priority by message priority. Only the
    /// superuser may lower nice values, so everyone else skips this.
    fn adjust_priority(pid: i32, priority: u8) {
        // SAFETY: geteuid has no preconditions.
        if unsafe { libc::geteuid() } != 0 {
            return;
        }
        let nice = i32::from(priority.saturating_sub(b'0')) - 9;
        // SAFETY: setpriority on a pid we just spawned; failure is benign.
        unsafe {
            let _ = libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, nice);
        }
    }
}

impl Spawner for ProcessSpawner {
    fn spawn(&mut self, plan: &LaunchPlan) -> io::Result<i32> {
        let binary = match plan.kind {
            WorkerKind::Send => &self.sf_binary,
            WorkerKind::Fetch => &self.gf_binary,
        };
        let child = Command::new(binary)
            .args(&plan.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let pid = child.id() as i32;
        Self::adjust_priority(pid, plan.priority);
        self.children.insert(pid, child);
        Ok(pid)
    }

    fn try_reap(&mut self) -> Option<(i32, i32)> {
        let mut finished = None;
        for (pid, child) in &mut self.children {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let code = status.code().unwrap_or(-1);
                    finished = Some((*pid, code));
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    debug!("try_wait on {pid}: {e}");
                }
            }
        }
        let (pid, code) = finished?;
        self.children.remove(&pid);
        Some((pid, code))
    }

    fn kill(&mut self, pid: i32, hard: bool) {
        let signal = if hard { libc::SIGKILL } else { libc::SIGTERM };
        // SAFETY: signalling a child we spawned; ESRCH is fine.
        unsafe {
            let _ = libc::kill(pid, signal);
        }
    }

    fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}
