//! The local-copy send session.
//!
//! The file is written into the target directory under its lock name and
//! renamed into place on publish; same filesystem by construction, so the
//! rename is atomic. The VMS dot-pair discipline (publish as `name.`, then
//! strip the dot) is handled by the worker through the names it passes.

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use afd_core::exit::WorkerExit;
use afd_core::job::JobSpec;

use crate::error::TransferError;
use crate::session::SendSession;

/// One local-copy "connection" (a target directory).
#[derive(Debug)]
pub struct LocSession {
    target: PathBuf,
    create_target_dir: bool,
    open_file: Option<File>,
}

impl LocSession {
    /// Prepares a session from the job spec.
    #[must_use]
    pub fn new(spec: &JobSpec) -> Self {
        Self {
            target: PathBuf::from(&spec.destination.path),
            create_target_dir: spec.create_target_dir,
            open_file: None,
        }
    }

    /// The absolute path a published name lands at; the worker uses this
    /// to preserve source timestamps when the host asks for it.
    #[must_use]
    pub fn target_path(&self, name: &str) -> PathBuf {
        self.target.join(name)
    }
}

impl SendSession for LocSession {
    fn connect(&mut self) -> Result<(), TransferError> {
        match fs::metadata(&self.target) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(TransferError::new(
                WorkerExit::StatTarget,
                format!("{} is not a directory", self.target.display()),
            )),
            Err(_) if self.create_target_dir => fs::create_dir_all(&self.target)
                .map_err(|e| TransferError::io(WorkerExit::Mkdir, &e)),
            Err(e) => Err(TransferError::io(WorkerExit::StatTarget, &e)),
        }
    }

    fn open(&mut self, lock_name: &str, _size: u64) -> Result<(), TransferError> {
        let path = self.target_path(lock_name);
        self.open_file = Some(
            File::create(&path).map_err(|e| TransferError::io(WorkerExit::WriteLock, &e))?,
        );
        Ok(())
    }

    fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransferError> {
        let file = self
            .open_file
            .as_mut()
            .ok_or_else(|| TransferError::new(WorkerExit::WriteLocal, "no file open"))?;
        file.write_all(data)
            .map_err(|e| TransferError::io(WorkerExit::WriteLocal, &e))
    }

    fn close_file(&mut self) -> Result<(), TransferError> {
        if let Some(file) = self.open_file.take() {
            file.sync_all()
                .map_err(|e| TransferError::io(WorkerExit::WriteLocal, &e))?;
        }
        Ok(())
    }

    fn publish(&mut self, lock_name: &str, final_name: &str) -> Result<(), TransferError> {
        if lock_name == final_name {
            return Ok(());
        }
        fs::rename(self.target_path(lock_name), self.target_path(final_name))
            .map_err(|e| TransferError::io(WorkerExit::Rename, &e))
    }

    fn chmod_chown(
        &mut self,
        final_name: &str,
        mode: Option<u32>,
        owner: Option<&str>,
    ) -> Result<(), TransferError> {
        use std::os::unix::fs::PermissionsExt;
        let path = self.target_path(final_name);
        if let Some(mode) = mode {
            fs::set_permissions(&path, fs::Permissions::from_mode(mode))
                .map_err(|e| TransferError::io(WorkerExit::Chown, &e))?;
        }
        if let Some(owner) = owner {
            // Numeric uid[:gid] only; name resolution is left to the
            // configuration layer.
            let (uid, gid) = match owner.split_once(':') {
                Some((u, g)) => (u.parse().ok(), g.parse().ok()),
                None => (owner.parse().ok(), None),
            };
            if uid.is_some() || gid.is_some() {
                std::os::unix::fs::chown(&path, uid, gid)
                    .map_err(|e| TransferError::io(WorkerExit::Chown, &e))?;
            }
        }
        Ok(())
    }

    fn create_dir_lock(&mut self) -> Result<(), TransferError> {
        File::create(self.target_path("LOCKFILE"))
            .map(|_| ())
            .map_err(|e| TransferError::io(WorkerExit::WriteLock, &e))
    }

    fn remove_dir_lock(&mut self) -> Result<(), TransferError> {
        fs::remove_file(self.target_path("LOCKFILE"))
            .map_err(|e| TransferError::io(WorkerExit::RemoveLockfile, &e))
    }

    fn disconnect(&mut self) -> Result<(), TransferError> {
        self.open_file.take();
        Ok(())
    }
}
