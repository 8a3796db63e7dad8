use super::identity::{LockIdentity, LockOptions};
use super::path::lock_file_path;
use super::process::{self, NO_OWNER};
use super::protocol::{self, Acquisition, PendingLock, Step};
use crate::error::Result;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Instance lock whose operations block the calling thread.
///
/// Dropping a handle that owns its lock removes the lock file if it still holds
/// this process's PID. `std::process::exit` skips that, so drop the handle or
/// call [`unlock`](Self::unlock) first.
#[derive(Debug)]
pub struct SyncLockHandle {
    identity: LockIdentity,
    path: PathBuf,
    pending_grace: Duration,
    is_owner: bool,
}

impl SyncLockHandle {
    pub fn new(options: &LockOptions) -> Result<Self> {
        let identity = options.identity()?;
        let path = lock_file_path(&identity, options.base_dir.as_deref());
        Ok(Self {
            identity,
            path,
            pending_grace: options.pending_grace,
            is_owner: false,
        })
    }

    /// Try to take the lock without waiting.
    ///
    /// Returns `Ok(false)` when another running process holds it. A lock left
    /// behind by a process that is no longer running is reclaimed.
    pub fn lock(&mut self) -> Result<bool> {
        let (mut acquisition, mut step) = Acquisition::start(&self.path, self.pending_grace);

        let mut file = loop {
            step = match step {
                Step::CreateExclusive => {
                    acquisition.created(protocol::exclusive_options().open(&self.path))?
                }
                Step::ReadOwner => acquisition.owner_read(protocol::read_owner(&self.path))?,
                Step::RemoveStale => acquisition.removed(fs::remove_file(&self.path))?,
                Step::Acquired(file) => break file,
                Step::Contended => return Ok(false),
            };
        };

        let pending = PendingLock::new(&self.path);
        let written = file.write_all(process::encode_owner(process::current_pid()).as_bytes());
        protocol::close_logged(file, &self.path);
        written.map_err(|e| protocol::write_failed(&self.path, e))?;
        pending.commit();

        self.is_owner = true;
        debug!("Lock acquired: {}", self.path.display());
        Ok(true)
    }

    /// Remove the lock file. A missing file counts as released; other removal
    /// failures are logged, never returned.
    pub fn unlock(&mut self) -> bool {
        protocol::report_removal(fs::remove_file(&self.path), &self.path);
        self.is_owner = false;
        true
    }

    /// PID of the running process holding the lock, if any.
    pub fn owner(&self) -> Result<Option<u32>> {
        let read = protocol::read_owner(&self.path);
        protocol::owner_from(read, &self.path, process::is_process_running)
    }

    /// Like [`owner`](Self::owner) but with `-1` for "no live owner".
    pub fn owner_pid(&self) -> Result<i64> {
        Ok(self.owner()?.map(i64::from).unwrap_or(NO_OWNER))
    }

    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    pub fn identity(&self) -> &LockIdentity {
        &self.identity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SyncLockHandle {
    fn drop(&mut self) {
        if self.is_owner {
            protocol::release_if_ours(&self.path);
        }
    }
}
