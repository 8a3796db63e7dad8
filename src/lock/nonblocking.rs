use super::identity::{LockIdentity, LockOptions};
use super::path::lock_file_path;
use super::process::{self, MAX_OWNER_LEN, NO_OWNER};
use super::protocol::{self, Acquisition, OwnerRecord, PendingLock, Step, READ_LIMIT};
use crate::error::Result;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Instance lock whose file operations run on the tokio runtime.
///
/// Each handle races independently for its own lock file, so several handles may
/// be locking concurrently. A single handle must not be used from two tasks at once.
///
/// Dropping a handle that owns its lock removes the lock file if it still holds
/// this process's PID. `std::process::exit` skips that, so drop the handle or
/// await [`unlock`](Self::unlock) first.
#[derive(Debug)]
pub struct AsyncLockHandle {
    identity: LockIdentity,
    path: PathBuf,
    pending_grace: Duration,
    is_owner: bool,
}

impl AsyncLockHandle {
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

    /// Try to take the lock without waiting for the current holder.
    ///
    /// Resolves to `Ok(false)` when another running process holds the lock. If the
    /// future is dropped after the file was created but before the PID was written,
    /// the file is removed; a file created after the drop is reclaimed once it is
    /// older than the pending grace period.
    pub async fn lock(&mut self) -> Result<bool> {
        let (mut acquisition, mut step) = Acquisition::start(&self.path, self.pending_grace);

        let mut file = loop {
            step = match step {
                Step::CreateExclusive => {
                    let created = OpenOptions::from(protocol::exclusive_options())
                        .open(&self.path)
                        .await;
                    acquisition.created(created)?
                }
                Step::ReadOwner => acquisition.owner_read(read_owner(&self.path).await)?,
                Step::RemoveStale => acquisition.removed(fs::remove_file(&self.path).await)?,
                Step::Acquired(file) => break file,
                Step::Contended => return Ok(false),
            };
        };

        let pending = PendingLock::new(&self.path);
        let written = write_owner(&mut file).await;
        protocol::close_logged(file.into_std().await, &self.path);
        written.map_err(|e| protocol::write_failed(&self.path, e))?;
        pending.commit();

        self.is_owner = true;
        debug!("Lock acquired: {}", self.path.display());
        Ok(true)
    }

    /// Remove the lock file; resolves once removal has been attempted.
    pub async fn unlock(&mut self) -> bool {
        protocol::report_removal(fs::remove_file(&self.path).await, &self.path);
        self.is_owner = false;
        true
    }

    pub async fn owner(&self) -> Result<Option<u32>> {
        let read = read_owner(&self.path).await;
        protocol::owner_from(read, &self.path, process::is_process_running)
    }

    /// Owner PID, or `-1` when no running process holds the lock.
    pub async fn owner_pid(&self) -> Result<i64> {
        Ok(self.owner().await?.map(i64::from).unwrap_or(NO_OWNER))
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

impl Drop for AsyncLockHandle {
    fn drop(&mut self) {
        // Drop can't await; one small read and unlink are done inline
        if self.is_owner {
            protocol::release_if_ours(&self.path);
        }
    }
}

async fn write_owner(file: &mut File) -> io::Result<()> {
    let owner = process::encode_owner(process::current_pid());
    file.write_all(owner.as_bytes()).await?;
    file.flush().await
}

async fn read_owner(path: &Path) -> io::Result<OwnerRecord> {
    let file = OpenOptions::from(protocol::read_options()).open(path).await?;
    let modified = file.metadata().await.and_then(|meta| meta.modified()).ok();
    let mut content = Vec::with_capacity(MAX_OWNER_LEN);
    let mut limited = file.take(READ_LIMIT);
    let read = limited.read_to_end(&mut content).await;
    protocol::close_logged(limited.into_inner().into_std().await, path);
    read.map(|_| OwnerRecord { content, modified })
}
