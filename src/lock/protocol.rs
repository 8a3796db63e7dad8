//! Lock file protocol shared by the blocking and async handles.
//!
//! [`Acquisition`] decides what happens next from the outcome of each filesystem
//! operation but never touches the filesystem itself. A handle drives it by
//! performing the requested [`Step`] with its own I/O flavour and feeding the
//! result back:
//!
//! ```text
//! CreateExclusive ──ok──────────────────────────────► Acquired
//!        │ exists
//!        ▼
//!    ReadOwner ──owner alive / unknown, recent──────► Contended
//!        │ owner gone or          │ file vanished
//!        │ unknown past grace     │
//!        ▼                        │
//!   RemoveStale ──────────────────┴─► CreateExclusive (once) ──exists──► Contended
//! ```

use super::process::{self, MAX_OWNER_LEN};
use crate::error::{LockError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

pub(crate) type Probe = fn(u32) -> Result<bool>;

/// What a driver found in an existing lock file.
#[derive(Debug)]
pub(crate) struct OwnerRecord {
    pub(crate) content: Vec<u8>,
    pub(crate) modified: Option<SystemTime>,
}

impl OwnerRecord {
    /// Time since the file was last written; zero when unknown or in the future.
    fn age(&self) -> Duration {
        self.modified
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or(Duration::ZERO)
    }
}

/// Next operation a driver has to perform on the lock file.
#[derive(Debug)]
pub(crate) enum Step<F> {
    /// Create the file, failing if it already exists.
    CreateExclusive,
    /// Read up to [`MAX_OWNER_LEN`] bytes of the existing file.
    ReadOwner,
    /// Delete a file whose owner is no longer running.
    RemoveStale,
    /// The file was created by us; the owner PID still has to be written.
    Acquired(F),
    /// Another live process holds the lock.
    Contended,
}

/// One `lock()` attempt against a single lock file.
#[derive(Debug)]
pub(crate) struct Acquisition {
    path: PathBuf,
    retried: bool,
    grace: Duration,
    probe: Probe,
}

impl Acquisition {
    /// `grace` is how long a file without a readable PID is assumed to belong to
    /// a creator that has not written it yet.
    pub(crate) fn start<F>(path: &Path, grace: Duration) -> (Self, Step<F>) {
        Self::with_probe(path, grace, process::is_process_running)
    }

    pub(crate) fn with_probe<F>(path: &Path, grace: Duration, probe: Probe) -> (Self, Step<F>) {
        debug!("Acquiring lock: {}", path.display());
        let acquisition = Acquisition {
            path: path.to_path_buf(),
            retried: false,
            grace,
            probe,
        };
        (acquisition, Step::CreateExclusive)
    }

    /// Outcome of [`Step::CreateExclusive`].
    pub(crate) fn created<F>(&mut self, result: io::Result<F>) -> Result<Step<F>> {
        match result {
            Ok(file) => {
                debug!("Lock file created: {}", self.path.display());
                Ok(Step::Acquired(file))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if self.retried {
                    debug!("Lost reclaim race for {}", self.path.display());
                    Ok(Step::Contended)
                } else {
                    Ok(Step::ReadOwner)
                }
            }
            Err(e) => Err(LockError::CreateFailed {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    /// Outcome of [`Step::ReadOwner`].
    pub(crate) fn owner_read<F>(&mut self, result: io::Result<OwnerRecord>) -> Result<Step<F>> {
        let record = match result {
            Ok(record) => record,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Lock file vanished before it could be read: {}", self.path.display());
                return Ok(self.retry());
            }
            Err(e) => {
                return Err(LockError::ReadFailed {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let Some(pid) = process::parse_owner(&record.content) else {
            let age = record.age();
            if age > self.grace {
                debug!(
                    "Lock {} has no readable owner after {:?}, treating as stale",
                    self.path.display(),
                    age
                );
                return Ok(Step::RemoveStale);
            }
            debug!("Lock file {} has no readable owner yet, treating as held", self.path.display());
            return Ok(Step::Contended);
        };

        if (self.probe)(pid)? {
            debug!("Lock {} held by running process {}", self.path.display(), pid);
            Ok(Step::Contended)
        } else {
            debug!("Lock {} is stale (process {} is gone)", self.path.display(), pid);
            Ok(Step::RemoveStale)
        }
    }

    /// Outcome of [`Step::RemoveStale`].
    pub(crate) fn removed<F>(&mut self, result: io::Result<()>) -> Result<Step<F>> {
        match result {
            Ok(()) => {
                debug!("Removed stale lock: {}", self.path.display());
                Ok(self.retry())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(self.retry()),
            Err(e) => Err(LockError::RemoveFailed {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    fn retry<F>(&mut self) -> Step<F> {
        if self.retried {
            Step::Contended
        } else {
            self.retried = true;
            Step::CreateExclusive
        }
    }
}

/// Options for [`Step::CreateExclusive`].
pub(crate) fn exclusive_options() -> OpenOptions {
    let mut opts = OpenOptions::new();
    opts.write(true).create_new(true);
    no_follow(&mut opts);
    opts
}

/// Options for [`Step::ReadOwner`] and owner queries.
pub(crate) fn read_options() -> OpenOptions {
    let mut opts = OpenOptions::new();
    opts.read(true);
    no_follow(&mut opts);
    opts
}

fn no_follow(opts: &mut OpenOptions) {
    // Refuse symlinks planted at the lock path
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.custom_flags(libc::O_NOFOLLOW);
    }
    #[cfg(not(unix))]
    let _ = opts;
}

/// Resolve an owner query from the raw read outcome.
///
/// A missing file, unreadable content or a dead owner all mean "no owner".
pub(crate) fn owner_from(
    result: io::Result<OwnerRecord>,
    path: &Path,
    probe: Probe,
) -> Result<Option<u32>> {
    let record = match result {
        Ok(record) => record,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(LockError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    match process::parse_owner(&record.content) {
        Some(pid) if probe(pid)? => Ok(Some(pid)),
        _ => Ok(None),
    }
}

pub(crate) fn write_failed(path: &Path, source: io::Error) -> LockError {
    LockError::WriteFailed {
        path: path.to_path_buf(),
        source,
    }
}

/// Log the outcome of a release. Releasing never fails.
pub(crate) fn report_removal(result: io::Result<()>, path: &Path) {
    match result {
        Ok(()) => debug!("Lock file removed: {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Lock file already absent: {}", path.display())
        }
        Err(e) => warn!(
            "Failed to remove lock file {} (non-fatal): {}",
            path.display(),
            e
        ),
    }
}

/// Close a lock file handle, logging instead of returning errors.
pub(crate) fn close_logged(file: File, path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::io::IntoRawFd;

        let fd = file.into_raw_fd();
        // SAFETY: `fd` was released by `file` above and is closed exactly once here.
        if unsafe { libc::close(fd) } != 0 {
            warn!(
                "Failed to close lock file {} (non-fatal): {}",
                path.display(),
                io::Error::last_os_error()
            );
        }
    }
    #[cfg(not(unix))]
    {
        drop(file);
        let _ = path;
    }
}

/// Upper bound for a single owner read.
pub(crate) const READ_LIMIT: u64 = MAX_OWNER_LEN as u64;

/// Blocking [`Step::ReadOwner`]: the first [`MAX_OWNER_LEN`] bytes and the mtime.
pub(crate) fn read_owner(path: &Path) -> io::Result<OwnerRecord> {
    let file = read_options().open(path)?;
    let modified = file.metadata().and_then(|meta| meta.modified()).ok();
    let mut content = Vec::with_capacity(MAX_OWNER_LEN);
    let mut limited = file.take(READ_LIMIT);
    let read = limited.read_to_end(&mut content);
    close_logged(limited.into_inner(), path);
    read.map(|_| OwnerRecord { content, modified })
}

/// A lock file we created whose owner PID is not on disk yet.
///
/// Dropping it before [`commit`](Self::commit) removes the file, so an
/// interrupted acquisition never leaves an ownerless lock behind.
pub(crate) struct PendingLock<'a> {
    path: &'a Path,
    committed: bool,
}

impl<'a> PendingLock<'a> {
    pub(crate) fn new(path: &'a Path) -> Self {
        PendingLock {
            path,
            committed: false,
        }
    }

    pub(crate) fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PendingLock<'_> {
    fn drop(&mut self) {
        if !self.committed {
            debug!("Discarding unfinished lock file: {}", self.path.display());
            report_removal(fs::remove_file(self.path), self.path);
        }
    }
}

/// Release on drop: remove the lock file only while it still names this process.
pub(crate) fn release_if_ours(path: &Path) {
    match read_owner(path) {
        Ok(record) if process::parse_owner(&record.content) == Some(process::current_pid()) => {
            report_removal(fs::remove_file(path), path)
        }
        Ok(_) => debug!("Lock file {} belongs to another owner, leaving it", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Lock file already absent: {}", path.display())
        }
        Err(e) => warn!(
            "Failed to read lock file {} before release (non-fatal): {}",
            path.display(),
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIVE: Probe = live;
    const DEAD: Probe = dead;

    fn live(_: u32) -> Result<bool> {
        Ok(true)
    }

    fn dead(_: u32) -> Result<bool> {
        Ok(false)
    }

    const GRACE: Duration = Duration::from_secs(5);

    fn fresh(content: &[u8]) -> OwnerRecord {
        OwnerRecord {
            content: content.to_vec(),
            modified: Some(SystemTime::now()),
        }
    }

    fn aged(content: &[u8], secs: u64) -> OwnerRecord {
        OwnerRecord {
            content: content.to_vec(),
            modified: Some(SystemTime::now() - Duration::from_secs(secs)),
        }
    }

    fn path() -> PathBuf {
        PathBuf::from("/tmp/instance-lock-test")
    }

    fn exists() -> io::Error {
        io::Error::from(io::ErrorKind::AlreadyExists)
    }

    fn not_found() -> io::Error {
        io::Error::from(io::ErrorKind::NotFound)
    }

    #[test]
    fn test_fresh_create_acquires() {
        let (mut acq, step) = Acquisition::with_probe::<()>(&path(), GRACE, LIVE);
        assert!(matches!(step, Step::CreateExclusive));
        assert!(matches!(acq.created(Ok(7)).unwrap(), Step::Acquired(7)));
    }

    #[test]
    fn test_live_owner_contends() {
        let (mut acq, _) = Acquisition::with_probe::<()>(&path(), GRACE, LIVE);
        assert!(matches!(acq.created::<()>(Err(exists())).unwrap(), Step::ReadOwner));
        assert!(matches!(
            acq.owner_read::<()>(Ok(fresh(b"1234"))).unwrap(),
            Step::Contended
        ));
    }

    #[test]
    fn test_dead_owner_is_reclaimed_once() {
        let (mut acq, _) = Acquisition::with_probe::<()>(&path(), GRACE, DEAD);
        assert!(matches!(acq.created::<u8>(Err(exists())).unwrap(), Step::ReadOwner));
        assert!(matches!(
            acq.owner_read::<u8>(Ok(fresh(b"999999"))).unwrap(),
            Step::RemoveStale
        ));
        assert!(matches!(acq.removed::<u8>(Ok(())).unwrap(), Step::CreateExclusive));
        assert!(matches!(acq.created(Ok(1u8)).unwrap(), Step::Acquired(1)));
    }

    #[test]
    fn test_lost_reclaim_race_contends() {
        let (mut acq, _) = Acquisition::with_probe::<()>(&path(), GRACE, DEAD);
        acq.created::<()>(Err(exists())).unwrap();
        acq.owner_read::<()>(Ok(fresh(b"999999"))).unwrap();
        acq.removed::<()>(Ok(())).unwrap();
        assert!(matches!(acq.created::<()>(Err(exists())).unwrap(), Step::Contended));
    }

    #[test]
    fn test_stale_file_already_removed_by_racer() {
        let (mut acq, _) = Acquisition::with_probe::<()>(&path(), GRACE, DEAD);
        acq.created::<()>(Err(exists())).unwrap();
        acq.owner_read::<()>(Ok(fresh(b"999999"))).unwrap();
        assert!(matches!(
            acq.removed::<()>(Err(not_found())).unwrap(),
            Step::CreateExclusive
        ));
    }

    #[test]
    fn test_vanished_file_retries_create() {
        let (mut acq, _) = Acquisition::with_probe::<()>(&path(), GRACE, LIVE);
        acq.created::<()>(Err(exists())).unwrap();
        assert!(matches!(
            acq.owner_read::<()>(Err(not_found())).unwrap(),
            Step::CreateExclusive
        ));
        assert!(matches!(acq.created::<()>(Err(exists())).unwrap(), Step::Contended));
    }

    #[test]
    fn test_unreadable_owner_is_not_reclaimed() {
        let (mut acq, _) = Acquisition::with_probe::<()>(&path(), GRACE, DEAD);
        acq.created::<()>(Err(exists())).unwrap();
        assert!(matches!(acq.owner_read::<()>(Ok(fresh(b""))).unwrap(), Step::Contended));
    }

    #[test]
    fn test_unexpected_errors_propagate() {
        let denied = || io::Error::from(io::ErrorKind::PermissionDenied);

        let (mut acq, _) = Acquisition::with_probe::<()>(&path(), GRACE, DEAD);
        let err = acq.created::<()>(Err(denied())).unwrap_err();
        assert!(matches!(err, LockError::CreateFailed { .. }));
        assert!(err.is_permission_denied());

        let (mut acq, _) = Acquisition::with_probe::<()>(&path(), GRACE, DEAD);
        acq.created::<()>(Err(exists())).unwrap();
        let err = acq.owner_read::<()>(Err(denied())).unwrap_err();
        assert!(matches!(err, LockError::ReadFailed { .. }));

        let (mut acq, _) = Acquisition::with_probe::<()>(&path(), GRACE, DEAD);
        acq.created::<()>(Err(exists())).unwrap();
        acq.owner_read::<()>(Ok(fresh(b"42"))).unwrap();
        let err = acq.removed::<()>(Err(denied())).unwrap_err();
        assert!(matches!(err, LockError::RemoveFailed { .. }));
    }

    #[test]
    fn test_liveness_errors_propagate() {
        let failing: Probe = |pid| {
            Err(LockError::ProbeFailed {
                pid,
                source: io::Error::from(io::ErrorKind::InvalidInput),
            })
        };
        let (mut acq, _) = Acquisition::with_probe::<()>(&path(), GRACE, failing);
        acq.created::<()>(Err(exists())).unwrap();
        let err = acq.owner_read::<()>(Ok(fresh(b"42"))).unwrap_err();
        assert!(matches!(err, LockError::ProbeFailed { pid: 42, .. }));
    }

    #[test]
    fn test_owner_from_outcomes() {
        assert_eq!(owner_from(Err(not_found()), &path(), LIVE).unwrap(), None);
        assert_eq!(owner_from(Ok(fresh(b"77")), &path(), LIVE).unwrap(), Some(77));
        assert_eq!(owner_from(Ok(fresh(b"77")), &path(), DEAD).unwrap(), None);
        assert_eq!(owner_from(Ok(fresh(b"junk")), &path(), LIVE).unwrap(), None);

        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(owner_from(Ok(fresh(b"")), &path(), LIVE).unwrap().is_none());
        assert!(owner_from(Err(denied), &path(), LIVE).is_err());
    }

    #[test]
    fn test_ownerless_file_past_grace_is_reclaimed() {
        let (mut acq, _) = Acquisition::with_probe::<()>(&path(), GRACE, LIVE);
        acq.created::<()>(Err(exists())).unwrap();
        assert!(matches!(acq.owner_read::<()>(Ok(aged(b"", 60))).unwrap(), Step::RemoveStale));
    }

    #[test]
    fn test_ownerless_file_without_mtime_is_held() {
        let (mut acq, _) = Acquisition::with_probe::<()>(&path(), GRACE, LIVE);
        acq.created::<()>(Err(exists())).unwrap();
        let record = OwnerRecord {
            content: Vec::new(),
            modified: None,
        };
        assert!(matches!(acq.owner_read::<()>(Ok(record)).unwrap(), Step::Contended));
    }

    #[test]
    fn test_old_live_owner_is_still_held() {
        let (mut acq, _) = Acquisition::with_probe::<()>(&path(), GRACE, LIVE);
        acq.created::<()>(Err(exists())).unwrap();
        assert!(matches!(acq.owner_read::<()>(Ok(aged(b"42", 60))).unwrap(), Step::Contended));
    }

    #[test]
    fn test_pending_lock_removed_unless_committed() {
        let dir = tempfile::TempDir::new().unwrap();
        let abandoned = dir.path().join("abandoned");
        let kept = dir.path().join("kept");
        fs::write(&abandoned, b"").unwrap();
        fs::write(&kept, b"").unwrap();

        drop(PendingLock::new(&abandoned));
        PendingLock::new(&kept).commit();

        assert!(!abandoned.exists());
        assert!(kept.exists());
    }

    #[test]
    fn test_release_only_removes_own_lock() {
        let dir = tempfile::TempDir::new().unwrap();
        let ours = dir.path().join("ours");
        let theirs = dir.path().join("theirs");
        fs::write(&ours, process::current_pid().to_string()).unwrap();
        fs::write(&theirs, b"1").unwrap();

        release_if_ours(&ours);
        release_if_ours(&theirs);
        release_if_ours(&dir.path().join("missing"));

        assert!(!ours.exists());
        assert!(theirs.exists());
    }
}
