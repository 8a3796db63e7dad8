mod blocking;
mod identity;
mod nonblocking;
mod path;
mod process;
mod protocol;

pub use blocking::SyncLockHandle;
pub use identity::{LockIdentity, LockOptions, Scope, MIN_NAME_LEN, PENDING_GRACE};
pub use nonblocking::AsyncLockHandle;
pub use path::{hash_lock_name, lock_file_path, temp_dir_for};
pub use process::{is_process_running, MAX_OWNER_LEN, NO_OWNER};

use crate::error::Result;
use std::path::Path;

/// A lock handle in either execution mode.
#[derive(Debug)]
pub enum Locker {
    Sync(SyncLockHandle),
    Async(AsyncLockHandle),
}

impl Locker {
    pub fn path(&self) -> &Path {
        match self {
            Locker::Sync(handle) => handle.path(),
            Locker::Async(handle) => handle.path(),
        }
    }

    pub fn identity(&self) -> &LockIdentity {
        match self {
            Locker::Sync(handle) => handle.identity(),
            Locker::Async(handle) => handle.identity(),
        }
    }

    pub fn is_owner(&self) -> bool {
        match self {
            Locker::Sync(handle) => handle.is_owner(),
            Locker::Async(handle) => handle.is_owner(),
        }
    }

    pub fn is_synchronous(&self) -> bool {
        matches!(self, Locker::Sync(_))
    }

    pub fn as_sync(&mut self) -> Option<&mut SyncLockHandle> {
        match self {
            Locker::Sync(handle) => Some(handle),
            Locker::Async(_) => None,
        }
    }

    pub fn as_async(&mut self) -> Option<&mut AsyncLockHandle> {
        match self {
            Locker::Async(handle) => Some(handle),
            Locker::Sync(_) => None,
        }
    }

    pub fn into_sync(self) -> Option<SyncLockHandle> {
        match self {
            Locker::Sync(handle) => Some(handle),
            Locker::Async(_) => None,
        }
    }

    pub fn into_async(self) -> Option<AsyncLockHandle> {
        match self {
            Locker::Async(handle) => Some(handle),
            Locker::Sync(_) => None,
        }
    }
}

/// Build a lock handle.
///
/// `synchronous` picks [`SyncLockHandle`] over [`AsyncLockHandle`]; `global`
/// picks [`Scope::Global`] over [`Scope::User`]; `sub_path` namespaces the lock
/// name further. Fails if `name` is shorter than [`MIN_NAME_LEN`] characters.
///
/// An owned lock is released when its handle is dropped. `std::process::exit`
/// skips destructors, so drop the handle or call `unlock()` before exiting that way.
pub fn create(
    name: &str,
    synchronous: bool,
    global: bool,
    sub_path: Option<&str>,
) -> Result<Locker> {
    let mut options = LockOptions::new(name)
        .synchronous(synchronous)
        .global(global);
    if let Some(sub_path) = sub_path {
        options = options.sub_path(sub_path);
    }
    create_with(&options)
}

/// Build a lock handle from [`LockOptions`].
pub fn create_with(options: &LockOptions) -> Result<Locker> {
    if options.is_synchronous() {
        SyncLockHandle::new(options).map(Locker::Sync)
    } else {
        AsyncLockHandle::new(options).map(Locker::Async)
    }
}
