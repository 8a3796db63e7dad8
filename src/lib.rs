//! Single-instance process locking through exclusively created PID files.
//!
//! A lock is a file in the temp directory named after a hash of the lock name.
//! It is created with create-new semantics and holds the owner's PID, so a lock
//! left behind by a crashed process can be recognised and reclaimed.
//!
//! An owned lock is released when its handle is dropped. `std::process::exit`
//! does not run destructors, so drop the handle or call `unlock()` before it.
//!
//! ```no_run
//! # fn main() -> instance_lock::Result<()> {
//! let mut locker = instance_lock::create("my-application", true, true, None)?
//!     .into_sync()
//!     .expect("synchronous handle");
//!
//! if !locker.lock()? {
//!     // Nothing owned yet, so exiting here leaves no lock behind
//!     eprintln!("already running as pid {}", locker.owner_pid()?);
//!     std::process::exit(1);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod lock;

pub use error::{LockError, Result};
pub use lock::{
    create, create_with, AsyncLockHandle, LockIdentity, LockOptions, Locker, Scope,
    SyncLockHandle, NO_OWNER, PENDING_GRACE,
};
