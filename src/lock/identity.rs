use crate::error::{LockError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Shortest accepted lock name.
pub const MIN_NAME_LEN: usize = 5;

/// How long a lock file without a readable PID counts as held by a creator that
/// is still writing it. Older files are reclaimed.
pub const PENDING_GRACE: Duration = Duration::from_secs(5);

/// Who contends for a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    /// Every user on the host.
    #[default]
    Global,
    /// Only processes of the invoking user.
    User,
}

impl Scope {
    pub fn from_global(global: bool) -> Self {
        if global {
            Scope::Global
        } else {
            Scope::User
        }
    }

    pub fn is_global(self) -> bool {
        self == Scope::Global
    }
}

/// Validated, immutable description of a lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockIdentity {
    name: String,
    scope: Scope,
    sub_path: Option<String>,
}

impl LockIdentity {
    pub fn new(name: impl Into<String>, scope: Scope, sub_path: Option<String>) -> Result<Self> {
        let name = name.into();
        if name.chars().count() < MIN_NAME_LEN {
            return Err(LockError::name_too_short(name, MIN_NAME_LEN));
        }

        Ok(Self {
            name,
            scope,
            sub_path,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn sub_path(&self) -> Option<&str> {
        self.sub_path.as_deref()
    }
}

/// Construction options for a lock handle.
///
/// ```
/// use instance_lock::{LockOptions, Scope};
///
/// let options = LockOptions::new("my-application")
///     .synchronous(true)
///     .scope(Scope::User)
///     .sub_path("vendor/app");
/// assert!(options.is_synchronous());
/// ```
#[derive(Debug, Clone)]
pub struct LockOptions {
    pub(crate) name: String,
    pub(crate) synchronous: bool,
    pub(crate) scope: Scope,
    pub(crate) sub_path: Option<String>,
    pub(crate) base_dir: Option<PathBuf>,
    pub(crate) pending_grace: Duration,
}

impl LockOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            synchronous: false,
            scope: Scope::Global,
            sub_path: None,
            base_dir: None,
            pending_grace: PENDING_GRACE,
        }
    }

    pub fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn global(self, global: bool) -> Self {
        self.scope(Scope::from_global(global))
    }

    /// Extra namespace mixed into the lock file name, e.g. `"vendor/app"`.
    pub fn sub_path(mut self, sub_path: impl Into<String>) -> Self {
        self.sub_path = Some(sub_path.into());
        self
    }

    /// Place the lock file in `dir` instead of the platform temp directory.
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Override [`PENDING_GRACE`].
    pub fn pending_grace(mut self, grace: Duration) -> Self {
        self.pending_grace = grace;
        self
    }

    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    pub fn identity(&self) -> Result<LockIdentity> {
        LockIdentity::new(self.name.clone(), self.scope, self.sub_path.clone())
    }
}
