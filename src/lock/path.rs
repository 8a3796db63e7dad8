use super::identity::{LockIdentity, Scope};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Derive the lock file name for an identity.
///
/// The digest covers `sub_path/discriminator/name` with empty parts skipped, where
/// the discriminator is the current user's name for [`Scope::User`] and empty for
/// [`Scope::Global`]. The result is 64 lowercase hex characters.
pub fn hash_lock_name(identity: &LockIdentity) -> String {
    let user = match identity.scope() {
        Scope::Global => String::new(),
        Scope::User => current_username(),
    };
    hash_parts(identity.sub_path().unwrap_or(""), &user, identity.name())
}

fn hash_parts(sub_path: &str, discriminator: &str, name: &str) -> String {
    let joined = [sub_path, discriminator, name]
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Base directory for lock files of the given scope on this platform.
///
/// Performs no I/O: the directory is not checked or created.
pub fn temp_dir_for(scope: Scope) -> PathBuf {
    match scope {
        Scope::Global => global_temp_dir(),
        Scope::User => std::env::temp_dir(),
    }
}

#[cfg(windows)]
fn global_temp_dir() -> PathBuf {
    PathBuf::from(r"C:\Windows\Temp")
}

#[cfg(target_os = "macos")]
fn global_temp_dir() -> PathBuf {
    // TMPDIR on macOS is per-user
    PathBuf::from("/tmp")
}

#[cfg(not(any(windows, target_os = "macos")))]
fn global_temp_dir() -> PathBuf {
    std::env::temp_dir()
}

/// Full lock file path: `base_dir` (or the scope's temp directory) joined with the hashed name.
pub fn lock_file_path(identity: &LockIdentity, base_dir: Option<&Path>) -> PathBuf {
    let dir = base_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| temp_dir_for(identity.scope()));
    dir.join(hash_lock_name(identity))
}

fn current_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|user| !user.is_empty())
        .unwrap_or_else(fallback_username)
}

#[cfg(unix)]
fn fallback_username() -> String {
    // SAFETY: getuid has no preconditions and cannot fail.
    let uid = unsafe { libc::getuid() };
    format!("uid-{}", uid)
}

#[cfg(not(unix))]
fn fallback_username() -> String {
    "unknown".to_string()
}
