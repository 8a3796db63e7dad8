#![allow(dead_code)]

use instance_lock::{LockOptions, Scope};
use filetime::FileTime;
use std::path::Path;
use std::time::{Duration, SystemTime};

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn options(name: &str, dir: &Path) -> LockOptions {
    LockOptions::new(name).scope(Scope::Global).base_dir(dir)
}

/// PID of a process that has already exited and been reaped.
#[cfg(unix)]
pub fn dead_pid() -> u32 {
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

/// Set the mtime of `path` to `secs` seconds ago.
pub fn backdate(path: &Path, secs: u64) {
    let then = SystemTime::now() - Duration::from_secs(secs);
    filetime::set_file_mtime(path, FileTime::from_system_time(then)).unwrap();
}
