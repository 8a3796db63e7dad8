use crate::error::Result;
#[cfg(unix)]
use crate::error::LockError;
#[cfg(unix)]
use std::io;

/// Most bytes of a lock file that are ever interpreted.
pub const MAX_OWNER_LEN: usize = 20;

/// Owner query result meaning "no running process holds the lock".
pub const NO_OWNER: i64 = -1;

pub fn current_pid() -> u32 {
    std::process::id()
}

/// ASCII decimal representation written into a lock file.
pub fn encode_owner(pid: u32) -> String {
    pid.to_string()
}

/// Parse lock file content as an owner PID.
///
/// Only the first [`MAX_OWNER_LEN`] bytes are considered. Returns `None` when they
/// don't start with a positive decimal PID.
pub fn parse_owner(content: &[u8]) -> Option<u32> {
    let content = &content[..content.len().min(MAX_OWNER_LEN)];
    let digits: Vec<u8> = content
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take_while(|b| b.is_ascii_digit())
        .copied()
        .collect();

    std::str::from_utf8(&digits)
        .ok()?
        .parse::<u32>()
        .ok()
        .filter(|pid| is_valid_pid(*pid))
}

/// PIDs that name a single process; `kill` treats 0 and negative values as groups.
fn is_valid_pid(pid: u32) -> bool {
    pid > 0 && pid <= i32::MAX as u32
}

/// Whether `pid` identifies a running process.
///
/// Only an explicit "no such process" answer yields `false`; a process we are not
/// allowed to signal is reported as running.
#[cfg(unix)]
pub fn is_process_running(pid: u32) -> Result<bool> {
    if !is_valid_pid(pid) {
        return Ok(false);
    }

    // SAFETY: signal 0 performs the permission and existence checks without delivering anything.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return Ok(true);
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(false),
        Some(libc::EPERM) => Ok(true),
        _ => Err(LockError::ProbeFailed { pid, source: err }),
    }
}

#[cfg(not(unix))]
pub fn is_process_running(pid: u32) -> Result<bool> {
    if !is_valid_pid(pid) {
        return Ok(false);
    }

    // No probe without platform APIs: never reclaim
    Ok(true)
}
