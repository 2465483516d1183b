//! Platform-specific process signalling

#[cfg(unix)]
mod unix;

use std::io;

/// Force kill a process and every member of its process group
pub fn kill_process_group(pid: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        unix::kill_process_group(pid)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process groups are not supported on this platform",
        ))
    }
}

/// Detach the calling (about to exec) process into its own session
///
/// # Safety
/// Only async-signal-safe calls are made; intended for `Command::pre_exec`.
#[cfg(unix)]
pub unsafe fn detach_session() -> io::Result<()> {
    unix::detach_session()
}

/// Check if a process is running
pub fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unix::is_process_running(pid)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}
