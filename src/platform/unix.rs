//! Unix signals via libc

use std::io;

/// Force kill a process group (SIGKILL)
pub fn kill_process_group(pgid: u32) -> io::Result<()> {
    let pgid = to_pid(pgid)?;
    let result = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Start a new session so the child leads its own process group
pub unsafe fn detach_session() -> io::Result<()> {
    if libc::setsid() == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Check if a process is running
pub fn is_process_running(pid: u32) -> bool {
    match to_pid(pid) {
        // kill with signal 0 checks if process exists without sending a signal
        Ok(pid) => unsafe { libc::kill(pid, 0) == 0 },
        Err(_) => false,
    }
}

// pid 0 and negative values address whole groups; never signal those by accident
fn to_pid(pid: u32) -> io::Result<libc::pid_t> {
    match libc::pid_t::try_from(pid) {
        Ok(pid) if pid > 1 => Ok(pid),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal pid {pid}"),
        )),
    }
}
