//! Process-group plumbing for spawned children.
//!
//! OS stages run in their own process group with a SIGTSTP handler that
//! pauses instead of stopping, so the shell keeps control of the terminal.
//! On platforms without POSIX job control these are no-ops.

use std::process::Command;

/// Install the POSIX pre-exec hooks on a child about to be spawned:
/// `setpgid(0, 0)` plus the pausing SIGTSTP handler.
pub fn prepare_child(command: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;

        unsafe {
            command.pre_exec(|| {
                set_process_group(0, 0)?;
                let handler: extern "C" fn(libc::c_int) = sigtstp_pause;
                if libc::signal(libc::SIGTSTP, handler as libc::sighandler_t) == libc::SIG_ERR {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }
    #[cfg(not(unix))]
    {
        let _ = command;
    }
}

/// Put `pid` into process group `pgid`, retrying on EINTR.
#[cfg(unix)]
pub(crate) fn set_process_group(pid: libc::pid_t, pgid: libc::pid_t) -> std::io::Result<()> {
    loop {
        let rc = unsafe { libc::setpgid(pid, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EINTR => continue,
            // Already exec'd or gone; caller can proceed with best-effort behavior.
            Some(code) if code == libc::EACCES || code == libc::ESRCH => return Ok(()),
            _ => return Err(err),
        }
    }
}

// Blocks until a signal resumes the process, instead of the default stop
// behaviour that would steal the terminal from the shell.
#[cfg(unix)]
extern "C" fn sigtstp_pause(_signal: libc::c_int) {
    unsafe {
        libc::pause();
    }
}

/// Best-effort termination of a process by pid, for shutdown cleanup.
/// Retries on EINTR; any other failure means the process is already gone.
#[cfg(unix)]
pub(crate) fn kill_pid(pid: u32) {
    loop {
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            return;
        }

        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return;
    }
}
