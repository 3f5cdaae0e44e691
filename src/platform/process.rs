use anyhow::Result;
use std::process::Command;

/// Answers "is there a live process with this PID?"
///
/// Implementations must treat a process that exists but cannot be
/// inspected (permission denied) as alive.
pub trait Liveness: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Liveness check backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLiveness;

#[cfg(unix)]
impl Liveness for SystemLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };

        // kill(0) and kill(-1) address process groups, not a single process
        if pid <= 0 {
            return false;
        }

        // Signal 0 performs the existence and permission checks only
        let rc = unsafe { libc::kill(pid, 0) };
        if rc == 0 {
            return true;
        }

        !matches!(
            std::io::Error::last_os_error().raw_os_error(),
            Some(libc::ESRCH)
        )
    }
}

#[cfg(windows)]
impl Liveness for SystemLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        use windows_sys::Win32::Foundation::{
            CloseHandle, ERROR_ACCESS_DENIED, GetLastError, STILL_ACTIVE,
        };
        use windows_sys::Win32::System::Threading::{
            GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
        };

        if pid == 0 {
            return false;
        }

        let handle = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid) };
        if handle.is_null() {
            return unsafe { GetLastError() } == ERROR_ACCESS_DENIED;
        }

        let mut exit_code: u32 = 0;
        let ok = unsafe { GetExitCodeProcess(handle, &mut exit_code) };
        unsafe { CloseHandle(handle) };

        ok == 0 || exit_code == STILL_ACTIVE as u32
    }
}

/// Configure `command` so the child outlives its parent
///
/// On Unix the child starts a new session before exec, which drops the
/// controlling terminal. On Windows it is created without a console and
/// in its own process group.
pub fn detach(command: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;

        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        use windows_sys::Win32::System::Threading::{
            CREATE_NEW_PROCESS_GROUP, CREATE_NO_WINDOW, DETACHED_PROCESS,
        };

        command.creation_flags(CREATE_NO_WINDOW | DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }
}

/// Ask the process to shut down gracefully
pub fn terminate(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| anyhow::anyhow!("PID {} out of range", pid))?;
        if pid <= 0 {
            anyhow::bail!("Refusing to signal PID {}", pid);
        }

        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error())
                .map_err(|e| anyhow::anyhow!("Failed to signal PID {}: {}", pid, e));
        }
    }

    #[cfg(windows)]
    {
        let output = Command::new("taskkill")
            .arg("/PID")
            .arg(pid.to_string())
            .output()?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to stop PID {}: {}", pid, error);
        }
    }

    Ok(())
}
