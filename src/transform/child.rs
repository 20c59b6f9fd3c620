//! Child-process lifecycle for the body transformer (spec §4.4): spawn a
//! `/bin/sh -c <command>` subprocess wired to the proxy via two pipes, with
//! its stderr redirected to a log file, and tear it down without leaving a
//! zombie.

use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;

use nix::fcntl::{fcntl, open, FcntlArg, OFlag};
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{close, dup2, execv, fork, pipe, ForkResult, Pid};

/// Mirrors the original's enumerated spawn failure modes so callers can
/// report the same distinctions instead of collapsing everything to "spawn
/// failed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    PipeErr,
    ForkErr,
    ExecErr,
    NonblockingErr,
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommandStatus::PipeErr => "failed to create transform pipes",
            CommandStatus::ForkErr => "fork failed",
            CommandStatus::ExecErr => "transform command exited immediately",
            CommandStatus::NonblockingErr => "failed to set transform pipe non-blocking",
        };
        f.write_str(s)
    }
}

/// The parent-side handle to a running transform child: its pid and the two
/// non-blocking pipe fds used to talk to it.
pub struct TransformChild {
    pub pid: Pid,
    pub write_fd: RawFd,
    pub read_fd: RawFd,
    reaped: bool,
}

impl TransformChild {
    /// Forks `/bin/sh -c command`, with the child's stdin/stdout wired to
    /// fresh pipes and stderr appended to `stderr_path`. Registration with
    /// the selector is the caller's job — only it knows the connection's
    /// token.
    pub fn spawn(command: &str, stderr_path: &str) -> Result<TransformChild, CommandStatus> {
        let (input_r, input_w) = pipe().map_err(|_| CommandStatus::PipeErr)?;
        let (output_r, output_w) = match pipe() {
            Ok(p) => p,
            Err(_) => {
                let _ = close(input_r);
                let _ = close(input_w);
                return Err(CommandStatus::PipeErr);
            }
        };

        let stderr_fd = open(
            stderr_path,
            OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_APPEND,
            Mode::from_bits_truncate(0o644),
        )
        .unwrap_or(-1);

        match unsafe { fork() } {
            Err(_) => {
                let _ = close(input_r);
                let _ = close(input_w);
                let _ = close(output_r);
                let _ = close(output_w);
                if stderr_fd >= 0 {
                    let _ = close(stderr_fd);
                }
                Err(CommandStatus::ForkErr)
            }
            Ok(ForkResult::Child) => {
                let _ = dup2(input_r, 0);
                let _ = dup2(output_w, 1);
                if stderr_fd >= 0 {
                    let _ = dup2(stderr_fd, 2);
                }
                let _ = close(input_r);
                let _ = close(input_w);
                let _ = close(output_r);
                let _ = close(output_w);
                if stderr_fd >= 0 {
                    let _ = close(stderr_fd);
                }
                let shell = CString::new("/bin/sh").unwrap();
                let flag = CString::new("-c").unwrap();
                let cmd = CString::new(command).unwrap_or_default();
                let _ = execv(&shell, &[shell.clone(), flag, cmd]);
                // execv only returns on failure.
                std::process::exit(127);
            }
            Ok(ForkResult::Parent { child }) => {
                let _ = close(input_r);
                let _ = close(output_w);
                if stderr_fd >= 0 {
                    let _ = close(stderr_fd);
                }

                if set_nonblocking(input_w).is_err() || set_nonblocking(output_r).is_err() {
                    let _ = close(input_w);
                    let _ = close(output_r);
                    let _ = kill(child, Signal::SIGKILL);
                    let _ = waitpid(child, None);
                    return Err(CommandStatus::NonblockingErr);
                }

                // A single WNOHANG probe: catches the common case of a
                // command that fails to exec at all (e.g. "/bin/sh: no
                // such file").
                match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
                    Ok(WaitStatus::StillAlive) | Err(_) => {}
                    Ok(_) => {
                        let _ = close(input_w);
                        let _ = close(output_r);
                        return Err(CommandStatus::ExecErr);
                    }
                }

                Ok(TransformChild {
                    pid: child,
                    write_fd: input_w,
                    read_fd: output_r,
                    reaped: false,
                })
            }
        }
    }

    /// SIGTERM followed by a blocking reap. Idempotent.
    pub fn kill_and_reap(&mut self) {
        if self.reaped {
            return;
        }
        let _ = kill(self.pid, Signal::SIGTERM);
        let _ = waitpid(self.pid, None);
        self.reaped = true;
    }
}

impl Drop for TransformChild {
    fn drop(&mut self) {
        self.kill_and_reap();
        let _ = close(self.write_fd);
        let _ = close(self.read_fd);
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(to_io_err)?;
    let mut flags = OFlag::from_bits_truncate(flags);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(to_io_err)?;
    Ok(())
}

fn to_io_err(e: nix::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{read, write};

    #[test]
    fn spawned_cat_echoes_stdin_to_stdout() {
        let mut child = TransformChild::spawn("cat", "/dev/null").expect("spawn");
        write(child.write_fd, b"hello\n").unwrap();

        let mut buf = Vec::new();
        let mut chunk = [0u8; 64];
        for _ in 0..200 {
            match read(child.read_fd, &mut chunk) {
                Ok(0) | Err(_) => {}
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    break;
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(buf, b"hello\n");
        child.kill_and_reap();
    }

    #[test]
    fn nonexistent_binary_is_detected_as_exec_error() {
        let result = TransformChild::spawn("exec /no/such/binary-xyz", "/dev/null");
        assert!(matches!(result, Err(CommandStatus::ExecErr)));
    }
}
