mod master;

use std::io;
use std::process::Stdio;

use tokio::process::{Child, Command};

pub use master::Pty;

/// Spawn `command` as the session leader of a fresh PTY whose slave side
/// becomes its controlling terminal and stdio. Returns the master side.
pub fn spawn(mut command: Command) -> io::Result<(Pty, Child)> {
    let pty = nix::pty::openpty(None, None)?;
    let master = Pty::from_master(pty.master)?;

    command
        .stdin(Stdio::from(pty.slave.try_clone()?))
        .stdout(Stdio::from(pty.slave.try_clone()?))
        .stderr(Stdio::from(pty.slave))
        .kill_on_drop(true);

    unsafe {
        command.pre_exec(|| {
            if nix::libc::setsid() < 0 {
                return Err(io::Error::last_os_error());
            }
            if nix::libc::ioctl(0, nix::libc::TIOCSCTTY as _, 0) < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = command.spawn()?;
    // The command still owns the parent's copies of the slave; they must be
    // gone for the master to see hang-up when the child exits.
    drop(command);

    Ok((master, child))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_child_output_then_eof() {
        let mut command = Command::new("/bin/echo");
        command.arg("hello from the pty");
        let (mut pty, mut child) = spawn(command).unwrap();

        let mut output = Vec::new();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            pty.read_to_end(&mut output),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(String::from_utf8_lossy(&output).contains("hello from the pty"));
        assert!(child.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn test_child_has_a_terminal() {
        let mut command = Command::new("/bin/sh");
        command.args(["-c", "test -t 0 && test -t 1 && echo tty-ok"]);
        let (mut pty, mut child) = spawn(command).unwrap();

        let mut output = Vec::new();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            pty.read_to_end(&mut output),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(String::from_utf8_lossy(&output).contains("tty-ok"));
        assert!(child.wait().await.unwrap().success());
    }
}
