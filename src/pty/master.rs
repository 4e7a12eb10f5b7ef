use std::io;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Non-blocking PTY master driven by the tokio reactor.
///
/// Reading after the last slave descriptor has closed fails with EIO on
/// Linux. That is how a PTY reports hang-up, so it is surfaced as EOF.
pub struct Pty {
    fd: AsyncFd<OwnedFd>,
}

impl Pty {
    pub fn from_master(master: OwnedFd) -> io::Result<Self> {
        let raw = master.as_raw_fd();
        set_nonblocking(raw)?;
        set_cloexec(raw)?;
        // SAFETY: `master` is an open descriptor owned by the `AsyncFd` from
        // here on and never replaced or closed while registered.
        let fd = unsafe { AsyncFd::register(master)? };
        Ok(Self { fd })
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = nix::libc::fcntl(fd, nix::libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if nix::libc::fcntl(fd, nix::libc::F_SETFL, flags | nix::libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = nix::libc::fcntl(fd, nix::libc::F_GETFD);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if nix::libc::fcntl(fd, nix::libc::F_SETFD, flags | nix::libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn is_hangup(err: &io::Error) -> bool {
    err.raw_os_error() == Some(nix::libc::EIO)
}

impl AsyncRead for Pty {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();

            let result = guard.try_io(|inner| {
                let n = unsafe {
                    nix::libc::read(
                        inner.as_raw_fd(),
                        unfilled.as_mut_ptr() as *mut _,
                        unfilled.len(),
                    )
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });

            match result {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) if is_hangup(&e) => return Poll::Ready(Ok(())),
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for Pty {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.fd.poll_write_ready(cx))?;

            let result = guard.try_io(|inner| {
                let n = unsafe {
                    nix::libc::write(inner.as_raw_fd(), data.as_ptr() as *const _, data.len())
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });

            match result {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_registered_master_round_trip_then_hangup() {
        let pair = nix::pty::openpty(None, None).unwrap();
        let mut master = Pty::from_master(pair.master).unwrap();
        let mut slave = tokio::fs::File::from_std(std::fs::File::from(pair.slave));

        slave.write_all(b"ready\n").await.unwrap();
        slave.flush().await.unwrap();
        let mut buf = [0u8; 64];
        let n = master.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("ready"));

        drop(slave);
        let mut rest = Vec::new();
        tokio::time::timeout(std::time::Duration::from_secs(5), master.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
    }
}
