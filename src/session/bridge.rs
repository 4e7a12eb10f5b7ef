use std::fmt;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

use super::shutdown::ShutdownCoordinator;

const BUF_SIZE: usize = 8192;

/// Why a running session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    ClientClosed,
    BackendClosed,
    Kicked,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    ToBackend,
    ToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ToBackend => f.write_str("client->backend"),
            Direction::ToClient => f.write_str("backend->client"),
        }
    }
}

/// Copy until EOF or the first error, flushing after every chunk.
async fn pump<R, W>(reader: &mut R, writer: &mut W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        total += n as u64;
    }
}

/// Error kinds that just mean the other end went away.
pub(crate) fn is_hangup(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    ) || err.raw_os_error() == Some(nix::libc::EIO)
}

fn log_pump_end(direction: Direction, result: &io::Result<u64>) {
    match result {
        Ok(bytes) => tracing::debug!(%direction, bytes, "Stream ended"),
        Err(e) if is_hangup(e) => tracing::debug!(%direction, error = %e, "Peer hung up"),
        Err(e) => tracing::warn!(%direction, error = %e, "I/O error"),
    }
}

fn log_join_error(direction: Direction, err: &JoinError) {
    if !err.is_cancelled() {
        tracing::warn!(%direction, error = %err, "Copy task failed");
    }
}

/// Duplex copy between a client connection and a backend terminal.
///
/// Each direction runs in its own task so neither can block the other.
/// The client writer is handed back once the outbound copy stops, so the
/// session can still talk to the client during teardown.
pub struct Bridge<W> {
    inbound: JoinHandle<io::Result<u64>>,
    outbound: JoinHandle<(W, io::Result<u64>)>,
}

/// A bridge that has stopped for some reason but may still be flushing
/// backend output to the client.
pub struct Draining<W> {
    inbound: JoinHandle<io::Result<u64>>,
    outbound: Outbound<W>,
}

enum Outbound<W> {
    Running(JoinHandle<(W, io::Result<u64>)>),
    Finished(Option<W>),
}

enum First<W> {
    Inbound(Result<io::Result<u64>, JoinError>),
    Outbound(Result<(W, io::Result<u64>), JoinError>),
    Kicked,
    Shutdown,
}

impl<W> Bridge<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn start<R, P>(mut client_reader: R, mut client_writer: W, pty: P) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        P: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut pty_reader, mut pty_writer) = tokio::io::split(pty);

        let inbound = tokio::spawn(async move {
            let result = pump(&mut client_reader, &mut pty_writer).await;
            let _ = pty_writer.shutdown().await;
            result
        });
        let outbound = tokio::spawn(async move {
            let result = pump(&mut pty_reader, &mut client_writer).await;
            (client_writer, result)
        });

        Self { inbound, outbound }
    }

    /// Run until either direction ends, a kick arrives, or shutdown fires.
    pub async fn run(
        self,
        kick: &mut mpsc::Receiver<()>,
        shutdown: &ShutdownCoordinator,
    ) -> (EndReason, Draining<W>) {
        let Bridge {
            mut inbound,
            mut outbound,
        } = self;

        let first = tokio::select! {
            result = &mut inbound => First::Inbound(result),
            result = &mut outbound => First::Outbound(result),
            Some(()) = kick.recv() => First::Kicked,
            _ = shutdown.triggered() => First::Shutdown,
        };

        match first {
            First::Inbound(result) => {
                match &result {
                    Ok(result) => log_pump_end(Direction::ToBackend, result),
                    Err(e) => log_join_error(Direction::ToBackend, e),
                }
                (
                    EndReason::ClientClosed,
                    Draining {
                        inbound,
                        outbound: Outbound::Running(outbound),
                    },
                )
            }
            First::Outbound(result) => (
                EndReason::BackendClosed,
                Draining {
                    inbound,
                    outbound: Outbound::Finished(finish_outbound(result)),
                },
            ),
            First::Kicked => (
                EndReason::Kicked,
                Draining {
                    inbound,
                    outbound: Outbound::Running(outbound),
                },
            ),
            First::Shutdown => (
                EndReason::Shutdown,
                Draining {
                    inbound,
                    outbound: Outbound::Running(outbound),
                },
            ),
        }
    }
}

fn finish_outbound<W>(result: Result<(W, io::Result<u64>), JoinError>) -> Option<W> {
    match result {
        Ok((writer, result)) => {
            log_pump_end(Direction::ToClient, &result);
            Some(writer)
        }
        Err(e) => {
            log_join_error(Direction::ToClient, &e);
            None
        }
    }
}

impl<W> Draining<W> {
    /// Stop reading from the client and give the backend `grace` to finish
    /// its output. Returns the client writer if the outbound copy ended on
    /// its own.
    pub async fn finish(self, grace: Duration) -> Option<W> {
        self.inbound.abort();

        match self.outbound {
            Outbound::Finished(writer) => writer,
            Outbound::Running(mut outbound) => {
                match tokio::time::timeout(grace, &mut outbound).await {
                    Ok(result) => finish_outbound(result),
                    Err(_) => {
                        tracing::debug!("Backend output did not end in time, dropping it");
                        outbound.abort();
                        None
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    const GRACE: Duration = Duration::from_secs(1);

    struct Harness {
        /// What the user types into / sees from the browser
        user: DuplexStream,
        /// The process end of the terminal
        process: DuplexStream,
        bridge: Bridge<tokio::io::WriteHalf<DuplexStream>>,
    }

    fn harness() -> Harness {
        let (user, client) = tokio::io::duplex(1024);
        let (pty, process) = tokio::io::duplex(1024);
        let (client_reader, client_writer) = tokio::io::split(client);
        Harness {
            user,
            process,
            bridge: Bridge::start(client_reader, client_writer, pty),
        }
    }

    #[tokio::test]
    async fn test_bytes_flow_both_ways() {
        let Harness {
            mut user,
            mut process,
            bridge,
        } = harness();
        let (_kick_tx, mut kick) = mpsc::channel(1);
        let shutdown = ShutdownCoordinator::new();

        user.write_all(b"ls\r").await.unwrap();
        let mut buf = [0u8; 3];
        process.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ls\r");

        process.write_all(b"bin etc\r\n").await.unwrap();
        let mut buf = [0u8; 9];
        user.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"bin etc\r\n");

        drop(user);
        let (reason, _draining) = bridge.run(&mut kick, &shutdown).await;
        assert_eq!(reason, EndReason::ClientClosed);
    }

    #[tokio::test]
    async fn test_client_eof_ends_without_backend_closing() {
        let Harness {
            user,
            process,
            bridge,
        } = harness();
        let (_kick_tx, mut kick) = mpsc::channel(1);
        let shutdown = ShutdownCoordinator::new();

        drop(user);
        let (reason, draining) = tokio::time::timeout(GRACE, bridge.run(&mut kick, &shutdown))
            .await
            .unwrap();
        assert_eq!(reason, EndReason::ClientClosed);

        // The backend is still alive; stopping it lets the outbound side end.
        drop(process);
        assert!(draining.finish(GRACE).await.is_some());
    }

    #[tokio::test]
    async fn test_backend_eof_ends_without_client_closing() {
        let Harness {
            mut user,
            mut process,
            bridge,
        } = harness();
        let (_kick_tx, mut kick) = mpsc::channel(1);
        let shutdown = ShutdownCoordinator::new();

        process.write_all(b"logout\r\n").await.unwrap();
        drop(process);

        let (reason, draining) = tokio::time::timeout(GRACE, bridge.run(&mut kick, &shutdown))
            .await
            .unwrap();
        assert_eq!(reason, EndReason::BackendClosed);

        let mut writer = draining.finish(GRACE).await.unwrap();
        writer.write_all(b"!").await.unwrap();
        let mut buf = [0u8; 9];
        user.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"logout\r\n!");
    }

    #[tokio::test]
    async fn test_kick_ends_the_bridge() {
        let Harness {
            user: _user,
            process,
            bridge,
        } = harness();
        let (kick_tx, mut kick) = mpsc::channel(1);
        let shutdown = ShutdownCoordinator::new();

        kick_tx.try_send(()).unwrap();
        assert!(kick_tx.try_send(()).is_err());

        let (reason, draining) = bridge.run(&mut kick, &shutdown).await;
        assert_eq!(reason, EndReason::Kicked);
        drop(process);
        assert!(draining.finish(GRACE).await.is_some());
    }

    #[tokio::test]
    async fn test_dropped_kick_sender_is_not_a_kick() {
        let Harness {
            user,
            process: _process,
            bridge,
        } = harness();
        let (kick_tx, mut kick) = mpsc::channel::<()>(1);
        let shutdown = ShutdownCoordinator::new();
        drop(kick_tx);

        let ended = tokio::spawn(async move {
            let (reason, _draining) = bridge.run(&mut kick, &shutdown).await;
            reason
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!ended.is_finished());

        drop(user);
        assert_eq!(ended.await.unwrap(), EndReason::ClientClosed);
    }

    #[tokio::test]
    async fn test_shutdown_ends_the_bridge() {
        let Harness {
            user: _user,
            process: _process,
            bridge,
        } = harness();
        let (_kick_tx, mut kick) = mpsc::channel(1);
        let shutdown = ShutdownCoordinator::new();
        shutdown.trigger();

        let (reason, draining) = bridge.run(&mut kick, &shutdown).await;
        assert_eq!(reason, EndReason::Shutdown);
        // Backend never closes: the grace period runs out.
        assert!(draining.finish(Duration::from_millis(20)).await.is_none());
    }
}
