mod container;

use std::future::Future;
use std::io;
use std::process::ExitStatus;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::session::SessionId;

pub use container::ContainerBackend;

/// Line sent to the client when the container runtime cannot be used at all.
pub const UNAVAILABLE_NOTICE: &str = "Couldn't start the container runtime CLI\r\n";

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("could not start `{program}`: {source}")]
    Unavailable {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{step} exited with {status}")]
    Failed { step: &'static str, status: ExitStatus },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BackendError {
    /// What the client sees, if anything, before the session closes.
    pub fn client_notice(&self) -> Option<&'static str> {
        match self {
            BackendError::Unavailable { .. } => Some(UNAVAILABLE_NOTICE),
            BackendError::Failed { .. } | BackendError::Io(_) => None,
        }
    }
}

/// Provider of disposable per-session processes attached to a terminal.
pub trait Backend: Send + Sync + 'static {
    type Pty: AsyncRead + AsyncWrite + Send + 'static;
    type Process: Send + 'static;

    /// Get the backend ready for a new session, streaming progress to `out`.
    fn prepare<W>(&self, out: &mut W) -> impl Future<Output = Result<(), BackendError>> + Send
    where
        W: AsyncWrite + Unpin + Send;

    /// Start the process for session `id`.
    fn start(
        &self,
        id: &SessionId,
    ) -> impl Future<Output = Result<(Self::Pty, Self::Process), BackendError>> + Send;

    /// Terminate the process and wait for it. Never fails.
    fn stop(&self, id: &SessionId, process: Self::Process) -> impl Future<Output = ()> + Send;
}
