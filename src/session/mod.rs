//! Session lifecycle: admission, backend preparation, the terminal bridge
//! and teardown.
//!
//! A session moves through `STARTING -> PULLING -> RUNNING -> DRAINING ->
//! DONE`. Every exit path, including refusals and backend failures, ends in
//! the same teardown: the registry slot and the shutdown hold are released
//! when the session's guards drop.

pub mod activity;
pub mod bridge;
pub mod registry;
pub mod shutdown;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::Instrument;
use uuid::Uuid;

use crate::backend::{Backend, BackendError};
use activity::{Activity, ActivityReader};
use bridge::{Bridge, EndReason};
use registry::{AdmissionError, Registry};
use shutdown::ShutdownCoordinator;

/// Sent to a session evicted to make room for someone else.
pub const KICK_NOTICE: &str =
    "\r\n\x1b[31m\x1b[1mThis session was the longest inactive one and has been closed to make room for a new visitor.\x1b[0m\r\n";

/// How long the backend may keep sending output once the session is ending.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Process-unique session identifier; doubles as the container name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Never admitted
    Refused(AdmissionError),
    /// Backend preparation or startup failed
    BackendFailed(BackendError),
    /// Ran and then stopped
    Finished(EndReason),
}

/// Owns everything sessions share: the registry, the shutdown coordinator
/// and the backend.
pub struct SessionManager<B> {
    registry: Arc<Registry>,
    shutdown: ShutdownCoordinator,
    backend: B,
    drain_grace: Duration,
}

impl<B: Backend> SessionManager<B> {
    pub fn new(registry: Registry, shutdown: ShutdownCoordinator, backend: B) -> Self {
        Self {
            registry: Arc::new(registry),
            shutdown,
            backend,
            drain_grace: DRAIN_GRACE,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Run one session over an already accepted connection until it ends.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> SessionEnd
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let id = SessionId::new();
        let span = tracing::info_span!("session", session = %id);
        let end = self.run(id, reader, writer).instrument(span.clone()).await;

        span.in_scope(|| match &end {
            SessionEnd::Refused(e) => tracing::info!(reason = %e, "Session refused"),
            SessionEnd::BackendFailed(e) => tracing::info!(error = %e, "Session failed to start"),
            SessionEnd::Finished(reason) => tracing::info!(?reason, "Session ended"),
        });
        end
    }

    async fn run<R, W>(&self, id: SessionId, reader: R, mut writer: W) -> SessionEnd
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        // STARTING
        if self.shutdown.is_triggered() {
            return SessionEnd::Refused(AdmissionError::ShuttingDown);
        }
        let activity = Arc::new(Activity::new());
        let admitted = tokio::select! {
            admitted = self.registry.admit(id, Arc::clone(&activity)) => admitted,
            _ = self.shutdown.triggered() => Err(AdmissionError::ShuttingDown),
        };
        let mut admission = match admitted {
            Ok(admission) => admission,
            Err(e) => return SessionEnd::Refused(e),
        };
        let Some(_hold) = self.shutdown.hold().await else {
            return SessionEnd::Refused(AdmissionError::ShuttingDown);
        };
        tracing::info!(active = self.registry.len(), "Session admitted");

        // PULLING
        let prepared = tokio::select! {
            prepared = self.backend.prepare(&mut writer) => prepared,
            _ = self.shutdown.triggered() => return SessionEnd::Finished(EndReason::Shutdown),
        };
        if let Err(e) = prepared {
            notify(&mut writer, &e).await;
            return SessionEnd::BackendFailed(e);
        }

        // RUNNING
        let (pty, process) = match self.backend.start(&id).await {
            Ok(started) => started,
            Err(e) => {
                notify(&mut writer, &e).await;
                return SessionEnd::BackendFailed(e);
            }
        };
        activity.touch();
        let bridge = Bridge::start(ActivityReader::new(reader, activity), writer, pty);
        let (reason, draining) = bridge.run(admission.kick(), &self.shutdown).await;
        tracing::debug!(?reason, "Bridge stopped, tearing down");

        // DRAINING
        self.backend.stop(&id, process).await;
        let writer = draining.finish(self.drain_grace).await;
        if reason == EndReason::Kicked {
            if let Some(mut writer) = writer {
                let _ = writer.write_all(KICK_NOTICE.as_bytes()).await;
                let _ = writer.flush().await;
            }
        }

        // DONE: admission and hold drop here
        SessionEnd::Finished(reason)
    }
}

async fn notify<W: AsyncWrite + Unpin>(writer: &mut W, err: &BackendError) {
    if let Some(notice) = err.client_notice() {
        let _ = writer.write_all(notice.as_bytes()).await;
        let _ = writer.flush().await;
    }
}
