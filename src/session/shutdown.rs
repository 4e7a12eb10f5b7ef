use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Process-wide shutdown broadcast paired with a drain gate.
///
/// Every session keeps a [`ShutdownHold`] (the shared side of the gate)
/// for its whole lifetime. Shutting down fires the broadcast first and then
/// takes the exclusive side, which completes once every hold is gone.
/// The gate is fair, so holds requested after the broadcast queue behind
/// the drain and come back empty.
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    gate: Arc<RwLock<()>>,
}

/// Shared side of the drain gate.
pub struct ShutdownHold {
    _guard: OwnedRwLockReadGuard<()>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the broadcast has fired. Never resets.
    pub fn triggered(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Take a hold, or `None` if shutdown has already begun.
    pub async fn hold(&self) -> Option<ShutdownHold> {
        if self.is_triggered() {
            return None;
        }
        let guard = Arc::clone(&self.gate).read_owned().await;
        if self.is_triggered() {
            return None;
        }
        Some(ShutdownHold { _guard: guard })
    }

    /// Fire the broadcast. Idempotent.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Wait until no session holds the gate.
    pub async fn drain(&self) {
        let _exclusive = self.gate.write().await;
    }

    pub async fn shutdown(&self) {
        self.trigger();
        tracing::info!("Shutdown requested, waiting for sessions to finish");
        self.drain().await;
        tracing::info!("All sessions finished");
    }
}
