use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{ready, Context, Poll};
use std::time::Instant;

use tokio::io::{AsyncRead, ReadBuf};

/// Milliseconds since process start, offset by one so a real reading is
/// never zero.
pub fn now_stamp() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    u64::try_from(epoch.elapsed().as_millis()).unwrap_or(u64::MAX - 1) + 1
}

/// Last time the user sent anything. Zero means nothing has been seen yet.
#[derive(Debug, Default)]
pub struct Activity {
    last: AtomicU64,
}

impl Activity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }

    pub fn touch(&self) {
        self.record(now_stamp());
    }

    /// Store `stamp` unless a later one is already there.
    pub fn record(&self, stamp: u64) {
        self.last.fetch_max(stamp, Ordering::AcqRel);
    }
}

/// Reader decorator that touches an [`Activity`] on every non-empty read.
pub struct ActivityReader<R> {
    inner: R,
    activity: Arc<Activity>,
}

impl<R> ActivityReader<R> {
    pub fn new(inner: R, activity: Arc<Activity>) -> Self {
        Self { inner, activity }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ActivityReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        if buf.filled().len() > before {
            this.activity.touch();
        }
        Poll::Ready(Ok(()))
    }
}
