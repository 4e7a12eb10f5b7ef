//! WebSocket connection as a plain byte stream.
//!
//! Inbound data messages (binary or text) are concatenated; their boundaries
//! mean nothing. Every outbound write becomes exactly one binary message.

use std::error::Error as StdError;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite;
use tokio_util::io::{CopyToBytes, SinkWriter, StreamReader};

pub type WsReader<S> = StreamReader<Inbound<S>, Bytes>;
pub type WsWriter<K> = SinkWriter<CopyToBytes<Outbound<K>>>;

/// Split an upgraded socket into a buffered reader and a message writer.
pub fn split(
    socket: WebSocket,
) -> (
    WsReader<SplitStream<WebSocket>>,
    WsWriter<SplitSink<WebSocket, Message>>,
) {
    let (sink, stream) = socket.split();
    (reader(stream), writer(sink))
}

pub fn reader<S, E>(stream: S) -> WsReader<S>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    StreamReader::new(Inbound::new(stream))
}

pub fn writer<K>(sink: K) -> WsWriter<K> {
    SinkWriter::new(CopyToBytes::new(Outbound::new(sink)))
}

/// Wrap a transport error, keeping the kind of the underlying I/O failure
/// so a peer going away still reads as a hang-up.
fn to_io<E>(err: E) -> io::Error
where
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    let err = err.into();
    io::Error::new(error_kind(&*err), err)
}

fn error_kind(err: &(dyn StdError + 'static)) -> io::ErrorKind {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(err) = err.downcast_ref::<io::Error>() {
            return err.kind();
        }
        if let Some(
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
        ) = err.downcast_ref::<tungstenite::Error>()
        {
            return io::ErrorKind::BrokenPipe;
        }
        current = err.source();
    }
    io::ErrorKind::Other
}

/// Payloads of inbound data messages. A close frame ends the stream.
pub struct Inbound<S> {
    inner: S,
    closed: bool,
}

impl<S> Inbound<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            closed: false,
        }
    }
}

impl<S, E> Stream for Inbound<S>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(None);
        }

        loop {
            match ready!(this.inner.poll_next_unpin(cx)) {
                Some(Ok(Message::Binary(data))) => {
                    if !data.is_empty() {
                        return Poll::Ready(Some(Ok(data)));
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    if !text.as_str().is_empty() {
                        return Poll::Ready(Some(Ok(Bytes::copy_from_slice(
                            text.as_str().as_bytes(),
                        ))));
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    this.closed = true;
                    return Poll::Ready(None);
                }
                Some(Ok(_)) => {} // ping / pong
                Some(Err(e)) => return Poll::Ready(Some(Err(to_io(e)))),
            }
        }
    }
}

/// Sends each chunk as one binary message.
pub struct Outbound<K> {
    inner: K,
}

impl<K> Outbound<K> {
    fn new(inner: K) -> Self {
        Self { inner }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> K {
        self.inner
    }
}

impl<K> Sink<Bytes> for Outbound<K>
where
    K: Sink<Message> + Unpin,
    K::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    type Error = io::Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.get_mut().inner.poll_ready_unpin(cx).map_err(to_io)
    }

    fn start_send(self: Pin<&mut Self>, item: Bytes) -> Result<(), Self::Error> {
        self.get_mut()
            .inner
            .start_send_unpin(Message::Binary(item))
            .map_err(to_io)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.get_mut().inner.poll_flush_unpin(cx).map_err(to_io)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.get_mut().inner.poll_close_unpin(cx).map_err(to_io)
    }
}
