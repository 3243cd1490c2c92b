//! WebSocket transport using tokio-tungstenite.
//!
//! Each binary message is one frame. Text messages are relayed as their
//! UTF-8 bytes; ping/pong is handled by tungstenite and never surfaces.

use super::{CloseReason, FrameReader, FrameWriter, Transport, TransportFuture, TransportKind};
use crate::error::RelayError;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

/// Control frames carry at most 125 bytes, two of which are the close code.
const MAX_CLOSE_REASON_BYTES: usize = 123;

/// Transport over an already-upgraded WebSocket.
pub struct WebSocketTransport<S> {
    ws: WebSocketStream<S>,
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(ws: WebSocketStream<S>) -> Self {
        Self { ws }
    }
}

struct WebSocketReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

struct WebSocketWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    closed: bool,
}

impl<S> FrameReader for WebSocketReader<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn receive(&mut self) -> TransportFuture<'_, Option<Vec<u8>>> {
        Box::pin(async move {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Binary(data))) => return Ok(Some(data.into())),
                    Some(Ok(Message::Text(text))) => return Ok(Some(text.into_bytes())),
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "WebSocket close frame received");
                        return match frame {
                            Some(frame) if !is_clean_close(frame.code) => {
                                Err(RelayError::ClosedByPeer {
                                    code: frame.code.into(),
                                    reason: frame.reason.into_owned(),
                                })
                            }
                            _ => Ok(None),
                        };
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(RelayError::from(e)),
                    None => return Ok(None),
                }
            }
        })
    }
}

/// Codes that end a stream without anything having gone wrong.
fn is_clean_close(code: CloseCode) -> bool {
    matches!(code, CloseCode::Normal | CloseCode::Away)
}

impl<S> FrameWriter for WebSocketWriter<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn send<'a>(&'a mut self, data: &'a [u8]) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            if self.closed {
                return Err(RelayError::TransportClosed);
            }
            self.sink
                .send(Message::Binary(data.to_vec().into()))
                .await
                .map_err(RelayError::from)
        })
    }

    fn close(&mut self, reason: CloseReason) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.closed {
                return Ok(());
            }
            self.closed = true;

            let frame = close_frame(&reason);
            // The peer may already be gone; a failed close frame is not an error.
            if let Err(e) = self.sink.send(Message::Close(Some(frame))).await {
                debug!(error = %e, "close frame not delivered");
            }
            match self.sink.close().await {
                Ok(()) => Ok(()),
                Err(e) => match RelayError::from(e) {
                    RelayError::TransportClosed => Ok(()),
                    other => Err(other),
                },
            }
        })
    }
}

impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let (sink, stream) = self.ws.split();
        (
            Box::new(WebSocketReader { stream }),
            Box::new(WebSocketWriter {
                sink,
                closed: false,
            }),
        )
    }
}

fn close_frame(reason: &CloseReason) -> CloseFrame<'static> {
    let code = match reason {
        CloseReason::SessionEnded => CloseCode::Normal,
        CloseReason::Rejected(_) => CloseCode::Policy,
        CloseReason::TryAgain(_) => CloseCode::Again,
    };
    CloseFrame {
        code,
        reason: truncate_utf8(reason.message(), MAX_CLOSE_REASON_BYTES)
            .to_string()
            .into(),
    }
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
