//! Raw byte-stream transport (TCP tunneling mode).
//!
//! A byte stream has no message boundaries, so each received "frame" is
//! whatever a single read returned, up to [`READ_BUFFER_SIZE`] bytes.

use super::{
    CloseReason, FrameReader, FrameWriter, Transport, TransportFuture, TransportKind,
    READ_BUFFER_SIZE,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

/// Transport over any async byte stream.
pub struct StreamTransport<S> {
    stream: S,
}

/// The common case: a TCP socket bridged into a session.
pub type TcpTransport = StreamTransport<TcpStream>;

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

struct StreamReader<S> {
    half: ReadHalf<S>,
    buf: Vec<u8>,
}

struct StreamWriter<S> {
    half: WriteHalf<S>,
    closed: bool,
}

impl<S> FrameReader for StreamReader<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn receive(&mut self) -> TransportFuture<'_, Option<Vec<u8>>> {
        Box::pin(async move {
            let n = self.half.read(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
            Ok(Some(self.buf[..n].to_vec()))
        })
    }
}

impl<S> FrameWriter for StreamWriter<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn send<'a>(&'a mut self, data: &'a [u8]) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.half.write_all(data).await?;
            Ok(())
        })
    }

    fn close(&mut self, _reason: CloseReason) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if !self.closed {
                self.closed = true;
                self.half.shutdown().await?;
            }
            Ok(())
        })
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let (read_half, write_half) = tokio::io::split(self.stream);
        (
            Box::new(StreamReader {
                half: read_half,
                buf: vec![0u8; READ_BUFFER_SIZE],
            }),
            Box::new(StreamWriter {
                half: write_half,
                closed: false,
            }),
        )
    }
}
