//! Buffered TCP stream carrying Postgres messages.
//!
//! TLS is refused at startup, so there is only one transport. Writes go
//! through the buffered half and block on flush when the kernel send buffer
//! is full; that backpressure throttles both passthrough and replication.

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::Context;

use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufStream, ReadBuf};
use tokio::net::TcpStream;

use super::messages::{Message, MessageBuffer, Protocol};
use super::Error;

const NET_BUFFER: usize = 9126;

/// A client socket.
#[pin_project]
#[derive(Debug)]
pub struct Stream {
    #[pin]
    inner: BufStream<TcpStream>,
    buffer: MessageBuffer,
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        self.project().inner.poll_read(cx, buf)
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

impl Stream {
    /// Wrap an accepted TCP connection.
    pub fn plain(stream: TcpStream) -> Self {
        Self {
            inner: BufStream::with_capacity(NET_BUFFER, NET_BUFFER, stream),
            buffer: MessageBuffer::new(),
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.get_ref().peer_addr().ok()
    }

    /// Buffer a message for sending.
    pub async fn send(&mut self, message: &impl Protocol) -> Result<(), Error> {
        let bytes = message.to_bytes()?;
        self.inner.write_all(&bytes).await?;
        Ok(())
    }

    /// Send a message and flush it out.
    pub async fn send_flush(&mut self, message: &impl Protocol) -> Result<(), Error> {
        self.send(message).await?;
        self.flush().await
    }

    /// Forward raw backend bytes, flushing.
    pub async fn write_all_flush(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.inner.write_all(bytes).await?;
        self.flush().await
    }

    pub async fn flush(&mut self) -> Result<(), Error> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Read one message.
    ///
    /// # Cancellation safety
    ///
    /// Cancel-safe: a partially-received message stays buffered.
    pub async fn read(&mut self) -> Result<Message, Error> {
        let Self { inner, buffer } = self;
        buffer.read(inner).await
    }

    /// Refuse a TLS request with the single-byte `'N'` reply.
    pub async fn refuse_tls(&mut self) -> Result<(), Error> {
        self.inner.write_all(b"N").await?;
        self.flush().await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::net::messages::{FromBytes, Query, ReadyForQuery, ToBytes};
    use tokio::net::TcpListener;
    use tokio::spawn;

    #[tokio::test]
    async fn send_and_read() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        spawn(async move {
            let mut client = Stream::plain(TcpStream::connect(addr).await.unwrap());
            client.send_flush(&Query::new("SELECT 1")).await.unwrap();

            let reply = client.read().await.unwrap();
            assert_eq!(reply.code(), 'Z');
        });

        let (conn, _) = listener.accept().await.unwrap();
        let mut server = Stream::plain(conn);

        let message = server.read().await.unwrap();
        let query = Query::from_bytes(message.to_bytes().unwrap()).unwrap();
        assert_eq!(query.query, "SELECT 1");

        server.send_flush(&ReadyForQuery::idle()).await.unwrap();
    }
}
