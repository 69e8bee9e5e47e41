//! Cancel-safe read buffer for Postgres messages.

use std::io::Cursor;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{Error, Message};

const HEADER_SIZE: usize = 5;
const BUFFER_SIZE: usize = 4096;

/// Accumulates bytes off a stream and splits them into whole messages.
/// Partially-read messages survive a cancelled `read`.
#[derive(Default, Debug, Clone)]
pub struct MessageBuffer {
    buffer: BytesMut,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
        }
    }

    /// Read one message off the stream.
    ///
    /// # Cancellation safety
    ///
    /// This method is cancel-safe.
    pub async fn read(
        &mut self,
        stream: &mut (impl AsyncRead + Unpin),
    ) -> Result<Message, Error> {
        loop {
            if let Some(size) = self.message_size() {
                if self.buffer.len() >= size {
                    return Ok(Message::new(self.buffer.split_to(size).freeze()));
                }

                self.buffer.reserve(size - self.buffer.len());
            }

            if self.buffer.capacity() == self.buffer.len() {
                self.buffer.reserve(BUFFER_SIZE);
            }

            let read = stream.read_buf(&mut self.buffer).await?;

            if read == 0 {
                return Err(Error::UnexpectedEof);
            }
        }
    }

    fn message_size(&self) -> Option<usize> {
        if self.buffer.len() >= HEADER_SIZE {
            let mut cur = Cursor::new(&self.buffer);
            let _code = cur.get_u8();
            let len = cur.get_i32() as usize + 1;
            Some(len)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::net::messages::{Query, Terminate, ToBytes};
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::spawn;

    #[tokio::test]
    async fn reads_messages_split_across_writes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        spawn(async move {
            let mut conn = TcpStream::connect(addr).await.unwrap();
            let query = Query::new("SELECT 1").to_bytes().unwrap();
            let terminate = Terminate.to_bytes().unwrap();

            // Dribble the bytes to force partial reads.
            for chunk in query.chunks(3) {
                conn.write_all(chunk).await.unwrap();
                conn.flush().await.unwrap();
            }
            conn.write_all(&terminate).await.unwrap();
            conn.flush().await.unwrap();
        });

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buffer = MessageBuffer::new();

        let message = buffer.read(&mut stream).await.unwrap();
        assert_eq!(message.code(), 'Q');

        let message = buffer.read(&mut stream).await.unwrap();
        assert_eq!(message.code(), 'X');

        assert!(matches!(
            buffer.read(&mut stream).await,
            Err(Error::UnexpectedEof)
        ));
    }
}
