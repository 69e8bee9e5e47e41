//! Network plumbing: the PostgreSQL v3 wire codec and the TCP stream wrapper.

pub mod messages;
pub mod stream;
pub mod tweaks;

pub use messages::{FromBytes, Message, Protocol, ToBytes};
pub use stream::Stream;
pub use tweaks::tweak;

use bytes::{Buf, Bytes};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected message code \"{0}\", expected \"{1}\"")]
    UnexpectedCode(char, char),

    #[error("unexpected eof")]
    UnexpectedEof,

    #[error("unsupported startup request code {0}")]
    UnsupportedStartup(i32),

    #[error("incomplete startup packet")]
    IncompleteStartup,

    #[error("unexpected replication message \"{0}\"")]
    UnexpectedReplicationMessage(char),

    #[error("malformed message")]
    Malformed,
}

impl Error {
    /// The peer went away. Not worth logging above debug.
    pub fn disconnect(&self) -> bool {
        match self {
            Error::UnexpectedEof => true,
            Error::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Read a NUL-terminated string off the buffer, consuming the terminator.
pub fn c_string_buf(bytes: &mut Bytes) -> String {
    let mut buf = Vec::new();

    while bytes.has_remaining() {
        let b = bytes.get_u8();
        if b == 0 {
            break;
        }
        buf.push(b);
    }

    String::from_utf8_lossy(&buf).into_owned()
}
