//! PostgreSQL v3 frontend/backend messages.
//!
//! After the startup phase, every message on the wire is
//! `byte(type) + int32(length including itself) + body`. Each message type
//! lives in its own module and implements [`ToBytes`], [`FromBytes`] and
//! [`Protocol`].

pub mod auth;
pub mod backend_key;
pub mod buffer;
pub mod command_complete;
pub mod copy_both;
pub mod copy_data;
pub mod data_row;
pub mod error_response;
pub mod parameter_status;
pub mod parse;
pub mod parse_complete;
pub mod query;
pub mod replication;
pub mod rfq;
pub mod row_description;
pub mod startup;
pub mod terminate;

pub use auth::{Authentication, Password};
pub use backend_key::BackendKeyData;
pub use buffer::MessageBuffer;
pub use command_complete::CommandComplete;
pub use copy_both::CopyBothResponse;
pub use copy_data::CopyData;
pub use data_row::DataRow;
pub use error_response::ErrorResponse;
pub use parameter_status::ParameterStatus;
pub use parse::Parse;
pub use parse_complete::ParseComplete;
pub use query::Query;
pub use rfq::ReadyForQuery;
pub use row_description::{Field, RowDescription};
pub use startup::Startup;
pub use terminate::Terminate;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::Error;

/// Serialize a message into wire bytes.
pub trait ToBytes {
    fn to_bytes(&self) -> Result<Bytes, Error>;
}

/// Parse a message from wire bytes, header included.
pub trait FromBytes: Sized {
    fn from_bytes(bytes: Bytes) -> Result<Self, Error>;
}

/// Message metadata.
pub trait Protocol: ToBytes {
    fn code(&self) -> char;

    fn message(&self) -> Result<Message, Error> {
        Ok(Message::new(self.to_bytes()?))
    }
}

macro_rules! code {
    ($bytes:expr, $code:expr) => {
        let code = $bytes.get_u8() as char;
        if code != $code {
            return Err($crate::net::Error::UnexpectedCode(code, $code));
        }
    };
}

pub(crate) use code;

pub mod prelude {
    pub(crate) use super::code;
    pub use super::{FromBytes, Message, Payload, Protocol, ToBytes};
    pub use crate::net::Error;
    pub use bytes::{Buf, BufMut, Bytes, BytesMut};
}

/// Builder for the `code + length + body` frame. The length field is
/// computed when the payload is frozen.
#[derive(Debug, Default)]
pub struct Payload {
    code: Option<char>,
    buf: BytesMut,
}

impl Payload {
    /// Payload with a leading message type byte.
    pub fn named(code: char) -> Self {
        Self {
            code: Some(code),
            buf: BytesMut::new(),
        }
    }

    /// Length-prefixed payload without a type byte (startup packet style).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn put_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn put_i16(&mut self, value: i16) {
        self.buf.put_i16(value);
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    /// NUL-terminated string.
    pub fn put_string(&mut self, value: &str) {
        self.buf.put_slice(value.as_bytes());
        self.buf.put_u8(0);
    }

    pub fn put(&mut self, bytes: impl AsRef<[u8]>) {
        self.buf.put_slice(bytes.as_ref());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        let mut framed = BytesMut::with_capacity(self.buf.len() + 5);
        if let Some(code) = self.code {
            framed.put_u8(code as u8);
        }
        framed.put_i32(self.buf.len() as i32 + 4);
        framed.put_slice(&self.buf);
        framed.freeze()
    }
}

/// A whole message taken off the wire, header included.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    bytes: Bytes,
}

impl Message {
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }

    /// Message type byte.
    pub fn code(&self) -> char {
        self.bytes[0] as char
    }

    /// Total size on the wire.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Message body, header stripped.
    pub fn body(&self) -> Bytes {
        self.bytes.slice(5..)
    }
}

impl ToBytes for Message {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        Ok(self.bytes.clone())
    }
}

impl FromBytes for Message {
    fn from_bytes(bytes: Bytes) -> Result<Self, Error> {
        if bytes.len() < 5 {
            return Err(Error::Malformed);
        }
        Ok(Self { bytes })
    }
}

impl Protocol for Message {
    fn code(&self) -> char {
        Message::code(self)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn payload_computes_length() {
        let mut payload = Payload::named('C');
        payload.put_string("SET");
        let bytes = payload.freeze();

        assert_eq!(bytes[0], b'C');
        let mut len = bytes.slice(1..5);
        assert_eq!(len.get_i32(), 8); // 4 (len) + 3 (SET) + 1 (NUL)
        assert_eq!(bytes.len(), 9);
    }

    #[test]
    fn unnamed_payload_has_no_code() {
        let mut payload = Payload::new();
        payload.put_i32(196608);
        let bytes = payload.freeze();

        let mut cursor = bytes.clone();
        assert_eq!(cursor.get_i32(), 8);
        assert_eq!(cursor.get_i32(), 196608);
    }

    #[test]
    fn message_body_strips_header() {
        let mut payload = Payload::named('Q');
        payload.put_string("SELECT 1");
        let message = Message::new(payload.freeze());

        assert_eq!(message.code(), 'Q');
        assert_eq!(&message.body()[..], b"SELECT 1\0");
    }
}
