//! Terminate (F) message.

use super::prelude::*;

/// Terminate (F). Client is done.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Terminate;

impl ToBytes for Terminate {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        Ok(Payload::named(self.code()).freeze())
    }
}

impl FromBytes for Terminate {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'X');
        Ok(Self)
    }
}

impl Protocol for Terminate {
    fn code(&self) -> char {
        'X'
    }
}
