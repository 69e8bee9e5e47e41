//! ParseComplete (B) message.

use super::prelude::*;

/// ParseComplete (B).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParseComplete;

impl ToBytes for ParseComplete {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        Ok(Payload::named(self.code()).freeze())
    }
}

impl FromBytes for ParseComplete {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, '1');
        Ok(Self)
    }
}

impl Protocol for ParseComplete {
    fn code(&self) -> char {
        '1'
    }
}
