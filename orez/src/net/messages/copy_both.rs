//! CopyBothResponse (B) message.

use super::prelude::*;

/// CopyBothResponse (`'W'`). Switches the connection into streaming
/// replication mode. Text format, no columns.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CopyBothResponse;

impl ToBytes for CopyBothResponse {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::named(self.code());
        payload.put_i8(0);
        payload.put_i16(0);
        Ok(payload.freeze())
    }
}

impl FromBytes for CopyBothResponse {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'W');
        Ok(Self)
    }
}

impl Protocol for CopyBothResponse {
    fn code(&self) -> char {
        'W'
    }
}
