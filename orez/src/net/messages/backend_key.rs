//! BackendKeyData (B) message.

use rand::Rng;

use super::prelude::*;

/// Process id and cancellation secret handed to the client at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendKeyData {
    pub pid: i32,
    pub secret: i32,
}

impl BackendKeyData {
    /// Random key. The embedded engine has no real backends to cancel,
    /// the key only needs to be unique per connection.
    pub fn new() -> Self {
        let mut rng = rand::rng();

        Self {
            pid: rng.random(),
            secret: rng.random(),
        }
    }
}

impl Default for BackendKeyData {
    fn default() -> Self {
        Self::new()
    }
}

impl ToBytes for BackendKeyData {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::named(self.code());
        payload.put_i32(self.pid);
        payload.put_i32(self.secret);
        Ok(payload.freeze())
    }
}

impl FromBytes for BackendKeyData {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'K');
        let _len = bytes.get_i32();

        Ok(Self {
            pid: bytes.get_i32(),
            secret: bytes.get_i32(),
        })
    }
}

impl Protocol for BackendKeyData {
    fn code(&self) -> char {
        'K'
    }
}
