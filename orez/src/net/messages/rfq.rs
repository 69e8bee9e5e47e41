//! ReadyForQuery (B) message.

use super::prelude::*;

/// ReadyForQuery (B).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadyForQuery {
    pub status: char,
}

impl ReadyForQuery {
    /// Idle, outside a transaction.
    pub fn idle() -> Self {
        ReadyForQuery { status: 'I' }
    }

    /// Inside a transaction block.
    pub fn in_transaction() -> Self {
        ReadyForQuery { status: 'T' }
    }

    /// Transaction aborted.
    pub fn error() -> Self {
        ReadyForQuery { status: 'E' }
    }
}

impl ToBytes for ReadyForQuery {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::named(self.code());
        payload.put_u8(self.status as u8);
        Ok(payload.freeze())
    }
}

impl FromBytes for ReadyForQuery {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'Z');
        let _len = bytes.get_i32();
        let status = bytes.get_u8() as char;
        Ok(Self { status })
    }
}

impl Protocol for ReadyForQuery {
    fn code(&self) -> char {
        'Z'
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip() {
        for rfq in [
            ReadyForQuery::idle(),
            ReadyForQuery::in_transaction(),
            ReadyForQuery::error(),
        ] {
            let decoded = ReadyForQuery::from_bytes(rfq.to_bytes().unwrap()).unwrap();
            assert_eq!(decoded, rfq);
        }
    }
}
