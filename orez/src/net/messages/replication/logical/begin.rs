//! Begin (`'B'`) message.

use super::super::super::code;
use super::super::super::prelude::*;
use super::super::PG_EPOCH_MICROS;

/// Opens a transaction in the stream. Timestamps are Unix microseconds;
/// the wire carries Postgres-epoch microseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Begin {
    pub final_lsn: i64,
    pub timestamp: i64,
    pub xid: i32,
}

impl Begin {
    pub fn new(final_lsn: i64, timestamp: i64, xid: i32) -> Self {
        Self {
            final_lsn,
            timestamp,
            xid,
        }
    }
}

impl ToBytes for Begin {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        payload.put_u8(b'B');
        payload.put_i64(self.final_lsn);
        payload.put_i64(self.timestamp - PG_EPOCH_MICROS);
        payload.put_i32(self.xid);

        Ok(payload.freeze())
    }
}

impl FromBytes for Begin {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'B');

        Ok(Self {
            final_lsn: bytes.get_i64(),
            timestamp: bytes.get_i64() + PG_EPOCH_MICROS,
            xid: bytes.get_i32(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip_adjusts_epoch() {
        let begin = Begin::new(0x0100_0100, 1_700_000_000_000_000, 42);
        let bytes = begin.to_bytes().unwrap();

        let mut cursor = bytes.clone();
        let _code = cursor.get_u8();
        let _lsn = cursor.get_i64();
        assert_eq!(cursor.get_i64(), 1_700_000_000_000_000 - PG_EPOCH_MICROS);

        let decoded = Begin::from_bytes(bytes).unwrap();
        assert_eq!(decoded, begin);
    }
}
