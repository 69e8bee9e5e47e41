//! Commit (`'C'`) message.

use super::super::super::code;
use super::super::super::prelude::*;
use super::super::PG_EPOCH_MICROS;

/// Closes a transaction in the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub flags: u8,
    pub commit_lsn: i64,
    pub end_lsn: i64,
    pub timestamp: i64,
}

impl Commit {
    pub fn new(commit_lsn: i64, end_lsn: i64, timestamp: i64) -> Self {
        Self {
            flags: 0,
            commit_lsn,
            end_lsn,
            timestamp,
        }
    }
}

impl ToBytes for Commit {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        payload.put_u8(b'C');
        payload.put_u8(self.flags);
        payload.put_i64(self.commit_lsn);
        payload.put_i64(self.end_lsn);
        payload.put_i64(self.timestamp - PG_EPOCH_MICROS);

        Ok(payload.freeze())
    }
}

impl FromBytes for Commit {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'C');

        Ok(Self {
            flags: bytes.get_u8(),
            commit_lsn: bytes.get_i64(),
            end_lsn: bytes.get_i64(),
            timestamp: bytes.get_i64() + PG_EPOCH_MICROS,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip() {
        let commit = Commit::new(0x0100_0100, 0x0100_0200, 1_700_000_000_000_000);
        let decoded = Commit::from_bytes(commit.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, commit);
        assert!(decoded.commit_lsn < decoded.end_lsn);
    }
}
