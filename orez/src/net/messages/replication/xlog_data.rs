//! XLogData (B) envelope.

use crate::net::messages::CopyData;

use super::super::prelude::*;

/// XLogData (`'w'`): wraps one logical message with its WAL window.
#[derive(Debug, Clone)]
pub struct XLogData {
    pub wal_start: i64,
    pub wal_end: i64,
    pub system_clock: i64,
    pub payload: Bytes,
}

impl XLogData {
    pub fn wrap(wal_start: i64, wal_end: i64, system_clock: i64, payload: Bytes) -> Self {
        Self {
            wal_start,
            wal_end,
            system_clock,
            payload,
        }
    }

    /// Wrap for the wire inside a CopyData frame.
    pub fn wrapped(&self) -> Result<CopyData, Error> {
        Ok(CopyData::new(&self.to_bytes()?))
    }
}

impl ToBytes for XLogData {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::with_capacity(self.payload.len() + 25);
        payload.put_u8(b'w');
        payload.put_i64(self.wal_start);
        payload.put_i64(self.wal_end);
        payload.put_i64(self.system_clock);
        payload.put_slice(&self.payload);

        Ok(payload.freeze())
    }
}

impl FromBytes for XLogData {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'w');
        Ok(Self {
            wal_start: bytes.get_i64(),
            wal_end: bytes.get_i64(),
            system_clock: bytes.get_i64(),
            payload: bytes,
        })
    }
}
