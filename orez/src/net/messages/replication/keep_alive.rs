//! Primary keepalive message (B).

use crate::net::messages::CopyData;

use super::super::prelude::*;
use super::ReplicationMeta;

/// Keepalive sent between transactions so the standby knows we're alive.
#[derive(Debug, Clone)]
pub struct KeepAlive {
    pub wal_end: i64,
    pub system_clock: i64,
    pub reply: u8,
}

impl KeepAlive {
    pub fn new(wal_end: i64, system_clock: i64) -> Self {
        Self {
            wal_end,
            system_clock,
            reply: 0,
        }
    }

    /// Wrap for the wire. Keepalives ride in CopyData directly,
    /// without an XLogData envelope.
    pub fn wrapped(self) -> Result<CopyData, Error> {
        Ok(CopyData::new(&ReplicationMeta::KeepAlive(self).to_bytes()?))
    }

    /// Origin expects a reply.
    pub fn reply(&self) -> bool {
        self.reply == 1
    }
}

impl FromBytes for KeepAlive {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'k');
        Ok(Self {
            wal_end: bytes.get_i64(),
            system_clock: bytes.get_i64(),
            reply: bytes.get_u8(),
        })
    }
}

impl ToBytes for KeepAlive {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        payload.put_u8(b'k');
        payload.put_i64(self.wal_end);
        payload.put_i64(self.system_clock);
        payload.put_u8(self.reply);

        Ok(payload.freeze())
    }
}
