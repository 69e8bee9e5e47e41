//! Standby status update (F).

use super::super::prelude::*;

/// Sent by the standby to report progress. We drain these and move on;
/// the change log is purged by explicit consumer calls, not by LSN feedback.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub last_written: i64,
    pub last_flushed: i64,
    pub last_applied: i64,
    pub system_clock: i64,
    pub reply: u8,
}

impl FromBytes for StatusUpdate {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'r');
        Ok(Self {
            last_written: bytes.get_i64(),
            last_flushed: bytes.get_i64(),
            last_applied: bytes.get_i64(),
            system_clock: bytes.get_i64(),
            reply: bytes.get_u8(),
        })
    }
}

impl ToBytes for StatusUpdate {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        payload.put_u8(b'r');
        payload.put_i64(self.last_written);
        payload.put_i64(self.last_flushed);
        payload.put_i64(self.last_applied);
        payload.put_i64(self.system_clock);
        payload.put_u8(self.reply);

        Ok(payload.freeze())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip() {
        let status = StatusUpdate {
            last_written: 10,
            last_flushed: 20,
            last_applied: 30,
            system_clock: 40,
            reply: 1,
        };

        let decoded = StatusUpdate::from_bytes(status.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.last_written, 10);
        assert_eq!(decoded.last_applied, 30);
        assert_eq!(decoded.reply, 1);
    }
}
