//! Replication subprotocol messages, carried inside CopyData frames.

pub mod keep_alive;
pub mod logical;
pub mod status_update;
pub mod xlog_data;

pub use keep_alive::KeepAlive;
pub use logical::begin::Begin;
pub use logical::commit::Commit;
pub use logical::delete::Delete;
pub use logical::insert::Insert;
pub use logical::relation::{Column, Relation};
pub use logical::tuple_data::TupleData;
pub use logical::update::Update;
pub use status_update::StatusUpdate;
pub use xlog_data::XLogData;

use super::prelude::*;

/// Microseconds between the Unix epoch and the Postgres epoch (2000-01-01).
pub const PG_EPOCH_MICROS: i64 = 946_684_800_000_000;

/// Replication payloads that are not XLogData.
#[derive(Debug, Clone)]
pub enum ReplicationMeta {
    KeepAlive(KeepAlive),
    StatusUpdate(StatusUpdate),
}

impl FromBytes for ReplicationMeta {
    fn from_bytes(bytes: Bytes) -> Result<Self, Error> {
        Ok(match bytes[0] as char {
            'k' => Self::KeepAlive(KeepAlive::from_bytes(bytes)?),
            'r' => Self::StatusUpdate(StatusUpdate::from_bytes(bytes)?),
            c => return Err(Error::UnexpectedReplicationMessage(c)),
        })
    }
}

impl ToBytes for ReplicationMeta {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        match self {
            Self::KeepAlive(ka) => ka.to_bytes(),
            Self::StatusUpdate(status) => status.to_bytes(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn meta_dispatch() {
        let ka = KeepAlive {
            wal_end: 1,
            system_clock: 2,
            reply: 0,
        };
        let decoded = ReplicationMeta::from_bytes(ka.to_bytes().unwrap()).unwrap();
        assert!(matches!(decoded, ReplicationMeta::KeepAlive(_)));

        let status = StatusUpdate {
            last_written: 1,
            last_flushed: 2,
            last_applied: 3,
            system_clock: 4,
            reply: 0,
        };
        let decoded = ReplicationMeta::from_bytes(status.to_bytes().unwrap()).unwrap();
        assert!(matches!(decoded, ReplicationMeta::StatusUpdate(_)));
    }
}
