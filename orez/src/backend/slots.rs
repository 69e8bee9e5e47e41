//! Replication-slot rows.
//!
//! Slots live in `orez._zero_replication_slots`, which doubles as the
//! backing store for the faked `pg_replication_slots` view the rewrite
//! layer redirects to.

use super::changelog::SCHEMA;
use super::engine::EngineError;
use super::instance::Instance;

/// Upsert a slot at the given LSN.
pub async fn persist(db: &Instance, slot_name: &str, lsn: &str) -> Result<(), EngineError> {
    db.query(
        &format!(
            "INSERT INTO {schema}._zero_replication_slots \
                 (slot_name, plugin, slot_type, active, restart_lsn, confirmed_flush_lsn, wal_status) \
             VALUES ($1, 'pgoutput', 'logical', false, $2, $2, 'reserved') \
             ON CONFLICT (slot_name) DO UPDATE SET \
                 restart_lsn = excluded.restart_lsn, \
                 confirmed_flush_lsn = excluded.confirmed_flush_lsn",
            schema = SCHEMA
        ),
        &[slot_name, lsn],
    )
    .await?;

    Ok(())
}

/// Drop a slot. Unknown names are a no-op, matching DROP_REPLICATION_SLOT
/// on a clean restart.
pub async fn remove(db: &Instance, slot_name: &str) -> Result<(), EngineError> {
    db.query(
        &format!(
            "DELETE FROM {}._zero_replication_slots WHERE slot_name = $1",
            SCHEMA
        ),
        &[slot_name],
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::super::instance::test_support::RecordingEngine;
    use super::*;

    #[tokio::test]
    async fn persist_upserts() {
        let engine = RecordingEngine::default();
        let instance = engine.instance();

        persist(&instance, "s", "1/0").await.unwrap();

        let queries = engine.queries();
        assert_eq!(queries.len(), 1);
        assert!(queries[0].contains("ON CONFLICT (slot_name) DO UPDATE"));
        assert!(queries[0].contains("orez._zero_replication_slots"));
    }

    #[tokio::test]
    async fn remove_deletes() {
        let engine = RecordingEngine::default();
        let instance = engine.instance();

        remove(&instance, "s").await.unwrap();

        let queries = engine.queries();
        assert!(queries[0].starts_with("DELETE FROM orez._zero_replication_slots"));
    }
}
