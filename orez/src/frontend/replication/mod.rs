//! Replication handler: the command subset of the walsender grammar, plus
//! the streaming loop in [`stream`].

pub mod lsn;
pub mod stream;

use tracing::debug;

use crate::backend::instance::Instance;
use crate::backend::slots;
use crate::net::messages::{
    CommandComplete, DataRow, Field, Message, Protocol, ReadyForQuery, RowDescription,
};

use super::Error;

/// Fixed system identity reported by IDENTIFY_SYSTEM.
const SYSTEM_ID: &str = "1234567890";
const TIMELINE: &str = "1";
/// Snapshot name reported by CREATE_REPLICATION_SLOT. The engine has no
/// exportable snapshots; the consumer only echoes this back.
const SNAPSHOT_NAME: &str = "00000003-00000001-1";

/// Try to answer a replication-mode command locally. `None` means the
/// caller should fall through to rewrite + engine.
pub async fn handle_command(sql: &str, db: &Instance) -> Result<Option<Vec<Message>>, Error> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let upper = trimmed.to_uppercase();

    if upper == "IDENTIFY_SYSTEM" {
        let xlogpos = lsn::current().to_string();
        return Ok(Some(single_row(
            &["systemid", "timeline", "xlogpos", "dbname"],
            &[SYSTEM_ID, TIMELINE, &xlogpos, "postgres"],
            "IDENTIFY_SYSTEM",
        )?));
    }

    if upper.starts_with("CREATE_REPLICATION_SLOT") {
        let name = slot_name(trimmed);
        let consistent_point = lsn::advance().to_string();
        slots::persist(db, &name, &consistent_point).await?;
        debug!("created replication slot {}", name);

        return Ok(Some(single_row(
            &[
                "slot_name",
                "consistent_point",
                "snapshot_name",
                "output_plugin",
            ],
            &[&name, &consistent_point, SNAPSHOT_NAME, "pgoutput"],
            "CREATE_REPLICATION_SLOT",
        )?));
    }

    if upper.starts_with("DROP_REPLICATION_SLOT") {
        let name = slot_name(trimmed);
        slots::remove(db, &name).await?;
        debug!("dropped replication slot {}", name);

        return Ok(Some(vec![
            CommandComplete::new("DROP_REPLICATION_SLOT").message()?,
            ReadyForQuery::idle().message()?,
        ]));
    }

    if upper.starts_with("ALTER ROLE") && upper.contains("REPLICATION") {
        return Ok(Some(vec![
            CommandComplete::new("ALTER ROLE").message()?,
            ReadyForQuery::idle().message()?,
        ]));
    }

    if upper.contains("WAL_LEVEL") && upper.contains("CURRENT_SETTING") {
        return Ok(Some(single_row(
            &["wal_level", "version"],
            &["logical", "160004"],
            "SELECT 1",
        )?));
    }

    Ok(None)
}

/// The quoted slot name, or the bare second token.
fn slot_name(command: &str) -> String {
    if let (Some(start), Some(end)) = (command.find('"'), command.rfind('"')) {
        if end > start {
            return command[start + 1..end]
                .split('"')
                .next()
                .unwrap_or_default()
                .to_string();
        }
    }

    command
        .split_whitespace()
        .nth(1)
        .unwrap_or_default()
        .trim_matches('"')
        .to_string()
}

fn single_row(
    fields: &[&str],
    values: &[&str],
    tag: &str,
) -> Result<Vec<Message>, crate::net::Error> {
    let description =
        RowDescription::new(&fields.iter().map(Field::text).collect::<Vec<_>>());

    Ok(vec![
        description.message()?,
        DataRow::from_columns(values).message()?,
        CommandComplete::new(tag).message()?,
        ReadyForQuery::idle().message()?,
    ])
}
