//! Change log: durable, watermark-ordered capture of row mutations.
//!
//! Row-level AFTER triggers on published tables write one row per change
//! into `orez._zero_changes`, with before/after images rendered by the
//! engine's own `to_jsonb`. Ordering comes from a shared sequence advanced
//! atomically with each insert.

use serde_json::Value;
use thiserror::Error;

use super::engine::{EngineError, Row};
use super::instance::Instance;

/// Internal schema holding the change log and replication-slot table.
pub const SCHEMA: &str = "orez";

/// Tables with this prefix are never published or triggered.
pub const INTERNAL_PREFIX: &str = "_zero_";

/// The migration tracking table is infrastructure, not data.
const MIGRATIONS_TABLE: &str = "migrations";

const TRIGGER_NAME: &str = "_zero_capture_trigger";

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed change record: {0}")]
    Malformed(String),
}

/// Row mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Insert,
    Update,
    Delete,
}

impl Op {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "INSERT" => Some(Op::Insert),
            "UPDATE" => Some(Op::Update),
            "DELETE" => Some(Op::Delete),
            _ => None,
        }
    }
}

/// One row read back from the change log.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub id: i64,
    pub watermark: i64,
    pub table_name: String,
    pub op: Op,
    pub row_data: Option<serde_json::Map<String, Value>>,
    pub old_data: Option<serde_json::Map<String, Value>>,
    pub changed_at: String,
}

impl ChangeRecord {
    fn from_row(row: &Row) -> Result<Self, Error> {
        let text = |key: &str| -> Result<String, Error> {
            match row.get(key) {
                Some(Value::String(value)) => Ok(value.clone()),
                _ => Err(Error::Malformed(format!("missing column {}", key))),
            }
        };
        let json = |key: &str| -> Result<Option<serde_json::Map<String, Value>>, Error> {
            match row.get(key) {
                Some(Value::String(value)) => {
                    let parsed: Value = serde_json::from_str(value)?;
                    match parsed {
                        Value::Object(map) => Ok(Some(map)),
                        _ => Err(Error::Malformed(format!("{} is not an object", key))),
                    }
                }
                _ => Ok(None),
            }
        };

        let op = text("op")?;

        Ok(Self {
            id: text("id")?
                .parse()
                .map_err(|_| Error::Malformed("id".into()))?,
            watermark: text("watermark")?
                .parse()
                .map_err(|_| Error::Malformed("watermark".into()))?,
            table_name: text("table_name")?,
            op: Op::parse(&op).ok_or_else(|| Error::Malformed(format!("op {}", op)))?,
            row_data: json("row_data")?,
            old_data: json("old_data")?,
            changed_at: text("changed_at")?,
        })
    }

    /// Split `schema.name`. The capture trigger always qualifies, but be
    /// lenient if a bare name ever shows up.
    pub fn schema_table(&self) -> (&str, &str) {
        match self.table_name.split_once('.') {
            Some((schema, table)) => (schema, table),
            None => ("public", self.table_name.as_str()),
        }
    }
}

/// Install the internal schema, tables, sequence and trigger function, then
/// synchronize row triggers with the publication membership. Idempotent;
/// rerun on every schema-affecting event.
pub async fn install(db: &Instance, publications: &[String]) -> Result<(), Error> {
    db.exec(&schema_ddl()).await?;
    sync_triggers(db, publications).await
}

fn schema_ddl() -> String {
    format!(
        r#"
CREATE SCHEMA IF NOT EXISTS {schema};

CREATE SEQUENCE IF NOT EXISTS {schema}._zero_watermark_seq;

CREATE TABLE IF NOT EXISTS {schema}._zero_changes (
    id bigint GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    watermark bigint NOT NULL DEFAULT nextval('{schema}._zero_watermark_seq'),
    table_name text NOT NULL,
    op text NOT NULL CHECK (op IN ('INSERT', 'UPDATE', 'DELETE')),
    row_data jsonb,
    old_data jsonb,
    changed_at timestamptz NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS _zero_changes_watermark_idx
    ON {schema}._zero_changes (watermark);

CREATE TABLE IF NOT EXISTS {schema}._zero_replication_slots (
    slot_name text PRIMARY KEY,
    plugin text NOT NULL DEFAULT 'pgoutput',
    slot_type text NOT NULL DEFAULT 'logical',
    active boolean NOT NULL DEFAULT false,
    active_pid integer,
    restart_lsn text,
    confirmed_flush_lsn text,
    wal_status text NOT NULL DEFAULT 'reserved',
    created_at timestamptz NOT NULL DEFAULT now()
);

CREATE OR REPLACE FUNCTION {schema}._zero_capture() RETURNS trigger AS $$
BEGIN
    IF TG_OP = 'INSERT' THEN
        INSERT INTO {schema}._zero_changes (table_name, op, row_data)
        VALUES (TG_TABLE_SCHEMA || '.' || TG_TABLE_NAME, 'INSERT', to_jsonb(NEW));
        RETURN NEW;
    ELSIF TG_OP = 'UPDATE' THEN
        INSERT INTO {schema}._zero_changes (table_name, op, row_data, old_data)
        VALUES (TG_TABLE_SCHEMA || '.' || TG_TABLE_NAME, 'UPDATE', to_jsonb(NEW), to_jsonb(OLD));
        RETURN NEW;
    ELSE
        INSERT INTO {schema}._zero_changes (table_name, op, old_data)
        VALUES (TG_TABLE_SCHEMA || '.' || TG_TABLE_NAME, 'DELETE', to_jsonb(OLD));
        RETURN OLD;
    END IF;
END;
$$ LANGUAGE plpgsql;
"#,
        schema = SCHEMA
    )
}

/// Tables that must never carry the capture trigger.
fn excluded(table: &str) -> bool {
    table == MIGRATIONS_TABLE || table.starts_with(INTERNAL_PREFIX)
}

async fn sync_triggers(db: &Instance, publications: &[String]) -> Result<(), Error> {
    let desired = published_tables(db, publications).await?;

    if desired.is_empty() {
        tracing::debug!("no published tables, change capture idle");
    }

    let rows = db
        .query(
            "SELECT DISTINCT event_object_schema::text AS \"schema\", \
                    event_object_table::text AS \"table\" \
             FROM information_schema.triggers WHERE trigger_name = $1",
            &[TRIGGER_NAME],
        )
        .await?;

    let mut existing = vec![];
    for row in &rows {
        if let (Some(Value::String(schema)), Some(Value::String(table))) =
            (row.get("schema"), row.get("table"))
        {
            existing.push((schema.clone(), table.clone()));
        }
    }

    for (schema, table) in &desired {
        if !existing.contains(&(schema.clone(), table.clone())) {
            db.exec(&format!(
                r#"CREATE TRIGGER {trigger} AFTER INSERT OR UPDATE OR DELETE
                   ON "{schema}"."{table}" FOR EACH ROW
                   EXECUTE FUNCTION {internal}._zero_capture()"#,
                trigger = TRIGGER_NAME,
                schema = schema,
                table = table,
                internal = SCHEMA,
            ))
            .await?;
        }
    }

    for (schema, table) in &existing {
        if !desired.contains(&(schema.clone(), table.clone())) {
            db.exec(&format!(
                r#"DROP TRIGGER IF EXISTS {trigger} ON "{schema}"."{table}""#,
                trigger = TRIGGER_NAME,
                schema = schema,
                table = table,
            ))
            .await?;
        }
    }

    Ok(())
}

/// Current membership of the given publications, exclusions applied.
/// A missing publication contributes nothing; that's not an error.
async fn published_tables(
    db: &Instance,
    publications: &[String],
) -> Result<Vec<(String, String)>, Error> {
    let mut tables = vec![];

    for publication in publications {
        let rows = db
            .query(
                "SELECT schemaname::text, tablename::text \
                 FROM pg_publication_tables WHERE pubname = $1",
                &[publication],
            )
            .await?;

        for row in &rows {
            if let (Some(Value::String(schema)), Some(Value::String(table))) =
                (row.get("schemaname"), row.get("tablename"))
            {
                if excluded(table) {
                    continue;
                }
                let entry = (schema.clone(), table.clone());
                if !tables.contains(&entry) {
                    tables.push(entry);
                }
            }
        }
    }

    Ok(tables)
}

/// At most `limit` changes with `watermark > since`, oldest first.
pub async fn changes_since(
    db: &Instance,
    since: i64,
    limit: i64,
) -> Result<Vec<ChangeRecord>, Error> {
    let since = since.to_string();
    let limit = limit.to_string();

    let rows = db
        .query(
            &format!(
                "SELECT id::text, watermark::text, table_name, op, \
                        row_data::text, old_data::text, changed_at::text \
                 FROM {}._zero_changes \
                 WHERE watermark > $1::bigint \
                 ORDER BY watermark ASC LIMIT $2::bigint",
                SCHEMA
            ),
            &[since.as_str(), limit.as_str()],
        )
        .await?;

    rows.iter().map(ChangeRecord::from_row).collect()
}

/// Last assigned watermark, 0 before the first capture.
pub async fn current_watermark(db: &Instance) -> Result<i64, Error> {
    let rows = db
        .query(
            &format!(
                "SELECT last_value::text, is_called::text FROM {}._zero_watermark_seq",
                SCHEMA
            ),
            &[],
        )
        .await?;

    let row = rows
        .first()
        .ok_or_else(|| Error::Malformed("empty sequence state".into()))?;

    let called = matches!(row.get("is_called"), Some(Value::String(value)) if value == "true");
    if !called {
        return Ok(0);
    }

    match row.get("last_value") {
        Some(Value::String(value)) => value
            .parse()
            .map_err(|_| Error::Malformed("last_value".into())),
        _ => Err(Error::Malformed("last_value".into())),
    }
}

/// Delete changes with `watermark <= up_to`, returning how many went away.
/// Only purge watermarks the consumer has already seen.
pub async fn purge_up_to(db: &Instance, up_to: i64) -> Result<i64, Error> {
    let up_to = up_to.to_string();

    let rows = db
        .query(
            &format!(
                "WITH deleted AS ( \
                     DELETE FROM {}._zero_changes WHERE watermark <= $1::bigint RETURNING 1 \
                 ) SELECT count(*)::text AS count FROM deleted",
                SCHEMA
            ),
            &[up_to.as_str()],
        )
        .await?;

    match rows.first().and_then(|row| row.get("count")) {
        Some(Value::String(count)) => {
            count.parse().map_err(|_| Error::Malformed("count".into()))
        }
        _ => Ok(0),
    }
}

/// Empty the change log and slot table and restart the watermark sequence.
/// Part of a full reset only.
pub async fn truncate(db: &Instance) -> Result<(), Error> {
    db.exec(&format!(
        "TRUNCATE {schema}._zero_changes; \
         TRUNCATE {schema}._zero_replication_slots; \
         ALTER SEQUENCE {schema}._zero_watermark_seq RESTART WITH 1;",
        schema = SCHEMA
    ))
    .await?;
    Ok(())
}
