//! Column inference and table OID assignment for synthesized relations.
//!
//! The stream is built from JSON row images, so there is no catalog to
//! introspect. Columns come from the keys of the row map in iteration
//! order; everything is reported as text except booleans. Table OIDs are
//! handed out lazily and stay stable for the life of the process.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use super::relation::{Column as RelationColumn, Relation};
use super::tuple_data::{Column, TupleData};

const FIRST_TABLE_OID: i32 = 16384;
const TEXT_OID: i32 = 25;
const BOOL_OID: i32 = 16;

struct OidRegistry {
    next: i32,
    oids: HashMap<String, i32>,
}

static TABLE_OIDS: Lazy<Mutex<OidRegistry>> = Lazy::new(|| {
    Mutex::new(OidRegistry {
        next: FIRST_TABLE_OID,
        oids: HashMap::new(),
    })
});

/// OID for a schema-qualified table name.
pub fn table_oid(qualified_name: &str) -> i32 {
    let mut registry = TABLE_OIDS.lock();

    if let Some(oid) = registry.oids.get(qualified_name) {
        return *oid;
    }

    let oid = registry.next;
    registry.next += 1;
    registry.oids.insert(qualified_name.to_string(), oid);
    oid
}

/// Serialize a row image into tuple data.
pub fn tuple(row: &Map<String, Value>) -> TupleData {
    TupleData::new(row.values().map(column_value).collect())
}

fn column_value(value: &Value) -> Column {
    match value {
        Value::Null => Column::Null,
        Value::Bool(true) => Column::Text("t".into()),
        Value::Bool(false) => Column::Text("f".into()),
        Value::String(value) => Column::Text(value.clone()),
        Value::Number(value) => Column::Text(value.to_string()),
        // Objects and arrays go out as their JSON text.
        other => Column::Text(other.to_string()),
    }
}

/// Relation message for a table, columns inferred from a row image.
pub fn relation(schema: &str, name: &str, row: &Map<String, Value>) -> Relation {
    let columns = row
        .iter()
        .map(|(key, value)| RelationColumn {
            flag: 0,
            name: key.clone(),
            oid: match value {
                Value::Bool(_) => BOOL_OID,
                _ => TEXT_OID,
            },
            type_modifier: -1,
        })
        .collect();

    Relation::new(
        table_oid(&format!("{}.{}", schema, name)),
        schema,
        name,
        columns,
    )
}
