//! Query rewrite & interception.
//!
//! A fixed, ordered list of text substitutions applied to the SQL carried
//! by Query and Parse messages. The embedded engine doesn't know it's
//! supposed to be a replication-capable PostgreSQL 16.4; these rules keep
//! up the act. The substitutions are textual on purpose: they mirror the
//! exact queries the consumer issues, and tokenizing would change behavior
//! nobody has asked for.

use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;

/// What `SELECT version()` reports.
pub const VERSION_STRING: &str =
    "PostgreSQL 16.4 on x86_64-pc-linux-gnu, compiled by gcc (GCC) 12.2.0, 64-bit";

struct Rule {
    pattern: Regex,
    replacement: String,
}

fn rule(pattern: &str, replacement: impl ToString) -> Rule {
    Rule {
        pattern: Regex::new(pattern).expect("rewrite pattern"),
        replacement: replacement.to_string(),
    }
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(r"(?i)\bversion\(\)", format!("'{}'", VERSION_STRING)),
        rule(
            r"(?i)current_setting\('wal_level'\)",
            "'logical'::text",
        ),
        rule(r"(?i)\s+READ\s+ONLY\b", ""),
        rule(
            r"(?i)\s+ISOLATION\s+LEVEL\s+(SERIALIZABLE|REPEATABLE\s+READ|READ\s+COMMITTED|READ\s+UNCOMMITTED)\b",
            "",
        ),
        // After the rules above stripped its clauses.
        rule(r"(?i)\bSET\s+TRANSACTION\s*;", ";"),
        rule(r"(?i)\bpg_replication_slots\b", "orez._zero_replication_slots"),
    ]
});

static NOOP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*SET\s+(TRANSACTION|SESSION)\b").expect("noop pattern"));

/// Apply the substitution table in order.
pub fn rewrite(sql: &str) -> String {
    let mut sql = sql.to_string();

    for rule in RULES.iter() {
        sql = rule
            .pattern
            .replace_all(&sql, rule.replacement.as_str())
            .into_owned();
    }

    sql
}

/// Queries answered locally without touching the engine.
pub fn is_noop(sql: &str) -> bool {
    NOOP.is_match(sql)
}

/// Strip a trailing ReadyForQuery off an engine response. The extended
/// protocol delivers ReadyForQuery only in response to Sync, but the
/// engine's session appends one to everything.
pub fn strip_ready_for_query(response: Bytes) -> Bytes {
    const RFQ_LEN: usize = 6;

    if response.len() < RFQ_LEN {
        return response;
    }

    let tail = response.len() - RFQ_LEN;
    let frame = &response[tail..];
    let len = i32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);

    if frame[0] == b'Z' && len == 5 {
        response.slice(..tail)
    } else {
        response
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::net::messages::{ReadyForQuery, ToBytes};
    use bytes::BytesMut;

    #[test]
    fn version_becomes_literal() {
        let rewritten = rewrite("SELECT version()");
        assert_eq!(
            rewritten,
            "SELECT 'PostgreSQL 16.4 on x86_64-pc-linux-gnu, compiled by gcc (GCC) 12.2.0, 64-bit'"
        );
    }

    #[test]
    fn wal_level_reports_logical() {
        assert_eq!(
            rewrite("SELECT current_setting('wal_level')"),
            "SELECT 'logical'::text"
        );
    }

    #[test]
    fn transaction_modifiers_strip_to_bare_set() {
        assert_eq!(
            rewrite("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE READ ONLY;"),
            ";"
        );
        assert_eq!(
            rewrite("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ;"),
            ";"
        );
        assert_eq!(rewrite("BEGIN READ ONLY"), "BEGIN");
    }

    #[test]
    fn replication_slots_redirect() {
        assert_eq!(
            rewrite("SELECT slot_name FROM pg_replication_slots WHERE active"),
            "SELECT slot_name FROM orez._zero_replication_slots WHERE active"
        );
    }

    #[test]
    fn unrelated_sql_unchanged() {
        let sql = "INSERT INTO public.foo(id, value) VALUES ('row1','hello')";
        assert_eq!(rewrite(sql), sql);
    }

    #[test]
    fn noop_detection() {
        assert!(is_noop("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"));
        assert!(is_noop("  set session characteristics as transaction read only"));
        assert!(!is_noop("SET search_path TO public"));
        assert!(!is_noop("SELECT 1"));
    }

    #[test]
    fn trailing_rfq_stripped() {
        let mut response = BytesMut::new();
        response.extend_from_slice(b"1\x00\x00\x00\x04"); // ParseComplete
        response.extend_from_slice(&ReadyForQuery::idle().to_bytes().unwrap());

        let stripped = strip_ready_for_query(response.freeze());
        assert_eq!(&stripped[..], b"1\x00\x00\x00\x04");
    }

    #[test]
    fn response_without_rfq_untouched() {
        let response = Bytes::from_static(b"1\x00\x00\x00\x04");
        assert_eq!(strip_ready_for_query(response.clone()), response);
    }
}
