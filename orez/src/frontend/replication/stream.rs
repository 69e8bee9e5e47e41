//! The streaming half of START_REPLICATION.
//!
//! Tails the change log and ships it as pgoutput transactions inside
//! CopyData frames, with a keepalive every iteration. Wakes early when the
//! proxy reports a write; otherwise polls on a timer. Runs until the
//! connection goes away.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::select;
use tokio::time::sleep;
use tracing::debug;

use crate::backend::changelog::{self, ChangeRecord, Op};
use crate::backend::instance::Instance;
use crate::net::messages::replication::logical::encoder;
use crate::net::messages::replication::{Begin, Commit, Delete, Insert, KeepAlive, Update, XLogData};
use crate::net::messages::{CopyBothResponse, CopyData, ToBytes};
use crate::net::Stream;

use super::super::comms::comms;
use super::super::Error;
use super::lsn;

const BATCH_LIMIT: i64 = 100;
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Stream the change log to a standby until the socket closes.
pub async fn run(stream: &mut Stream, db: Arc<Instance>, connection_id: u64) -> Result<(), Error> {
    stream.send_flush(&CopyBothResponse).await?;
    debug!("[{}] replication stream started", connection_id);

    let comms = comms();
    let mut last_watermark = 0i64;
    let mut relations = HashSet::new();
    let mut xid = 0i32;

    loop {
        let batch = match changelog::changes_since(&db, last_watermark, BATCH_LIMIT).await {
            Ok(batch) => batch,
            Err(err) => {
                if quiet(&err.to_string()) {
                    return Ok(());
                }
                debug!("[{}] change poll: {}", connection_id, err);
                sleep(RETRY_BACKOFF).await;
                continue;
            }
        };

        if !batch.is_empty() {
            xid = xid.wrapping_add(1);
            let now = Utc::now().timestamp_micros();
            let (frames, high) = encode_batch(&batch, &mut relations, xid, now)?;

            let mut failed = false;
            for frame in &frames {
                if let Err(err) = stream.send(frame).await {
                    if quiet(&err.to_string()) || err.disconnect() {
                        return Ok(());
                    }
                    debug!("[{}] stream write: {}", connection_id, err);
                    failed = true;
                    break;
                }
            }
            if failed {
                sleep(RETRY_BACKOFF).await;
                continue;
            }

            last_watermark = high;
        }

        let keepalive =
            KeepAlive::new(lsn::current().0, Utc::now().timestamp_micros()).wrapped()?;
        if let Err(err) = stream.send_flush(&keepalive).await {
            if quiet(&err.to_string()) || err.disconnect() {
                return Ok(());
            }
            debug!("[{}] keepalive: {}", connection_id, err);
            sleep(RETRY_BACKOFF).await;
            continue;
        }

        // Sleep out the poll interval; wake early on a reported write or on
        // client traffic. Standby status updates are drained and discarded.
        select! {
            _ = sleep(POLL_INTERVAL) => {}
            _ = comms.on_change() => {}
            message = stream.read() => {
                match message {
                    Ok(message) if message.code() == 'X' => return Ok(()),
                    Ok(_) => {}
                    Err(err) if err.disconnect() => return Ok(()),
                    Err(err) => {
                        debug!("[{}] stream read: {}", connection_id, err);
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn quiet(message: &str) -> bool {
    message.contains("closed") || message.contains("destroyed")
}

/// Encode one batch as a synthetic transaction: Begin, a Relation the first
/// time a table shows up on this connection, the row changes, Commit.
/// Returns the frames and the highest watermark in the batch.
pub(crate) fn encode_batch(
    batch: &[ChangeRecord],
    relations: &mut HashSet<String>,
    xid: i32,
    now: i64,
) -> Result<(Vec<CopyData>, i64), Error> {
    let begin_lsn = lsn::advance();
    let end_lsn = lsn::advance();

    let mut frames = vec![];
    let wrap = |payload: bytes::Bytes| -> Result<CopyData, Error> {
        Ok(XLogData::wrap(begin_lsn.0, begin_lsn.0, now, payload).wrapped()?)
    };

    frames.push(wrap(Begin::new(end_lsn.0, now, xid).to_bytes()?)?);

    let mut high = 0i64;
    for change in batch {
        high = change.watermark;
        let (schema, table) = change.schema_table();
        let image = change.row_data.as_ref().or(change.old_data.as_ref());

        let Some(image) = image else {
            debug!("change {} has no row image, skipped", change.id);
            continue;
        };

        if !relations.contains(&change.table_name) {
            let relation = encoder::relation(schema, table, image);
            frames.push(wrap(relation.to_bytes()?)?);
            relations.insert(change.table_name.clone());
        }

        let oid = encoder::table_oid(&change.table_name);
        let payload = match change.op {
            Op::Insert => Insert::new(oid, encoder::tuple(image)).to_bytes()?,
            Op::Update => Update::new(
                oid,
                change.old_data.as_ref().map(encoder::tuple),
                change
                    .row_data
                    .as_ref()
                    .map(encoder::tuple)
                    .unwrap_or_default(),
            )
            .to_bytes()?,
            Op::Delete => Delete::new(oid, encoder::tuple(image)).to_bytes()?,
        };
        frames.push(wrap(payload)?);
    }

    frames.push(wrap(
        Commit::new(begin_lsn.0, end_lsn.0, now).to_bytes()?,
    )?);

    Ok((frames, high))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::net::messages::FromBytes;

    fn change(watermark: i64, table: &str, op: Op, new: Option<&str>, old: Option<&str>) -> ChangeRecord {
        let parse = |data: Option<&str>| {
            data.map(|data| {
                serde_json::from_str::<serde_json::Value>(data)
                    .unwrap()
                    .as_object()
                    .unwrap()
                    .clone()
            })
        };

        ChangeRecord {
            id: watermark,
            watermark,
            table_name: table.to_string(),
            op,
            row_data: parse(new),
            old_data: parse(old),
            changed_at: "2026-01-01 00:00:00+00".into(),
        }
    }

    fn payloads(frames: &[CopyData]) -> Vec<bytes::Bytes> {
        frames
            .iter()
            .map(|frame| {
                XLogData::from_bytes(frame.data()).unwrap().payload
            })
            .collect()
    }

    #[test]
    fn batch_frames_one_transaction() {
        let mut relations = HashSet::new();
        let batch = vec![
            change(1, "public.foo", Op::Insert, Some(r#"{"id":"row1","value":"hello"}"#), None),
            change(2, "public.foo", Op::Update, Some(r#"{"id":"x","value":"2"}"#), Some(r#"{"id":"x","value":"1"}"#)),
        ];

        let (frames, high) = encode_batch(&batch, &mut relations, 1, 1_700_000_000_000_000).unwrap();
        assert_eq!(high, 2);

        let payloads = payloads(&frames);
        let codes: Vec<char> = payloads.iter().map(|p| p[0] as char).collect();
        // Begin, Relation (once), Insert, Update, Commit.
        assert_eq!(codes, vec!['B', 'R', 'I', 'U', 'C']);

        let begin = Begin::from_bytes(payloads[0].clone()).unwrap();
        let commit = Commit::from_bytes(payloads.last().unwrap().clone()).unwrap();
        assert!(commit.commit_lsn < commit.end_lsn);
        assert_eq!(begin.final_lsn, commit.end_lsn);
        assert_eq!(begin.xid, 1);

        let update = Update::from_bytes(payloads[3].clone()).unwrap();
        let old = update.old.unwrap();
        assert_eq!(old.column(1).unwrap().as_str(), Some("1"));
        assert_eq!(update.new.column(1).unwrap().as_str(), Some("2"));
    }

    #[test]
    fn relation_not_repeated_across_batches() {
        let mut relations = HashSet::new();

        let first = vec![change(1, "public.foo", Op::Insert, Some(r#"{"id":"a"}"#), None)];
        let (frames, _) = encode_batch(&first, &mut relations, 1, 0).unwrap();
        let codes: Vec<char> = payloads(&frames).iter().map(|p| p[0] as char).collect();
        assert_eq!(codes, vec!['B', 'R', 'I', 'C']);

        let second = vec![change(2, "public.foo", Op::Delete, None, Some(r#"{"id":"a"}"#))];
        let (frames, _) = encode_batch(&second, &mut relations, 2, 0).unwrap();
        let codes: Vec<char> = payloads(&frames).iter().map(|p| p[0] as char).collect();
        assert_eq!(codes, vec!['B', 'D', 'C']);
    }

    #[test]
    fn commit_lsns_increase_between_batches() {
        let mut relations = HashSet::new();
        let batch = vec![change(1, "public.foo", Op::Insert, Some(r#"{"id":"a"}"#), None)];

        let (first, _) = encode_batch(&batch, &mut relations, 1, 0).unwrap();
        let (second, _) = encode_batch(&batch, &mut relations, 2, 0).unwrap();

        let first_commit =
            Commit::from_bytes(payloads(&first).last().unwrap().clone()).unwrap();
        let second_commit =
            Commit::from_bytes(payloads(&second).last().unwrap().clone()).unwrap();

        assert!(second_commit.end_lsn > first_commit.end_lsn);
    }

    #[test]
    fn delete_carries_key_tuple() {
        let mut relations = HashSet::new();
        let batch = vec![change(7, "public.foo", Op::Delete, None, Some(r#"{"id":"y","value":"7"}"#))];

        let (frames, high) = encode_batch(&batch, &mut relations, 1, 0).unwrap();
        assert_eq!(high, 7);

        let payloads = payloads(&frames);
        let delete = Delete::from_bytes(payloads[2].clone()).unwrap();
        assert_eq!(delete.key.column(0).unwrap().as_str(), Some("y"));
    }

    #[test]
    fn empty_images_are_skipped() {
        let mut relations = HashSet::new();
        let batch = vec![change(3, "public.foo", Op::Insert, None, None)];

        let (frames, high) = encode_batch(&batch, &mut relations, 1, 0).unwrap();
        assert_eq!(high, 3);

        let codes: Vec<char> = payloads(&frames).iter().map(|p| p[0] as char).collect();
        assert_eq!(codes, vec!['B', 'C']);
    }
}
