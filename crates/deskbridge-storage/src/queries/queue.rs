// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable stream operations with explicit acknowledgement.
//!
//! A row is deliverable when it is `pending` and its `available_at` has
//! passed, or when it is `processing` and its ack-wait lock has lapsed (the
//! previous holder crashed or stalled). Every claim increments `deliveries`.

use std::time::Duration;

use chrono::Utc;
use deskbridge_core::DeskbridgeError;
use deskbridge_core::types::{DeadLetterRecord, QueueEnvelope, Stream};
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, format_timestamp, map_tr_err, now};
use crate::models::{DeadLetterEntry, DeliveryStatus, QueueDelivery, StreamStats};

fn after(delay: Duration) -> String {
    let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
    format_timestamp(Utc::now().checked_add_signed(delay).unwrap_or(Utc::now()))
}

/// Append an envelope to a stream. Returns the row id.
pub async fn publish(
    db: &Database,
    stream: Stream,
    envelope: &QueueEnvelope,
) -> Result<i64, DeskbridgeError> {
    let payload = serde_json::to_string(envelope)?;
    let subject = stream.subject();
    let envelope_id = envelope.id.clone();
    let kind = envelope.kind.to_string();
    let session_id = envelope.session_id.clone();
    db.connection()
        .call(move |conn| {
            let ts = now();
            conn.execute(
                "INSERT INTO queue_messages
                 (stream, envelope_id, kind, session_id, payload, status, deliveries,
                  available_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, ?6, ?6, ?6)",
                params![subject, envelope_id, kind, session_id, payload, ts],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

/// Claim up to `limit` deliverable rows, oldest first.
///
/// Claimed rows move to `processing` and stay invisible to other fetches
/// until `ack_wait` elapses.
pub async fn fetch(
    db: &Database,
    stream: Stream,
    limit: usize,
    ack_wait: Duration,
) -> Result<Vec<QueueDelivery>, DeskbridgeError> {
    let subject = stream.subject();
    let locked_until = after(ack_wait);
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let ts = now();
            let mut claimed = {
                let mut stmt = tx.prepare(
                    "SELECT id, stream, envelope_id, kind, session_id, payload, deliveries
                     FROM queue_messages
                     WHERE stream = ?1
                       AND ((status = 'pending' AND available_at <= ?2)
                         OR (status = 'processing' AND locked_until <= ?2))
                     ORDER BY id ASC
                     LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![subject, ts, limit], |row| {
                    Ok(QueueDelivery {
                        id: row.get(0)?,
                        stream: row.get(1)?,
                        envelope_id: row.get(2)?,
                        kind: row.get(3)?,
                        session_id: row.get(4)?,
                        payload: row.get(5)?,
                        deliveries: row.get(6)?,
                    })
                })?;
                rows.collect::<Result<Vec<_>, _>>()?
            };

            {
                let mut update = tx.prepare(
                    "UPDATE queue_messages
                     SET status = 'processing', deliveries = deliveries + 1,
                         locked_until = ?2, updated_at = ?3
                     WHERE id = ?1",
                )?;
                for delivery in &mut claimed {
                    update.execute(params![delivery.id, locked_until, ts])?;
                    delivery.deliveries += 1;
                }
            }
            tx.commit()?;
            Ok(claimed)
        })
        .await
        .map_err(map_tr_err)
}

/// Mark a delivery as successfully processed.
pub async fn ack(db: &Database, id: i64) -> Result<(), DeskbridgeError> {
    let acked = DeliveryStatus::Acked.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE queue_messages SET status = ?2, locked_until = NULL, updated_at = ?3
                 WHERE id = ?1",
                params![id, acked, now()],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Return a delivery to the stream, deliverable again after `delay`.
pub async fn nak(db: &Database, id: i64, delay: Duration) -> Result<(), DeskbridgeError> {
    let available_at = after(delay);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE queue_messages
                 SET status = 'pending', available_at = ?2, locked_until = NULL, updated_at = ?3
                 WHERE id = ?1 AND status = 'processing'",
                params![id, available_at, now()],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Preserve a delivery in the dead-letter table and ack it, atomically.
///
/// Returns `false` when the row was no longer in flight (already acked by a
/// concurrent delivery); nothing is written in that case, so a row is
/// dead-lettered at most once.
pub async fn dead_letter_and_ack(
    db: &Database,
    id: i64,
    envelope_id: Option<&str>,
    record: &DeadLetterRecord,
) -> Result<bool, DeskbridgeError> {
    let envelope_id = envelope_id.map(str::to_string);
    let subject = record.original_subject.clone();
    let envelope = serde_json::to_string(&record.original_envelope)?;
    let reason = record.failure_reason.clone();
    let failed_at = format_timestamp(record.failed_at);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE queue_messages SET status = 'acked', locked_until = NULL, updated_at = ?2
                 WHERE id = ?1 AND status = 'processing'",
                params![id, now()],
            )?;
            if changed == 0 {
                return Ok(false);
            }
            tx.execute(
                "INSERT INTO dead_letters
                 (queue_message_id, original_subject, envelope_id, original_envelope,
                  failure_reason, failed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(queue_message_id) DO NOTHING",
                params![id, subject, envelope_id, envelope, reason, failed_at],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
        .map_err(map_tr_err)
}

/// Most recent dead letters first.
pub async fn list_dead_letters(
    db: &Database,
    limit: usize,
) -> Result<Vec<DeadLetterEntry>, DeskbridgeError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, queue_message_id, original_subject, envelope_id,
                        original_envelope, failure_reason, failed_at
                 FROM dead_letters ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| {
                Ok(DeadLetterEntry {
                    id: row.get(0)?,
                    queue_message_id: row.get(1)?,
                    original_subject: row.get(2)?,
                    envelope_id: row.get(3)?,
                    original_envelope: row.get(4)?,
                    failure_reason: row.get(5)?,
                    failed_at: row.get(6)?,
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Per-stream row counts, one entry for each of the two streams.
pub async fn stream_stats(db: &Database) -> Result<Vec<StreamStats>, DeskbridgeError> {
    db.connection()
        .call(|conn| {
            let mut out = Vec::with_capacity(Stream::ALL.len());
            for stream in Stream::ALL {
                let subject = stream.subject();
                let (pending, processing, acked): (i64, i64, i64) = conn.query_row(
                    "SELECT
                        COALESCE(SUM(status = 'pending'), 0),
                        COALESCE(SUM(status = 'processing'), 0),
                        COALESCE(SUM(status = 'acked'), 0)
                     FROM queue_messages WHERE stream = ?1",
                    params![subject],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?;
                let dead: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM dead_letters WHERE original_subject = ?1",
                    params![subject],
                    |row| row.get(0),
                )?;
                out.push(StreamStats {
                    stream: subject.to_string(),
                    pending: pending.unsigned_abs(),
                    processing: processing.unsigned_abs(),
                    acked: acked.unsigned_abs(),
                    dead_lettered: dead.unsigned_abs(),
                });
            }
            Ok(out)
        })
        .await
        .map_err(map_tr_err)
}

/// Delete acked rows last touched before `older_than`. Returns the number removed.
pub async fn purge_acked(
    db: &Database,
    older_than: chrono::DateTime<Utc>,
) -> Result<usize, DeskbridgeError> {
    let cutoff = format_timestamp(older_than);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM queue_messages WHERE status = 'acked' AND updated_at < ?1",
                params![cutoff],
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Current status and delivery count of a row, for inspection and tests.
pub async fn delivery_state(
    db: &Database,
    id: i64,
) -> Result<Option<(String, u32)>, DeskbridgeError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT status, deliveries FROM queue_messages WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskbridge_core::types::{DeletionPayload, EnvelopeKind};
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("queue.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    fn envelope(message_id: &str) -> QueueEnvelope {
        let payload = DeletionPayload {
            message_id: message_id.into(),
            chat_id: "5511999990000@s.whatsapp.net".into(),
            is_from_me: false,
        };
        QueueEnvelope::new(EnvelopeKind::Deletion, "sess", &payload).unwrap()
    }

    #[tokio::test]
    async fn publish_fetch_ack_lifecycle() {
        let (db, _dir) = setup_db().await;
        let env = envelope("m1");
        let id = publish(&db, Stream::Inbound, &env).await.unwrap();

        let batch = fetch(&db, Stream::Inbound, 10, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);
        assert_eq!(batch[0].deliveries, 1);
        assert_eq!(batch[0].envelope_id, env.id);
        assert_eq!(batch[0].kind, "deletion");
        let decoded: QueueEnvelope = serde_json::from_str(&batch[0].payload).unwrap();
        assert_eq!(decoded, env);

        // claimed rows are invisible until acked or the lock lapses
        assert!(
            fetch(&db, Stream::Inbound, 10, Duration::from_secs(30))
                .await
                .unwrap()
                .is_empty()
        );

        ack(&db, id).await.unwrap();
        assert_eq!(
            delivery_state(&db, id).await.unwrap(),
            Some(("acked".to_string(), 1))
        );
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn streams_are_isolated() {
        let (db, _dir) = setup_db().await;
        publish(&db, Stream::Inbound, &envelope("m1")).await.unwrap();
        let outbound = fetch(&db, Stream::Outbound, 10, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(outbound.is_empty());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn fetch_respects_limit_and_order() {
        let (db, _dir) = setup_db().await;
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(
                publish(&db, Stream::Inbound, &envelope(&format!("m{i}")))
                    .await
                    .unwrap(),
            );
        }
        let first = fetch(&db, Stream::Inbound, 3, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(first.iter().map(|d| d.id).collect::<Vec<_>>(), ids[..3]);
        let rest = fetch(&db, Stream::Inbound, 3, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(rest.iter().map(|d| d.id).collect::<Vec<_>>(), ids[3..]);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn nak_delay_hides_row_until_available() {
        let (db, _dir) = setup_db().await;
        let id = publish(&db, Stream::Inbound, &envelope("m1")).await.unwrap();
        fetch(&db, Stream::Inbound, 10, Duration::from_secs(30))
            .await
            .unwrap();

        nak(&db, id, Duration::from_secs(3600)).await.unwrap();
        assert!(
            fetch(&db, Stream::Inbound, 10, Duration::from_secs(30))
                .await
                .unwrap()
                .is_empty(),
            "delayed row must not be redelivered early"
        );

        assert_eq!(
            delivery_state(&db, id).await.unwrap().map(|s| s.0),
            Some("pending".to_string())
        );
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn nak_without_delay_is_immediately_deliverable() {
        let (db, _dir) = setup_db().await;
        let id = publish(&db, Stream::Inbound, &envelope("m1")).await.unwrap();
        fetch(&db, Stream::Inbound, 10, Duration::from_secs(30))
            .await
            .unwrap();
        nak(&db, id, Duration::ZERO).await.unwrap();

        let again = fetch(&db, Stream::Inbound, 10, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].deliveries, 2);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn lapsed_lock_is_redelivered_with_incremented_count() {
        let (db, _dir) = setup_db().await;
        let id = publish(&db, Stream::Inbound, &envelope("m1")).await.unwrap();
        fetch(&db, Stream::Inbound, 10, Duration::ZERO).await.unwrap();

        let again = fetch(&db, Stream::Inbound, 10, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, id);
        assert_eq!(again[0].deliveries, 2);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn dead_letter_happens_once() {
        let (db, _dir) = setup_db().await;
        let env = envelope("m1");
        let id = publish(&db, Stream::Inbound, &env).await.unwrap();
        fetch(&db, Stream::Inbound, 10, Duration::from_secs(30))
            .await
            .unwrap();

        let record = DeadLetterRecord {
            original_subject: Stream::Inbound.subject().to_string(),
            original_envelope: serde_json::to_value(&env).unwrap(),
            failure_reason: "boom".into(),
            failed_at: Utc::now(),
        };
        assert!(
            dead_letter_and_ack(&db, id, Some(&env.id), &record)
                .await
                .unwrap()
        );
        assert!(
            !dead_letter_and_ack(&db, id, Some(&env.id), &record)
                .await
                .unwrap()
        );

        let dead = list_dead_letters(&db, 10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].queue_message_id, id);
        assert_eq!(dead[0].failure_reason, "boom");
        assert_eq!(dead[0].envelope_id.as_deref(), Some(env.id.as_str()));

        let stats = stream_stats(&db).await.unwrap();
        let inbound = stats
            .iter()
            .find(|s| s.stream == Stream::Inbound.subject())
            .unwrap();
        assert_eq!(inbound.acked, 1);
        assert_eq!(inbound.dead_lettered, 1);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn purge_removes_only_old_acked_rows() {
        let (db, _dir) = setup_db().await;
        let acked_id = publish(&db, Stream::Outbound, &envelope("m1")).await.unwrap();
        let pending_id = publish(&db, Stream::Outbound, &envelope("m2")).await.unwrap();
        fetch(&db, Stream::Outbound, 1, Duration::from_secs(30))
            .await
            .unwrap();
        ack(&db, acked_id).await.unwrap();

        let removed = purge_acked(&db, Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(delivery_state(&db, acked_id).await.unwrap(), None);
        assert!(delivery_state(&db, pending_id).await.unwrap().is_some());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_publishers_do_not_collide() {
        let (db, _dir) = setup_db().await;
        let mut handles = Vec::new();
        for i in 0..10 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                publish(&db, Stream::Inbound, &envelope(&format!("m{i}"))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let stats = stream_stats(&db).await.unwrap();
        assert_eq!(stats[0].pending, 10);
        db.close().await.unwrap();
    }
}
