// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Consumer behaviour against a real on-disk queue.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use deskbridge_core::types::DeletionPayload;
use deskbridge_core::{DeskbridgeError, EnvelopeKind, QueueEnvelope, Stream};
use deskbridge_queue::{
    Consumer, ConsumerConfig, EnvelopeHandler, HandlerMap, Outcome, Publisher,
};
use deskbridge_storage::Database;
use deskbridge_storage::queries::queue;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

async fn setup() -> (Database, Publisher, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");
    let db = Database::open(path.to_str().unwrap()).await.unwrap();
    let publisher = Publisher::new(db.clone());
    (db, publisher, dir)
}

fn config(max_deliveries: u32) -> ConsumerConfig {
    ConsumerConfig {
        batch_size: 10,
        fetch_wait: Duration::from_millis(200),
        poll_interval: Duration::from_millis(20),
        ack_wait: Duration::from_secs(30),
        max_deliveries,
        backoff: vec![Duration::ZERO],
    }
}

fn deletion() -> DeletionPayload {
    DeletionPayload {
        message_id: "3EB0AA".into(),
        chat_id: "5511999990000@s.whatsapp.net".into(),
        is_from_me: false,
    }
}

/// Records every delivery attempt and fails the first `failures` of them.
#[derive(Default)]
struct Recorder {
    attempts: Mutex<Vec<u32>>,
    failures: u32,
    done: Notify,
}

impl Recorder {
    fn failing(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            ..Self::default()
        })
    }

    fn attempts(&self) -> Vec<u32> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl EnvelopeHandler for Recorder {
    async fn handle(&self, envelope: &QueueEnvelope) -> Result<(), DeskbridgeError> {
        let _payload: DeletionPayload = envelope.decode()?;
        let n = {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(envelope.delivery_attempt);
            attempts.len() as u32
        };
        if n <= self.failures {
            return Err(DeskbridgeError::helpdesk("upstream unavailable"));
        }
        self.done.notify_one();
        Ok(())
    }
}

fn consumer(db: &Database, handler: Arc<Recorder>, max: u32) -> Consumer {
    let handlers = HandlerMap::new().with(EnvelopeKind::Deletion, handler);
    Consumer::new(
        db.clone(),
        Stream::Inbound,
        config(max),
        Arc::new(handlers),
        Arc::new(Notify::new()),
    )
}

#[tokio::test]
async fn success_is_acked() {
    let (db, publisher, _dir) = setup().await;
    let recorder = Recorder::failing(0);
    let consumer = consumer(&db, recorder.clone(), 5);

    publisher
        .publish(Stream::Inbound, EnvelopeKind::Deletion, "s1", &deletion())
        .await
        .unwrap();

    assert_eq!(consumer.poll_once().await.unwrap(), vec![Outcome::Acked]);
    assert_eq!(recorder.attempts(), vec![1]);
    assert!(consumer.poll_once().await.unwrap().is_empty());
    db.close().await.unwrap();
}

#[tokio::test]
async fn transient_failure_is_retried_then_acked() {
    let (db, publisher, _dir) = setup().await;
    let recorder = Recorder::failing(2);
    let consumer = consumer(&db, recorder.clone(), 5);
    publisher
        .publish(Stream::Inbound, EnvelopeKind::Deletion, "s1", &deletion())
        .await
        .unwrap();

    let retried = Outcome::Retried {
        delay: Duration::ZERO,
    };
    assert_eq!(consumer.poll_once().await.unwrap(), vec![retried.clone()]);
    assert_eq!(consumer.poll_once().await.unwrap(), vec![retried]);
    assert_eq!(consumer.poll_once().await.unwrap(), vec![Outcome::Acked]);
    assert_eq!(recorder.attempts(), vec![1, 2, 3]);
    db.close().await.unwrap();
}

#[tokio::test]
async fn exhausted_delivery_is_dead_lettered_exactly_once() {
    let (db, publisher, _dir) = setup().await;
    let recorder = Recorder::failing(u32::MAX);
    let consumer = consumer(&db, recorder.clone(), 3);
    let envelope = publisher
        .publish(Stream::Inbound, EnvelopeKind::Deletion, "s1", &deletion())
        .await
        .unwrap();

    let mut outcomes = Vec::new();
    for _ in 0..6 {
        outcomes.extend(consumer.poll_once().await.unwrap());
    }
    assert_eq!(
        outcomes.iter().filter(|o| **o == Outcome::DeadLettered).count(),
        1
    );
    assert_eq!(outcomes.last(), Some(&Outcome::DeadLettered));
    assert_eq!(recorder.attempts(), vec![1, 2, 3], "never redelivered after dead-lettering");

    let dead = queue::list_dead_letters(&db, 10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].original_subject, "deskbridge.inbound");
    assert_eq!(dead[0].envelope_id.as_deref(), Some(envelope.id.as_str()));
    assert!(dead[0].failure_reason.contains("upstream unavailable"));
    let preserved: QueueEnvelope = serde_json::from_str(&dead[0].original_envelope).unwrap();
    assert_eq!(preserved.id, envelope.id);
    db.close().await.unwrap();
}

#[tokio::test]
async fn backoff_delays_redelivery() {
    let (db, publisher, _dir) = setup().await;
    let recorder = Recorder::failing(1);
    let handlers = HandlerMap::new().with(EnvelopeKind::Deletion, recorder.clone());
    let consumer = Consumer::new(
        db.clone(),
        Stream::Inbound,
        ConsumerConfig {
            backoff: vec![Duration::from_secs(3600)],
            ..config(5)
        },
        Arc::new(handlers),
        Arc::new(Notify::new()),
    );
    publisher
        .publish(Stream::Inbound, EnvelopeKind::Deletion, "s1", &deletion())
        .await
        .unwrap();

    assert_eq!(
        consumer.poll_once().await.unwrap(),
        vec![Outcome::Retried {
            delay: Duration::from_secs(3600)
        }]
    );
    assert!(consumer.poll_once().await.unwrap().is_empty());
    db.close().await.unwrap();
}

#[tokio::test]
async fn unregistered_kind_is_dropped() {
    let (db, publisher, _dir) = setup().await;
    let recorder = Recorder::failing(0);
    let consumer = consumer(&db, recorder.clone(), 5);
    let reaction = serde_json::json!({"messageId": "x", "chatId": "y", "emoji": "👍"});
    let envelope = QueueEnvelope::new(EnvelopeKind::Reaction, "s1", &reaction).unwrap();
    let row = publisher
        .publish_envelope(Stream::Inbound, &envelope)
        .await
        .unwrap();

    assert_eq!(consumer.poll_once().await.unwrap(), vec![Outcome::Dropped]);
    assert!(recorder.attempts().is_empty());
    assert_eq!(
        queue::delivery_state(&db, row).await.unwrap(),
        Some(("acked".to_string(), 1))
    );
    db.close().await.unwrap();
}

async fn insert_raw(db: &Database, kind: &'static str, payload: &'static str) {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO queue_messages
                 (stream, envelope_id, kind, session_id, payload, status, deliveries,
                  available_at, created_at, updated_at)
                 VALUES ('deskbridge.inbound', 'raw-1', ?1, 's1', ?2, 'pending', 0,
                         '2000-01-01T00:00:00.000Z', '2000-01-01T00:00:00.000Z',
                         '2000-01-01T00:00:00.000Z')",
                rusqlite::params![kind, payload],
            )?;
            Ok::<(), rusqlite::Error>(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn unknown_kind_from_newer_producer_is_dropped() {
    let (db, _publisher, _dir) = setup().await;
    let consumer = consumer(&db, Recorder::failing(0), 5);
    insert_raw(&db, "typing_indicator", r#"{"type":"typing_indicator"}"#).await;

    assert_eq!(consumer.poll_once().await.unwrap(), vec![Outcome::Dropped]);
    assert!(queue::list_dead_letters(&db, 10).await.unwrap().is_empty());
    db.close().await.unwrap();
}

#[tokio::test]
async fn undecodable_envelope_is_dead_lettered_immediately() {
    let (db, _publisher, _dir) = setup().await;
    let recorder = Recorder::failing(0);
    let consumer = consumer(&db, recorder.clone(), 5);
    insert_raw(&db, "deletion", "not json at all").await;

    assert_eq!(
        consumer.poll_once().await.unwrap(),
        vec![Outcome::DeadLettered]
    );
    assert!(recorder.attempts().is_empty());
    let dead = queue::list_dead_letters(&db, 10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].original_envelope, "\"not json at all\"");
    db.close().await.unwrap();
}

#[tokio::test]
async fn publishing_to_the_wrong_stream_is_rejected() {
    let (db, publisher, _dir) = setup().await;
    let err = publisher
        .publish(Stream::Outbound, EnvelopeKind::Deletion, "s1", &deletion())
        .await
        .unwrap_err();
    assert!(matches!(err, DeskbridgeError::Validation(_)));
    db.close().await.unwrap();
}

#[tokio::test]
async fn run_loop_handles_published_envelopes_and_stops_on_cancel() {
    let (db, publisher, _dir) = setup().await;
    let recorder = Recorder::failing(0);
    let handlers = HandlerMap::new().with(EnvelopeKind::Deletion, recorder.clone());
    let consumer = Consumer::new(
        db.clone(),
        Stream::Inbound,
        ConsumerConfig {
            fetch_wait: Duration::from_secs(60),
            poll_interval: Duration::from_secs(10),
            ..config(5)
        },
        Arc::new(handlers),
        publisher.notifier(Stream::Inbound),
    );
    let cancel = CancellationToken::new();
    let task = tokio::spawn(consumer.run(cancel.clone()));

    let done = recorder.done.notified();
    publisher
        .publish(Stream::Inbound, EnvelopeKind::Deletion, "s1", &deletion())
        .await
        .unwrap();
    // the publish notification wakes the fetch well before its poll interval
    tokio::time::timeout(Duration::from_secs(5), done)
        .await
        .expect("handler should run");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("consumer should stop promptly")
        .unwrap();
    db.close().await.unwrap();
}
