// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end bridge behaviour: envelopes go through the real on-disk queue
//! and the real handlers, against mock helpdesk and protocol clients.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deskbridge_bridge::{Bridge, BridgeDeps, WebhookEvent};
use deskbridge_cache::registry::outbound_key;
use deskbridge_core::types::{
    DeletionPayload, InboundMessagePayload, MediaAttachment, MessageDirection, ReactionPayload,
    SkipReason, SyncState,
};
use deskbridge_core::{DeskbridgeError, EnvelopeKind, Stream};
use deskbridge_queue::Outcome;
use deskbridge_storage::queries::{mirror, queue};
use deskbridge_sync::MediaFetcher;
use deskbridge_test_utils::fixtures::{days_ago, saved_contact, text_message};
use deskbridge_test_utils::{SentItem, TestHarness};
use tokio_util::sync::CancellationToken;

const SESSION: &str = "main";
const CHAT: &str = "5511999990000@s.whatsapp.net";

struct StaticFetcher;

#[async_trait]
impl MediaFetcher for StaticFetcher {
    async fn fetch(&self, _locator: &str) -> Result<Vec<u8>, DeskbridgeError> {
        Ok(vec![0x89; 64])
    }
}

fn bridge(h: &TestHarness) -> Bridge {
    Bridge::new(
        h.config.clone(),
        h.mirror.clone(),
        BridgeDeps {
            helpdesk: h.helpdesk.clone(),
            protocol: h.protocol.clone(),
            lids: None,
            fetcher: Some(Arc::new(StaticFetcher)),
        },
        CancellationToken::new(),
    )
}

fn incoming(id: &str, text: &str) -> InboundMessagePayload {
    InboundMessagePayload {
        message_id: id.into(),
        chat_id: CHAT.into(),
        sender_id: CHAT.into(),
        push_name: Some("Maria".into()),
        is_from_me: false,
        is_group: false,
        raw_protocol_bytes: None,
        full_event_json: None,
        text: Some(text.into()),
        media: None,
        quoted_message_id: None,
        timestamp: 1_760_000_000,
    }
}

fn agent_reply(id: i64, text: &str) -> WebhookEvent {
    let body = serde_json::json!({
        "event": "message_created",
        "id": id,
        "content": text,
        "message_type": "outgoing",
        "conversation": {"id": 1, "meta": {"sender": {"identifier": CHAT}}}
    });
    WebhookEvent::parse(body.to_string().as_bytes()).unwrap()
}

async fn import(bridge: &Bridge, payload: &InboundMessagePayload) -> Vec<Outcome> {
    bridge
        .publish(EnvelopeKind::IncomingMessage, SESSION, payload)
        .await
        .unwrap();
    bridge.consumer(Stream::Inbound).poll_once().await.unwrap()
}

#[tokio::test]
async fn new_chat_message_creates_contact_conversation_and_message() {
    let h = TestHarness::new().await.unwrap();
    let bridge = bridge(&h);

    let outcomes = import(&bridge, &incoming("3EB0A1", "Hello")).await;
    assert_eq!(outcomes, vec![Outcome::Acked]);

    assert_eq!(h.helpdesk.contacts_created().await, 1);
    assert_eq!(h.helpdesk.conversations_created().await, 1);
    let messages = h.helpdesk.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].source_id, "WAID:3EB0A1");
    assert_eq!(messages[0].content.as_deref(), Some("Hello"));

    let ids = mirror::helpdesk_ids(&h.mirror, SESSION, "3EB0A1")
        .await
        .unwrap();
    assert_eq!(ids, Some((messages[0].id, messages[0].conversation_id)));
    assert_eq!(bridge.sync_status(SESSION).live.imported, 1);
}

#[tokio::test]
async fn redelivered_message_is_not_imported_twice() {
    let h = TestHarness::new().await.unwrap();
    let bridge = bridge(&h);
    let payload = incoming("3EB0A2", "Hi again");

    import(&bridge, &payload).await;
    let second = import(&bridge, &payload).await;

    assert_eq!(second, vec![Outcome::Acked]);
    assert_eq!(h.helpdesk.messages().await.len(), 1);
    assert_eq!(h.helpdesk.conversations_created().await, 1);
    assert_eq!(bridge.sync_status(SESSION).live.skipped, 1);
}

#[tokio::test]
async fn excluded_chats_are_skipped() {
    let h = TestHarness::new().await.unwrap();
    let bridge = bridge(&h);
    let mut payload = incoming("3EB0A3", "story");
    payload.chat_id = "status@broadcast".into();

    assert_eq!(import(&bridge, &payload).await, vec![Outcome::Acked]);
    assert!(h.helpdesk.messages().await.is_empty());
    let live = bridge.sync_status(SESSION).live;
    assert_eq!(live.skipped_for(SkipReason::ExcludedChat), 1);
}

#[tokio::test]
async fn group_message_names_its_sender() {
    let h = TestHarness::new().await.unwrap();
    h.protocol
        .set_group_name("120363000000000000@g.us", "Support Team")
        .await;
    let bridge = bridge(&h);
    let mut payload = incoming("3EB0A4", "anyone there?");
    payload.chat_id = "120363000000000000@g.us".into();
    payload.sender_id = "5511888880000@s.whatsapp.net".into();
    payload.push_name = Some("Ana".into());
    payload.is_group = true;

    import(&bridge, &payload).await;

    let messages = h.helpdesk.messages().await;
    assert_eq!(messages[0].content.as_deref(), Some("**Ana:**\nanyone there?"));
}

#[tokio::test]
async fn media_message_is_uploaded_as_attachment() {
    let h = TestHarness::new().await.unwrap();
    let bridge = bridge(&h);
    let mut payload = incoming("3EB0A5", "");
    payload.text = None;
    payload.media = Some(MediaAttachment {
        locator: "/media/3EB0A5.jpg".into(),
        mime_type: Some("image/jpeg".into()),
        file_name: None,
        caption: Some("the receipt".into()),
    });

    assert_eq!(import(&bridge, &payload).await, vec![Outcome::Acked]);

    let messages = h.helpdesk.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].source_id, "WAID:3EB0A5");
    let (_, mime, size) = messages[0].attachment.clone().unwrap();
    assert_eq!(mime, "image/jpeg");
    assert_eq!(size, 64);
}

#[tokio::test]
async fn quoted_reply_points_at_the_quoted_helpdesk_message() {
    let h = TestHarness::new().await.unwrap();
    let bridge = bridge(&h);

    import(&bridge, &incoming("3EB0B1", "my order is late")).await;
    let mut reply = incoming("3EB0B2", "any news?");
    reply.quoted_message_id = Some("3EB0B1".into());
    import(&bridge, &reply).await;

    let messages = h.helpdesk.messages().await;
    assert_eq!(messages[1].in_reply_to, Some(messages[0].id));
}

#[tokio::test]
async fn reaction_is_posted_against_its_target() {
    let h = TestHarness::new().await.unwrap();
    let bridge = bridge(&h);
    import(&bridge, &incoming("3EB0C1", "thanks")).await;

    let reaction = ReactionPayload {
        message_id: "3EB0C2".into(),
        target_message_id: "3EB0C1".into(),
        chat_id: CHAT.into(),
        sender_id: CHAT.into(),
        push_name: None,
        emoji: "👍".into(),
        is_from_me: false,
        timestamp: 1_760_000_100,
    };
    bridge
        .publish(EnvelopeKind::Reaction, SESSION, &reaction)
        .await
        .unwrap();
    bridge.consumer(Stream::Inbound).poll_once().await.unwrap();

    let messages = h.helpdesk.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content.as_deref(), Some("👍"));
    assert_eq!(messages[1].in_reply_to, Some(messages[0].id));
}

#[tokio::test]
async fn reaction_to_unknown_message_is_skipped() {
    let h = TestHarness::new().await.unwrap();
    let bridge = bridge(&h);
    let reaction = ReactionPayload {
        message_id: "3EB0C3".into(),
        target_message_id: "NEVER-SEEN".into(),
        chat_id: CHAT.into(),
        sender_id: CHAT.into(),
        push_name: None,
        emoji: "❤️".into(),
        is_from_me: false,
        timestamp: 1_760_000_100,
    };
    bridge
        .publish(EnvelopeKind::Reaction, SESSION, &reaction)
        .await
        .unwrap();
    bridge.consumer(Stream::Inbound).poll_once().await.unwrap();

    assert!(h.helpdesk.messages().await.is_empty());
    let live = bridge.sync_status(SESSION).live;
    assert_eq!(live.skipped_for(SkipReason::MissingTarget), 1);
}

#[tokio::test]
async fn deletion_removes_the_helpdesk_copy() {
    let h = TestHarness::new().await.unwrap();
    let bridge = bridge(&h);
    import(&bridge, &incoming("3EB0D1", "oops")).await;
    let imported = h.helpdesk.messages().await[0].clone();

    let deletion = DeletionPayload {
        message_id: "3EB0D1".into(),
        chat_id: CHAT.into(),
        is_from_me: false,
    };
    bridge
        .publish(EnvelopeKind::Deletion, SESSION, &deletion)
        .await
        .unwrap();
    let outcomes = bridge.consumer(Stream::Inbound).poll_once().await.unwrap();

    assert_eq!(outcomes, vec![Outcome::Acked]);
    assert_eq!(
        h.helpdesk.deleted().await,
        vec![(imported.conversation_id, imported.id)]
    );
}

#[tokio::test]
async fn agent_reply_is_sent_and_its_echo_suppressed() {
    let h = TestHarness::new().await.unwrap();
    let bridge = bridge(&h);

    let queued = bridge
        .enqueue_webhook(SESSION, agent_reply(42, "We shipped it today"))
        .await
        .unwrap();
    assert_eq!(queued.map(|e| e.kind), Some(EnvelopeKind::SendText));
    let outcomes = bridge.consumer(Stream::Outbound).poll_once().await.unwrap();
    assert_eq!(outcomes, vec![Outcome::Acked]);

    let sent = h.protocol.sent().await;
    assert_eq!(sent.len(), 1);
    match &sent[0].1 {
        SentItem::Text(text) => {
            assert_eq!(text.chat_id, CHAT);
            assert_eq!(text.text, "We shipped it today");
        }
        other => panic!("expected a text send, got {other:?}"),
    }

    // the protocol reports our own send back as a message from this account
    let mut echo = incoming("MOCK-1", "We shipped it today");
    echo.is_from_me = true;
    bridge
        .publish(EnvelopeKind::OutgoingMessageSent, SESSION, &echo)
        .await
        .unwrap();
    bridge.consumer(Stream::Inbound).poll_once().await.unwrap();

    assert!(h.helpdesk.messages().await.is_empty());
    let live = bridge.sync_status(SESSION).live;
    assert_eq!(live.skipped_for(SkipReason::Echo), 1);
}

#[tokio::test]
async fn reply_sent_from_the_phone_is_imported_as_outgoing() {
    let h = TestHarness::new().await.unwrap();
    let bridge = bridge(&h);
    let mut payload = incoming("3EB0E1", "typed on the phone");
    payload.is_from_me = true;
    bridge
        .publish(EnvelopeKind::OutgoingMessageSent, SESSION, &payload)
        .await
        .unwrap();
    bridge.consumer(Stream::Inbound).poll_once().await.unwrap();

    let messages = h.helpdesk.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].direction, MessageDirection::Outgoing);
}

#[tokio::test]
async fn duplicate_webhook_sends_once() {
    let h = TestHarness::new().await.unwrap();
    let bridge = bridge(&h);

    for _ in 0..2 {
        bridge
            .enqueue_webhook(SESSION, agent_reply(42, "Refund approved"))
            .await
            .unwrap();
    }
    let outcomes = bridge.consumer(Stream::Outbound).poll_once().await.unwrap();

    assert_eq!(outcomes, vec![Outcome::Acked, Outcome::Acked]);
    assert_eq!(h.protocol.sent().await.len(), 1);
    let live = bridge.sync_status(SESSION).live;
    assert_eq!(live.skipped_for(SkipReason::Duplicate), 1);
}

#[tokio::test]
async fn identical_text_to_the_same_chat_is_sent_once() {
    let h = TestHarness::new().await.unwrap();
    let bridge = bridge(&h);

    bridge
        .enqueue_webhook(SESSION, agent_reply(50, "Thanks!"))
        .await
        .unwrap();
    bridge
        .enqueue_webhook(SESSION, agent_reply(51, "Thanks!"))
        .await
        .unwrap();
    bridge.consumer(Stream::Outbound).poll_once().await.unwrap();

    assert_eq!(h.protocol.sent().await.len(), 1);
}

#[tokio::test]
async fn failed_send_releases_its_claim_for_the_retry() {
    let h = TestHarness::new().await.unwrap();
    h.protocol.fail_next_sends(1).await;
    let bridge = bridge(&h);

    bridge
        .enqueue_webhook(SESSION, agent_reply(60, "Still there?"))
        .await
        .unwrap();
    let outcomes = bridge.consumer(Stream::Outbound).poll_once().await.unwrap();

    assert!(matches!(outcomes[..], [Outcome::Retried { .. }]));
    assert!(!bridge.caches().outbound_dedup.exists(&outbound_key(SESSION, 60)));
    assert_eq!(bridge.sync_status(SESSION).live.errored, 1);
    assert!(h.protocol.sent().await.is_empty());
}

#[tokio::test]
async fn persistent_helpdesk_failure_is_dead_lettered_once() {
    let h = TestHarness::builder()
        .with_config(|c| {
            c.queue.max_deliveries = 2;
            c.queue.backoff_secs = vec![0];
        })
        .build()
        .await
        .unwrap();
    h.helpdesk.fail_next_messages(2, 503).await;
    let bridge = bridge(&h);

    let first = import(&bridge, &incoming("3EB0F1", "hello?")).await;
    assert!(matches!(first[..], [Outcome::Retried { .. }]));
    let consumer = bridge.consumer(Stream::Inbound);
    assert_eq!(consumer.poll_once().await.unwrap(), vec![Outcome::DeadLettered]);
    assert!(consumer.poll_once().await.unwrap().is_empty());

    let dead = queue::list_dead_letters(bridge.database(), 10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].original_subject, Stream::Inbound.subject());
    assert!(h.helpdesk.messages().await.is_empty());
}

#[tokio::test]
async fn transient_failure_recovers_on_redelivery() {
    let h = TestHarness::builder()
        .with_config(|c| c.queue.backoff_secs = vec![0])
        .build()
        .await
        .unwrap();
    h.helpdesk.fail_next_messages(1, 502).await;
    let bridge = bridge(&h);

    let first = import(&bridge, &incoming("3EB0F2", "retry me")).await;
    assert!(matches!(first[..], [Outcome::Retried { .. }]));
    let second = bridge.consumer(Stream::Inbound).poll_once().await.unwrap();

    assert_eq!(second, vec![Outcome::Acked]);
    assert_eq!(h.helpdesk.messages().await.len(), 1);
    assert_eq!(h.helpdesk.conversations_created().await, 1);
}

#[tokio::test]
async fn lost_create_response_is_not_imported_again() {
    let h = TestHarness::builder()
        .with_config(|c| c.queue.backoff_secs = vec![0])
        .build()
        .await
        .unwrap();
    h.helpdesk.lose_next_responses(1).await;
    let bridge = bridge(&h);

    let first = import(&bridge, &incoming("3EB0F3", "stored but unanswered")).await;
    assert!(matches!(first[..], [Outcome::Retried { .. }]));
    let second = bridge.consumer(Stream::Inbound).poll_once().await.unwrap();
    assert_eq!(second, vec![Outcome::Acked]);

    let messages = h.helpdesk.messages().await;
    assert_eq!(messages.len(), 1);
    let ids = mirror::helpdesk_ids(&h.mirror, SESSION, "3EB0F3")
        .await
        .unwrap();
    assert_eq!(ids, Some((messages[0].id, messages[0].conversation_id)));
    let live = bridge.sync_status(SESSION).live;
    assert_eq!(live.skipped_for(SkipReason::AlreadySynced), 1);
}

#[tokio::test]
async fn lost_upload_response_is_not_uploaded_again() {
    let h = TestHarness::builder()
        .with_config(|c| c.queue.backoff_secs = vec![0])
        .build()
        .await
        .unwrap();
    h.helpdesk.lose_next_responses(1).await;
    let bridge = bridge(&h);
    let mut payload = incoming("3EB0F4", "");
    payload.text = None;
    payload.media = Some(MediaAttachment {
        locator: "/media/3EB0F4.jpg".into(),
        mime_type: Some("image/jpeg".into()),
        file_name: None,
        caption: None,
    });

    let first = import(&bridge, &payload).await;
    assert!(matches!(first[..], [Outcome::Retried { .. }]));
    let second = bridge.consumer(Stream::Inbound).poll_once().await.unwrap();

    assert_eq!(second, vec![Outcome::Acked]);
    assert_eq!(h.helpdesk.messages().await.len(), 1);
}

#[tokio::test]
async fn sync_without_helpdesk_database_is_refused() {
    let h = TestHarness::new().await.unwrap();
    let mut config = h.config.clone();
    config.helpdesk.database_path = None;
    let bridge = Bridge::new(
        config,
        h.mirror.clone(),
        BridgeDeps {
            helpdesk: h.helpdesk.clone(),
            protocol: h.protocol.clone(),
            lids: None,
            fetcher: None,
        },
        CancellationToken::new(),
    );

    let err = bridge.start_sync(SESSION, None).await.unwrap_err();
    assert!(matches!(err, DeskbridgeError::Config(_)));
    assert_eq!(bridge.sync_status(SESSION).state, SyncState::Idle);
}

#[tokio::test]
async fn live_redelivery_of_a_synced_message_is_skipped() {
    let h = TestHarness::new().await.unwrap();
    h.add_contacts(&[saved_contact(SESSION, CHAT, "Maria Souza")])
        .await
        .unwrap();
    h.add_messages(&[text_message(SESSION, "3EB0G1", CHAT, false, days_ago(1), "from history")])
        .await
        .unwrap();
    let bridge = bridge(&h);

    let status = bridge.start_sync(SESSION, None).await.unwrap().await.unwrap();
    assert_eq!(status.state, SyncState::Completed);
    assert_eq!(status.messages.imported, 1);

    import(&bridge, &incoming("3EB0G1", "from history")).await;
    let live = bridge.sync_status(SESSION).live;
    assert_eq!(live.skipped_for(SkipReason::AlreadySynced), 1);
    assert!(h.helpdesk.messages().await.is_empty());
}

#[tokio::test]
async fn running_bridge_consumes_until_shutdown() {
    let h = TestHarness::new().await.unwrap();
    let shutdown = CancellationToken::new();
    let bridge = Arc::new(Bridge::new(
        h.config.clone(),
        h.mirror.clone(),
        BridgeDeps {
            helpdesk: h.helpdesk.clone(),
            protocol: h.protocol.clone(),
            lids: None,
            fetcher: Some(Arc::new(StaticFetcher)),
        },
        shutdown.clone(),
    ));
    let running = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.run(Duration::from_secs(2)).await })
    };

    bridge
        .publish(EnvelopeKind::IncomingMessage, SESSION, &incoming("3EB0H1", "live"))
        .await
        .unwrap();
    let imported = tokio::time::timeout(Duration::from_secs(5), async {
        while h.helpdesk.messages().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(imported.is_ok(), "message was not consumed");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("bridge did not stop")
        .unwrap();
}
