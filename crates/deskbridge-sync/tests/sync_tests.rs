// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for contact sync, message sync, the media pool and
//! the live conversation resolver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use deskbridge_cache::CacheRegistry;
use deskbridge_core::traits::helpdesk::ConversationStatus;
use deskbridge_core::types::{
    MediaUploadJob, MessageDirection, SkipReason, SyncState,
};
use deskbridge_core::{jid, DeskbridgeError};
use deskbridge_helpdesk::ConversationPolicy;
use deskbridge_storage::queries::mirror;
use deskbridge_storage::{MirrorContact, MirrorLidResolver};
use deskbridge_sync::{
    AvatarSettings, AvatarUpdater, ChatRef, ContactSync, ConversationResolver, MediaFetcher,
    MediaUploadPool, MessageSync, MessageSyncSettings, ResolverSettings, SyncDeps, SyncEngine,
    SyncStatusTracker,
};
use deskbridge_test_utils::fixtures::{
    days_ago, image_message, quoting, saved_contact, text_message, unsaved_contact,
};
use deskbridge_test_utils::{MockHelpdesk, MockProtocol, TestHarness};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const SESSION: &str = "main";

struct StaticFetcher;

#[async_trait]
impl MediaFetcher for StaticFetcher {
    async fn fetch(&self, _locator: &str) -> Result<Vec<u8>, DeskbridgeError> {
        Ok(vec![0xFF; 32])
    }
}

fn contact_sync(h: &TestHarness, status: Arc<SyncStatusTracker>) -> ContactSync {
    ContactSync::new(
        h.mirror.clone(),
        h.helpdesk_db.clone(),
        Arc::new(MirrorLidResolver::new(h.mirror.clone())),
        status,
        2,
    )
}

fn message_sync(h: &TestHarness, status: Arc<SyncStatusTracker>) -> MessageSync {
    let pool = MediaUploadPool::new(h.helpdesk.clone(), Arc::new(StaticFetcher), 2, 100.0);
    MessageSync::new(
        h.mirror.clone(),
        h.helpdesk_db.clone(),
        Arc::new(pool),
        Arc::new(MirrorLidResolver::new(h.mirror.clone())),
        status,
        MessageSyncSettings {
            batch_size: 2,
            conversation_batch_size: 2,
            max_messages: 1000,
            policy: ConversationPolicy::default(),
        },
    )
}

fn jid_of(phone: &str) -> String {
    format!("{phone}@s.whatsapp.net")
}

// --- Contact sync ---

#[tokio::test]
async fn second_contact_sync_imports_nothing() {
    let h = TestHarness::new().await.unwrap();
    let phones = ["5511900000001", "5511900000002", "5511900000003"];
    let contacts: Vec<MirrorContact> = phones
        .iter()
        .map(|p| saved_contact(SESSION, &jid_of(p), &format!("Contact {p}")))
        .collect();
    h.add_contacts(&contacts).await.unwrap();

    let status = Arc::new(SyncStatusTracker::new());
    let sync = contact_sync(&h, status.clone());
    let cancel = CancellationToken::new();

    let first = sync.sync(SESSION, &cancel).await.unwrap();
    assert_eq!(first.imported, 3);
    assert_eq!(first.skipped, 0);
    assert_eq!(h.helpdesk_db.counts().await.unwrap().contacts, 3);

    let second = sync.sync(SESSION, &cancel).await.unwrap();
    assert_eq!(second.imported, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(second.skipped_for(SkipReason::AlreadyExists), 3);
    assert_eq!(h.helpdesk_db.counts().await.unwrap().contacts, 3);
    assert_eq!(status.get(SESSION).contacts, second);
}

#[tokio::test]
async fn contact_filters_are_counted_by_reason() {
    let h = TestHarness::new().await.unwrap();
    mirror::upsert_lid_mapping(&h.mirror, SESSION, "777000111@lid", "5511900000009")
        .await
        .unwrap();
    h.add_contacts(&[
        saved_contact(SESSION, &jid_of("5511900000001"), "Ana"),
        // device suffix normalizes onto the first contact
        saved_contact(SESSION, "5511900000001:3@s.whatsapp.net", "Ana"),
        unsaved_contact(SESSION, &jid_of("5511900000002"), "bo"),
        saved_contact(SESSION, "120363000000000000@g.us", "Team"),
        saved_contact(SESSION, "status@broadcast", "Status"),
        saved_contact(SESSION, "88899@lid", "Unknown Lid"),
        saved_contact(SESSION, "777000111@lid", "Lid Person"),
    ])
    .await
    .unwrap();

    let stats = contact_sync(&h, Arc::new(SyncStatusTracker::new()))
        .sync(SESSION, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.imported, 2);
    assert_eq!(stats.skipped_for(SkipReason::Duplicate), 1);
    assert_eq!(stats.skipped_for(SkipReason::NotSaved), 1);
    assert_eq!(stats.skipped_for(SkipReason::Group), 1);
    assert_eq!(stats.skipped_for(SkipReason::ExcludedChat), 1);
    assert_eq!(stats.skipped_for(SkipReason::NoPhone), 1);

    let existing = h
        .helpdesk_db
        .existing_contacts(vec![jid_of("5511900000009")])
        .await
        .unwrap();
    let lid_contact = &existing[&jid_of("5511900000009")];
    assert_eq!(lid_contact.name, "Lid Person");
    assert_eq!(lid_contact.phone_number.as_deref(), Some("+5511900000009"));
}

#[tokio::test]
async fn cancelled_contact_sync_starts_no_batch() {
    let h = TestHarness::new().await.unwrap();
    h.add_contacts(&[saved_contact(SESSION, &jid_of("5511900000001"), "Ana")])
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = contact_sync(&h, Arc::new(SyncStatusTracker::new()))
        .sync(SESSION, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, DeskbridgeError::Cancelled));
    assert_eq!(h.helpdesk_db.counts().await.unwrap().contacts, 0);
}

// --- Message sync ---

#[tokio::test]
async fn message_sync_imports_once_and_writes_ids_back() {
    let h = TestHarness::new().await.unwrap();
    let ana = jid_of("5511900000001");
    h.add_messages(&[
        text_message(SESSION, "A1", &ana, false, days_ago(2), "hello"),
        text_message(SESSION, "A2", &ana, true, days_ago(1), "hi there"),
        text_message(SESSION, "A3", &ana, false, days_ago(1), "   "),
        text_message(SESSION, "OLD", &ana, false, days_ago(90), "ancient"),
        text_message(SESSION, "S1", "status@broadcast", false, days_ago(1), "story"),
    ])
    .await
    .unwrap();

    let sync = message_sync(&h, Arc::new(SyncStatusTracker::new()));
    let cancel = CancellationToken::new();
    let report = sync.sync(SESSION, 30, &cancel).await.unwrap();
    assert_eq!(report.stats.imported, 2);
    assert_eq!(report.stats.skipped_for(SkipReason::TooOld), 1);
    assert_eq!(report.stats.skipped_for(SkipReason::NonContent), 1);
    assert_eq!(report.stats.skipped_for(SkipReason::ExcludedChat), 1);
    assert_eq!(report.conversation_ids.len(), 1);

    let counts = h.helpdesk_db.counts().await.unwrap();
    assert_eq!(counts.messages, 2);
    assert_eq!(counts.conversations, 1);

    let a1 = mirror::get_message(&h.mirror, SESSION, "A1").await.unwrap().unwrap();
    assert!(a1.helpdesk_message_id.is_some());
    assert_eq!(a1.helpdesk_conversation_id, Some(report.conversation_ids[0]));

    // redelivered history: every source id is already present
    let again = sync.sync(SESSION, 30, &cancel).await.unwrap();
    assert_eq!(again.stats.imported, 0);
    assert_eq!(again.stats.skipped_for(SkipReason::AlreadySynced), 2);
    assert_eq!(h.helpdesk_db.counts().await.unwrap().messages, 2);
}

#[tokio::test]
async fn no_age_limit_keeps_old_messages() {
    let h = TestHarness::new().await.unwrap();
    let ana = jid_of("5511900000001");
    h.add_messages(&[text_message(SESSION, "OLD", &ana, false, days_ago(400), "ancient")])
        .await
        .unwrap();
    let report = message_sync(&h, Arc::new(SyncStatusTracker::new()))
        .sync(SESSION, 0, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.stats.imported, 1);
}

#[tokio::test]
async fn media_history_goes_through_the_upload_api() {
    let h = TestHarness::new().await.unwrap();
    let ana = jid_of("5511900000001");
    h.add_messages(&[
        image_message(SESSION, "IMG", &ana, days_ago(1), "/media/img.jpg"),
        image_message(SESSION, "BAD", &ana, days_ago(1), "/media/bad.jpg"),
    ])
    .await
    .unwrap();
    h.helpdesk.fail_upload(&jid::source_id("BAD")).await;

    let report = message_sync(&h, Arc::new(SyncStatusTracker::new()))
        .sync(SESSION, 30, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.stats.imported, 1);
    assert_eq!(report.stats.errored_by_reason.get("media_upload_failed"), Some(&1));

    let uploads = h.helpdesk.messages().await;
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].source_id, jid::source_id("IMG"));
    assert_eq!(uploads[0].conversation_id, report.conversation_ids[0]);
    let (name, mime, size) = uploads[0].attachment.clone().unwrap();
    assert_eq!(name, "IMG.jpg");
    assert_eq!(mime, "image/jpeg");
    assert_eq!(size, 32);
}

#[tokio::test]
async fn quote_to_later_synced_message_is_linked() {
    let h = TestHarness::new().await.unwrap();
    let ana = jid_of("5511900000001");
    // A quotes B, but B only reaches the mirror after the first run
    h.add_messages(&[quoting(
        text_message(SESSION, "A", &ana, false, days_ago(1), "as I said"),
        "B",
    )])
    .await
    .unwrap();
    let sync = message_sync(&h, Arc::new(SyncStatusTracker::new()));
    let cancel = CancellationToken::new();
    let first = sync.sync(SESSION, 30, &cancel).await.unwrap();
    assert_eq!(first.quotes_linked, 0);

    h.add_messages(&[text_message(SESSION, "B", &ana, false, days_ago(2), "original")])
        .await
        .unwrap();
    let second = sync.sync(SESSION, 30, &cancel).await.unwrap();
    assert_eq!(second.stats.imported, 1);
    assert_eq!(second.quotes_linked, 1);

    let a = mirror::get_message(&h.mirror, SESSION, "A").await.unwrap().unwrap();
    let b = mirror::get_message(&h.mirror, SESSION, "B").await.unwrap().unwrap();
    let target = h
        .helpdesk_db
        .reply_target(a.helpdesk_message_id.unwrap())
        .await
        .unwrap();
    assert_eq!(target, b.helpdesk_message_id);
}

/// Cancels the sync from inside the first media fetch.
struct CancellingFetcher(CancellationToken);

#[async_trait]
impl MediaFetcher for CancellingFetcher {
    async fn fetch(&self, _locator: &str) -> Result<Vec<u8>, DeskbridgeError> {
        self.0.cancel();
        Ok(vec![0xFF; 32])
    }
}

#[tokio::test]
async fn quotes_of_finished_batches_survive_cancellation() {
    let h = TestHarness::new().await.unwrap();
    let ana = jid_of("5511900000001");
    h.add_messages(&[
        text_message(SESSION, "Q1", &ana, false, days_ago(4), "original"),
        quoting(
            text_message(SESSION, "Q2", &ana, false, days_ago(3), "about that"),
            "Q1",
        ),
        image_message(SESSION, "Q3", &ana, days_ago(2), "/media/q3.jpg"),
        text_message(SESSION, "Q4", &ana, false, days_ago(1), "never sent"),
    ])
    .await
    .unwrap();

    let cancel = CancellationToken::new();
    let pool = MediaUploadPool::new(
        h.helpdesk.clone(),
        Arc::new(CancellingFetcher(cancel.clone())),
        1,
        100.0,
    );
    let sync = MessageSync::new(
        h.mirror.clone(),
        h.helpdesk_db.clone(),
        Arc::new(pool),
        Arc::new(MirrorLidResolver::new(h.mirror.clone())),
        Arc::new(SyncStatusTracker::new()),
        MessageSyncSettings {
            batch_size: 3,
            conversation_batch_size: 2,
            max_messages: 1000,
            policy: ConversationPolicy::default(),
        },
    );

    let err = sync.sync(SESSION, 30, &cancel).await.unwrap_err();
    assert!(matches!(err, DeskbridgeError::Cancelled), "got: {err}");

    let q1 = mirror::get_message(&h.mirror, SESSION, "Q1").await.unwrap().unwrap();
    let q2 = mirror::get_message(&h.mirror, SESSION, "Q2").await.unwrap().unwrap();
    let target = h
        .helpdesk_db
        .reply_target(q2.helpdesk_message_id.unwrap())
        .await
        .unwrap();
    assert_eq!(target, q1.helpdesk_message_id);

    let q4 = mirror::get_message(&h.mirror, SESSION, "Q4").await.unwrap().unwrap();
    assert!(q4.helpdesk_message_id.is_none());
}

#[tokio::test]
async fn group_messages_name_their_sender() {
    let h = TestHarness::new().await.unwrap();
    let group = "120363000000000000@g.us";
    mirror::upsert_group(
        &h.mirror,
        &deskbridge_storage::MirrorGroup {
            session_id: SESSION.into(),
            jid: group.into(),
            name: Some("Support".into()),
        },
    )
    .await
    .unwrap();
    let mut message = text_message(SESSION, "G1", group, false, days_ago(1), "help");
    message.sender_jid = jid_of("5511900000004");
    message.push_name = Some("Dee".into());
    h.add_messages(&[message]).await.unwrap();

    let report = message_sync(&h, Arc::new(SyncStatusTracker::new()))
        .sync(SESSION, 30, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.stats.imported, 1);
    let existing = h
        .helpdesk_db
        .existing_contacts(vec![group.to_string()])
        .await
        .unwrap();
    assert_eq!(existing[group].name, "Support");
    assert_eq!(existing[group].phone_number, None);
}

// --- Media pool ---

#[tokio::test(start_paused = true)]
async fn media_pool_respects_rate_and_worker_bound() {
    let helpdesk = Arc::new(MockHelpdesk::new().with_upload_delay(Duration::from_millis(50)));
    let pool = MediaUploadPool::new(helpdesk.clone(), Arc::new(StaticFetcher), 3, 3.0);
    let jobs: Vec<MediaUploadJob> = (0..50)
        .map(|i| MediaUploadJob {
            conversation_id: 1,
            locator: format!("/media/{i}.jpg"),
            caption: None,
            sender_prefix: None,
            file_name: None,
            mime_type: Some("image/jpeg".into()),
            direction: MessageDirection::Incoming,
            source_id: jid::source_id(&format!("M{i}")),
            timestamp: Utc::now(),
        })
        .collect();
    helpdesk.fail_upload(&jid::source_id("M7")).await;

    let start = Instant::now();
    let results = pool.process_batch(jobs, &CancellationToken::new()).await;
    let elapsed = start.elapsed();

    // the bucket starts full with burst = workers = 3, so only the other 47
    // wait for refill at three per second: 47/3 s rather than ceil(50/3) s
    assert!(elapsed >= Duration::from_secs_f64(47.0 / 3.0), "took {elapsed:?}");
    assert!(elapsed < Duration::from_secs(18), "took {elapsed:?}");
    assert_eq!(results.len(), 50);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.index, i);
        assert_eq!(result.source_id, jid::source_id(&format!("M{i}")));
        assert_eq!(result.success, i != 7);
    }
    assert!(results[7].error.is_some());
    assert!(helpdesk.max_uploads_in_flight().await <= 3);

    let mut starts = helpdesk.upload_starts().await;
    starts.sort();
    for (k, at) in starts.iter().enumerate().skip(3) {
        let earliest = Duration::from_secs_f64((k as f64 - 2.0) / 3.0);
        assert!(
            at.duration_since(start) + Duration::from_millis(1) >= earliest,
            "upload {k} started early"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn cancelled_pool_reports_every_job() {
    let helpdesk = Arc::new(MockHelpdesk::new());
    let pool = MediaUploadPool::new(helpdesk.clone(), Arc::new(StaticFetcher), 1, 1.0);
    let jobs: Vec<MediaUploadJob> = (0..5)
        .map(|i| MediaUploadJob {
            conversation_id: 1,
            locator: format!("/media/{i}.jpg"),
            caption: None,
            sender_prefix: None,
            file_name: None,
            mime_type: None,
            direction: MessageDirection::Outgoing,
            source_id: format!("WAID:C{i}"),
            timestamp: Utc::now(),
        })
        .collect();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        trigger.cancel();
    });
    let results = pool.process_batch(jobs, &cancel).await;
    assert_eq!(results.len(), 5);
    let uploaded = results.iter().filter(|r| r.success).count();
    assert_eq!(uploaded, 2);
    assert!(results[4].error.as_deref().is_some_and(|e| e.contains("cancelled")));
}

// --- Live resolver ---

#[tokio::test]
async fn concurrent_resolutions_create_one_contact() {
    let helpdesk = Arc::new(MockHelpdesk::new().with_contact_delay(Duration::from_millis(50)));
    let resolver = Arc::new(ConversationResolver::new(
        helpdesk.clone(),
        Arc::new(MockProtocol::new()),
        Arc::new(CacheRegistry::default()),
        ResolverSettings {
            inbox_id: 1,
            auto_reopen: false,
            new_status: ConversationStatus::Open,
            lookup_timeout: Duration::from_secs(1),
        },
    ));

    let mut set = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let resolver = Arc::clone(&resolver);
        set.spawn(async move {
            resolver
                .resolve(ChatRef {
                    session_id: SESSION,
                    remote_id: "5511900000001@s.whatsapp.net",
                    push_name: Some("Ana"),
                    is_from_me: false,
                })
                .await
        });
    }
    let mut contact_ids = Vec::new();
    while let Some(joined) = set.join_next().await {
        contact_ids.push(joined.unwrap().unwrap().contact_id);
    }
    contact_ids.sort_unstable();
    contact_ids.dedup();
    assert_eq!(contact_ids.len(), 1);
    assert_eq!(helpdesk.contacts_created().await, 1);
}

// --- Avatars ---

#[tokio::test]
async fn avatar_backfill_updates_contacts_with_pictures() {
    let h = TestHarness::new().await.unwrap();
    h.helpdesk_db
        .insert_contacts(vec![
            deskbridge_helpdesk::ContactRow {
                identifier: jid_of("5511900000001"),
                name: "Ana".into(),
                phone_number: Some("+5511900000001".into()),
            },
            deskbridge_helpdesk::ContactRow {
                identifier: jid_of("5511900000002"),
                name: "Bo".into(),
                phone_number: Some("+5511900000002".into()),
            },
        ])
        .await
        .unwrap();
    // same ids on the REST side
    h.helpdesk.insert_contact(&jid_of("5511900000001"), "Ana").await;
    h.helpdesk.insert_contact(&jid_of("5511900000002"), "Bo").await;
    h.protocol
        .set_avatar(&jid_of("5511900000002"), "https://cdn.example/bo.jpg")
        .await;

    let updater = AvatarUpdater::new(
        h.helpdesk_db.clone(),
        h.helpdesk.clone(),
        h.protocol.clone(),
        AvatarSettings {
            workers: 2,
            call_timeout: Duration::from_secs(1),
            inter_call_delay: Duration::from_millis(1),
            max_contacts: 10,
        },
    );
    let report = updater.run(SESSION, &CancellationToken::new()).await;
    assert_eq!(report.checked, 2);
    assert_eq!(report.updated, 1);
    assert_eq!(report.failed, 0);
    let updates = h.helpdesk.contact_updates().await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1.avatar_url.as_deref(), Some("https://cdn.example/bo.jpg"));
}

// --- Engine ---

fn engine(h: &TestHarness, helpdesk_db: deskbridge_helpdesk::HelpdeskDb) -> Arc<SyncEngine> {
    Arc::new(SyncEngine::new(
        &h.config,
        SyncDeps {
            mirror: h.mirror.clone(),
            helpdesk_db,
            helpdesk: h.helpdesk.clone(),
            protocol: h.protocol.clone(),
            lids: h.protocol.clone(),
            fetcher: Arc::new(StaticFetcher),
            status: Arc::new(SyncStatusTracker::new()),
        },
    ))
}

#[tokio::test]
async fn engine_runs_both_phases() {
    let h = TestHarness::new().await.unwrap();
    let ana = jid_of("5511900000001");
    h.add_contacts(&[saved_contact(SESSION, &ana, "Ana")]).await.unwrap();
    h.add_messages(&[text_message(SESSION, "E1", &ana, false, days_ago(1), "hey")])
        .await
        .unwrap();

    let engine = engine(&h, h.helpdesk_db.clone());
    let status = engine.run(SESSION, None, CancellationToken::new()).await.unwrap();
    assert_eq!(status.state, SyncState::Completed);
    assert_eq!(status.contacts.imported, 1);
    assert_eq!(status.messages.imported, 1);
    assert!(status.finished_at.is_some());
    // the message reused the contact created by contact sync
    let counts = h.helpdesk_db.counts().await.unwrap();
    assert_eq!(counts.contacts, 1);
    assert_eq!(engine.status().get(SESSION).state, SyncState::Completed);
}

#[tokio::test]
async fn unusable_helpdesk_database_fails_before_any_write() {
    let h = TestHarness::new().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let bare = deskbridge_helpdesk::HelpdeskDb::open(
        dir.path().join("bare.db").to_str().unwrap(),
        1,
        1,
    )
    .await
    .unwrap();
    h.add_contacts(&[saved_contact(SESSION, &jid_of("5511900000001"), "Ana")])
        .await
        .unwrap();

    let engine = engine(&h, bare);
    let err = engine
        .run(SESSION, None, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(engine.status().get(SESSION).state, SyncState::Idle);
}

#[tokio::test]
async fn concurrent_sync_of_a_session_is_refused() {
    let h = TestHarness::new().await.unwrap();
    let engine = engine(&h, h.helpdesk_db.clone());
    engine.status().start(SESSION).unwrap();
    let err = engine
        .start(SESSION, None, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DeskbridgeError::Validation(_)));
}
