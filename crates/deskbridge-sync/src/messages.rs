// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bulk import of mirror message history into the helpdesk.
//!
//! The pass runs in four stages:
//!
//! 1. **Filter**: drop messages already synced, too old, without content,
//!    or in chats that cannot map to a helpdesk contact.
//! 2. **Chats**: upsert one contact and conversation per chat with
//!    set-based statements, in conversation batches.
//! 3. **Messages**: per message batch, bulk-insert text, push media through
//!    the upload pool, write helpdesk ids back onto the mirror and link the
//!    batch's quotes.
//! 4. **Finish**: link quotes again across every synced message, then fix
//!    conversation timestamps.
//!
//! Source ids make the pass idempotent: re-running imports nothing twice.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use deskbridge_config::model::DeskbridgeConfig;
use deskbridge_core::jid::{self, ChatKind};
use deskbridge_core::types::{
    ChatForeignKeys, MediaUploadJob, MessageDirection, MessageInsertRecord, PhoneTimestampRecord,
    SenderType, SkipReason, SyncStats,
};
use deskbridge_core::{DeskbridgeError, LidResolver};
use deskbridge_helpdesk::{ConversationPolicy, HelpdeskDb};
use deskbridge_storage::queries::mirror;
use deskbridge_storage::{Database, HelpdeskLink, MirrorContact, MirrorMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::media::MediaUploadPool;
use crate::names;
use crate::status::SyncStatusTracker;

#[derive(Debug, Clone, Copy)]
pub struct MessageSyncSettings {
    pub batch_size: usize,
    pub conversation_batch_size: usize,
    pub max_messages: usize,
    pub policy: ConversationPolicy,
}

impl MessageSyncSettings {
    pub fn from_config(config: &DeskbridgeConfig) -> Self {
        Self {
            batch_size: config.sync.message_batch_size.max(1),
            conversation_batch_size: config.sync.conversation_batch_size.max(1),
            max_messages: config.sync.max_messages,
            policy: ConversationPolicy::from_config(&config.policy),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageSyncReport {
    pub stats: SyncStats,
    /// Conversations that received messages.
    pub conversation_ids: Vec<i64>,
    /// Reply links set by the final quote pass.
    pub quotes_linked: usize,
}

/// A message that passed the filters, with its chat resolved.
struct Candidate {
    message: MirrorMessage,
    chat: String,
    chat_key: String,
    is_group: bool,
}

pub struct MessageSync {
    mirror: Database,
    helpdesk: HelpdeskDb,
    media: Arc<MediaUploadPool>,
    lids: Arc<dyn LidResolver>,
    status: Arc<SyncStatusTracker>,
    settings: MessageSyncSettings,
}

impl MessageSync {
    pub fn new(
        mirror: Database,
        helpdesk: HelpdeskDb,
        media: Arc<MediaUploadPool>,
        lids: Arc<dyn LidResolver>,
        status: Arc<SyncStatusTracker>,
        settings: MessageSyncSettings,
    ) -> Self {
        Self {
            mirror,
            helpdesk,
            media,
            lids,
            status,
            settings,
        }
    }

    /// Import the session's history from the last `days_limit` days
    /// (0 means no age limit).
    pub async fn sync(
        &self,
        session_id: &str,
        days_limit: u32,
        cancel: &CancellationToken,
    ) -> Result<MessageSyncReport, DeskbridgeError> {
        let mut stats = SyncStats::default();
        let messages =
            mirror::list_messages(&self.mirror, session_id, self.settings.max_messages).await?;
        let contacts: HashMap<String, MirrorContact> =
            mirror::list_contacts(&self.mirror, session_id)
                .await?
                .into_iter()
                .map(|c| (jid::normalize(&c.jid), c))
                .collect();
        let cutoff =
            (days_limit > 0).then(|| Utc::now().timestamp() - i64::from(days_limit) * 86_400);

        let candidates = self.filter(session_id, messages, cutoff, &mut stats).await?;
        debug!(
            session_id,
            candidates = candidates.len(),
            skipped = stats.skipped,
            "messages filtered"
        );
        self.status.update_messages(session_id, &stats);

        let chats = self.chat_records(session_id, &candidates, &contacts).await;
        let keys = self.upsert_chats(session_id, chats).await;

        let mut resolved = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match keys.get(&candidate.chat) {
                Some(fk) => resolved.push((candidate, *fk)),
                None => stats.error_n("conversation_unresolved", 1),
            }
        }

        let mut conversations = BTreeSet::new();
        for batch in resolved.chunks(self.settings.batch_size) {
            if cancel.is_cancelled() {
                info!(session_id, "message sync cancelled");
                self.status.update_messages(session_id, &stats);
                return Err(DeskbridgeError::Cancelled);
            }
            self.import_batch(session_id, batch, &contacts, &mut stats, cancel)
                .await;
            conversations.extend(batch.iter().map(|(_, fk)| fk.conversation_id));
            self.status.update_messages(session_id, &stats);
        }

        let quotes_linked = match self.link_quotes(session_id).await {
            Ok(n) => n,
            Err(e) => {
                warn!(session_id, error = %e, "quote linking failed");
                0
            }
        };
        let conversation_ids: Vec<i64> = conversations.into_iter().collect();
        if let Err(e) = self
            .helpdesk
            .fix_conversation_created_at(conversation_ids.clone())
            .await
        {
            warn!(session_id, error = %e, "conversation timestamps not fixed");
        }
        if let Err(e) = self.helpdesk.touch_conversations(conversation_ids.clone()).await {
            warn!(session_id, error = %e, "conversation activity not updated");
        }

        info!(
            session_id,
            imported = stats.imported,
            skipped = stats.skipped,
            errored = stats.errored,
            conversations = conversation_ids.len(),
            quotes_linked,
            "message sync finished"
        );
        Ok(MessageSyncReport {
            stats,
            conversation_ids,
            quotes_linked,
        })
    }

    async fn filter(
        &self,
        session_id: &str,
        messages: Vec<MirrorMessage>,
        cutoff: Option<i64>,
        stats: &mut SyncStats,
    ) -> Result<Vec<Candidate>, DeskbridgeError> {
        let source_ids = messages.iter().map(|m| jid::source_id(&m.message_id)).collect();
        let synced = self.helpdesk.existing_source_ids(source_ids).await?;

        let mut seen = HashSet::new();
        let mut chat_cache: HashMap<String, Option<(String, String, bool)>> = HashMap::new();
        let mut out = Vec::new();
        for message in messages {
            if !seen.insert(message.message_id.clone()) {
                stats.skip(SkipReason::Duplicate);
                continue;
            }
            if synced.contains(&jid::source_id(&message.message_id)) {
                stats.skip(SkipReason::AlreadySynced);
                continue;
            }
            if cutoff.is_some_and(|cutoff| message.timestamp < cutoff) {
                stats.skip(SkipReason::TooOld);
                continue;
            }
            if !has_content(&message) {
                stats.skip(SkipReason::NonContent);
                continue;
            }
            let kind = jid::classify(&message.chat_jid);
            if kind.is_excluded() || kind == ChatKind::Unknown {
                stats.skip(SkipReason::ExcludedChat);
                continue;
            }
            let chat_jid = jid::normalize(&message.chat_jid);
            if !chat_cache.contains_key(&chat_jid) {
                let resolved = self.resolve_chat(session_id, &chat_jid, kind).await;
                chat_cache.insert(chat_jid.clone(), resolved);
            }
            match chat_cache.get(&chat_jid).cloned().flatten() {
                Some((chat, chat_key, is_group)) => out.push(Candidate {
                    message,
                    chat,
                    chat_key,
                    is_group,
                }),
                None => stats.skip(SkipReason::NoPhone),
            }
        }
        Ok(out)
    }

    /// `(remote identifier, phone digits or group id, is group)` of a chat.
    async fn resolve_chat(
        &self,
        session_id: &str,
        chat_jid: &str,
        kind: ChatKind,
    ) -> Option<(String, String, bool)> {
        match kind {
            ChatKind::Group => Some((
                chat_jid.to_string(),
                jid::user_part(chat_jid).to_string(),
                true,
            )),
            ChatKind::LinkedIdentity => match self.lids.phone_for_lid(session_id, chat_jid).await {
                Ok(Some(digits)) => Some((jid::individual_jid(&digits), digits, false)),
                Ok(None) => None,
                Err(e) => {
                    debug!(chat_jid, error = %e, "linked identity lookup failed");
                    None
                }
            },
            _ => jid::phone_number(chat_jid).map(|digits| (chat_jid.to_string(), digits, false)),
        }
    }

    async fn chat_records(
        &self,
        session_id: &str,
        candidates: &[Candidate],
        contacts: &HashMap<String, MirrorContact>,
    ) -> Vec<PhoneTimestampRecord> {
        let mut chats: BTreeMap<&str, PhoneTimestampRecord> = BTreeMap::new();
        // push name of the chat's latest incoming message
        let mut push_names: HashMap<&str, &str> = HashMap::new();
        for c in candidates {
            let at = timestamp(c.message.timestamp);
            if !c.message.from_me && !c.is_group {
                if let Some(push) = c.message.push_name.as_deref() {
                    push_names.insert(c.chat.as_str(), push);
                }
            }
            chats
                .entry(c.chat.as_str())
                .and_modify(|r| {
                    r.first_seen_at = r.first_seen_at.min(at);
                    r.last_seen_at = r.last_seen_at.max(at);
                })
                .or_insert_with(|| PhoneTimestampRecord {
                    phone_or_group_id: c.chat_key.clone(),
                    display_name: String::new(),
                    remote_identifier: c.chat.clone(),
                    is_group: c.is_group,
                    first_seen_at: at,
                    last_seen_at: at,
                });
        }

        let mut records = Vec::with_capacity(chats.len());
        for (chat, mut record) in chats {
            record.display_name = if record.is_group {
                let subject = match mirror::group_name(&self.mirror, session_id, chat).await {
                    Ok(subject) => subject,
                    Err(e) => {
                        debug!(chat, error = %e, "group subject lookup failed");
                        None
                    }
                };
                names::group_name(subject.as_deref(), chat)
            } else {
                names::individual_name(
                    contacts.get(chat),
                    push_names.get(chat).copied(),
                    Some(&record.phone_or_group_id),
                    chat,
                )
            };
            records.push(record);
        }
        records
    }

    async fn upsert_chats(
        &self,
        session_id: &str,
        chats: Vec<PhoneTimestampRecord>,
    ) -> HashMap<String, ChatForeignKeys> {
        let mut keys = HashMap::with_capacity(chats.len());
        for batch in chats.chunks(self.settings.conversation_batch_size) {
            match self
                .helpdesk
                .upsert_chats(batch.to_vec(), self.settings.policy)
                .await
            {
                Ok(found) => keys.extend(found),
                Err(e) => {
                    error!(session_id, chats = batch.len(), error = %e, "conversation batch failed");
                }
            }
        }
        keys
    }

    async fn import_batch(
        &self,
        session_id: &str,
        batch: &[(Candidate, ChatForeignKeys)],
        contacts: &HashMap<String, MirrorContact>,
        stats: &mut SyncStats,
        cancel: &CancellationToken,
    ) {
        let mut texts = Vec::new();
        let mut jobs = Vec::new();
        // (quoting source id, quoted source id)
        let mut quotes = Vec::new();
        for (c, fk) in batch {
            let m = &c.message;
            let direction = MessageDirection::from_me(m.from_me);
            let prefix = (c.is_group && !m.from_me).then(|| sender_prefix(m, contacts));
            let source_id = jid::source_id(&m.message_id);
            let quoted_source_id = m.quoted_message_id.as_deref().map(jid::source_id);
            if m.message_type.is_media() {
                if let Some(quoted) = quoted_source_id {
                    quotes.push((source_id.clone(), quoted));
                }
                jobs.push(MediaUploadJob {
                    conversation_id: fk.conversation_id,
                    locator: m.media_locator.clone().unwrap_or_default(),
                    caption: m.content.clone(),
                    sender_prefix: prefix,
                    file_name: m.media_file_name.clone(),
                    mime_type: m.media_mime_type.clone(),
                    direction,
                    source_id,
                    timestamp: timestamp(m.timestamp),
                });
                continue;
            }
            let body = m.content.clone().unwrap_or_default();
            let (sender_type, sender_id) = if m.from_me {
                (None, None)
            } else {
                (Some(SenderType::Contact), Some(fk.contact_id))
            };
            texts.push(MessageInsertRecord {
                content: match prefix {
                    Some(prefix) => format!("{prefix}\n{body}"),
                    None => body,
                },
                conversation_id: fk.conversation_id,
                direction,
                sender_type,
                sender_id,
                source_id,
                timestamp: timestamp(m.timestamp),
                quoted_source_id,
            });
        }
        quotes.extend(texts.iter().filter_map(|t| {
            t.quoted_source_id
                .clone()
                .map(|quoted| (t.source_id.clone(), quoted))
        }));

        let mut written: Vec<String> = Vec::new();
        let text_ids: Vec<String> = texts.iter().map(|t| t.source_id.clone()).collect();
        let text_count = texts.len() as u64;
        match self.helpdesk.insert_messages(texts).await {
            Ok(n) => {
                stats.imported += n as u64;
                written.extend(text_ids);
            }
            Err(e) => {
                error!(session_id, messages = text_count, error = %e, "message insert failed");
                stats.error_n("insert_failed", text_count);
            }
        }

        for result in self.media.process_batch(jobs, cancel).await {
            if result.success {
                stats.imported += 1;
                written.push(result.source_id);
            } else {
                debug!(source_id = %result.source_id, error = ?result.error, "media upload failed");
                stats.error_n("media_upload_failed", 1);
            }
        }

        if let Err(e) = self.write_back(session_id, written).await {
            warn!(session_id, error = %e, "helpdesk ids not written back");
        }
        match self.link_batch_quotes(quotes).await {
            Ok(0) => {}
            Ok(linked) => debug!(session_id, linked, "batch quotes linked"),
            Err(e) => warn!(session_id, error = %e, "batch quote linking failed"),
        }
    }

    /// Link quoting messages of one batch to quoted messages already in the
    /// helpdesk. Quotes whose target is still missing wait for the final pass.
    async fn link_batch_quotes(
        &self,
        quotes: Vec<(String, String)>,
    ) -> Result<usize, DeskbridgeError> {
        if quotes.is_empty() {
            return Ok(0);
        }
        let wanted: Vec<String> = quotes
            .iter()
            .flat_map(|(quoting, quoted)| [quoting.clone(), quoted.clone()])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let synced = self.helpdesk.message_ids_by_source(wanted).await?;
        let links: Vec<(i64, i64)> = quotes
            .iter()
            .filter_map(|(quoting, quoted)| {
                Some((synced.get(quoting)?.message_id, synced.get(quoted)?.message_id))
            })
            .collect();
        self.helpdesk.set_reply_links(links).await
    }

    async fn write_back(
        &self,
        session_id: &str,
        source_ids: Vec<String>,
    ) -> Result<(), DeskbridgeError> {
        if source_ids.is_empty() {
            return Ok(());
        }
        let ids = self.helpdesk.message_ids_by_source(source_ids).await?;
        let links = ids
            .into_iter()
            .filter_map(|(source_id, synced)| {
                jid::message_id_from_source(&source_id).map(|message_id| HelpdeskLink {
                    message_id: message_id.to_string(),
                    helpdesk_message_id: synced.message_id,
                    helpdesk_conversation_id: synced.conversation_id,
                })
            })
            .collect();
        mirror::set_helpdesk_ids(&self.mirror, session_id, links).await?;
        Ok(())
    }

    /// Point every synced quoting message at its quoted message, wherever
    /// that one landed. Covers quotes whose target was imported by a later
    /// batch or a later run.
    pub async fn link_quotes(&self, session_id: &str) -> Result<usize, DeskbridgeError> {
        let references = mirror::quoted_references(&self.mirror, session_id).await?;
        if references.is_empty() {
            return Ok(0);
        }
        let targets: Vec<String> = references
            .iter()
            .map(|r| jid::source_id(&r.quoted_message_id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let synced = self.helpdesk.message_ids_by_source(targets).await?;
        let links: Vec<(i64, i64)> = references
            .iter()
            .filter_map(|r| {
                synced
                    .get(&jid::source_id(&r.quoted_message_id))
                    .map(|target| (r.helpdesk_message_id, target.message_id))
            })
            .collect();
        self.helpdesk.set_reply_links(links).await
    }
}

fn has_content(message: &MirrorMessage) -> bool {
    if !message.message_type.is_content() {
        return false;
    }
    if message.message_type.is_media() {
        return message.media_locator.as_deref().is_some_and(|l| !l.is_empty());
    }
    message.content.as_deref().is_some_and(|c| !c.trim().is_empty())
}

/// `**Name:**` label naming the author of a group message.
fn sender_prefix(message: &MirrorMessage, contacts: &HashMap<String, MirrorContact>) -> String {
    let sender = jid::normalize(&message.sender_jid);
    let phone = jid::phone_number(&sender);
    let name = names::individual_name(
        contacts.get(&sender),
        message.push_name.as_deref(),
        phone.as_deref(),
        &sender,
    );
    format!("**{name}:**")
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
