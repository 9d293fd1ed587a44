// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deskbridge_cache::registry::{echo_inflight_prefix, echo_key};
use deskbridge_core::jid;
use deskbridge_core::traits::helpdesk::NewMessage;
use deskbridge_core::types::{
    InboundMessagePayload, MediaAttachment, MediaUploadJob, MessageDirection, SkipReason,
};
use deskbridge_core::{DeskbridgeError, QueueEnvelope};
use deskbridge_queue::EnvelopeHandler;
use deskbridge_storage::queries::mirror;
use deskbridge_storage::{HelpdeskLink, MirrorMessage, MirrorMessageType};
use deskbridge_sync::ChatRef;
use deskbridge_sync::names;
use tracing::{debug, info, warn};

use super::{Disposition, HandlerContext};

/// Imports one protocol message into the helpdesk.
///
/// Registered for both incoming messages and messages this account sent
/// from another device. The latter are dropped when they are echoes of a
/// send the bridge itself performed.
pub struct InboundMessageHandler {
    ctx: Arc<HandlerContext>,
}

enum Body<'a> {
    Text(&'a str),
    Media(&'a MediaAttachment),
}

impl InboundMessageHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }

    async fn import(
        &self,
        session_id: &str,
        p: &InboundMessagePayload,
    ) -> Result<Disposition, DeskbridgeError> {
        let ctx = &self.ctx;
        let dedup_key = format!("in:{}", echo_key(session_id, &p.chat_id, &p.message_id));
        if ctx.caches.handler_dedup.exists(&dedup_key) {
            return Ok(Disposition::Skipped(SkipReason::Duplicate));
        }
        let chat = match ctx.remote_chat(session_id, &p.chat_id).await? {
            Ok(chat) => chat,
            Err(reason) => return Ok(Disposition::Skipped(reason)),
        };
        if p.is_from_me && self.is_echo(session_id, &chat, &p.message_id) {
            debug!(session_id, message_id = %p.message_id, "echo of our own send");
            return Ok(Disposition::Skipped(SkipReason::Echo));
        }
        if mirror::helpdesk_ids(&ctx.mirror, session_id, &p.message_id)
            .await?
            .is_some()
        {
            ctx.caches.handler_dedup.mark(&dedup_key);
            return Ok(Disposition::Skipped(SkipReason::AlreadySynced));
        }
        let Some(body) = body(p) else {
            return Ok(Disposition::Skipped(SkipReason::NonContent));
        };

        if let Err(e) = mirror::upsert_message(&ctx.mirror, &mirror_row(session_id, p)).await {
            warn!(session_id, message_id = %p.message_id, error = %e, "message not mirrored");
        }
        let in_reply_to = match p.quoted_message_id.as_deref() {
            Some(quoted) => mirror::helpdesk_ids(&ctx.mirror, session_id, quoted)
                .await?
                .map(|(message_id, _)| message_id),
            None => None,
        };
        let prefix = (p.is_group && !p.is_from_me).then(|| sender_prefix(p));

        let chat_ref = ChatRef {
            session_id,
            remote_id: &chat,
            push_name: p.push_name.as_deref(),
            is_from_me: p.is_from_me,
        };
        let mut keys = ctx.resolver.resolve(chat_ref).await?;
        let source_id = jid::source_id(&p.message_id);
        let existing = match ctx
            .helpdesk
            .find_message_by_source_id(keys.conversation_id, &source_id)
            .await
        {
            Err(e) if e.is_not_found() => None,
            other => other?,
        };
        if let Some(existing) = existing {
            info!(
                session_id,
                message_id = %p.message_id,
                helpdesk_message_id = existing.id,
                "message already in helpdesk, linking"
            );
            self.write_back(session_id, &p.message_id, existing.id, existing.conversation_id)
                .await;
            ctx.caches.handler_dedup.mark(&dedup_key);
            return Ok(Disposition::Skipped(SkipReason::AlreadySynced));
        }
        let message_id = match self
            .deliver(keys.conversation_id, p, &body, prefix.as_deref(), in_reply_to)
            .await
        {
            Err(e) if e.is_not_found() => {
                warn!(session_id, chat = %chat, "conversation vanished, resolving again");
                ctx.resolver.invalidate(session_id, &chat);
                keys = ctx.resolver.resolve(chat_ref).await?;
                self.deliver(keys.conversation_id, p, &body, prefix.as_deref(), in_reply_to)
                    .await?
            }
            other => other?,
        };

        self.write_back(session_id, &p.message_id, message_id, keys.conversation_id)
            .await;
        ctx.caches.handler_dedup.mark(&dedup_key);
        info!(
            session_id,
            message_id = %p.message_id,
            helpdesk_message_id = message_id,
            conversation_id = keys.conversation_id,
            "message imported"
        );
        Ok(Disposition::Applied)
    }

    async fn write_back(
        &self,
        session_id: &str,
        message_id: &str,
        helpdesk_message_id: i64,
        helpdesk_conversation_id: i64,
    ) {
        let link = HelpdeskLink {
            message_id: message_id.to_string(),
            helpdesk_message_id,
            helpdesk_conversation_id,
        };
        if let Err(e) = mirror::set_helpdesk_ids(&self.ctx.mirror, session_id, vec![link]).await {
            warn!(session_id, message_id, error = %e, "helpdesk ids not written back");
        }
    }

    fn is_echo(&self, session_id: &str, chat: &str, message_id: &str) -> bool {
        let echo = &self.ctx.caches.echo;
        echo.exists(&echo_key(session_id, chat, message_id))
            || echo.exists_for_prefix(&echo_inflight_prefix(session_id, chat))
    }

    async fn deliver(
        &self,
        conversation_id: i64,
        p: &InboundMessagePayload,
        body: &Body<'_>,
        prefix: Option<&str>,
        in_reply_to: Option<i64>,
    ) -> Result<i64, DeskbridgeError> {
        let direction = MessageDirection::from_me(p.is_from_me);
        let source_id = jid::source_id(&p.message_id);
        match body {
            Body::Text(text) => {
                let content = match prefix {
                    Some(prefix) => format!("{prefix}\n{text}"),
                    None => (*text).to_string(),
                };
                let message = NewMessage {
                    content,
                    direction,
                    source_id,
                    in_reply_to,
                };
                let created = self
                    .ctx
                    .helpdesk
                    .create_message(conversation_id, &message)
                    .await?;
                Ok(created.id)
            }
            Body::Media(media) => {
                let job = MediaUploadJob {
                    conversation_id,
                    locator: media.locator.clone(),
                    caption: media.caption.clone(),
                    sender_prefix: prefix.map(str::to_string),
                    file_name: media.file_name.clone(),
                    mime_type: media.mime_type.clone(),
                    direction,
                    source_id,
                    timestamp: timestamp(p.timestamp),
                };
                self.ctx.media.upload(&job, &self.ctx.shutdown).await
            }
        }
    }
}

#[async_trait]
impl EnvelopeHandler for InboundMessageHandler {
    async fn handle(&self, envelope: &QueueEnvelope) -> Result<(), DeskbridgeError> {
        let payload: InboundMessagePayload = envelope.decode()?;
        let session_id = envelope.session_id.as_str();
        match self.import(session_id, &payload).await {
            Ok(disposition) => {
                self.ctx.record(session_id, disposition);
                Ok(())
            }
            Err(e) => {
                self.ctx.status.record_live_error(session_id, "import_failed");
                Err(e)
            }
        }
    }
}

fn body(p: &InboundMessagePayload) -> Option<Body<'_>> {
    if let Some(media) = p.media.as_ref().filter(|m| !m.locator.trim().is_empty()) {
        return Some(Body::Media(media));
    }
    p.text
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .map(Body::Text)
}

/// `**Name:**` label for a group participant.
fn sender_prefix(p: &InboundMessagePayload) -> String {
    let sender = jid::normalize(&p.sender_id);
    let phone = jid::phone_number(&sender);
    let name = names::individual_name(None, p.push_name.as_deref(), phone.as_deref(), &sender);
    format!("**{name}:**")
}

fn mirror_row(session_id: &str, p: &InboundMessagePayload) -> MirrorMessage {
    let message_type = match &p.media {
        Some(media) => match media.mime_type.as_deref().and_then(|m| m.split('/').next()) {
            Some("image") => MirrorMessageType::Image,
            Some("video") => MirrorMessageType::Video,
            Some("audio") => MirrorMessageType::Audio,
            _ => MirrorMessageType::Document,
        },
        None => MirrorMessageType::Text,
    };
    let media = p.media.as_ref();
    MirrorMessage {
        session_id: session_id.to_string(),
        message_id: p.message_id.clone(),
        chat_jid: jid::normalize(&p.chat_id),
        sender_jid: jid::normalize(&p.sender_id),
        from_me: p.is_from_me,
        message_type,
        content: p.text.clone().or_else(|| media.and_then(|m| m.caption.clone())),
        media_locator: media.map(|m| m.locator.clone()),
        media_mime_type: media.and_then(|m| m.mime_type.clone()),
        media_file_name: media.and_then(|m| m.file_name.clone()),
        push_name: p.push_name.clone(),
        quoted_message_id: p.quoted_message_id.clone(),
        timestamp: p.timestamp,
        helpdesk_message_id: None,
        helpdesk_conversation_id: None,
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}
