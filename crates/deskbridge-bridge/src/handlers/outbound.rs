// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sends of helpdesk agent replies through the protocol client.
//!
//! A send is suppressed when the same helpdesk message is already being
//! sent or was sent recently (outbound dedup), when the queue redelivers a
//! send that already went out (handler dedup), or when identical text was
//! just sent to the same chat (content hash). While a send is in flight the
//! chat carries an inflight echo marker, replaced by the protocol message id
//! once known, so the protocol's own copy of the message is not imported
//! back into the helpdesk.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use deskbridge_cache::registry::{content_hash_key, echo_inflight_key, echo_key, outbound_key};
use deskbridge_core::jid;
use deskbridge_core::traits::protocol::{OutgoingMedia, OutgoingText};
use deskbridge_core::types::{OutboundPayload, SkipReason};
use deskbridge_core::{DeskbridgeError, QueueEnvelope};
use deskbridge_queue::EnvelopeHandler;
use deskbridge_storage::queries::mirror;
use deskbridge_storage::{MirrorMessage, MirrorMessageType};
use tracing::{debug, info, warn};

use super::{Disposition, HandlerContext, outbound_chat};

pub struct SendTextHandler {
    ctx: Arc<HandlerContext>,
}

pub struct SendMediaHandler {
    ctx: Arc<HandlerContext>,
}

impl SendTextHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }

    async fn send(
        &self,
        session_id: &str,
        p: &OutboundPayload,
    ) -> Result<Disposition, DeskbridgeError> {
        let ctx = &self.ctx;
        let Some(chat) = outbound_chat(&p.chat_id) else {
            warn!(session_id, chat_id = %p.chat_id, "reply to a chat that cannot be addressed");
            return Ok(Disposition::Skipped(SkipReason::MissingTarget));
        };
        let key = outbound_key(session_id, p.helpdesk_message_id);
        if ctx.caches.handler_dedup.exists(&key) {
            debug!(session_id, key = %key, "send already delivered");
            return Ok(Disposition::Skipped(SkipReason::Duplicate));
        }
        let Some(lease) = ctx.caches.outbound_dedup.lease(key.clone()) else {
            debug!(session_id, key = %key, "send already in progress");
            return Ok(Disposition::Skipped(SkipReason::Duplicate));
        };
        let Some(text) = p.content.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(Disposition::Skipped(SkipReason::NonContent));
        };
        let hash = content_hash_key(session_id, &chat, text);
        if ctx.caches.content_hash.exists(&hash) {
            debug!(session_id, chat = %chat, "identical text sent moments ago");
            lease.keep();
            return Ok(Disposition::Skipped(SkipReason::Duplicate));
        }

        let message = OutgoingText {
            chat_id: chat.clone(),
            text: text.to_string(),
            quoted_message_id: quoted_id(p),
        };
        let sent = guarded_send(
            ctx,
            session_id,
            &chat,
            p.helpdesk_message_id,
            ctx.protocol.send_text(session_id, &message),
        )
        .await?;

        ctx.caches.content_hash.mark(&hash);
        ctx.caches.handler_dedup.mark(&key);
        lease.keep();
        remember(ctx, session_id, &chat, &sent, p, Some(text)).await;
        info!(session_id, chat = %chat, message_id = %sent, "text sent");
        Ok(Disposition::Applied)
    }
}

impl SendMediaHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }

    /// Send every attachment, the first one carrying the caption and quote.
    ///
    /// Attachments that went out before a failure are not sent again when
    /// the envelope is redelivered.
    async fn send(
        &self,
        session_id: &str,
        p: &OutboundPayload,
    ) -> Result<Disposition, DeskbridgeError> {
        let ctx = &self.ctx;
        let Some(chat) = outbound_chat(&p.chat_id) else {
            warn!(session_id, chat_id = %p.chat_id, "reply to a chat that cannot be addressed");
            return Ok(Disposition::Skipped(SkipReason::MissingTarget));
        };
        if p.attachments.is_empty() {
            return Ok(Disposition::Skipped(SkipReason::NonContent));
        }
        let key = outbound_key(session_id, p.helpdesk_message_id);
        if ctx.caches.handler_dedup.exists(&key) {
            debug!(session_id, key = %key, "send already delivered");
            return Ok(Disposition::Skipped(SkipReason::Duplicate));
        }
        let Some(lease) = ctx.caches.outbound_dedup.lease(key.clone()) else {
            debug!(session_id, key = %key, "send already in progress");
            return Ok(Disposition::Skipped(SkipReason::Duplicate));
        };

        let caption = p.content.as_deref().map(str::trim).filter(|c| !c.is_empty());
        for (index, attachment) in p.attachments.iter().enumerate() {
            let part_key = format!("{key}:{index}");
            if ctx.caches.handler_dedup.exists(&part_key) {
                continue;
            }
            let first = index == 0;
            let message = OutgoingMedia {
                chat_id: chat.clone(),
                url: attachment.url.clone(),
                file_type: attachment.file_type.clone(),
                file_name: attachment.file_name.clone(),
                caption: caption.filter(|_| first).map(str::to_string),
                quoted_message_id: quoted_id(p).filter(|_| first),
            };
            let sent = guarded_send(
                ctx,
                session_id,
                &chat,
                p.helpdesk_message_id,
                ctx.protocol.send_media(session_id, &message),
            )
            .await?;
            ctx.caches.handler_dedup.mark(&part_key);
            remember(ctx, session_id, &chat, &sent, p, message.caption.as_deref()).await;
            debug!(session_id, chat = %chat, index, message_id = %sent, "attachment sent");
        }

        ctx.caches.handler_dedup.mark(&key);
        lease.keep();
        info!(session_id, chat = %chat, attachments = p.attachments.len(), "media sent");
        Ok(Disposition::Applied)
    }
}

#[async_trait]
impl EnvelopeHandler for SendTextHandler {
    async fn handle(&self, envelope: &QueueEnvelope) -> Result<(), DeskbridgeError> {
        let payload: OutboundPayload = envelope.decode()?;
        let session_id = envelope.session_id.as_str();
        match self.send(session_id, &payload).await {
            Ok(disposition) => {
                self.ctx.record(session_id, disposition);
                Ok(())
            }
            Err(e) => {
                self.ctx.status.record_live_error(session_id, "send_failed");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl EnvelopeHandler for SendMediaHandler {
    async fn handle(&self, envelope: &QueueEnvelope) -> Result<(), DeskbridgeError> {
        let payload: OutboundPayload = envelope.decode()?;
        let session_id = envelope.session_id.as_str();
        match self.send(session_id, &payload).await {
            Ok(disposition) => {
                self.ctx.record(session_id, disposition);
                Ok(())
            }
            Err(e) => {
                self.ctx.status.record_live_error(session_id, "send_failed");
                Err(e)
            }
        }
    }
}

/// Run `send` with the chat's inflight echo marker set.
///
/// On success the protocol message id is marked before the inflight marker
/// is cleared, leaving no window in which the echo would be imported.
async fn guarded_send<F>(
    ctx: &HandlerContext,
    session_id: &str,
    chat: &str,
    helpdesk_message_id: i64,
    send: F,
) -> Result<String, DeskbridgeError>
where
    F: Future<Output = Result<String, DeskbridgeError>>,
{
    let inflight = echo_inflight_key(session_id, chat, &helpdesk_message_id.to_string());
    ctx.caches.echo.mark(&inflight);
    let result = send.await;
    if let Ok(message_id) = &result {
        ctx.caches.echo.mark(&echo_key(session_id, chat, message_id));
    }
    ctx.caches.echo.clear(&inflight);
    result
}

fn quoted_id(p: &OutboundPayload) -> Option<String> {
    p.quoted_message
        .as_ref()
        .and_then(|q| q.source_id.as_deref())
        .and_then(jid::message_id_from_source)
        .map(str::to_string)
}

/// Mirror the sent message linked to its helpdesk copy, so later quotes,
/// reactions and deletions on the protocol side find it.
async fn remember(
    ctx: &HandlerContext,
    session_id: &str,
    chat: &str,
    message_id: &str,
    p: &OutboundPayload,
    content: Option<&str>,
) {
    let row = MirrorMessage {
        session_id: session_id.to_string(),
        message_id: message_id.to_string(),
        chat_jid: chat.to_string(),
        sender_jid: chat.to_string(),
        from_me: true,
        message_type: if p.attachments.is_empty() {
            MirrorMessageType::Text
        } else {
            MirrorMessageType::Document
        },
        content: content.map(str::to_string),
        media_locator: None,
        media_mime_type: None,
        media_file_name: None,
        push_name: None,
        quoted_message_id: quoted_id(p),
        timestamp: Utc::now().timestamp(),
        helpdesk_message_id: Some(p.helpdesk_message_id),
        helpdesk_conversation_id: Some(p.helpdesk_conversation_id),
    };
    if let Err(e) = mirror::upsert_message(&ctx.mirror, &row).await {
        warn!(session_id, message_id, error = %e, "sent message not mirrored");
    }
}
