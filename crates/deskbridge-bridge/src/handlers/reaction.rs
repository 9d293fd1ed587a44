// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use deskbridge_cache::registry::echo_key;
use deskbridge_core::jid;
use deskbridge_core::traits::helpdesk::NewMessage;
use deskbridge_core::types::{MessageDirection, ReactionPayload, SkipReason};
use deskbridge_core::{DeskbridgeError, QueueEnvelope};
use deskbridge_queue::EnvelopeHandler;
use deskbridge_storage::queries::mirror;
use tracing::debug;

use super::{Disposition, HandlerContext};

/// Posts a reaction as a reply to the message it reacts to.
///
/// Reactions to messages that never reached the helpdesk are skipped, as
/// are removals (an empty emoji).
pub struct ReactionHandler {
    ctx: Arc<HandlerContext>,
}

impl ReactionHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }

    async fn apply(
        &self,
        session_id: &str,
        p: &ReactionPayload,
    ) -> Result<Disposition, DeskbridgeError> {
        let ctx = &self.ctx;
        let dedup_key = format!("reaction:{}", echo_key(session_id, &p.chat_id, &p.message_id));
        if ctx.caches.handler_dedup.exists(&dedup_key) {
            return Ok(Disposition::Skipped(SkipReason::Duplicate));
        }
        if let Err(reason) = ctx.remote_chat(session_id, &p.chat_id).await? {
            return Ok(Disposition::Skipped(reason));
        }
        let emoji = p.emoji.trim();
        if emoji.is_empty() {
            return Ok(Disposition::Skipped(SkipReason::NonContent));
        }
        let Some((target, conversation_id)) =
            mirror::helpdesk_ids(&ctx.mirror, session_id, &p.target_message_id).await?
        else {
            debug!(session_id, target = %p.target_message_id, "reaction target never synced");
            return Ok(Disposition::Skipped(SkipReason::MissingTarget));
        };

        let message = NewMessage {
            content: emoji.to_string(),
            direction: MessageDirection::from_me(p.is_from_me),
            source_id: jid::source_id(&p.message_id),
            in_reply_to: Some(target),
        };
        match ctx.helpdesk.create_message(conversation_id, &message).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                debug!(session_id, conversation_id, "reaction target conversation is gone");
                return Ok(Disposition::Skipped(SkipReason::MissingTarget));
            }
            Err(e) => return Err(e),
        }
        ctx.caches.handler_dedup.mark(&dedup_key);
        Ok(Disposition::Applied)
    }
}

#[async_trait]
impl EnvelopeHandler for ReactionHandler {
    async fn handle(&self, envelope: &QueueEnvelope) -> Result<(), DeskbridgeError> {
        let payload: ReactionPayload = envelope.decode()?;
        let session_id = envelope.session_id.as_str();
        match self.apply(session_id, &payload).await {
            Ok(disposition) => {
                self.ctx.record(session_id, disposition);
                Ok(())
            }
            Err(e) => {
                self.ctx.status.record_live_error(session_id, "reaction_failed");
                Err(e)
            }
        }
    }
}
