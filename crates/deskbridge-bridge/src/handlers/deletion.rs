// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use deskbridge_core::types::{DeletionPayload, SkipReason};
use deskbridge_core::{DeskbridgeError, QueueEnvelope};
use deskbridge_queue::EnvelopeHandler;
use deskbridge_storage::queries::mirror;
use tracing::{debug, info};

use super::HandlerContext;

/// Deletes the helpdesk copy of a message revoked on the protocol side.
pub struct DeletionHandler {
    ctx: Arc<HandlerContext>,
}

impl DeletionHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl EnvelopeHandler for DeletionHandler {
    async fn handle(&self, envelope: &QueueEnvelope) -> Result<(), DeskbridgeError> {
        let p: DeletionPayload = envelope.decode()?;
        let session_id = envelope.session_id.as_str();
        let ctx = &self.ctx;

        let Some((message_id, conversation_id)) =
            mirror::helpdesk_ids(&ctx.mirror, session_id, &p.message_id).await?
        else {
            debug!(session_id, message_id = %p.message_id, "deleted message was never synced");
            ctx.status
                .record_live_skip(session_id, SkipReason::MissingTarget);
            return Ok(());
        };
        match ctx.helpdesk.delete_message(conversation_id, message_id).await {
            Ok(()) => {
                info!(session_id, helpdesk_message_id = message_id, "message deleted");
                Ok(())
            }
            // already gone: a redelivery after a lost ack, or deleted by an agent
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => {
                ctx.status.record_live_error(session_id, "deletion_failed");
                Err(e)
            }
        }
    }
}
