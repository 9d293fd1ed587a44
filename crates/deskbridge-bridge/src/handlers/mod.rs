// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue handlers, one per envelope kind.
//!
//! Inbound kinds write single events to the helpdesk through the
//! [`ConversationResolver`]; outbound kinds send through the protocol client.
//! Every handler is idempotent under redelivery: the caches in
//! [`CacheRegistry`] and the helpdesk ids written back onto the mirror decide
//! whether an event was already applied.

mod deletion;
mod inbound;
mod outbound;
mod reaction;

use std::sync::Arc;

use deskbridge_cache::CacheRegistry;
use deskbridge_core::jid::{self, ChatKind};
use deskbridge_core::types::SkipReason;
use deskbridge_core::{DeskbridgeError, HelpdeskApi, LidResolver, ProtocolClient};
use deskbridge_storage::Database;
use deskbridge_sync::{ConversationResolver, MediaUploadPool, SyncStatusTracker};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use deletion::DeletionHandler;
pub use inbound::InboundMessageHandler;
pub use outbound::{SendMediaHandler, SendTextHandler};
pub use reaction::ReactionHandler;

/// Everything a handler may touch, shared by all of them.
pub struct HandlerContext {
    pub mirror: Database,
    pub caches: Arc<CacheRegistry>,
    pub status: Arc<SyncStatusTracker>,
    pub helpdesk: Arc<dyn HelpdeskApi>,
    pub protocol: Arc<dyn ProtocolClient>,
    pub lids: Arc<dyn LidResolver>,
    pub resolver: Arc<ConversationResolver>,
    pub media: Arc<MediaUploadPool>,
    pub shutdown: CancellationToken,
}

/// What a handler did with an event it did not fail on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Applied,
    Skipped(SkipReason),
}

impl HandlerContext {
    pub(crate) fn record(&self, session_id: &str, disposition: Disposition) {
        match disposition {
            Disposition::Applied => self.status.record_live_import(session_id),
            Disposition::Skipped(reason) => self.status.record_live_skip(session_id, reason),
        }
    }

    /// Map a protocol chat id to the identifier its helpdesk contact uses.
    ///
    /// Linked identities are translated to the phone JID; chats that can
    /// never have a helpdesk contact come back as the skip reason.
    pub(crate) async fn remote_chat(
        &self,
        session_id: &str,
        chat_id: &str,
    ) -> Result<Result<String, SkipReason>, DeskbridgeError> {
        let kind = jid::classify(chat_id);
        if kind.is_excluded() || kind == ChatKind::Unknown {
            return Ok(Err(SkipReason::ExcludedChat));
        }
        let normalized = jid::normalize(chat_id);
        Ok(match kind {
            ChatKind::Group => Ok(normalized),
            ChatKind::LinkedIdentity => {
                match self.lids.phone_for_lid(session_id, &normalized).await? {
                    Some(digits) => Ok(jid::individual_jid(&digits)),
                    None => {
                        debug!(chat_id, "linked identity without a phone mapping");
                        Err(SkipReason::NoPhone)
                    }
                }
            }
            _ if jid::phone_number(&normalized).is_some() => Ok(normalized),
            _ => Err(SkipReason::NoPhone),
        })
    }
}

/// The protocol address of a helpdesk-side chat id, which may be a JID or
/// a bare phone number.
pub(crate) fn outbound_chat(chat_id: &str) -> Option<String> {
    let chat_id = chat_id.trim();
    if chat_id.contains('@') {
        let kind = jid::classify(chat_id);
        if kind.is_excluded() || kind == ChatKind::Unknown {
            return None;
        }
        return Some(jid::normalize(chat_id));
    }
    jid::digits_if_phone(chat_id).map(|digits| jid::individual_jid(&digits))
}
