// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helpdesk webhook events and their translation into outbound envelopes.
//!
//! Only agent-authored, public messages become sends. Messages the bridge
//! imported itself carry a `WAID:` source id and are ignored, which keeps a
//! protocol message from bouncing back to its own chat.

use deskbridge_core::jid;
use deskbridge_core::types::{OutboundAttachment, OutboundPayload, QuotedMessage};
use deskbridge_core::{DeskbridgeError, EnvelopeKind};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub message_type: Option<MessageType>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub conversation: Option<WebhookConversation>,
    #[serde(default)]
    pub attachments: Vec<WebhookAttachment>,
    #[serde(default)]
    pub content_attributes: Option<ContentAttributes>,
}

/// Message direction, sent either by name or by numeric code.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MessageType {
    Name(String),
    Code(i64),
}

impl MessageType {
    pub fn is_outgoing(&self) -> bool {
        match self {
            MessageType::Name(name) => name == "outgoing",
            MessageType::Code(code) => *code == 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConversation {
    pub id: i64,
    #[serde(default)]
    pub meta: Option<ConversationMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationMeta {
    #[serde(default)]
    pub sender: Option<WebhookSender>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSender {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookAttachment {
    pub data_url: String,
    #[serde(default)]
    pub file_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentAttributes {
    #[serde(default)]
    pub in_reply_to: Option<i64>,
    #[serde(default)]
    pub in_reply_to_external_id: Option<String>,
}

impl WebhookEvent {
    pub fn parse(body: &[u8]) -> Result<Self, DeskbridgeError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// The send this event asks for, or `None` when it is not an agent reply.
    pub fn into_outbound(self) -> Result<Option<(EnvelopeKind, OutboundPayload)>, DeskbridgeError> {
        if self.event != "message_created"
            || self.private
            || !self.message_type.as_ref().is_some_and(MessageType::is_outgoing)
        {
            return Ok(None);
        }
        if self
            .source_id
            .as_deref()
            .is_some_and(|s| jid::message_id_from_source(s).is_some())
        {
            return Ok(None);
        }
        let id = self
            .id
            .ok_or_else(|| DeskbridgeError::Validation("webhook message has no id".into()))?;
        let conversation = self.conversation.ok_or_else(|| {
            DeskbridgeError::Validation(format!("webhook message {id} has no conversation"))
        })?;
        let sender = conversation.meta.and_then(|m| m.sender);
        let chat_id = sender
            .and_then(|s| {
                s.identifier
                    .filter(|i| !i.is_empty())
                    .or(s.phone_number.filter(|p| !p.is_empty()))
            })
            .ok_or_else(|| {
                DeskbridgeError::Validation(format!(
                    "conversation {} has no contact identifier or phone",
                    conversation.id
                ))
            })?;

        let kind = if self.attachments.is_empty() {
            EnvelopeKind::SendText
        } else {
            EnvelopeKind::SendMedia
        };
        let quoted_message = self.content_attributes.and_then(|a| {
            (a.in_reply_to.is_some() || a.in_reply_to_external_id.is_some()).then_some(
                QuotedMessage {
                    helpdesk_message_id: a.in_reply_to,
                    source_id: a.in_reply_to_external_id,
                },
            )
        });
        let payload = OutboundPayload {
            chat_id,
            content: self.content,
            attachments: self
                .attachments
                .into_iter()
                .map(|a| OutboundAttachment {
                    url: a.data_url,
                    file_type: a.file_type,
                    file_name: None,
                })
                .collect(),
            quoted_message,
            helpdesk_message_id: id,
            helpdesk_conversation_id: conversation.id,
        };
        Ok(Some((kind, payload)))
    }
}
