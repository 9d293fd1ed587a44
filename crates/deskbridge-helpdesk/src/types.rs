// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire types of the helpdesk REST API.

use deskbridge_core::traits::helpdesk::{
    ConversationStatus, HelpdeskContact, HelpdeskConversation, HelpdeskMessage,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub(crate) struct ContactSearchResponse {
    #[serde(default)]
    pub payload: Vec<HelpdeskContact>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContactCreateResponse {
    pub payload: ContactEnvelope,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContactEnvelope {
    pub contact: HelpdeskContact,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateContactBody<'a> {
    pub inbox_id: i64,
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<&'a str>,
    pub identifier: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConversationListResponse {
    #[serde(default)]
    pub payload: Vec<HelpdeskConversation>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateConversationBody {
    pub contact_id: i64,
    pub inbox_id: i64,
    pub status: ConversationStatus,
}

#[derive(Debug, Serialize)]
pub(crate) struct ToggleStatusBody {
    pub status: ConversationStatus,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReplyAttributes {
    pub in_reply_to: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateMessageBody<'a> {
    pub content: &'a str,
    pub message_type: &'a str,
    pub source_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_attributes: Option<ReplyAttributes>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessageListResponse {
    #[serde(default)]
    pub payload: Vec<HelpdeskMessage>,
}

/// Message responses come bare or wrapped, depending on the endpoint version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum MessageResponse {
    Bare(HelpdeskMessage),
    Wrapped { payload: HelpdeskMessage },
}

impl MessageResponse {
    pub fn into_message(self) -> HelpdeskMessage {
        match self {
            MessageResponse::Bare(m) | MessageResponse::Wrapped { payload: m } => m,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ApiErrorBody {
    pub fn describe(self) -> Option<String> {
        self.message.or(self.error)
    }
}
