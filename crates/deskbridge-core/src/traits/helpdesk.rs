// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Narrow contract consumed from the helpdesk REST API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::DeskbridgeError;
use crate::types::MessageDirection;

/// Status of a helpdesk conversation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Resolved,
    Pending,
    Snoozed,
}

impl ConversationStatus {
    /// The helpdesk database's integer status code.
    pub fn code(self) -> i64 {
        match self {
            ConversationStatus::Open => 0,
            ConversationStatus::Resolved => 1,
            ConversationStatus::Pending => 2,
            ConversationStatus::Snoozed => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ConversationStatus::Open),
            1 => Some(ConversationStatus::Resolved),
            2 => Some(ConversationStatus::Pending),
            3 => Some(ConversationStatus::Snoozed),
            _ => None,
        }
    }

    /// Open, pending and snoozed conversations still accept new messages.
    pub fn is_active(self) -> bool {
        !matches!(self, ConversationStatus::Resolved)
    }
}

/// A contact to find or create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewContact {
    pub inbox_id: i64,
    pub name: String,
    /// E.164 phone number; `None` for groups.
    pub phone_number: Option<String>,
    /// The remote chat identifier, unique per account.
    pub identifier: String,
    pub avatar_url: Option<String>,
}

/// Targeted update of divergent contact fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

impl ContactUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.avatar_url.is_none() && self.identifier.is_none()
    }
}

/// A helpdesk contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelpdeskContact {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default, alias = "thumbnail")]
    pub avatar_url: Option<String>,
}

/// Parameters of a find-or-create conversation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRequest {
    pub contact_id: i64,
    pub inbox_id: i64,
    /// Status given to a newly created conversation.
    pub status: ConversationStatus,
    /// Reuse any existing conversation regardless of status.
    pub auto_reopen: bool,
}

/// A helpdesk conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelpdeskConversation {
    pub id: i64,
    pub inbox_id: i64,
    pub status: ConversationStatus,
}

/// A text message to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub content: String,
    pub direction: MessageDirection,
    pub source_id: String,
    /// Helpdesk id of the message this one replies to.
    pub in_reply_to: Option<i64>,
}

/// An attachment upload.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub caption: Option<String>,
    pub direction: MessageDirection,
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A created helpdesk message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelpdeskMessage {
    pub id: i64,
    pub conversation_id: i64,
    #[serde(default)]
    pub source_id: Option<String>,
}

/// REST operations the bridge needs from the helpdesk.
///
/// Implementations must be safe for concurrent use; a single instance is
/// shared by queue handlers, the media pool and the avatar updater.
#[async_trait]
pub trait HelpdeskApi: Send + Sync {
    /// Return the contact with `contact.identifier`, creating it when absent.
    async fn find_or_create_contact(
        &self,
        contact: &NewContact,
    ) -> Result<HelpdeskContact, DeskbridgeError>;

    /// Apply a targeted update. Fails with not-found when the contact is gone.
    async fn update_contact(
        &self,
        contact_id: i64,
        update: &ContactUpdate,
    ) -> Result<(), DeskbridgeError>;

    /// Return the conversation new messages of this contact belong to.
    ///
    /// Reuses an active conversation in the inbox, or any conversation when
    /// `auto_reopen` is set; otherwise creates one. Fails with not-found when
    /// the contact is gone.
    async fn find_or_create_conversation(
        &self,
        request: &ConversationRequest,
    ) -> Result<HelpdeskConversation, DeskbridgeError>;

    /// Return the message of the conversation carrying `source_id`, if any.
    ///
    /// Lets a retried import detect a create whose response was lost.
    async fn find_message_by_source_id(
        &self,
        conversation_id: i64,
        source_id: &str,
    ) -> Result<Option<HelpdeskMessage>, DeskbridgeError>;

    async fn create_message(
        &self,
        conversation_id: i64,
        message: &NewMessage,
    ) -> Result<HelpdeskMessage, DeskbridgeError>;

    async fn upload_attachment(
        &self,
        conversation_id: i64,
        upload: &AttachmentUpload,
    ) -> Result<HelpdeskMessage, DeskbridgeError>;

    async fn delete_message(
        &self,
        conversation_id: i64,
        message_id: i64,
    ) -> Result<(), DeskbridgeError>;
}
