// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types of the local database.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle of a queue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Processing,
    Acked,
}

/// An envelope claimed by a consumer fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueDelivery {
    /// Row id; the handle for ack/nak/dead-letter.
    pub id: i64,
    pub stream: String,
    pub envelope_id: String,
    pub kind: String,
    pub session_id: String,
    /// The serialized envelope exactly as published.
    pub payload: String,
    /// Deliveries including this one (1 on first delivery).
    pub deliveries: u32,
}

/// A preserved dead-lettered envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: i64,
    pub queue_message_id: i64,
    pub original_subject: String,
    pub envelope_id: Option<String>,
    pub original_envelope: String,
    pub failure_reason: String,
    pub failed_at: String,
}

/// Row counts of one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    pub stream: String,
    pub pending: u64,
    pub processing: u64,
    pub acked: u64,
    pub dead_lettered: u64,
}

/// A contact as known to the protocol client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MirrorContact {
    pub session_id: String,
    pub jid: String,
    /// Name from the address book entry.
    pub first_name: Option<String>,
    pub full_name: Option<String>,
    /// Self-chosen display name; not evidence of an address book entry.
    pub push_name: Option<String>,
    /// Verified business name.
    pub business_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MirrorGroup {
    pub session_id: String,
    pub jid: String,
    pub name: Option<String>,
}

/// Protocol-level message type as stored in the mirror.
///
/// Unrecognised types round-trip through [`MirrorMessageType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorMessageType {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Location,
    Contact,
    Reaction,
    Protocol,
    System,
    Other(String),
}

impl MirrorMessageType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Sticker => "sticker",
            Self::Location => "location",
            Self::Contact => "contact",
            Self::Reaction => "reaction",
            Self::Protocol => "protocol",
            Self::System => "system",
            Self::Other(other) => other,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "text" | "conversation" | "extended_text" => Self::Text,
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" | "ptt" => Self::Audio,
            "document" => Self::Document,
            "sticker" => Self::Sticker,
            "location" => Self::Location,
            "contact" => Self::Contact,
            "reaction" => Self::Reaction,
            "protocol" => Self::Protocol,
            "system" => Self::System,
            _ => Self::Other(raw.to_string()),
        }
    }

    /// Carries an attachment that must go through the upload pool.
    pub fn is_media(&self) -> bool {
        matches!(
            self,
            Self::Image | Self::Video | Self::Audio | Self::Document | Self::Sticker
        )
    }

    /// Protocol stubs, reactions and system notices never become helpdesk messages.
    pub fn is_content(&self) -> bool {
        !matches!(
            self,
            Self::Reaction | Self::Protocol | Self::System | Self::Other(_)
        )
    }
}

/// A message in the protocol client's mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorMessage {
    pub session_id: String,
    pub message_id: String,
    pub chat_jid: String,
    pub sender_jid: String,
    pub from_me: bool,
    pub message_type: MirrorMessageType,
    /// Text body, or the caption of a media message.
    pub content: Option<String>,
    pub media_locator: Option<String>,
    pub media_mime_type: Option<String>,
    pub media_file_name: Option<String>,
    pub push_name: Option<String>,
    pub quoted_message_id: Option<String>,
    /// Unix seconds.
    pub timestamp: i64,
    pub helpdesk_message_id: Option<i64>,
    pub helpdesk_conversation_id: Option<i64>,
}

/// Helpdesk ids written back onto a mirror message after it was synced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelpdeskLink {
    pub message_id: String,
    pub helpdesk_message_id: i64,
    pub helpdesk_conversation_id: i64,
}

/// A synced message that quotes another local message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedReference {
    pub helpdesk_message_id: i64,
    pub quoted_message_id: String,
}
