// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types carried between the queue, the reconciliation engine and the bridge.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::DeskbridgeError;

// --- Queue ---

/// Subject under which exhausted envelopes are preserved.
pub const DEAD_LETTER_SUBJECT: &str = "deskbridge.dead_letter";

/// The two durable streams of the queue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    /// Protocol events flowing towards the helpdesk.
    Inbound,
    /// Helpdesk-originated sends flowing towards the protocol.
    Outbound,
}

impl Stream {
    pub const ALL: [Stream; 2] = [Stream::Inbound, Stream::Outbound];

    /// Fully qualified subject name, also used as the durable consumer name.
    pub fn subject(self) -> &'static str {
        match self {
            Stream::Inbound => "deskbridge.inbound",
            Stream::Outbound => "deskbridge.outbound",
        }
    }
}

/// Closed set of message kinds carried by the queue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    IncomingMessage,
    OutgoingMessageSent,
    Reaction,
    Deletion,
    SendText,
    SendMedia,
}

impl EnvelopeKind {
    pub const ALL: [EnvelopeKind; 6] = [
        EnvelopeKind::IncomingMessage,
        EnvelopeKind::OutgoingMessageSent,
        EnvelopeKind::Reaction,
        EnvelopeKind::Deletion,
        EnvelopeKind::SendText,
        EnvelopeKind::SendMedia,
    ];

    /// The stream this kind travels on.
    pub fn stream(self) -> Stream {
        match self {
            EnvelopeKind::SendText | EnvelopeKind::SendMedia => Stream::Outbound,
            _ => Stream::Inbound,
        }
    }
}

/// A typed, immutable queue message.
///
/// `delivery_attempt` is stamped by the consumer from the stream's delivery
/// counter when the envelope is handed to a handler; the stored bytes keep
/// the value set at publish time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "retries", default)]
    pub delivery_attempt: u32,
    #[serde(rename = "data")]
    pub payload: serde_json::Value,
}

impl QueueEnvelope {
    /// Build a fresh envelope around a kind-specific payload.
    pub fn new<T: Serialize>(
        kind: EnvelopeKind,
        session_id: impl Into<String>,
        payload: &T,
    ) -> Result<Self, DeskbridgeError> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            session_id: session_id.into(),
            timestamp: Utc::now(),
            delivery_attempt: 0,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Decode the payload into its kind-specific type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DeskbridgeError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Terminal record for an envelope that exhausted its delivery budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub original_subject: String,
    /// The original envelope, kept as raw JSON so undecodable payloads survive too.
    pub original_envelope: serde_json::Value,
    pub failure_reason: String,
    pub failed_at: DateTime<Utc>,
}

// --- Queue payloads ---

/// Media carried by a protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAttachment {
    /// An http(s) URL or a local file path.
    pub locator: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// Payload of `incoming_message` and `outgoing_message_sent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessagePayload {
    pub message_id: String,
    pub chat_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub push_name: Option<String>,
    pub is_from_me: bool,
    pub is_group: bool,
    #[serde(default, with = "base64_bytes")]
    pub raw_protocol_bytes: Option<Vec<u8>>,
    #[serde(default)]
    pub full_event_json: Option<serde_json::Value>,
    /// Normalized text content (body or caption-less text).
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media: Option<MediaAttachment>,
    /// Local id of the message this one quotes.
    #[serde(default)]
    pub quoted_message_id: Option<String>,
    /// Protocol timestamp, unix seconds.
    pub timestamp: i64,
}

/// Payload of `reaction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionPayload {
    pub message_id: String,
    pub target_message_id: String,
    pub chat_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub push_name: Option<String>,
    /// Empty when a reaction was removed.
    pub emoji: String,
    pub is_from_me: bool,
    pub timestamp: i64,
}

/// Payload of `deletion`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionPayload {
    pub message_id: String,
    pub chat_id: String,
    pub is_from_me: bool,
}

/// Attachment of a helpdesk-originated message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundAttachment {
    pub url: String,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// The helpdesk message an outbound message replies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotedMessage {
    #[serde(default)]
    pub helpdesk_message_id: Option<i64>,
    #[serde(default)]
    pub source_id: Option<String>,
}

/// Payload of `send_text` and `send_media`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundPayload {
    pub chat_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Vec<OutboundAttachment>,
    #[serde(default)]
    pub quoted_message: Option<QuotedMessage>,
    pub helpdesk_message_id: i64,
    pub helpdesk_conversation_id: i64,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|e| STANDARD.decode(e).map_err(serde::de::Error::custom))
            .transpose()
    }
}

// --- Reconciliation records ---

/// Helpdesk contact and conversation resolved for one remote chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatForeignKeys {
    pub contact_id: i64,
    pub conversation_id: i64,
}

/// One distinct remote chat seen in a sync batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneTimestampRecord {
    /// Phone digits for individuals, the group JID for groups.
    pub phone_or_group_id: String,
    pub display_name: String,
    pub remote_identifier: String,
    pub is_group: bool,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Direction of a helpdesk message relative to the helpdesk agent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Incoming,
    Outgoing,
}

impl MessageDirection {
    pub fn from_me(is_from_me: bool) -> Self {
        if is_from_me {
            MessageDirection::Outgoing
        } else {
            MessageDirection::Incoming
        }
    }

    /// The helpdesk's integer `message_type` code.
    pub fn code(self) -> i64 {
        match self {
            MessageDirection::Incoming => 0,
            MessageDirection::Outgoing => 1,
        }
    }
}

/// Author type of a helpdesk message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum SenderType {
    Contact,
    User,
}

/// A text message ready for bulk insertion into the helpdesk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageInsertRecord {
    pub content: String,
    pub conversation_id: i64,
    pub direction: MessageDirection,
    pub sender_type: Option<SenderType>,
    pub sender_id: Option<i64>,
    /// `"WAID:" + local message id`; unique per helpdesk account.
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    pub quoted_source_id: Option<String>,
}

/// One attachment to upload through the media pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaUploadJob {
    pub conversation_id: i64,
    /// An http(s) URL or a local file path.
    pub locator: String,
    pub caption: Option<String>,
    /// Prepended to the caption, e.g. the sender name inside group chats.
    pub sender_prefix: Option<String>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub direction: MessageDirection,
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of one media upload, correlated to its input position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaUploadResult {
    pub index: usize,
    pub source_id: String,
    pub success: bool,
    pub message_id: Option<i64>,
    pub error: Option<String>,
}

// --- Sync statistics ---

/// Why an item was skipped rather than imported.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Group,
    ExcludedChat,
    NoPhone,
    NotSaved,
    Duplicate,
    AlreadyExists,
    AlreadySynced,
    TooOld,
    NonContent,
    MissingTarget,
    Echo,
}

/// Aggregate counters for one sync phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    pub imported: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errored: u64,
    pub skipped_by_reason: BTreeMap<SkipReason, u64>,
    pub errored_by_reason: BTreeMap<String, u64>,
}

impl SyncStats {
    pub fn skip(&mut self, reason: SkipReason) {
        self.skip_n(reason, 1);
    }

    pub fn skip_n(&mut self, reason: SkipReason, n: u64) {
        if n == 0 {
            return;
        }
        self.skipped += n;
        *self.skipped_by_reason.entry(reason).or_default() += n;
    }

    pub fn error_n(&mut self, reason: &str, n: u64) {
        if n == 0 {
            return;
        }
        self.errored += n;
        *self.errored_by_reason.entry(reason.to_string()).or_default() += n;
    }

    pub fn skipped_for(&self, reason: SkipReason) -> u64 {
        self.skipped_by_reason.get(&reason).copied().unwrap_or(0)
    }

    /// Total items the phase looked at.
    pub fn total(&self) -> u64 {
        self.imported + self.updated + self.skipped + self.errored
    }
}

/// Lifecycle of a session's sync.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Last-known sync status of one session, as seen by status pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub session_id: String,
    pub state: SyncState,
    pub contacts: SyncStats,
    pub messages: SyncStats,
    /// Single events imported through the queue since the status was created.
    pub live: SyncStats,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncStatus {
    pub fn idle(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: SyncState::Idle,
            contacts: SyncStats::default(),
            messages: SyncStats::default(),
            live: SyncStats::default(),
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}
