// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Remote chat identifier (JID) classification and phone number extraction.
//!
//! A JID has the shape `<user>[:<device>]@<server>`. The server part decides
//! what kind of chat the identifier addresses; only individual chats carry a
//! phone number in their user part. Linked identities (`@lid`) are opaque and
//! must be mapped to a phone number through a [`LidResolver`](crate::LidResolver)
//! before they can be matched against helpdesk contacts.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Prefix of every helpdesk message `source_id` written by deskbridge.
pub const SOURCE_ID_PREFIX: &str = "WAID:";

const SERVER_INDIVIDUAL: &str = "s.whatsapp.net";
const SERVER_LEGACY_INDIVIDUAL: &str = "c.us";
const SERVER_GROUP: &str = "g.us";
const SERVER_BROADCAST: &str = "broadcast";
const SERVER_CHANNEL: &str = "newsletter";
const SERVER_LID: &str = "lid";
const STATUS_USER: &str = "status";

/// Phone numbers shorter or longer than this are treated as unresolvable.
const MIN_PHONE_DIGITS: usize = 7;
const MAX_PHONE_DIGITS: usize = 15;

/// What kind of chat a remote identifier addresses.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Individual,
    Group,
    Broadcast,
    Status,
    Channel,
    LinkedIdentity,
    Unknown,
}

impl ChatKind {
    /// Broadcast lists, status updates and channels are never bridged.
    pub fn is_excluded(self) -> bool {
        matches!(
            self,
            ChatKind::Broadcast | ChatKind::Status | ChatKind::Channel | ChatKind::Unknown
        )
    }
}

/// Classify a remote identifier by its server part.
pub fn classify(jid: &str) -> ChatKind {
    let Some((user, server)) = jid.rsplit_once('@') else {
        return ChatKind::Unknown;
    };
    match server {
        SERVER_INDIVIDUAL | SERVER_LEGACY_INDIVIDUAL => ChatKind::Individual,
        SERVER_GROUP => ChatKind::Group,
        SERVER_BROADCAST if user == STATUS_USER => ChatKind::Status,
        SERVER_BROADCAST => ChatKind::Broadcast,
        SERVER_CHANNEL => ChatKind::Channel,
        SERVER_LID => ChatKind::LinkedIdentity,
        _ => ChatKind::Unknown,
    }
}

/// Whether the identifier addresses a group chat.
pub fn is_group(jid: &str) -> bool {
    classify(jid) == ChatKind::Group
}

/// The user part of a JID with any device suffix removed.
///
/// `5511999990000:12@s.whatsapp.net` yields `5511999990000`.
pub fn user_part(jid: &str) -> &str {
    let user = jid.split_once('@').map_or(jid, |(user, _)| user);
    user.split_once(':').map_or(user, |(user, _)| user)
}

/// Normalize an identifier to its device-less form (`user@server`).
pub fn normalize(jid: &str) -> String {
    match jid.rsplit_once('@') {
        Some((_, server)) => format!("{}@{server}", user_part(jid)),
        None => jid.to_string(),
    }
}

/// Extract the phone number (digits only) of an individual chat identifier.
///
/// Returns `None` for groups, linked identities and anything whose user part
/// is not a plausible phone number.
pub fn phone_number(jid: &str) -> Option<String> {
    if classify(jid) != ChatKind::Individual {
        return None;
    }
    digits_if_phone(user_part(jid))
}

/// Validate a bare phone string, returning its digits.
///
/// Accepts an optional leading `+`; anything else non-numeric is rejected.
pub fn digits_if_phone(raw: &str) -> Option<String> {
    let digits = raw.strip_prefix('+').unwrap_or(raw);
    if digits.len() < MIN_PHONE_DIGITS
        || digits.len() > MAX_PHONE_DIGITS
        || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    Some(digits.to_string())
}

/// Format digits as an E.164 phone number.
pub fn e164(digits: &str) -> String {
    format!("+{}", digits.trim_start_matches('+'))
}

/// The individual-chat identifier for a phone number.
pub fn individual_jid(digits: &str) -> String {
    format!("{}@{SERVER_INDIVIDUAL}", digits.trim_start_matches('+'))
}

/// Helpdesk idempotency key for a local message id.
pub fn source_id(message_id: &str) -> String {
    format!("{SOURCE_ID_PREFIX}{message_id}")
}

/// Recover the local message id from a helpdesk `source_id`.
pub fn message_id_from_source(source_id: &str) -> Option<&str> {
    source_id.strip_prefix(SOURCE_ID_PREFIX)
}
