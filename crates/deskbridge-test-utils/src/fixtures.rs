// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Builders for mirror rows used across integration tests.

use chrono::Utc;
use deskbridge_storage::{MirrorContact, MirrorMessage, MirrorMessageType};

/// Unix seconds `days` days before now.
pub fn days_ago(days: i64) -> i64 {
    Utc::now().timestamp() - days * 86_400
}

/// A contact with an address book entry.
pub fn saved_contact(session_id: &str, jid: &str, name: &str) -> MirrorContact {
    MirrorContact {
        session_id: session_id.to_string(),
        jid: jid.to_string(),
        first_name: Some(name.to_string()),
        full_name: Some(name.to_string()),
        push_name: None,
        business_name: None,
    }
}

/// A contact only known by the name they chose themselves.
pub fn unsaved_contact(session_id: &str, jid: &str, push_name: &str) -> MirrorContact {
    MirrorContact {
        session_id: session_id.to_string(),
        jid: jid.to_string(),
        first_name: None,
        full_name: Some(push_name.to_string()),
        push_name: Some(push_name.to_string()),
        business_name: None,
    }
}

pub fn text_message(
    session_id: &str,
    message_id: &str,
    chat_jid: &str,
    from_me: bool,
    timestamp: i64,
    text: &str,
) -> MirrorMessage {
    MirrorMessage {
        session_id: session_id.to_string(),
        message_id: message_id.to_string(),
        chat_jid: chat_jid.to_string(),
        sender_jid: chat_jid.to_string(),
        from_me,
        message_type: MirrorMessageType::Text,
        content: Some(text.to_string()),
        media_locator: None,
        media_mime_type: None,
        media_file_name: None,
        push_name: None,
        quoted_message_id: None,
        timestamp,
        helpdesk_message_id: None,
        helpdesk_conversation_id: None,
    }
}

/// An image message whose bytes live at `locator`.
pub fn image_message(
    session_id: &str,
    message_id: &str,
    chat_jid: &str,
    timestamp: i64,
    locator: &str,
) -> MirrorMessage {
    MirrorMessage {
        message_type: MirrorMessageType::Image,
        content: None,
        media_locator: Some(locator.to_string()),
        media_mime_type: Some("image/jpeg".to_string()),
        media_file_name: Some(format!("{message_id}.jpg")),
        ..text_message(session_id, message_id, chat_jid, false, timestamp, "")
    }
}

/// `message` replying to `quoted_id`.
pub fn quoting(mut message: MirrorMessage, quoted_id: &str) -> MirrorMessage {
    message.quoted_message_id = Some(quoted_id.to_string());
    message
}
