// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Operations consumed from the chat protocol client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DeskbridgeError;

/// A text message to send through the protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingText {
    pub chat_id: String,
    pub text: String,
    /// Local id of the message being replied to.
    pub quoted_message_id: Option<String>,
}

/// A media message to send through the protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMedia {
    pub chat_id: String,
    pub url: String,
    pub file_type: Option<String>,
    pub file_name: Option<String>,
    pub caption: Option<String>,
    pub quoted_message_id: Option<String>,
}

/// The subset of the protocol client the bridge calls into.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Profile picture URL of a chat, `None` when it has none or hides it.
    async fn profile_picture_url(
        &self,
        session_id: &str,
        jid: &str,
    ) -> Result<Option<String>, DeskbridgeError>;

    /// Subject of a group chat.
    async fn group_name(
        &self,
        session_id: &str,
        jid: &str,
    ) -> Result<Option<String>, DeskbridgeError>;

    /// Send a text message, returning the protocol message id.
    async fn send_text(
        &self,
        session_id: &str,
        message: &OutgoingText,
    ) -> Result<String, DeskbridgeError>;

    /// Send a media message, returning the protocol message id.
    async fn send_media(
        &self,
        session_id: &str,
        message: &OutgoingMedia,
    ) -> Result<String, DeskbridgeError>;
}

/// Maps opaque linked identities to phone numbers.
#[async_trait]
pub trait LidResolver: Send + Sync {
    /// Phone digits for a `@lid` identifier, `None` when unknown.
    async fn phone_for_lid(
        &self,
        session_id: &str,
        lid: &str,
    ) -> Result<Option<String>, DeskbridgeError>;
}
