// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory helpdesk for deterministic testing.
//!
//! `MockHelpdesk` implements `HelpdeskApi` over plain vectors and records
//! every call, so tests can assert on created contacts, conversations,
//! messages and uploads without a helpdesk server.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use deskbridge_core::traits::helpdesk::{
    AttachmentUpload, ContactUpdate, ConversationRequest, ConversationStatus, HelpdeskContact,
    HelpdeskConversation, HelpdeskMessage, NewContact, NewMessage,
};
use deskbridge_core::types::MessageDirection;
use deskbridge_core::{DeskbridgeError, HelpdeskApi};

/// A message or attachment the mock received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub content: Option<String>,
    pub direction: MessageDirection,
    pub source_id: String,
    pub in_reply_to: Option<i64>,
    /// `(file name, mime type, size)` for uploads.
    pub attachment: Option<(String, String, usize)>,
}

#[derive(Debug, Clone)]
struct StoredConversation {
    contact_id: i64,
    conversation: HelpdeskConversation,
}

#[derive(Default)]
struct State {
    next_id: i64,
    contacts: Vec<HelpdeskContact>,
    conversations: Vec<StoredConversation>,
    messages: Vec<RecordedMessage>,
    contact_updates: Vec<(i64, ContactUpdate)>,
    deleted: Vec<(i64, i64)>,
    contacts_created: usize,
    conversations_created: usize,
    message_failures: VecDeque<u16>,
    lost_responses: usize,
    failing_uploads: HashSet<String>,
    uploads_in_flight: usize,
    max_uploads_in_flight: usize,
    upload_starts: Vec<Instant>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn take_lost_response(&mut self) -> Result<(), DeskbridgeError> {
        if self.lost_responses == 0 {
            return Ok(());
        }
        self.lost_responses -= 1;
        Err(DeskbridgeError::Timeout {
            duration: Duration::from_secs(30),
        })
    }
}

/// A mock helpdesk that keeps everything in memory.
pub struct MockHelpdesk {
    state: Mutex<State>,
    contact_delay: Duration,
    upload_delay: Duration,
}

impl MockHelpdesk {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            contact_delay: Duration::ZERO,
            upload_delay: Duration::ZERO,
        }
    }

    /// Delay between the contact lookup and its creation, widening the
    /// window in which concurrent callers can race.
    pub fn with_contact_delay(mut self, delay: Duration) -> Self {
        self.contact_delay = delay;
        self
    }

    /// Time each upload takes once started.
    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    /// Fail the next `n` message creations with HTTP `status`.
    pub async fn fail_next_messages(&self, n: usize, status: u16) {
        let mut state = self.state.lock().await;
        state.message_failures.extend(std::iter::repeat_n(status, n));
    }

    /// Store the next `n` messages or uploads, then fail the call with a
    /// timeout as if the response never arrived.
    pub async fn lose_next_responses(&self, n: usize) {
        self.state.lock().await.lost_responses += n;
    }

    /// Reject every upload carrying `source_id`.
    pub async fn fail_upload(&self, source_id: &str) {
        self.state
            .lock()
            .await
            .failing_uploads
            .insert(source_id.to_string());
    }

    /// Seed an existing contact, returning its id.
    pub async fn insert_contact(&self, identifier: &str, name: &str) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.contacts.push(HelpdeskContact {
            id,
            name: Some(name.to_string()),
            phone_number: None,
            identifier: Some(identifier.to_string()),
            avatar_url: None,
        });
        id
    }

    /// Delete a contact and its conversations out-of-band.
    pub async fn remove_contact(&self, contact_id: i64) {
        let mut state = self.state.lock().await;
        state.contacts.retain(|c| c.id != contact_id);
        state.conversations.retain(|c| c.contact_id != contact_id);
    }

    /// Set the status of a conversation, as an agent resolving it would.
    pub async fn set_conversation_status(&self, conversation_id: i64, status: ConversationStatus) {
        let mut state = self.state.lock().await;
        for stored in &mut state.conversations {
            if stored.conversation.id == conversation_id {
                stored.conversation.status = status;
            }
        }
    }

    pub async fn contacts(&self) -> Vec<HelpdeskContact> {
        self.state.lock().await.contacts.clone()
    }

    pub async fn contacts_created(&self) -> usize {
        self.state.lock().await.contacts_created
    }

    pub async fn conversations_created(&self) -> usize {
        self.state.lock().await.conversations_created
    }

    pub async fn conversations(&self) -> Vec<HelpdeskConversation> {
        self.state
            .lock()
            .await
            .conversations
            .iter()
            .map(|c| c.conversation.clone())
            .collect()
    }

    pub async fn messages(&self) -> Vec<RecordedMessage> {
        self.state.lock().await.messages.clone()
    }

    pub async fn contact_updates(&self) -> Vec<(i64, ContactUpdate)> {
        self.state.lock().await.contact_updates.clone()
    }

    /// `(conversation id, message id)` pairs passed to `delete_message`.
    pub async fn deleted(&self) -> Vec<(i64, i64)> {
        self.state.lock().await.deleted.clone()
    }

    /// Highest number of uploads that were running at the same time.
    pub async fn max_uploads_in_flight(&self) -> usize {
        self.state.lock().await.max_uploads_in_flight
    }

    /// Start instants of every upload, in call order.
    pub async fn upload_starts(&self) -> Vec<Instant> {
        self.state.lock().await.upload_starts.clone()
    }
}

impl Default for MockHelpdesk {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HelpdeskApi for MockHelpdesk {
    async fn find_or_create_contact(
        &self,
        contact: &NewContact,
    ) -> Result<HelpdeskContact, DeskbridgeError> {
        let found = {
            let state = self.state.lock().await;
            state
                .contacts
                .iter()
                .find(|c| c.identifier.as_deref() == Some(contact.identifier.as_str()))
                .cloned()
        };
        if let Some(existing) = found {
            return Ok(existing);
        }
        if !self.contact_delay.is_zero() {
            tokio::time::sleep(self.contact_delay).await;
        }
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let created = HelpdeskContact {
            id,
            name: Some(contact.name.clone()),
            phone_number: contact.phone_number.clone(),
            identifier: Some(contact.identifier.clone()),
            avatar_url: contact.avatar_url.clone(),
        };
        state.contacts.push(created.clone());
        state.contacts_created += 1;
        Ok(created)
    }

    async fn update_contact(
        &self,
        contact_id: i64,
        update: &ContactUpdate,
    ) -> Result<(), DeskbridgeError> {
        let mut state = self.state.lock().await;
        let contact = state
            .contacts
            .iter_mut()
            .find(|c| c.id == contact_id)
            .ok_or_else(|| DeskbridgeError::not_found("contact", contact_id))?;
        if let Some(name) = &update.name {
            contact.name = Some(name.clone());
        }
        if let Some(avatar) = &update.avatar_url {
            contact.avatar_url = Some(avatar.clone());
        }
        if let Some(identifier) = &update.identifier {
            contact.identifier = Some(identifier.clone());
        }
        state.contact_updates.push((contact_id, update.clone()));
        Ok(())
    }

    async fn find_or_create_conversation(
        &self,
        request: &ConversationRequest,
    ) -> Result<HelpdeskConversation, DeskbridgeError> {
        let mut state = self.state.lock().await;
        if !state.contacts.iter().any(|c| c.id == request.contact_id) {
            return Err(DeskbridgeError::not_found("contact", request.contact_id));
        }
        let mut candidates: Vec<&mut StoredConversation> = state
            .conversations
            .iter_mut()
            .filter(|c| {
                c.contact_id == request.contact_id && c.conversation.inbox_id == request.inbox_id
            })
            .collect();
        candidates.sort_by_key(|c| {
            (
                !c.conversation.status.is_active(),
                std::cmp::Reverse(c.conversation.id),
            )
        });
        if let Some(best) = candidates.into_iter().next() {
            if best.conversation.status.is_active() {
                return Ok(best.conversation.clone());
            }
            if request.auto_reopen {
                best.conversation.status = ConversationStatus::Open;
                return Ok(best.conversation.clone());
            }
        }
        let id = state.next_id();
        let conversation = HelpdeskConversation {
            id,
            inbox_id: request.inbox_id,
            status: request.status,
        };
        state.conversations.push(StoredConversation {
            contact_id: request.contact_id,
            conversation: conversation.clone(),
        });
        state.conversations_created += 1;
        Ok(conversation)
    }

    async fn find_message_by_source_id(
        &self,
        conversation_id: i64,
        source_id: &str,
    ) -> Result<Option<HelpdeskMessage>, DeskbridgeError> {
        let state = self.state.lock().await;
        Ok(state
            .messages
            .iter()
            .find(|m| m.conversation_id == conversation_id && m.source_id == source_id)
            .map(|m| HelpdeskMessage {
                id: m.id,
                conversation_id: m.conversation_id,
                source_id: Some(m.source_id.clone()),
            }))
    }

    async fn create_message(
        &self,
        conversation_id: i64,
        message: &NewMessage,
    ) -> Result<HelpdeskMessage, DeskbridgeError> {
        let mut state = self.state.lock().await;
        if let Some(status) = state.message_failures.pop_front() {
            return Err(DeskbridgeError::Helpdesk {
                message: format!("injected failure {status}"),
                status: Some(status),
                source: None,
            });
        }
        if !state
            .conversations
            .iter()
            .any(|c| c.conversation.id == conversation_id)
        {
            return Err(DeskbridgeError::not_found("conversation", conversation_id));
        }
        let id = state.next_id();
        state.messages.push(RecordedMessage {
            id,
            conversation_id,
            content: Some(message.content.clone()),
            direction: message.direction,
            source_id: message.source_id.clone(),
            in_reply_to: message.in_reply_to,
            attachment: None,
        });
        state.take_lost_response()?;
        Ok(HelpdeskMessage {
            id,
            conversation_id,
            source_id: Some(message.source_id.clone()),
        })
    }

    async fn upload_attachment(
        &self,
        conversation_id: i64,
        upload: &AttachmentUpload,
    ) -> Result<HelpdeskMessage, DeskbridgeError> {
        {
            let mut state = self.state.lock().await;
            state.upload_starts.push(Instant::now());
            state.uploads_in_flight += 1;
            state.max_uploads_in_flight = state.max_uploads_in_flight.max(state.uploads_in_flight);
        }
        if !self.upload_delay.is_zero() {
            tokio::time::sleep(self.upload_delay).await;
        }
        let mut state = self.state.lock().await;
        state.uploads_in_flight -= 1;
        if state.failing_uploads.contains(&upload.source_id) {
            return Err(DeskbridgeError::Helpdesk {
                message: "upload rejected".into(),
                status: Some(422),
                source: None,
            });
        }
        let id = state.next_id();
        state.messages.push(RecordedMessage {
            id,
            conversation_id,
            content: upload.caption.clone(),
            direction: upload.direction,
            source_id: upload.source_id.clone(),
            in_reply_to: None,
            attachment: Some((
                upload.file_name.clone(),
                upload.mime_type.clone(),
                upload.bytes.len(),
            )),
        });
        state.take_lost_response()?;
        Ok(HelpdeskMessage {
            id,
            conversation_id,
            source_id: Some(upload.source_id.clone()),
        })
    }

    async fn delete_message(
        &self,
        conversation_id: i64,
        message_id: i64,
    ) -> Result<(), DeskbridgeError> {
        let mut state = self.state.lock().await;
        let before = state.messages.len();
        state
            .messages
            .retain(|m| !(m.id == message_id && m.conversation_id == conversation_id));
        if state.messages.len() == before {
            return Err(DeskbridgeError::not_found("message", message_id));
        }
        state.deleted.push((conversation_id, message_id));
        Ok(())
    }
}
