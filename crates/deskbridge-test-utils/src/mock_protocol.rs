// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock protocol client with canned lookups and captured sends.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use deskbridge_core::traits::protocol::{OutgoingMedia, OutgoingText};
use deskbridge_core::{DeskbridgeError, LidResolver, ProtocolClient};

/// Something the bridge sent through the protocol client.
#[derive(Debug, Clone, PartialEq)]
pub enum SentItem {
    Text(OutgoingText),
    Media(OutgoingMedia),
}

impl SentItem {
    pub fn chat_id(&self) -> &str {
        match self {
            SentItem::Text(t) => &t.chat_id,
            SentItem::Media(m) => &m.chat_id,
        }
    }
}

#[derive(Default)]
struct State {
    avatars: HashMap<String, String>,
    group_names: HashMap<String, String>,
    lids: HashMap<String, String>,
    sent: Vec<(String, SentItem)>,
    send_failures: usize,
    profile_calls: usize,
    next_id: u64,
}

/// A mock protocol client.
///
/// Sends return ids `MOCK-1`, `MOCK-2`, ... so tests can predict the
/// protocol message id of each outbound message.
pub struct MockProtocol {
    state: Mutex<State>,
    lookup_delay: Duration,
}

impl MockProtocol {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            lookup_delay: Duration::ZERO,
        }
    }

    /// Delay of every profile picture lookup.
    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = delay;
        self
    }

    pub async fn set_avatar(&self, jid: &str, url: &str) {
        self.state
            .lock()
            .await
            .avatars
            .insert(jid.to_string(), url.to_string());
    }

    pub async fn set_group_name(&self, jid: &str, name: &str) {
        self.state
            .lock()
            .await
            .group_names
            .insert(jid.to_string(), name.to_string());
    }

    /// Map a linked identity to phone digits.
    pub async fn set_lid(&self, lid: &str, phone: &str) {
        self.state
            .lock()
            .await
            .lids
            .insert(lid.to_string(), phone.to_string());
    }

    /// Fail the next `n` sends with a protocol error.
    pub async fn fail_next_sends(&self, n: usize) {
        self.state.lock().await.send_failures += n;
    }

    /// `(session, item)` pairs in send order.
    pub async fn sent(&self) -> Vec<(String, SentItem)> {
        self.state.lock().await.sent.clone()
    }

    pub async fn profile_calls(&self) -> usize {
        self.state.lock().await.profile_calls
    }

    async fn record(&self, session_id: &str, item: SentItem) -> Result<String, DeskbridgeError> {
        let mut state = self.state.lock().await;
        if state.send_failures > 0 {
            state.send_failures -= 1;
            return Err(DeskbridgeError::protocol("injected send failure"));
        }
        state.next_id += 1;
        let id = format!("MOCK-{}", state.next_id);
        state.sent.push((session_id.to_string(), item));
        Ok(id)
    }
}

impl Default for MockProtocol {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolClient for MockProtocol {
    async fn profile_picture_url(
        &self,
        _session_id: &str,
        jid: &str,
    ) -> Result<Option<String>, DeskbridgeError> {
        if !self.lookup_delay.is_zero() {
            tokio::time::sleep(self.lookup_delay).await;
        }
        let mut state = self.state.lock().await;
        state.profile_calls += 1;
        Ok(state.avatars.get(jid).cloned())
    }

    async fn group_name(
        &self,
        _session_id: &str,
        jid: &str,
    ) -> Result<Option<String>, DeskbridgeError> {
        Ok(self.state.lock().await.group_names.get(jid).cloned())
    }

    async fn send_text(
        &self,
        session_id: &str,
        message: &OutgoingText,
    ) -> Result<String, DeskbridgeError> {
        self.record(session_id, SentItem::Text(message.clone())).await
    }

    async fn send_media(
        &self,
        session_id: &str,
        message: &OutgoingMedia,
    ) -> Result<String, DeskbridgeError> {
        self.record(session_id, SentItem::Media(message.clone())).await
    }
}

#[async_trait]
impl LidResolver for MockProtocol {
    async fn phone_for_lid(
        &self,
        _session_id: &str,
        lid: &str,
    ) -> Result<Option<String>, DeskbridgeError> {
        Ok(self.state.lock().await.lids.get(lid).cloned())
    }
}
