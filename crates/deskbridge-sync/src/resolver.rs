// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contact and conversation resolution for single live events.
//!
//! Turns a chat identifier into helpdesk contact and conversation ids,
//! creating what is missing. Concurrent handlers resolving the same chat
//! converge on one contact: the first takes a creation lock, the others
//! poll the contact cache until the winner publishes its id.

use std::sync::Arc;
use std::time::Duration;

use deskbridge_cache::registry::creation_lock_key;
use deskbridge_cache::CacheRegistry;
use deskbridge_config::model::DeskbridgeConfig;
use deskbridge_core::jid;
use deskbridge_core::traits::helpdesk::{
    ContactUpdate, ConversationRequest, ConversationStatus, HelpdeskContact, NewContact,
};
use deskbridge_core::types::ChatForeignKeys;
use deskbridge_core::{DeskbridgeError, HelpdeskApi, ProtocolClient};
use tracing::{debug, warn};

use crate::names;

/// Where new conversations go and how existing ones are reused.
#[derive(Debug, Clone, Copy)]
pub struct ResolverSettings {
    pub inbox_id: i64,
    pub auto_reopen: bool,
    pub new_status: ConversationStatus,
    /// Bound on each best-effort protocol lookup.
    pub lookup_timeout: Duration,
}

impl ResolverSettings {
    pub fn from_config(config: &DeskbridgeConfig) -> Self {
        Self {
            inbox_id: config.helpdesk.inbox_id,
            auto_reopen: config.policy.auto_reopen,
            new_status: if config.policy.start_pending {
                ConversationStatus::Pending
            } else {
                ConversationStatus::Open
            },
            lookup_timeout: Duration::from_secs(config.avatar.call_timeout_secs),
        }
    }
}

/// The chat a live event belongs to.
#[derive(Debug, Clone, Copy)]
pub struct ChatRef<'a> {
    pub session_id: &'a str,
    /// Normalized chat identifier; linked identities already mapped to phones.
    pub remote_id: &'a str,
    /// Sender's self-chosen name; only used for chats they started.
    pub push_name: Option<&'a str>,
    pub is_from_me: bool,
}

pub struct ConversationResolver {
    helpdesk: Arc<dyn HelpdeskApi>,
    protocol: Arc<dyn ProtocolClient>,
    caches: Arc<CacheRegistry>,
    settings: ResolverSettings,
}

impl ConversationResolver {
    pub fn new(
        helpdesk: Arc<dyn HelpdeskApi>,
        protocol: Arc<dyn ProtocolClient>,
        caches: Arc<CacheRegistry>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            helpdesk,
            protocol,
            caches,
            settings,
        }
    }

    /// Resolve (creating if needed) the contact and conversation of a chat.
    ///
    /// A cached contact deleted out-of-band is evicted and resolution is
    /// retried once.
    pub async fn resolve(&self, chat: ChatRef<'_>) -> Result<ChatForeignKeys, DeskbridgeError> {
        match self.resolve_once(chat).await {
            Err(e) if e.is_not_found() => {
                warn!(
                    session_id = chat.session_id,
                    remote_id = chat.remote_id,
                    error = %e,
                    "cached helpdesk contact is gone, resolving again"
                );
                self.caches.contacts.invalidate(chat.session_id, chat.remote_id);
                self.resolve_once(chat).await
            }
            other => other,
        }
    }

    /// Evict the cached contact of a chat.
    pub fn invalidate(&self, session_id: &str, remote_id: &str) -> bool {
        self.caches.contacts.invalidate(session_id, remote_id)
    }

    async fn resolve_once(&self, chat: ChatRef<'_>) -> Result<ChatForeignKeys, DeskbridgeError> {
        let contact_id = match self.caches.contacts.get(chat.session_id, chat.remote_id) {
            Some(id) => id,
            None => self.contact_under_lock(chat).await?,
        };
        let conversation = self
            .helpdesk
            .find_or_create_conversation(&ConversationRequest {
                contact_id,
                inbox_id: self.settings.inbox_id,
                status: self.settings.new_status,
                auto_reopen: self.settings.auto_reopen,
            })
            .await?;
        Ok(ChatForeignKeys {
            contact_id,
            conversation_id: conversation.id,
        })
    }

    async fn contact_under_lock(&self, chat: ChatRef<'_>) -> Result<i64, DeskbridgeError> {
        let key = creation_lock_key(chat.session_id, chat.remote_id);
        let mut polls = 0;
        loop {
            if let Some(_lease) = self.caches.creation_locks.lease(key.clone()) {
                // a holder may have published between our miss and the lock
                if let Some(id) = self.caches.contacts.get(chat.session_id, chat.remote_id) {
                    return Ok(id);
                }
                let contact = self.create_contact(chat).await?;
                self.caches
                    .contacts
                    .put(chat.session_id, chat.remote_id, contact.id);
                return Ok(contact.id);
            }
            if polls >= self.caches.lock_poll_attempts {
                return Err(DeskbridgeError::Timeout {
                    duration: self.caches.lock_poll_interval * self.caches.lock_poll_attempts,
                });
            }
            tokio::time::sleep(self.caches.lock_poll_interval).await;
            polls += 1;
            if let Some(id) = self.caches.contacts.get(chat.session_id, chat.remote_id) {
                debug!(remote_id = chat.remote_id, polls, "contact published by lock holder");
                return Ok(id);
            }
        }
    }

    async fn create_contact(&self, chat: ChatRef<'_>) -> Result<HelpdeskContact, DeskbridgeError> {
        let is_group = jid::is_group(chat.remote_id);
        let phone = jid::phone_number(chat.remote_id);
        let name = if is_group {
            let subject = self
                .lookup("group_name", self.protocol.group_name(chat.session_id, chat.remote_id))
                .await;
            names::group_name(subject.as_deref(), chat.remote_id)
        } else {
            let push = if chat.is_from_me { None } else { chat.push_name };
            names::individual_name(None, push, phone.as_deref(), chat.remote_id)
        };
        let avatar_url = self
            .lookup(
                "profile_picture_url",
                self.protocol.profile_picture_url(chat.session_id, chat.remote_id),
            )
            .await;

        let wanted = NewContact {
            inbox_id: self.settings.inbox_id,
            name,
            phone_number: phone.as_deref().map(jid::e164),
            identifier: chat.remote_id.to_string(),
            avatar_url,
        };
        let contact = self.helpdesk.find_or_create_contact(&wanted).await?;
        self.reconcile(&contact, &wanted).await?;
        Ok(contact)
    }

    /// Bring a pre-existing contact in line with what we know now.
    async fn reconcile(
        &self,
        contact: &HelpdeskContact,
        wanted: &NewContact,
    ) -> Result<(), DeskbridgeError> {
        let mut update = ContactUpdate::default();
        let placeholder = match contact.name.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(name) => {
                contact.phone_number.as_deref() == Some(name)
                    || name == jid::user_part(&wanted.identifier)
            }
        };
        if placeholder && contact.name.as_deref() != Some(wanted.name.as_str()) {
            update.name = Some(wanted.name.clone());
        }
        if contact.avatar_url.as_deref().is_none_or(str::is_empty) {
            update.avatar_url = wanted.avatar_url.clone();
        }
        if contact.identifier.as_deref() != Some(wanted.identifier.as_str()) {
            update.identifier = Some(wanted.identifier.clone());
        }
        if update.is_empty() {
            return Ok(());
        }
        match self.helpdesk.update_contact(contact.id, &update).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Err(e),
            Err(e) => {
                warn!(contact_id = contact.id, error = %e, "contact reconciliation failed");
                Ok(())
            }
        }
    }

    /// Run a best-effort protocol lookup; failures and timeouts yield `None`.
    async fn lookup<F>(&self, what: &'static str, call: F) -> Option<String>
    where
        F: std::future::Future<Output = Result<Option<String>, DeskbridgeError>>,
    {
        match tokio::time::timeout(self.settings.lookup_timeout, call).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                debug!(what, error = %e, "protocol lookup failed");
                None
            }
            Err(_) => {
                debug!(what, "protocol lookup timed out");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskbridge_config::model::CacheConfig;
    use deskbridge_test_utils::{MockHelpdesk, MockProtocol};

    fn settings() -> ResolverSettings {
        ResolverSettings {
            inbox_id: 1,
            auto_reopen: false,
            new_status: ConversationStatus::Open,
            lookup_timeout: Duration::from_secs(1),
        }
    }

    fn resolver(helpdesk: Arc<MockHelpdesk>, protocol: Arc<MockProtocol>) -> ConversationResolver {
        ConversationResolver::new(
            helpdesk,
            protocol,
            Arc::new(CacheRegistry::from_config(&CacheConfig::default())),
            settings(),
        )
    }

    fn chat(remote_id: &str) -> ChatRef<'_> {
        ChatRef {
            session_id: "s",
            remote_id,
            push_name: Some("Ana"),
            is_from_me: false,
        }
    }

    #[tokio::test]
    async fn creates_contact_with_enrichment() {
        let helpdesk = Arc::new(MockHelpdesk::new());
        let protocol = Arc::new(MockProtocol::new());
        protocol
            .set_avatar("5511999990000@s.whatsapp.net", "https://cdn.example/a.jpg")
            .await;
        let resolver = resolver(helpdesk.clone(), protocol);

        let keys = resolver.resolve(chat("5511999990000@s.whatsapp.net")).await.unwrap();
        let contacts = helpdesk.contacts().await;
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].id, keys.contact_id);
        assert_eq!(contacts[0].name.as_deref(), Some("Ana"));
        assert_eq!(contacts[0].phone_number.as_deref(), Some("+5511999990000"));
        assert_eq!(contacts[0].avatar_url.as_deref(), Some("https://cdn.example/a.jpg"));

        // cached: no second creation, same conversation
        let again = resolver.resolve(chat("5511999990000@s.whatsapp.net")).await.unwrap();
        assert_eq!(again, keys);
        assert_eq!(helpdesk.conversations_created().await, 1);
    }

    #[tokio::test]
    async fn own_push_name_is_not_used_for_the_contact() {
        let helpdesk = Arc::new(MockHelpdesk::new());
        let resolver = resolver(helpdesk.clone(), Arc::new(MockProtocol::new()));
        let mut outgoing = chat("5511999990000@s.whatsapp.net");
        outgoing.is_from_me = true;
        resolver.resolve(outgoing).await.unwrap();
        assert_eq!(
            helpdesk.contacts().await[0].name.as_deref(),
            Some("+5511999990000")
        );
    }

    #[tokio::test]
    async fn placeholder_name_is_reconciled() {
        let helpdesk = Arc::new(MockHelpdesk::new());
        let id = helpdesk
            .insert_contact("5511999990000@s.whatsapp.net", "5511999990000")
            .await;
        let resolver = resolver(helpdesk.clone(), Arc::new(MockProtocol::new()));
        resolver.resolve(chat("5511999990000@s.whatsapp.net")).await.unwrap();

        let updates = helpdesk.contact_updates().await;
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, id);
        assert_eq!(updates[0].1.name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn deleted_contact_is_recreated_once() {
        let helpdesk = Arc::new(MockHelpdesk::new());
        let resolver = resolver(helpdesk.clone(), Arc::new(MockProtocol::new()));
        let first = resolver.resolve(chat("5511999990000@s.whatsapp.net")).await.unwrap();
        helpdesk.remove_contact(first.contact_id).await;

        let second = resolver.resolve(chat("5511999990000@s.whatsapp.net")).await.unwrap();
        assert_ne!(first.contact_id, second.contact_id);
        assert_eq!(helpdesk.contacts_created().await, 2);
    }

    fn short_lock_wait() -> Arc<CacheRegistry> {
        Arc::new(CacheRegistry::from_config(&CacheConfig {
            lock_poll_interval_ms: 100,
            lock_poll_attempts: 3,
            ..CacheConfig::default()
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn held_creation_lock_times_out() {
        let remote = "5511999990000@s.whatsapp.net";
        let helpdesk = Arc::new(MockHelpdesk::new());
        let caches = short_lock_wait();
        let resolver = ConversationResolver::new(
            helpdesk.clone(),
            Arc::new(MockProtocol::new()),
            caches.clone(),
            settings(),
        );
        let _held = caches
            .creation_locks
            .lease(creation_lock_key("s", remote))
            .unwrap();

        let start = tokio::time::Instant::now();
        let err = resolver.resolve(chat(remote)).await.unwrap_err();
        assert!(
            matches!(err, DeskbridgeError::Timeout { duration } if duration == Duration::from_millis(300)),
            "got: {err}"
        );
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert_eq!(helpdesk.contacts_created().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_takes_the_contact_published_by_the_holder() {
        let remote = "5511999990000@s.whatsapp.net";
        let helpdesk = Arc::new(MockHelpdesk::new());
        let caches = short_lock_wait();
        let resolver = Arc::new(ConversationResolver::new(
            helpdesk.clone(),
            Arc::new(MockProtocol::new()),
            caches.clone(),
            settings(),
        ));
        let held = caches
            .creation_locks
            .lease(creation_lock_key("s", remote))
            .unwrap();

        let waiter = {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.resolve(chat(remote)).await })
        };
        tokio::time::sleep(Duration::from_millis(150)).await;
        let id = helpdesk.insert_contact(remote, "Ana").await;
        caches.contacts.put("s", remote, id);
        drop(held);

        let keys = waiter.await.unwrap().unwrap();
        assert_eq!(keys.contact_id, id);
        assert_eq!(helpdesk.contacts_created().await, 0);
    }

    #[tokio::test]
    async fn group_takes_its_subject() {
        let helpdesk = Arc::new(MockHelpdesk::new());
        let protocol = Arc::new(MockProtocol::new());
        protocol.set_group_name("120363000000000000@g.us", "Support Team").await;
        let resolver = resolver(helpdesk.clone(), protocol);
        resolver.resolve(chat("120363000000000000@g.us")).await.unwrap();
        let contact = &helpdesk.contacts().await[0];
        assert_eq!(contact.name.as_deref(), Some("Support Team"));
        assert_eq!(contact.phone_number, None);
    }
}
