// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cache of helpdesk contact ids keyed by session and remote chat.
//!
//! Only the contact id is cached. Conversation ids are never cached here
//! because the reopen policy has to be evaluated on every lookup.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactCacheEntry {
    pub contact_id: i64,
    pub expires_at: Instant,
}

type Key = (String, String);

#[derive(Debug)]
pub struct ContactCache {
    ttl: Duration,
    entries: Mutex<HashMap<Key, ContactCacheEntry>>,
}

impl ContactCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Key, ContactCacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key(session: &str, remote: &str) -> Key {
        (session.to_string(), remote.to_string())
    }

    /// The cached contact id, if present and unexpired. Expired entries are dropped.
    pub fn get(&self, session: &str, remote: &str) -> Option<i64> {
        let key = Self::key(session, remote);
        let mut entries = self.entries();
        match entries.get(&key) {
            Some(entry) if Instant::now() < entry.expires_at => Some(entry.contact_id),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, session: &str, remote: &str, contact_id: i64) {
        let entry = ContactCacheEntry {
            contact_id,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries().insert(Self::key(session, remote), entry);
    }

    /// Drop the entry so the next lookup re-creates the contact. Returns
    /// whether an entry was present.
    pub fn invalidate(&self, session: &str, remote: &str) -> bool {
        self.entries().remove(&Self::key(session, remote)).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
