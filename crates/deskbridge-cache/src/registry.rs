// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The set of caches shared by handlers, the resolver and the sync engine.
//!
//! Built once by the composition root and handed around behind an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use deskbridge_config::model::CacheConfig;
use sha2::{Digest, Sha256};

use crate::contacts::ContactCache;
use crate::prefix::PrefixTtlCache;
use crate::ttl::TtlCache;

#[derive(Debug)]
pub struct CacheRegistry {
    /// Helpdesk message ids already forwarded to the protocol side.
    pub outbound_dedup: Arc<TtlCache>,
    /// Protocol messages this process just sent, so their echoes are ignored.
    pub echo: Arc<PrefixTtlCache>,
    /// Work a handler has finished: outbound sends by `outbound_key` (plus
    /// `:<index>` per attachment), and imported messages and reactions by
    /// `in:`/`reaction:`-prefixed `echo_key`.
    pub handler_dedup: Arc<TtlCache>,
    /// Hash of (session, chat, content) for near-simultaneous duplicate sends.
    pub content_hash: Arc<TtlCache>,
    pub contacts: ContactCache,
    /// Per-chat contact creation locks.
    pub creation_locks: Arc<TtlCache>,
    pub lock_poll_interval: Duration,
    pub lock_poll_attempts: u32,
}

impl CacheRegistry {
    pub fn from_config(config: &CacheConfig) -> Self {
        let secs = Duration::from_secs;
        Self {
            outbound_dedup: Arc::new(TtlCache::new(
                "outbound_dedup",
                secs(config.outbound_dedup_ttl_secs),
            )),
            echo: Arc::new(PrefixTtlCache::new("echo", secs(config.echo_ttl_secs))),
            handler_dedup: Arc::new(TtlCache::new(
                "handler_dedup",
                secs(config.handler_dedup_ttl_secs),
            )),
            content_hash: Arc::new(TtlCache::new(
                "content_hash",
                secs(config.content_hash_ttl_secs),
            )),
            contacts: ContactCache::new(secs(config.contact_ttl_secs)),
            creation_locks: Arc::new(TtlCache::new(
                "creation_locks",
                secs(config.creation_lock_ttl_secs),
            )),
            lock_poll_interval: Duration::from_millis(config.lock_poll_interval_ms),
            lock_poll_attempts: config.lock_poll_attempts,
        }
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

pub fn outbound_key(session: &str, helpdesk_message_id: i64) -> String {
    format!("{session}:{helpdesk_message_id}")
}

pub fn echo_key(session: &str, chat_id: &str, message_id: &str) -> String {
    format!("{session}:{chat_id}:{message_id}")
}

/// Marked while a send to `chat_id` is in flight and its message id is unknown.
pub fn echo_inflight_key(session: &str, chat_id: &str, token: &str) -> String {
    format!("{}{token}", echo_inflight_prefix(session, chat_id))
}

pub fn echo_inflight_prefix(session: &str, chat_id: &str) -> String {
    format!("{session}:{chat_id}:inflight:")
}

pub fn content_hash_key(session: &str, chat_id: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session.as_bytes());
    hasher.update([0]);
    hasher.update(chat_id.as_bytes());
    hasher.update([0]);
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn creation_lock_key(session: &str, remote_id: &str) -> String {
    format!("{session}:{remote_id}")
}
