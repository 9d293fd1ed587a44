// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TTL cache with prefix-scoped existence checks.

use std::ops::Deref;
use std::time::Duration;

use crate::ttl::TtlCache;

/// A [`TtlCache`] that can also answer "is anything under this prefix live".
///
/// Used when the disambiguating suffix of a key (for example the protocol
/// message id of a send still in flight) is not known at check time.
#[derive(Debug)]
pub struct PrefixTtlCache {
    inner: TtlCache,
}

impl PrefixTtlCache {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            inner: TtlCache::new(name, ttl),
        }
    }

    pub fn exists_for_prefix(&self, prefix: &str) -> bool {
        self.inner.any_live_with_prefix(prefix)
    }
}

impl Deref for PrefixTtlCache {
    type Target = TtlCache;

    fn deref(&self) -> &TtlCache {
        &self.inner
    }
}
