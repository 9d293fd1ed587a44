// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory dedup and lock caches.
//!
//! - [`TtlCache`]: per-key lock (`try_acquire`/`release`) and sliding-window
//!   dedup set (`mark`/`exists`)
//! - [`PrefixTtlCache`]: adds `exists_for_prefix`
//! - [`ContactCache`]: helpdesk contact ids by (session, remote chat)
//! - [`CacheRegistry`]: the instances the bridge shares between components

pub mod contacts;
pub mod prefix;
pub mod registry;
pub mod ttl;

pub use contacts::{ContactCache, ContactCacheEntry};
pub use prefix::PrefixTtlCache;
pub use registry::CacheRegistry;
pub use ttl::{KeyLease, TtlCache};
