// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! History reconciliation between the protocol mirror and the helpdesk.
//!
//! The bulk paths ([`ContactSync`], [`MessageSync`]) write the helpdesk
//! database directly and are driven by [`SyncEngine`]. The live path goes
//! through [`ConversationResolver`], which the queue handlers use to find
//! or create the contact and conversation of a single event.

pub mod avatar;
pub mod contacts;
pub mod engine;
pub mod limiter;
pub mod media;
pub mod messages;
pub mod names;
pub mod resolver;
pub mod status;

pub use avatar::{AvatarReport, AvatarSettings, AvatarUpdater};
pub use contacts::ContactSync;
pub use engine::{SyncDeps, SyncEngine};
pub use limiter::TokenBucket;
pub use media::{LocatorFetcher, MediaFetcher, MediaUploadPool};
pub use messages::{MessageSync, MessageSyncReport, MessageSyncSettings};
pub use resolver::{ChatRef, ConversationResolver, ResolverSettings};
pub use status::SyncStatusTracker;
