// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for deskbridge.
//!
//! Holds the shared error type, the queue envelope and reconciliation
//! records, remote identifier helpers, and the traits through which the
//! pipeline talks to the helpdesk and the chat protocol client.

pub mod error;
pub mod jid;
pub mod traits;
pub mod types;

pub use error::DeskbridgeError;
pub use traits::{HelpdeskApi, LidResolver, ProtocolClient};
pub use types::{
    ChatForeignKeys, EnvelopeKind, MessageDirection, QueueEnvelope, Stream, SyncStats,
    SyncStatus,
};
