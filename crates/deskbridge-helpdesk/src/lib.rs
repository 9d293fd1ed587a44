// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helpdesk side of the bridge.
//!
//! [`HelpdeskClient`] talks to the REST API for single-event writes;
//! [`HelpdeskDb`] runs the set-based statements the reconciliation engine
//! needs against the helpdesk database.

pub mod client;
pub mod db;
pub mod schema;
mod types;

pub use client::HelpdeskClient;
pub use db::{
    AvatarCandidate, ContactRow, ConversationPolicy, ExistingContact, HelpdeskDb, SyncedMessage,
    TableCounts,
};
pub use schema::SCHEMA_SQL;
