// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for deskbridge.
//!
//! WAL-mode SQLite with embedded migrations and a single-writer model via
//! `tokio-rusqlite`. Holds the two durable queue streams with their
//! dead-letter table, and the local mirror of each protocol session
//! (contacts, groups, messages, linked-identity mappings).

pub mod database;
pub mod lid;
pub mod migrations;
pub mod models;
pub mod queries;

pub use database::Database;
pub use lid::MirrorLidResolver;
pub use models::*;
