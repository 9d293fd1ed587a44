// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background thread.
//! `Database` is the single writer: query modules take `&Database` and go
//! through [`Database::connection`]. Do not open extra connections for writes.

use chrono::{DateTime, Utc};
use deskbridge_core::DeskbridgeError;
use tracing::{debug, info};

use crate::migrations;

/// Timestamp format shared by every TEXT time column; sorts lexicographically.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Handle to the local SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Open (or create) the database at `path` with WAL enabled and run migrations.
    pub async fn open(path: &str) -> Result<Self, DeskbridgeError> {
        Self::open_with(path, true).await
    }

    /// Open the database, choosing whether to switch the journal to WAL.
    pub async fn open_with(path: &str, wal_mode: bool) -> Result<Self, DeskbridgeError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| DeskbridgeError::Storage {
                    source: Box::new(e),
                })?;
            }
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| DeskbridgeError::Storage {
                source: Box::new(e),
            })?;

        conn.call(move |conn| {
            if wal_mode {
                let _mode: String = conn
                    .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            }
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "busy_timeout", 5000)?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;
        debug!(path, wal_mode, "database pragmas applied");

        conn.call(|conn| migrations::run_migrations(conn))
            .await
            .map_err(|e| DeskbridgeError::Storage {
                source: Box::new(e),
            })?;
        info!(path, "database opened");

        Ok(Self { conn })
    }

    /// The single-writer connection.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Checkpoint the WAL and close the connection.
    pub async fn close(self) -> Result<(), DeskbridgeError> {
        self.conn
            .call(|conn| conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);"))
            .await
            .map_err(map_tr_err)?;
        self.conn.close().await.map_err(|e| DeskbridgeError::Storage {
            source: Box::new(e),
        })
    }
}

/// Map a tokio-rusqlite error into the workspace error type.
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> DeskbridgeError {
    DeskbridgeError::Storage {
        source: Box::new(e),
    }
}

/// Format a UTC instant for a TEXT time column.
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a TEXT time column written by [`format_timestamp`].
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

pub(crate) fn now() -> String {
    format_timestamp(Utc::now())
}
