// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue inspection and maintenance commands.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{Duration, Utc};
use deskbridge_config::DeskbridgeConfig;
use deskbridge_core::DeskbridgeError;
use deskbridge_storage::queries::queue;
use deskbridge_storage::{Database, DeadLetterEntry, StreamStats};
use serde::Serialize;
use tracing::info;

/// Dead-letter reasons longer than this are cut in table output.
const REASON_WIDTH: usize = 60;

#[derive(Debug, Serialize)]
struct PurgeReport {
    deleted: usize,
    older_than_hours: u64,
}

/// Open the existing local database. Inspection never creates one.
async fn open_existing(config: &DeskbridgeConfig) -> Result<Database, DeskbridgeError> {
    let path = &config.storage.database_path;
    if !Path::new(path).exists() {
        return Err(DeskbridgeError::Config(format!(
            "no database at {path}; has the bridge run yet?"
        )));
    }
    Database::open_with(path, config.storage.wal_mode).await
}

pub async fn run_stats(config: &DeskbridgeConfig, json: bool) -> Result<(), DeskbridgeError> {
    let db = open_existing(config).await?;
    let stats = queue::stream_stats(&db).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print!("{}", stats_table(&stats));
    }
    db.close().await
}

pub async fn run_dead_letters(
    config: &DeskbridgeConfig,
    limit: usize,
    json: bool,
) -> Result<(), DeskbridgeError> {
    let db = open_existing(config).await?;
    let entries = queue::list_dead_letters(&db, limit).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("No dead letters.");
    } else {
        print!("{}", dead_letter_table(&entries));
    }
    db.close().await
}

pub async fn run_purge(
    config: &DeskbridgeConfig,
    older_than_hours: u64,
    json: bool,
) -> Result<(), DeskbridgeError> {
    let db = open_existing(config).await?;
    let hours = i64::try_from(older_than_hours).unwrap_or(i64::MAX);
    let cutoff = Utc::now() - Duration::try_hours(hours).unwrap_or(Duration::MAX);
    let deleted = queue::purge_acked(&db, cutoff).await?;
    info!(deleted, older_than_hours, "acked queue rows purged");
    if json {
        let report = PurgeReport {
            deleted,
            older_than_hours,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Purged {deleted} acked row(s) older than {older_than_hours}h.");
    }
    db.close().await
}

fn stats_table(stats: &[StreamStats]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<24} {:>9} {:>11} {:>9} {:>6}",
        "STREAM", "PENDING", "PROCESSING", "ACKED", "DEAD"
    );
    for s in stats {
        let _ = writeln!(
            out,
            "{:<24} {:>9} {:>11} {:>9} {:>6}",
            s.stream, s.pending, s.processing, s.acked, s.dead_lettered
        );
    }
    out
}

fn dead_letter_table(entries: &[DeadLetterEntry]) -> String {
    let mut out = String::new();
    for e in entries {
        let _ = writeln!(
            out,
            "#{:<5} {}  {:<22} {}  {}",
            e.id,
            e.failed_at,
            e.original_subject,
            e.envelope_id.as_deref().unwrap_or("-"),
            truncate(&e.failure_reason, REASON_WIDTH)
        );
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut cut: String = s.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
