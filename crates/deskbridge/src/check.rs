// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `deskbridge check-config` command implementation.
//!
//! Configuration errors are reported before this runs; the checks here probe
//! what a valid configuration points at.

use std::io::IsTerminal;
use std::path::Path;
use std::time::{Duration, Instant};

use deskbridge_config::model::{DeskbridgeConfig, HelpdeskConfig};
use deskbridge_core::DeskbridgeError;
use deskbridge_helpdesk::HelpdeskDb;
use deskbridge_storage::Database;
use deskbridge_storage::queries::queue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub message: String,
    pub duration: Duration,
}

impl CheckResult {
    fn new(name: &'static str, status: CheckStatus, message: impl Into<String>, start: Instant) -> Self {
        Self {
            name,
            status,
            message: message.into(),
            duration: start.elapsed(),
        }
    }
}

/// Run every check and print a report. Returns `false` if any check failed.
pub async fn run_check(config: &DeskbridgeConfig, plain: bool) -> Result<bool, DeskbridgeError> {
    let use_color = !plain && std::io::stdout().is_terminal();
    let results = vec![
        CheckResult::new("Configuration", CheckStatus::Pass, "valid", Instant::now()),
        check_local_database(&config.storage.database_path, config.storage.wal_mode).await,
        check_helpdesk_api(&config.helpdesk),
        check_helpdesk_database(&config.helpdesk).await,
    ];
    print_report(&results, use_color);
    Ok(!results.iter().any(|r| r.status == CheckStatus::Fail))
}

/// Open the queue/mirror database, applying pending migrations.
async fn check_local_database(path: &str, wal_mode: bool) -> CheckResult {
    let start = Instant::now();
    if !Path::new(path).exists() {
        return CheckResult::new(
            "Local database",
            CheckStatus::Warn,
            format!("not found: {path} (created on first run)"),
            start,
        );
    }
    let db = match Database::open_with(path, wal_mode).await {
        Ok(db) => db,
        Err(e) => return CheckResult::new("Local database", CheckStatus::Fail, e.to_string(), start),
    };
    let result = match queue::stream_stats(&db).await {
        Ok(stats) => {
            let dead: u64 = stats.iter().map(|s| s.dead_lettered).sum();
            if dead > 0 {
                CheckResult::new(
                    "Local database",
                    CheckStatus::Warn,
                    format!("{dead} dead-lettered envelope(s)"),
                    start,
                )
            } else {
                CheckResult::new("Local database", CheckStatus::Pass, "ok", start)
            }
        }
        Err(e) => CheckResult::new("Local database", CheckStatus::Fail, e.to_string(), start),
    };
    if let Err(e) = db.close().await {
        tracing::warn!(error = %e, "database close failed");
    }
    result
}

fn check_helpdesk_api(config: &HelpdeskConfig) -> CheckResult {
    let start = Instant::now();
    match (config.base_url.as_deref(), config.api_token.as_deref()) {
        (None, _) => CheckResult::new(
            "Helpdesk API",
            CheckStatus::Warn,
            "helpdesk.base_url not set",
            start,
        ),
        (Some(_), None) => CheckResult::new(
            "Helpdesk API",
            CheckStatus::Fail,
            "no api token (set helpdesk.api_token or DESKBRIDGE_HELPDESK_API_TOKEN)",
            start,
        ),
        (Some(url), Some(_)) => CheckResult::new(
            "Helpdesk API",
            CheckStatus::Pass,
            format!("{url} (account {}, inbox {})", config.account_id, config.inbox_id),
            start,
        ),
    }
}

async fn check_helpdesk_database(config: &HelpdeskConfig) -> CheckResult {
    let start = Instant::now();
    let Some(path) = config.database_path.as_deref() else {
        return CheckResult::new(
            "Helpdesk database",
            CheckStatus::Warn,
            "not configured (history sync disabled)",
            start,
        );
    };
    if !Path::new(path).exists() {
        return CheckResult::new(
            "Helpdesk database",
            CheckStatus::Fail,
            format!("not found: {path}"),
            start,
        );
    }
    let probe = async {
        let db = HelpdeskDb::from_config(config).await?;
        db.verify().await?;
        db.counts().await
    };
    match probe.await {
        Ok(counts) => CheckResult::new(
            "Helpdesk database",
            CheckStatus::Pass,
            format!(
                "{} contacts, {} conversations, {} messages",
                counts.contacts, counts.conversations, counts.messages
            ),
            start,
        ),
        Err(e) => CheckResult::new("Helpdesk database", CheckStatus::Fail, e.to_string(), start),
    }
}

fn print_report(results: &[CheckResult], use_color: bool) {
    use colored::Colorize;

    println!();
    println!("  deskbridge check-config");
    println!("  {}", "-".repeat(50));

    let mut issues = 0;
    for result in results {
        let ms = result.duration.as_millis();
        let (symbol, message) = match (result.status, use_color) {
            (CheckStatus::Pass, true) => ("✓".green().to_string(), result.message.normal()),
            (CheckStatus::Warn, true) => ("!".yellow().to_string(), result.message.yellow()),
            (CheckStatus::Fail, true) => ("✗".red().to_string(), result.message.red()),
            (CheckStatus::Pass, false) => ("[OK]  ".to_string(), result.message.normal()),
            (CheckStatus::Warn, false) => ("[WARN]".to_string(), result.message.normal()),
            (CheckStatus::Fail, false) => ("[FAIL]".to_string(), result.message.normal()),
        };
        if result.status != CheckStatus::Pass {
            issues += 1;
        }
        println!("    {symbol} {:<20} {message} ({ms}ms)", result.name);
    }

    println!();
    match issues {
        0 => println!("  All checks passed."),
        1 => println!("  1 issue found."),
        n => println!("  {n} issues found."),
    }
    println!();
}
