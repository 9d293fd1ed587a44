// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deskbridge operator CLI.
//!
//! The bridge itself is embedded by the process that owns the protocol
//! client; this binary inspects and maintains what that process leaves on
//! disk.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod check;
mod queue;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use deskbridge_config::model::LoggingConfig;

/// Deskbridge - keeps a chat protocol session and a helpdesk in sync.
#[derive(Parser, Debug)]
#[command(name = "deskbridge", version, about, long_about = None)]
struct Cli {
    /// Load this file instead of the usual configuration hierarchy.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    plain: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration and probe the databases it points at.
    CheckConfig,
    /// Show per-stream queue counts.
    QueueStats,
    /// List the most recent dead-lettered envelopes.
    DeadLetters {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Delete acknowledged queue rows older than the given age.
    PurgeAcked {
        #[arg(long, default_value_t = 24)]
        older_than_hours: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => deskbridge_config::load_and_validate_path(path),
        None => deskbridge_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            deskbridge_config::render_errors(&errors);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.logging);

    let result = match cli.command {
        Commands::CheckConfig => check::run_check(&config, cli.plain).await.map(|healthy| {
            if healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }),
        Commands::QueueStats => queue::run_stats(&config, cli.json)
            .await
            .map(|()| ExitCode::SUCCESS),
        Commands::DeadLetters { limit } => queue::run_dead_letters(&config, limit, cli.json)
            .await
            .map(|()| ExitCode::SUCCESS),
        Commands::PurgeAcked { older_than_hours } => {
            queue::run_purge(&config, older_than_hours, cli.json)
                .await
                .map(|()| ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("deskbridge: {e}");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins over `logging.level`. Logs go to stderr so `--json`
/// output on stdout stays parseable.
fn init_tracing(logging: &LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("deskbridge={},warn", logging.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
