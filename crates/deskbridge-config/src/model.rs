// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for deskbridge.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level deskbridge configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DeskbridgeConfig {
    /// Log level and output format.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Local SQLite database (queue streams and protocol mirror).
    #[serde(default)]
    pub storage: StorageConfig,

    /// Helpdesk REST API and database access.
    #[serde(default)]
    pub helpdesk: HelpdeskConfig,

    /// Durable queue consumer tuning.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Dedup and lock cache TTLs.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Media upload worker pool.
    #[serde(default)]
    pub media: MediaConfig,

    /// Background avatar updater.
    #[serde(default)]
    pub avatar: AvatarConfig,

    /// Batch reconciliation sizes and windows.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Conversation status policy.
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Local storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_local_dir()
        .map(|d| d.join("deskbridge").join("deskbridge.db"))
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "deskbridge.db".to_string())
}

fn default_wal_mode() -> bool {
    true
}

/// Helpdesk access configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HelpdeskConfig {
    /// Base URL of the helpdesk REST API, e.g. `https://desk.example.com`.
    #[serde(default)]
    pub base_url: Option<String>,

    /// API access token. `None` requires `DESKBRIDGE_HELPDESK_API_TOKEN`.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Helpdesk account all records belong to.
    #[serde(default = "default_account_id")]
    pub account_id: i64,

    /// Inbox bridged conversations live in.
    #[serde(default = "default_inbox_id")]
    pub inbox_id: i64,

    /// Helpdesk database used by the bulk reconciliation paths.
    /// Sync refuses to start without it.
    #[serde(default)]
    pub database_path: Option<String>,

    /// Per-request timeout for REST calls, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for HelpdeskConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            account_id: default_account_id(),
            inbox_id: default_inbox_id(),
            database_path: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_account_id() -> i64 {
    1
}

fn default_inbox_id() -> i64 {
    1
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Durable queue consumer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Maximum envelopes claimed per fetch.
    #[serde(default = "default_fetch_batch_size")]
    pub fetch_batch_size: usize,

    /// How long a fetch waits for deliverable envelopes before returning empty.
    #[serde(default = "default_fetch_wait_ms")]
    pub fetch_wait_ms: u64,

    /// Re-check interval while a fetch is waiting.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// A claimed envelope is redelivered if not acked within this window.
    #[serde(default = "default_ack_wait_secs")]
    pub ack_wait_secs: u64,

    /// Delivery attempts before an envelope is dead-lettered.
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,

    /// Redelivery delays, indexed by attempt; the last entry repeats.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            fetch_batch_size: default_fetch_batch_size(),
            fetch_wait_ms: default_fetch_wait_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            ack_wait_secs: default_ack_wait_secs(),
            max_deliveries: default_max_deliveries(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

impl QueueConfig {
    pub fn fetch_wait(&self) -> Duration {
        Duration::from_millis(self.fetch_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_secs)
    }

    pub fn backoff(&self) -> Vec<Duration> {
        self.backoff_secs
            .iter()
            .copied()
            .map(Duration::from_secs)
            .collect()
    }
}

fn default_fetch_batch_size() -> usize {
    10
}

fn default_fetch_wait_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_ack_wait_secs() -> u64 {
    30
}

fn default_max_deliveries() -> u32 {
    5
}

fn default_backoff_secs() -> Vec<u64> {
    vec![1, 5, 15, 30, 60]
}

/// Dedup, echo and lock cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Suppresses duplicate outbound sends; outlives slow attachment uploads.
    #[serde(default = "default_outbound_dedup_ttl_secs")]
    pub outbound_dedup_ttl_secs: u64,

    /// Suppresses protocol echoes of messages this process just sent.
    #[serde(default = "default_echo_ttl_secs")]
    pub echo_ttl_secs: u64,

    /// Suppresses redelivered envelopes whose handler already succeeded.
    #[serde(default = "default_handler_dedup_ttl_secs")]
    pub handler_dedup_ttl_secs: u64,

    /// Suppresses identical content sent twice in quick succession.
    #[serde(default = "default_content_hash_ttl_secs")]
    pub content_hash_ttl_secs: u64,

    /// Lifetime of a cached helpdesk contact id.
    #[serde(default = "default_contact_ttl_secs")]
    pub contact_ttl_secs: u64,

    /// A creation lock left behind by a crashed holder expires after this.
    #[serde(default = "default_creation_lock_ttl_secs")]
    pub creation_lock_ttl_secs: u64,

    #[serde(default = "default_lock_poll_interval_ms")]
    pub lock_poll_interval_ms: u64,

    #[serde(default = "default_lock_poll_attempts")]
    pub lock_poll_attempts: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            outbound_dedup_ttl_secs: default_outbound_dedup_ttl_secs(),
            echo_ttl_secs: default_echo_ttl_secs(),
            handler_dedup_ttl_secs: default_handler_dedup_ttl_secs(),
            content_hash_ttl_secs: default_content_hash_ttl_secs(),
            contact_ttl_secs: default_contact_ttl_secs(),
            creation_lock_ttl_secs: default_creation_lock_ttl_secs(),
            lock_poll_interval_ms: default_lock_poll_interval_ms(),
            lock_poll_attempts: default_lock_poll_attempts(),
        }
    }
}

fn default_outbound_dedup_ttl_secs() -> u64 {
    600
}

fn default_echo_ttl_secs() -> u64 {
    120
}

fn default_handler_dedup_ttl_secs() -> u64 {
    300
}

fn default_content_hash_ttl_secs() -> u64 {
    10
}

fn default_contact_ttl_secs() -> u64 {
    86_400
}

fn default_creation_lock_ttl_secs() -> u64 {
    30
}

fn default_lock_poll_interval_ms() -> u64 {
    100
}

fn default_lock_poll_attempts() -> u32 {
    50
}

/// Media upload pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MediaConfig {
    /// Concurrent upload workers; also the token bucket burst.
    #[serde(default = "default_media_workers")]
    pub workers: usize,

    /// Sustained uploads per second across all workers.
    #[serde(default = "default_media_rate_per_sec")]
    pub rate_per_sec: f64,

    /// Timeout for downloading one attachment's source bytes.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            workers: default_media_workers(),
            rate_per_sec: default_media_rate_per_sec(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

fn default_media_workers() -> usize {
    3
}

fn default_media_rate_per_sec() -> f64 {
    3.0
}

fn default_download_timeout_secs() -> u64 {
    60
}

/// Avatar updater configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AvatarConfig {
    #[serde(default = "default_avatar_workers")]
    pub workers: usize,

    /// Timeout of a single profile picture lookup.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Pause each worker takes after every contact.
    #[serde(default = "default_inter_call_delay_ms")]
    pub inter_call_delay_ms: u64,

    /// Upper bound of contacts visited per run.
    #[serde(default = "default_avatar_max_contacts")]
    pub max_contacts: usize,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            workers: default_avatar_workers(),
            call_timeout_secs: default_call_timeout_secs(),
            inter_call_delay_ms: default_inter_call_delay_ms(),
            max_contacts: default_avatar_max_contacts(),
        }
    }
}

fn default_avatar_workers() -> usize {
    2
}

fn default_call_timeout_secs() -> u64 {
    5
}

fn default_inter_call_delay_ms() -> u64 {
    500
}

fn default_avatar_max_contacts() -> usize {
    500
}

/// Batch reconciliation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(default = "default_contact_batch_size")]
    pub contact_batch_size: usize,

    #[serde(default = "default_message_batch_size")]
    pub message_batch_size: usize,

    /// Chats resolved per contact/conversation upsert statement set.
    #[serde(default = "default_conversation_batch_size")]
    pub conversation_batch_size: usize,

    /// Messages older than this many days are not imported.
    #[serde(default = "default_days_limit")]
    pub days_limit: u32,

    /// Hard cap on messages loaded per session.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Identifiers per existence-check query.
    #[serde(default = "default_lookup_chunk_size")]
    pub lookup_chunk_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            contact_batch_size: default_contact_batch_size(),
            message_batch_size: default_message_batch_size(),
            conversation_batch_size: default_conversation_batch_size(),
            days_limit: default_days_limit(),
            max_messages: default_max_messages(),
            lookup_chunk_size: default_lookup_chunk_size(),
        }
    }
}

fn default_contact_batch_size() -> usize {
    500
}

fn default_message_batch_size() -> usize {
    200
}

fn default_conversation_batch_size() -> usize {
    100
}

fn default_days_limit() -> u32 {
    30
}

fn default_max_messages() -> usize {
    50_000
}

fn default_lookup_chunk_size() -> usize {
    500
}

/// Conversation status policy flags.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Reuse any existing conversation regardless of status.
    #[serde(default)]
    pub auto_reopen: bool,

    /// New conversations start as pending instead of open.
    #[serde(default)]
    pub start_pending: bool,

    /// Conversations created by a bulk sync start resolved.
    #[serde(default)]
    pub import_as_resolved: bool,
}
