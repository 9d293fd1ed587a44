// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as positive batch sizes, non-zero TTLs and mutually exclusive policies.

use crate::diagnostic::ConfigError;
use crate::model::DeskbridgeConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &DeskbridgeConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.storage.database_path.trim().is_empty() {
        errors.push(invalid("storage.database_path must not be empty"));
    }

    if let Some(url) = &config.helpdesk.base_url {
        let url = url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(invalid(format!(
                "helpdesk.base_url `{url}` must start with http:// or https://"
            )));
        }
    }

    if let Some(path) = &config.helpdesk.database_path {
        if path.trim().is_empty() {
            errors.push(invalid("helpdesk.database_path must not be empty when set"));
        }
    }

    for (name, value) in [
        ("helpdesk.account_id", config.helpdesk.account_id),
        ("helpdesk.inbox_id", config.helpdesk.inbox_id),
    ] {
        if value < 1 {
            errors.push(invalid(format!("{name} must be positive, got {value}")));
        }
    }

    let counts = [
        ("queue.fetch_batch_size", config.queue.fetch_batch_size),
        ("media.workers", config.media.workers),
        ("avatar.workers", config.avatar.workers),
        ("sync.contact_batch_size", config.sync.contact_batch_size),
        ("sync.message_batch_size", config.sync.message_batch_size),
        (
            "sync.conversation_batch_size",
            config.sync.conversation_batch_size,
        ),
        ("sync.max_messages", config.sync.max_messages),
        ("sync.lookup_chunk_size", config.sync.lookup_chunk_size),
    ];
    for (name, value) in counts {
        if value < 1 {
            errors.push(invalid(format!("{name} must be at least 1, got {value}")));
        }
    }

    if config.queue.max_deliveries < 1 {
        errors.push(invalid(format!(
            "queue.max_deliveries must be at least 1, got {}",
            config.queue.max_deliveries
        )));
    }

    if config.queue.backoff_secs.is_empty() {
        errors.push(invalid("queue.backoff_secs must list at least one delay"));
    }

    if !(config.media.rate_per_sec.is_finite() && config.media.rate_per_sec > 0.0) {
        errors.push(invalid(format!(
            "media.rate_per_sec must be positive, got {}",
            config.media.rate_per_sec
        )));
    }

    let ttls = [
        ("cache.outbound_dedup_ttl_secs", config.cache.outbound_dedup_ttl_secs),
        ("cache.echo_ttl_secs", config.cache.echo_ttl_secs),
        ("cache.handler_dedup_ttl_secs", config.cache.handler_dedup_ttl_secs),
        ("cache.content_hash_ttl_secs", config.cache.content_hash_ttl_secs),
        ("cache.contact_ttl_secs", config.cache.contact_ttl_secs),
        ("cache.creation_lock_ttl_secs", config.cache.creation_lock_ttl_secs),
        ("cache.lock_poll_interval_ms", config.cache.lock_poll_interval_ms),
        ("queue.fetch_wait_ms", config.queue.fetch_wait_ms),
        ("queue.poll_interval_ms", config.queue.poll_interval_ms),
        ("queue.ack_wait_secs", config.queue.ack_wait_secs),
    ];
    for (name, value) in ttls {
        if value == 0 {
            errors.push(invalid(format!("{name} must be greater than zero")));
        }
    }

    if config.cache.lock_poll_attempts == 0 {
        errors.push(invalid("cache.lock_poll_attempts must be at least 1"));
    }

    if config.policy.start_pending && config.policy.import_as_resolved {
        errors.push(invalid(
            "policy.start_pending and policy.import_as_resolved are mutually exclusive",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}
