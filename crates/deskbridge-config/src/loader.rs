// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./deskbridge.toml` > `~/.config/deskbridge/deskbridge.toml`
//! > `/etc/deskbridge/deskbridge.toml` with environment variable overrides via the
//! `DESKBRIDGE_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::DeskbridgeConfig;

pub(crate) const SYSTEM_CONFIG_PATH: &str = "/etc/deskbridge/deskbridge.toml";
pub(crate) const LOCAL_CONFIG_PATH: &str = "deskbridge.toml";

/// Top-level sections recognised by the env provider.
const SECTIONS: &[&str] = &[
    "logging", "storage", "helpdesk", "queue", "cache", "media", "avatar", "sync", "policy",
];

pub(crate) fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("deskbridge").join("deskbridge.toml"))
}

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/deskbridge/deskbridge.toml`
/// 3. `~/.config/deskbridge/deskbridge.toml`
/// 4. `./deskbridge.toml`
/// 5. `DESKBRIDGE_*` environment variables
pub fn load_config() -> Result<DeskbridgeConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no files, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<DeskbridgeConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(DeskbridgeConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<DeskbridgeConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(DeskbridgeConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the layered Figment before extraction.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(DeskbridgeConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG_PATH))
        .merge(env_provider())
}

/// Environment provider with explicit section mapping.
///
/// Only the first underscore after a known section name becomes a dot, so
/// `DESKBRIDGE_HELPDESK_API_TOKEN` maps to `helpdesk.api_token` and not
/// `helpdesk.api.token`.
fn env_provider() -> Env {
    Env::prefixed("DESKBRIDGE_").map(|key| map_env_key(key.as_str()).into())
}

pub(crate) fn map_env_key(key: &str) -> String {
    for section in SECTIONS {
        if let Some(rest) = key.strip_prefix(section) {
            if let Some(field) = rest.strip_prefix('_') {
                return format!("{section}.{field}");
            }
        }
    }
    key.to_string()
}
