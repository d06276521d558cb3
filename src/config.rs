//! Relay configuration — environment-sourced defaults, materialized to a
//! JSON file on first run.
//!
//! Boolean sink flags may arrive from the environment as the strings
//! `"true"`/`"false"`; normalization to `bool` happens here, at the load
//! boundary, so nothing downstream compares strings.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Plaintext SMTP listener port.
    pub smtp_port: u16,
    /// STARTTLS-capable SMTP listener port.
    pub tls_port: u16,
    /// HTTP API port.
    pub api_port: u16,
    pub gmail: GmailConfig,
    pub hass: HassConfig,
}

/// Gmail forwarding sink settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GmailConfig {
    pub enabled: bool,
    pub username: String,
    pub password: String,
    /// Recipient address for forwarded mail.
    pub to: String,
}

/// Home Assistant push-notification sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HassConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Notify service target as defined within Home Assistant.
    pub target: String,
    /// Long-lived access token.
    pub key: String,
}

impl Default for HassConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: 8123,
            target: String::new(),
            key: String::new(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            smtp_port: 9025,
            tls_port: 9587,
            api_port: 9080,
            gmail: GmailConfig::default(),
            hass: HassConfig::default(),
        }
    }
}

/// Parse an enabled flag from the environment. Accepts a real boolean or
/// the literal string `"true"` (case-insensitive); anything else is false.
fn env_flag(var: &str) -> bool {
    std::env::var(var)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn env_port(var: &str, default: u16) -> u16 {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(var: &str) -> String {
    std::env::var(var).unwrap_or_default()
}

impl RelayConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            smtp_port: env_port("SMTP_PORT", 9025),
            tls_port: env_port("TLS_PORT", 9587),
            api_port: env_port("API_PORT", 9080),
            gmail: GmailConfig {
                enabled: env_flag("MAIL_FORWARD"),
                username: env_string("MAIL_USERNAME"),
                password: env_string("MAIL_PASSWORD"),
                to: env_string("MAIL_TO"),
            },
            hass: HassConfig {
                enabled: env_flag("HASS_ENABLED"),
                host: env_string("HASS_HOST"),
                port: env_port("HASS_PORT", 8123),
                target: env_string("HASS_TARGET"),
                key: env_string("HASS_KEY"),
            },
        }
    }

    /// Resolve the config file path: `CONFIG_PATH` if set, otherwise
    /// `./config/mail_relay.json`.
    pub fn default_path() -> PathBuf {
        std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./config/mail_relay.json"))
    }

    /// Load the config file if it exists; otherwise materialize the
    /// environment-sourced config to `path` and return it.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            return serde_json::from_str(&raw).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: e.to_string(),
            });
        }

        let config = Self::from_env();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&config).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(path, raw)?;
        tracing::info!(path = %path.display(), "Configuration created");
        Ok(config)
    }
}
