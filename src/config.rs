//! Environment-driven configuration.
//!
//! Every knob is an env var with a `SLOTGUARD_` prefix; a `.env` file is
//! honoured for local runs. Secrets (bot token, secret store token) are
//! required; everything else has a sensible default.

use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite database file.
    pub database_path: PathBuf,

    /// Webhook bind address, `host:port`.
    pub bind_addr: String,

    /// Telegram bot token.
    pub bot_token: String,

    /// Telegram API base URL.
    pub telegram_api_base: String,

    /// School platform API base URL.
    pub school_base_url: String,

    /// Secret store base URL.
    pub secret_store_base_url: String,

    /// Bearer token for the secret store.
    pub secret_store_token: String,

    /// Id of the secret carrying the token document.
    pub secret_id: String,

    /// Seconds between reconciliation ticks.
    pub tick_interval_secs: u64,

    /// Per-call HTTP timeout for all outbound adapters.
    pub http_timeout_secs: u64,
}

impl AppConfig {
    /// Load the configuration from the environment.
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_path: optional("SLOTGUARD_DATABASE_PATH")
                .unwrap_or_else(|| "slotguard.db".to_string())
                .into(),
            bind_addr: optional("SLOTGUARD_BIND_ADDR")
                .unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            bot_token: required("SLOTGUARD_BOT_TOKEN")?,
            telegram_api_base: optional("SLOTGUARD_TELEGRAM_API_BASE")
                .unwrap_or_else(|| "https://api.telegram.org".to_string()),
            school_base_url: required("SLOTGUARD_SCHOOL_BASE_URL")?,
            secret_store_base_url: required("SLOTGUARD_SECRET_STORE_BASE_URL")?,
            secret_store_token: required("SLOTGUARD_SECRET_STORE_TOKEN")?,
            secret_id: required("SLOTGUARD_SECRET_ID")?,
            tick_interval_secs: optional_parsed("SLOTGUARD_TICK_INTERVAL_SECS", 300)?,
            http_timeout_secs: optional_parsed("SLOTGUARD_HTTP_TIMEOUT_SECS", 10)?,
        })
    }
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn required(key: &str) -> Result<String, AppError> {
    optional(key).ok_or_else(|| AppError::internal(format!("{} is not set", key)))
}

fn optional_parsed(key: &str, default: u64) -> Result<u64, AppError> {
    match optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| AppError::invalid_input_for(format!("{} must be a number", key), key)),
        None => Ok(default),
    }
}
