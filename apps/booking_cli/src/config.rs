use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use client_core::PaymentPolling;
use serde::Deserialize;

pub const SETTINGS_FILE: &str = "booking.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_base_url: String,
    pub cache_database_url: String,
    pub request_timeout_secs: u64,
    pub payment_poll_interval_ms: u64,
    pub payment_poll_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:5000".into(),
            cache_database_url: "sqlite://./data/booking_cache.db".into(),
            request_timeout_secs: 15,
            payment_poll_interval_ms: 3000,
            payment_poll_attempts: 20,
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn payment_polling(&self) -> PaymentPolling {
        PaymentPolling {
            interval: Duration::from_millis(self.payment_poll_interval_ms),
            max_attempts: self.payment_poll_attempts.max(1),
        }
    }
}

/// Keys accepted in `booking.toml`. Anything missing keeps its default.
#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_base_url: Option<String>,
    cache_database_url: Option<String>,
    request_timeout_secs: Option<u64>,
    payment_poll_interval_ms: Option<u64>,
    payment_poll_attempts: Option<u32>,
}

/// Defaults, then `booking.toml` in the working directory, then environment.
pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file_cfg: FileSettings = toml::from_str(&raw)
            .with_context(|| format!("invalid settings in {}", path.display()))?;
        apply_file(&mut settings, file_cfg);
    }

    if let Some(v) = env("BOOKING_API_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = env("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = env("BOOKING_CACHE_URL") {
        settings.cache_database_url = v;
    }
    if let Some(v) = env("APP__CACHE_DATABASE_URL") {
        settings.cache_database_url = v;
    }

    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        settings.request_timeout_secs = parse_override("APP__REQUEST_TIMEOUT_SECS", &v)?;
    }
    if let Some(v) = env("APP__PAYMENT_POLL_INTERVAL_MS") {
        settings.payment_poll_interval_ms = parse_override("APP__PAYMENT_POLL_INTERVAL_MS", &v)?;
    }
    if let Some(v) = env("APP__PAYMENT_POLL_ATTEMPTS") {
        settings.payment_poll_attempts = parse_override("APP__PAYMENT_POLL_ATTEMPTS", &v)?;
    }

    settings.cache_database_url = normalize_database_url(&settings.cache_database_url);
    Ok(settings)
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.api_base_url {
        settings.api_base_url = v;
    }
    if let Some(v) = file_cfg.cache_database_url {
        settings.cache_database_url = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        settings.request_timeout_secs = v;
    }
    if let Some(v) = file_cfg.payment_poll_interval_ms {
        settings.payment_poll_interval_ms = v;
    }
    if let Some(v) = file_cfg.payment_poll_attempts {
        settings.payment_poll_attempts = v;
    }
}

fn parse_override<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{key} must be a non-negative integer, got '{raw}'"))
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().cache_database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
