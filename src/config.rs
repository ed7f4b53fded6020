use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub watchdog_interval: Duration,
    pub watchdog_threshold: Duration,
    pub proof_max_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            watchdog_interval: Duration::from_secs(parse_or_default(
                "WATCHDOG_INTERVAL_SECS",
                300,
            )?),
            watchdog_threshold: Duration::from_secs(parse_or_default(
                "WATCHDOG_THRESHOLD_SECS",
                1800,
            )?),
            proof_max_bytes: parse_or_default("PROOF_MAX_BYTES", 7_000_000)?,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
