//! services/client/src/config.rs
//!
//! Defines the client's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub api_base_url: String,
    pub realtime_url: String,
    pub itinerary_token: String,
    pub log_level: Level,
    pub vibes: Vec<String>,
    pub swipe_threshold: f64,
    pub prefetch_window: usize,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_attempts: u32,
    pub machine_id_path: PathBuf,
    pub http_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingVar(key.to_string()))
        };

        // --- Endpoints ---
        let api_base_url = required("API_BASE_URL")?.trim_end_matches('/').to_string();
        let realtime_url = required("REALTIME_URL")?;
        let itinerary_token = required("ITINERARY_TOKEN")?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let vibes = lookup("PERSONALIZE_VIBES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        // --- Engine Tuning ---
        let swipe_threshold = parse_or(&lookup, "SWIPE_THRESHOLD", 150.0_f64)?;
        let prefetch_window = parse_or(&lookup, "PREFETCH_WINDOW", 2_usize)?;
        let reconnect_base_delay =
            Duration::from_millis(parse_or(&lookup, "RECONNECT_BASE_DELAY_MS", 1000_u64)?);
        let reconnect_max_attempts = parse_or(&lookup, "RECONNECT_MAX_ATTEMPTS", 5_u32)?;
        let machine_id_path = lookup("MACHINE_ID_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/etc/machine-id"));
        let http_timeout = Duration::from_secs(parse_or(&lookup, "HTTP_TIMEOUT_SECS", 30_u64)?);

        if swipe_threshold <= 0.0 {
            return Err(ConfigError::InvalidValue(
                "SWIPE_THRESHOLD".to_string(),
                "must be positive".to_string(),
            ));
        }

        Ok(Self {
            api_base_url,
            realtime_url,
            itinerary_token,
            log_level,
            vibes,
            swipe_threshold,
            prefetch_window,
            reconnect_base_delay,
            reconnect_max_attempts,
            machine_id_path,
            http_timeout,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}
