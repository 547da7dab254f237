use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SKIP_SECONDS: f64 = 30.0;
pub const DEFAULT_LIBRARY_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    InvalidValue {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Client configuration
/// In debug builds: `.env` is loaded first, then environment variables
/// In release builds: environment variables only
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Base URL of the conversion backend
    pub api_url: String,
    /// How often a converting job's status is fetched
    pub poll_interval: Duration,
    /// Upper bound for any single HTTP call
    pub request_timeout: Duration,
    /// Step used by the skip forward / skip back controls
    pub skip_seconds: f64,
    /// How often a session reloads the library in the background
    pub library_refresh_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            skip_seconds: DEFAULT_SKIP_SECONDS,
            library_refresh_interval: DEFAULT_LIBRARY_REFRESH_INTERVAL,
        }
    }
}

impl Config {
    /// Load configuration based on build mode
    pub fn load() -> Result<Self, ConfigError> {
        #[cfg(debug_assertions)]
        {
            if dotenvy::dotenv().is_ok() {
                tracing::info!("Dev mode activated - loaded .env file");
            }
        }

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from any variable source. Unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(url) = lookup("AUDIOBOOK_API_URL") {
            let url = url.trim().trim_end_matches('/').to_string();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    name: "AUDIOBOOK_API_URL",
                    expected: "an http:// or https:// URL",
                    value: url,
                });
            }
            config.api_url = url;
        }

        if let Some(value) = lookup("AUDIOBOOK_POLL_INTERVAL_MS") {
            let millis = parse_positive("AUDIOBOOK_POLL_INTERVAL_MS", &value)?;
            config.poll_interval = Duration::from_millis(millis);
        }

        if let Some(value) = lookup("AUDIOBOOK_LIBRARY_REFRESH_MS") {
            let millis = parse_positive("AUDIOBOOK_LIBRARY_REFRESH_MS", &value)?;
            config.library_refresh_interval = Duration::from_millis(millis);
        }

        if let Some(value) = lookup("AUDIOBOOK_REQUEST_TIMEOUT_SECS") {
            let secs = parse_positive("AUDIOBOOK_REQUEST_TIMEOUT_SECS", &value)?;
            if secs > 30 {
                warn!(
                    "Request timeout of {}s is above the recommended 30s; calls may hang a while",
                    secs
                );
            }
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(value) = lookup("AUDIOBOOK_SKIP_SECONDS") {
            config.skip_seconds = match value.trim().parse::<f64>() {
                Ok(secs) if secs.is_finite() && secs > 0.0 => secs,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "AUDIOBOOK_SKIP_SECONDS",
                        expected: "a positive number",
                        value,
                    })
                }
            };
        }

        Ok(config)
    }
}

fn parse_positive(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            name,
            expected: "a positive integer",
            value: value.to_string(),
        }),
    }
}
