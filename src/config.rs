//! Settings and the on-disk key/value store

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, error, warn};

use crate::sources::coinglass::{CoinGlassClient, RetryPolicy, DEFAULT_API_URL};

/// Prefix for environment overrides, e.g. `PEAK_WATCH_MAX_RETRIES=3`
pub const ENV_PREFIX: &str = "PEAK_WATCH";

pub const API_KEY_FILE_NAME: &str = ".peakhodler_api_key";
pub const REFRESH_RATE_FILE_NAME: &str = ".peakhodler_refresh_rate";
pub const DEFAULT_REFRESH_RATE_MINUTES: u64 = 30;

/// Longest refresh period the timer is given, so deadlines stay representable
pub const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Refresh timer period for a rate in minutes, clamped to `MAX_REFRESH_INTERVAL`
pub fn refresh_interval(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60)).min(MAX_REFRESH_INTERVAL)
}

/// Errors from loading or saving settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid API URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Refresh rate must be a positive number of minutes, got {0}")]
    InvalidRefreshRate(u64),

    #[error("API key cannot be sent as a header: {0}")]
    InvalidApiKey(String),

    #[error("Could not determine home directory")]
    NoHomeDir,

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Runtime settings: defaults overridden by `PEAK_WATCH_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub api_url: String,
    pub api_key_file: PathBuf,
    pub refresh_rate_file: PathBuf,
    pub default_refresh_minutes: u64,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry
    pub base_delay_ms: u64,
    pub log_level: String,
}

impl Settings {
    /// Load settings from the process environment
    pub fn load() -> Result<Self, SettingsError> {
        let home = dirs::home_dir().ok_or(SettingsError::NoHomeDir)?;
        Self::from_sources(&home, config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
    }

    /// Build settings from a home directory and an environment source
    pub fn from_sources(home: &Path, env: config::Environment) -> Result<Self, SettingsError> {
        let cfg = config::Config::builder()
            .set_default("api_url", DEFAULT_API_URL)?
            .set_default(
                "api_key_file",
                home.join(API_KEY_FILE_NAME).to_string_lossy().to_string(),
            )?
            .set_default(
                "refresh_rate_file",
                home.join(REFRESH_RATE_FILE_NAME).to_string_lossy().to_string(),
            )?
            .set_default("default_refresh_minutes", DEFAULT_REFRESH_RATE_MINUTES as i64)?
            .set_default("request_timeout_secs", CoinGlassClient::REQUEST_TIMEOUT_SECS as i64)?
            .set_default("max_retries", RetryPolicy::default().max_retries as i64)?
            .set_default("base_delay_ms", RetryPolicy::default().base_delay.as_millis() as i64)?
            .set_default("log_level", "info")?
            .add_source(env)
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        url::Url::parse(&self.api_url).map_err(|e| SettingsError::InvalidUrl {
            url: self.api_url.clone(),
            reason: e.to_string(),
        })?;
        if self.default_refresh_minutes == 0 {
            return Err(SettingsError::InvalidRefreshRate(0));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Tracing level from `log_level`, INFO when unrecognised
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }

    pub fn store(&self) -> SettingsStore {
        SettingsStore::new(
            self.api_key_file.clone(),
            self.refresh_rate_file.clone(),
            self.default_refresh_minutes,
        )
    }
}

/// Single-value files holding the user's API key and refresh rate
#[derive(Debug, Clone)]
pub struct SettingsStore {
    api_key_file: PathBuf,
    refresh_rate_file: PathBuf,
    default_refresh_minutes: u64,
}

impl SettingsStore {
    pub fn new(api_key_file: PathBuf, refresh_rate_file: PathBuf, default_refresh_minutes: u64) -> Self {
        Self {
            api_key_file,
            refresh_rate_file,
            default_refresh_minutes,
        }
    }

    /// Trimmed file content; None if missing, empty or unreadable
    async fn read_value(path: &Path) -> Option<String> {
        match fs::read_to_string(path).await {
            Ok(content) => {
                let value = content.trim();
                (!value.is_empty()).then(|| value.to_string())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                error!("Error reading file {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn write_value(path: &Path, value: &str) -> Result<(), SettingsError> {
        fs::write(path, value.trim()).await.map_err(|source| {
            error!("Failed to save content to {}: {}", path.display(), source);
            SettingsError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?;
        debug!("Wrote {}", path.display());
        Ok(())
    }

    pub async fn load_api_key(&self) -> Option<String> {
        Self::read_value(&self.api_key_file).await
    }

    /// Store the key; an empty key clears it, one that is not a valid header value is refused
    pub async fn save_api_key(&self, key: &str) -> Result<(), SettingsError> {
        if let Err(e) = CoinGlassClient::build_headers(Some(key)) {
            warn!("Rejected API key: {}", e);
            return Err(SettingsError::InvalidApiKey(e.to_string()));
        }
        Self::write_value(&self.api_key_file, key).await
    }

    /// Stored refresh rate in minutes, or the default when missing or invalid
    pub async fn load_refresh_rate(&self) -> u64 {
        match Self::read_value(&self.refresh_rate_file).await {
            Some(raw) => match raw.parse::<u64>() {
                Ok(rate) if rate > 0 => rate,
                _ => {
                    warn!(
                        "Invalid refresh rate found in {}. Using default.",
                        self.refresh_rate_file.display()
                    );
                    self.default_refresh_minutes
                }
            },
            None => self.default_refresh_minutes,
        }
    }

    pub async fn save_refresh_rate(&self, minutes: u64) -> Result<(), SettingsError> {
        if minutes == 0 {
            warn!("Rejected refresh rate of 0 minutes");
            return Err(SettingsError::InvalidRefreshRate(minutes));
        }
        Self::write_value(&self.refresh_rate_file, &minutes.to_string()).await
    }
}
