use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("settings body is not valid JSON for this shape: {0}")]
    Malformed(String),
    #[error("{field} must be a positive whole number of seconds, got {value}")]
    InvalidDuration { field: &'static str, value: f64 },
    #[error("playerTimerRate needs at least {min} entries, got {len}")]
    RateTableTooShort { len: usize, min: usize },
    #[error("playerTimerRate[{index}] must be a finite number above zero, got {value}")]
    InvalidRate { index: usize, value: f64 },
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("no speed rate for {active_count} active participants (table has {table_len} entries)")]
pub struct ConfigurationRangeError {
    pub active_count: usize,
    pub table_len: usize,
}

#[derive(Debug, Error)]
pub enum ConfigFetchError {
    #[error("settings request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("settings server answered {0}")]
    Status(reqwest::StatusCode),
    #[error("settings server returned unusable settings: {0}")]
    Invalid(#[from] SettingsError),
}

#[derive(Debug, Error)]
pub enum ConfigSaveError {
    #[error("settings upload failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("settings server rejected the update ({status}): {message}")]
    Rejected {
        status: reqwest::StatusCode,
        message: String,
    },
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("game session is no longer running")]
pub struct SessionClosed;
