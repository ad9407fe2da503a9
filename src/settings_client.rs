use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{ConfigFetchError, ConfigSaveError};
use crate::types::GameConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const SETTINGS_PATH: &str = "/api/settings";

#[derive(Debug, Deserialize)]
struct SaveAck {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Talks to a running settings server, the way the settings screen does.
#[derive(Clone, Debug)]
pub struct SettingsClient {
    http: Client,
    settings_url: String,
}

impl SettingsClient {
    pub fn new(base_url: &str) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            settings_url: settings_url(base_url),
        })
    }

    pub fn settings_url(&self) -> &str {
        &self.settings_url
    }

    pub async fn fetch_raw(&self) -> Result<Value, ConfigFetchError> {
        let response = self.http.get(&self.settings_url).send().await?;
        if !response.status().is_success() {
            return Err(ConfigFetchError::Status(response.status()));
        }
        Ok(response.json::<Value>().await?)
    }

    pub async fn fetch(&self) -> Result<GameConfig, ConfigFetchError> {
        let body = self.fetch_raw().await?;
        Ok(GameConfig::from_value(&body)?)
    }

    /// Fetches the current settings, falling back to `last_known` when the server
    /// is unreachable or answers with something unusable.
    pub async fn fetch_or(&self, last_known: GameConfig) -> GameConfig {
        match self.fetch().await {
            Ok(config) => config,
            Err(error) => {
                warn!(%error, url = %self.settings_url, "using last known settings");
                last_known
            }
        }
    }

    /// Sends a body that wholesale-replaces the server's settings. Not retried.
    pub async fn save(&self, body: &Value) -> Result<String, ConfigSaveError> {
        let response = self.http.put(&self.settings_url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string(),
            };
            return Err(ConfigSaveError::Rejected { status, message });
        }
        let ack = response.json::<SaveAck>().await?;
        Ok(ack.message)
    }

    pub async fn save_config(&self, config: &GameConfig) -> Result<String, ConfigSaveError> {
        self.save(&config.to_value()).await
    }
}

fn settings_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.ends_with(SETTINGS_PATH) {
        return trimmed.to_string();
    }
    format!("{trimmed}{SETTINGS_PATH}")
}
