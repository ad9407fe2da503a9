use serde_json::{json, Value};

use crate::error::SettingsError;
use crate::types::GameConfig;

/// In-memory settings for the lifetime of the process. The accepted body is kept
/// verbatim next to its decoded form so reads return exactly what was written.
pub struct SettingsStore {
    body: Value,
    config: GameConfig,
    revision: u64,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsStore {
    pub fn new() -> Self {
        Self {
            body: default_body(),
            config: GameConfig::default(),
            revision: 0,
        }
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Last write wins. A rejected body leaves the store untouched.
    pub fn replace(&mut self, body: Value) -> Result<GameConfig, SettingsError> {
        let config = GameConfig::from_value(&body)?;
        self.body = body;
        self.config = config.clone();
        self.revision += 1;
        Ok(config)
    }
}

fn default_body() -> Value {
    json!({
        "timerDuration": 90,
        "killerTimerDuration": 5,
        "killerCooldown": 20,
        "playerTimerRate": [1, 1.5, 2, 2.5],
    })
}
