use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{
    DEFAULT_KILLER_COOLDOWN, DEFAULT_KILLER_TIMER_DURATION, DEFAULT_PLAYER_TIMER_RATE,
    DEFAULT_TIMER_DURATION, MAX_PARTICIPANTS,
};
use crate::error::{ConfigurationRangeError, SettingsError};

pub type ParticipantId = u32;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GameConfig {
    #[serde(rename = "timerDuration")]
    pub timer_duration: u32,
    #[serde(rename = "killerTimerDuration")]
    pub killer_timer_duration: u32,
    #[serde(rename = "killerCooldown")]
    pub killer_cooldown: u32,
    #[serde(rename = "playerTimerRate")]
    pub player_timer_rate: Vec<f64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            timer_duration: DEFAULT_TIMER_DURATION,
            killer_timer_duration: DEFAULT_KILLER_TIMER_DURATION,
            killer_cooldown: DEFAULT_KILLER_COOLDOWN,
            player_timer_rate: DEFAULT_PLAYER_TIMER_RATE.to_vec(),
        }
    }
}

impl GameConfig {
    /// Decodes an untrusted settings body. Unknown keys are ignored.
    pub fn from_value(value: &Value) -> Result<Self, SettingsError> {
        let payload: SettingsPayload = serde_json::from_value(value.clone())
            .map_err(|error| SettingsError::Malformed(error.to_string()))?;
        payload.validate()
    }

    pub fn speed_rate(&self, active_count: usize) -> Result<f64, ConfigurationRangeError> {
        self.player_timer_rate
            .get(active_count)
            .copied()
            .ok_or(ConfigurationRangeError {
                active_count,
                table_len: self.player_timer_rate.len(),
            })
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Clone, Debug, Deserialize)]
struct SettingsPayload {
    #[serde(rename = "timerDuration")]
    timer_duration: f64,
    #[serde(rename = "killerTimerDuration")]
    killer_timer_duration: f64,
    #[serde(rename = "killerCooldown")]
    killer_cooldown: f64,
    #[serde(rename = "playerTimerRate")]
    player_timer_rate: Vec<f64>,
}

impl SettingsPayload {
    fn validate(self) -> Result<GameConfig, SettingsError> {
        let timer_duration = whole_seconds("timerDuration", self.timer_duration)?;
        let killer_timer_duration =
            whole_seconds("killerTimerDuration", self.killer_timer_duration)?;
        let killer_cooldown = whole_seconds("killerCooldown", self.killer_cooldown)?;

        if self.player_timer_rate.len() < MAX_PARTICIPANTS {
            return Err(SettingsError::RateTableTooShort {
                len: self.player_timer_rate.len(),
                min: MAX_PARTICIPANTS,
            });
        }
        for (index, rate) in self.player_timer_rate.iter().enumerate() {
            if !rate.is_finite() || *rate <= 0.0 {
                return Err(SettingsError::InvalidRate {
                    index,
                    value: *rate,
                });
            }
        }

        Ok(GameConfig {
            timer_duration,
            killer_timer_duration,
            killer_cooldown,
            player_timer_rate: self.player_timer_rate,
        })
    }
}

fn whole_seconds(field: &'static str, value: f64) -> Result<u32, SettingsError> {
    if !value.is_finite() || value < 1.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
        return Err(SettingsError::InvalidDuration { field, value });
    }
    Ok(value as u32)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    Simple,
    KillerCooldown,
}

impl ProfileKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "simple" => Some(Self::Simple),
            "killer_cooldown" | "killer-cooldown" => Some(Self::KillerCooldown),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SessionProfile {
    pub kind: ProfileKind,
    #[serde(rename = "killerRequiresIdlePlayers")]
    pub killer_requires_idle_players: bool,
    #[serde(rename = "cooldownAfterBonus")]
    pub cooldown_after_bonus: bool,
}

impl SessionProfile {
    pub fn simple() -> Self {
        Self {
            kind: ProfileKind::Simple,
            killer_requires_idle_players: false,
            cooldown_after_bonus: false,
        }
    }

    pub fn killer_cooldown() -> Self {
        Self {
            kind: ProfileKind::KillerCooldown,
            killer_requires_idle_players: true,
            cooldown_after_bonus: true,
        }
    }

    pub fn from_kind(kind: ProfileKind) -> Self {
        match kind {
            ProfileKind::Simple => Self::simple(),
            ProfileKind::KillerCooldown => Self::killer_cooldown(),
        }
    }
}

impl Default for SessionProfile {
    fn default() -> Self {
        Self::killer_cooldown()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum KillerPhase {
    Idle,
    Active {
        #[serde(rename = "holdRemaining")]
        hold_remaining: u32,
    },
    Cooldown {
        #[serde(rename = "cooldownRemaining")]
        cooldown_remaining: u32,
    },
}

impl KillerPhase {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn is_cooldown(&self) -> bool {
        matches!(self, Self::Cooldown { .. })
    }

    pub fn is_ticking(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    Finished {
        cycle: u64,
    },
    Restarted,
    KillerCharging {
        #[serde(rename = "holdRemaining")]
        hold_remaining: u32,
    },
    KillerCancelled,
    KillerBonus {
        bonus: u32,
        remaining: u32,
    },
    CooldownEnded,
    RateClamped {
        #[serde(rename = "activeCount")]
        active_count: usize,
        #[serde(rename = "tableLen")]
        table_len: usize,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct KillerView {
    #[serde(flatten)]
    pub phase: KillerPhase,
    pub active: bool,
    #[serde(rename = "cooldownActive")]
    pub cooldown_active: bool,
    #[serde(rename = "holdLabel", skip_serializing_if = "Option::is_none")]
    pub hold_label: Option<String>,
    #[serde(rename = "cooldownLabel", skip_serializing_if = "Option::is_none")]
    pub cooldown_label: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    pub tick: u64,
    #[serde(rename = "generatedAtIso")]
    pub generated_at_iso: String,
    pub profile: ProfileKind,
    pub remaining: u32,
    #[serde(rename = "remainingLabel")]
    pub remaining_label: String,
    #[serde(rename = "timerDuration")]
    pub timer_duration: u32,
    pub running: bool,
    #[serde(rename = "progressPercent")]
    pub progress_percent: u32,
    #[serde(rename = "activeCount")]
    pub active_count: usize,
    #[serde(rename = "activeParticipants")]
    pub active_participants: Vec<ParticipantId>,
    #[serde(rename = "countdownPeriodMs")]
    pub countdown_period_ms: Option<u64>,
    pub killer: KillerView,
    #[serde(rename = "cyclesFinished")]
    pub cycles_finished: u64,
    pub events: Vec<RuntimeEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_body_decodes_to_default_config() {
        let value = json!({
            "timerDuration": 90,
            "killerTimerDuration": 5,
            "killerCooldown": 20,
            "playerTimerRate": [1, 1.5, 2, 2.5],
        });
        assert_eq!(
            GameConfig::from_value(&value).expect("defaults are valid"),
            GameConfig::default()
        );
    }

    #[test]
    fn decode_rejects_fractional_and_zero_durations() {
        let fractional = json!({
            "timerDuration": 90.5,
            "killerTimerDuration": 5,
            "killerCooldown": 20,
            "playerTimerRate": [1, 1.5, 2, 2.5],
        });
        assert!(matches!(
            GameConfig::from_value(&fractional),
            Err(SettingsError::InvalidDuration {
                field: "timerDuration",
                ..
            })
        ));

        let zero = json!({
            "timerDuration": 90,
            "killerTimerDuration": 5,
            "killerCooldown": 0,
            "playerTimerRate": [1, 1.5, 2, 2.5],
        });
        assert!(matches!(
            GameConfig::from_value(&zero),
            Err(SettingsError::InvalidDuration {
                field: "killerCooldown",
                ..
            })
        ));
    }

    #[test]
    fn decode_rejects_short_or_non_positive_rate_tables() {
        let short = json!({
            "timerDuration": 90,
            "killerTimerDuration": 5,
            "killerCooldown": 20,
            "playerTimerRate": [1, 1.5],
        });
        assert_eq!(
            GameConfig::from_value(&short),
            Err(SettingsError::RateTableTooShort { len: 2, min: 4 })
        );

        let negative = json!({
            "timerDuration": 90,
            "killerTimerDuration": 5,
            "killerCooldown": 20,
            "playerTimerRate": [1, 1.5, -2, 2.5],
        });
        assert!(matches!(
            GameConfig::from_value(&negative),
            Err(SettingsError::InvalidRate { index: 2, .. })
        ));
    }

    #[test]
    fn decode_rejects_wrong_shapes() {
        assert!(matches!(
            GameConfig::from_value(&json!({ "timerDuration": "90" })),
            Err(SettingsError::Malformed(_))
        ));
        assert!(matches!(
            GameConfig::from_value(&json!([1, 2, 3])),
            Err(SettingsError::Malformed(_))
        ));
    }

    #[test]
    fn speed_rate_is_zero_based_and_bounds_checked() {
        let config = GameConfig::default();
        assert_eq!(config.speed_rate(1), Ok(1.5));
        assert_eq!(config.speed_rate(3), Ok(2.5));
        assert_eq!(
            config.speed_rate(4),
            Err(ConfigurationRangeError {
                active_count: 4,
                table_len: 4,
            })
        );
    }

    #[test]
    fn profile_parse_accepts_both_spellings() {
        assert_eq!(ProfileKind::parse("simple"), Some(ProfileKind::Simple));
        assert_eq!(
            ProfileKind::parse(" Killer-Cooldown "),
            Some(ProfileKind::KillerCooldown)
        );
        assert_eq!(ProfileKind::parse("chaos"), None);
    }

    #[test]
    fn killer_phase_serializes_with_phase_tag() {
        let value = serde_json::to_value(KillerPhase::Cooldown {
            cooldown_remaining: 20,
        })
        .expect("phase should serialize");
        assert_eq!(value, json!({ "phase": "cooldown", "cooldownRemaining": 20 }));
    }
}
