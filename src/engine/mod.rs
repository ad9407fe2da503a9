use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tracing::warn;

use crate::constants::{
    format_time, killer_bonus, progress_percent, COUNTDOWN_PERIOD_DIVISOR,
    MAX_COUNTDOWN_PERIOD_MS, MIN_COUNTDOWN_PERIOD_MS,
};
use crate::error::ConfigurationRangeError;
use crate::types::{
    GameConfig, KillerPhase, KillerView, ParticipantId, RuntimeEvent, SessionProfile, Snapshot,
};

mod killer;
mod participation;

pub use self::killer::{KillerMachine, KillerTick};
pub use self::participation::ParticipationTracker;

/// Inputs that decide whether and how fast the countdown ticks. The countdown
/// ticker is only rebuilt when this changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CountdownPlan {
    pub active_count: usize,
    pub running: bool,
    pub paused_by_killer: bool,
}

impl CountdownPlan {
    pub fn is_idle(&self) -> bool {
        !self.running || self.paused_by_killer || self.active_count == 0
    }
}

#[derive(Clone, Debug)]
pub struct GameEngine {
    pub config: GameConfig,
    profile: SessionProfile,

    remaining: u32,
    running: bool,
    participation: ParticipationTracker,
    killer: KillerMachine,
    events: Vec<RuntimeEvent>,

    tick_counter: u64,
    cycles_finished: u64,
}

impl GameEngine {
    pub fn new(config: GameConfig, profile: SessionProfile) -> Self {
        Self {
            remaining: config.timer_duration,
            running: true,
            config,
            profile,
            participation: ParticipationTracker::new(),
            killer: KillerMachine::new(),
            events: Vec::new(),
            tick_counter: 0,
            cycles_finished: 0,
        }
    }

    pub fn profile(&self) -> SessionProfile {
        self.profile
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn active_count(&self) -> usize {
        self.participation.active_count()
    }

    pub fn killer_phase(&self) -> KillerPhase {
        self.killer.phase()
    }

    pub fn cycles_finished(&self) -> u64 {
        self.cycles_finished
    }

    pub fn begin(&mut self, id: ParticipantId) -> bool {
        if !self.running || self.killer.phase().is_active() {
            return false;
        }
        self.participation.begin(id)
    }

    pub fn end(&mut self, id: ParticipantId) -> bool {
        self.participation.end(id)
    }

    pub fn killer_press(&mut self) -> bool {
        if !self.running {
            return false;
        }
        if self.profile.killer_requires_idle_players && self.participation.active_count() > 0 {
            return false;
        }
        if !self.killer.press(self.config.killer_timer_duration) {
            return false;
        }
        self.events.push(RuntimeEvent::KillerCharging {
            hold_remaining: self.config.killer_timer_duration,
        });
        true
    }

    pub fn killer_release(&mut self) -> bool {
        if !self.running || !self.killer.release() {
            return false;
        }
        self.events.push(RuntimeEvent::KillerCancelled);
        true
    }

    pub fn countdown_plan(&self) -> CountdownPlan {
        CountdownPlan {
            active_count: self.participation.active_count(),
            running: self.running,
            paused_by_killer: self.killer.phase().is_active(),
        }
    }

    pub fn countdown_period(&self) -> Result<Option<Duration>, ConfigurationRangeError> {
        let plan = self.countdown_plan();
        if plan.is_idle() {
            return Ok(None);
        }
        let rate = self.config.speed_rate(plan.active_count)?;
        Ok(Some(self.period_for_rate(rate)))
    }

    /// Resolves the period for a fresh countdown ticker. A participant count past
    /// the end of the rate table falls back to the fastest configured rate.
    pub fn schedule_countdown(&mut self) -> Option<Duration> {
        match self.countdown_period() {
            Ok(period) => period,
            Err(error) => {
                warn!(%error, "speed rate table exhausted; using its last entry");
                self.events.push(RuntimeEvent::RateClamped {
                    active_count: error.active_count,
                    table_len: error.table_len,
                });
                self.clamped_countdown_period()
            }
        }
    }

    fn clamped_countdown_period(&self) -> Option<Duration> {
        if self.countdown_plan().is_idle() {
            return None;
        }
        self.config
            .player_timer_rate
            .last()
            .map(|rate| self.period_for_rate(*rate))
    }

    fn period_for_rate(&self, rate: f64) -> Duration {
        let seconds = self.config.timer_duration as f64 / rate / COUNTDOWN_PERIOD_DIVISOR;
        let shortest = Duration::from_millis(MIN_COUNTDOWN_PERIOD_MS);
        let longest = Duration::from_millis(MAX_COUNTDOWN_PERIOD_MS);
        Duration::try_from_secs_f64(seconds)
            .unwrap_or(longest)
            .clamp(shortest, longest)
    }

    pub fn countdown_tick(&mut self) {
        if self.countdown_plan().is_idle() {
            return;
        }
        self.tick_counter += 1;
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.running = false;
            self.cycles_finished += 1;
            self.events.push(RuntimeEvent::Finished {
                cycle: self.cycles_finished,
            });
            self.remaining = self.config.timer_duration;
        }
    }

    pub fn killer_tick(&mut self) {
        if !self.running || !self.killer.phase().is_ticking() {
            return;
        }
        self.tick_counter += 1;
        match self
            .killer
            .tick(self.config.killer_cooldown, self.profile.cooldown_after_bonus)
        {
            KillerTick::Charged => self.apply_killer_bonus(),
            KillerTick::CooldownEnded => self.events.push(RuntimeEvent::CooldownEnded),
            KillerTick::Idle | KillerTick::Charging | KillerTick::Cooling => {}
        }
    }

    fn apply_killer_bonus(&mut self) {
        let bonus = killer_bonus(self.config.timer_duration);
        self.remaining = self
            .remaining
            .saturating_add(bonus)
            .min(self.config.timer_duration);
        self.events.push(RuntimeEvent::KillerBonus {
            bonus,
            remaining: self.remaining,
        });
    }

    /// New durations apply from the next hold or cooldown; an in-flight
    /// countdown keeps its period until the plan changes. A finished round
    /// always shows the full new duration, ready for the replay.
    pub fn apply_config(&mut self, config: GameConfig) {
        self.remaining = if self.running {
            self.remaining.min(config.timer_duration)
        } else {
            config.timer_duration
        };
        self.config = config;
    }

    pub fn restart(&mut self, config: Option<GameConfig>) {
        if let Some(config) = config {
            self.config = config;
        }
        self.remaining = self.config.timer_duration;
        self.running = true;
        self.participation.clear();
        self.killer.reset();
        self.events.push(RuntimeEvent::Restarted);
    }

    pub fn build_snapshot(&mut self, include_events: bool) -> Snapshot {
        let phase = self.killer.phase();
        let countdown_period_ms = match self.countdown_period() {
            Ok(period) => period,
            Err(_) => self.clamped_countdown_period(),
        }
        .map(|period| period.as_millis() as u64);

        let snapshot = Snapshot {
            tick: self.tick_counter,
            generated_at_iso: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            profile: self.profile.kind,
            remaining: self.remaining,
            remaining_label: format_time(self.remaining),
            timer_duration: self.config.timer_duration,
            running: self.running,
            progress_percent: progress_percent(self.remaining, self.config.timer_duration),
            active_count: self.participation.active_count(),
            active_participants: self.participation.ids(),
            countdown_period_ms,
            killer: KillerView {
                phase,
                active: phase.is_active(),
                cooldown_active: phase.is_cooldown(),
                hold_label: match phase {
                    KillerPhase::Active { hold_remaining } => Some(format_time(hold_remaining)),
                    _ => None,
                },
                cooldown_label: match phase {
                    KillerPhase::Cooldown { cooldown_remaining } => {
                        Some(format_time(cooldown_remaining))
                    }
                    _ => None,
                },
            },
            cycles_finished: self.cycles_finished,
            events: if include_events {
                self.events.clone()
            } else {
                Vec::new()
            },
        };
        if include_events {
            self.events.clear();
        }
        snapshot
    }

    pub fn drain_events(&mut self) -> Vec<RuntimeEvent> {
        std::mem::take(&mut self.events)
    }
}
