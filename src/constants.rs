pub const DEFAULT_TIMER_DURATION: u32 = 90;
pub const DEFAULT_KILLER_TIMER_DURATION: u32 = 5;
pub const DEFAULT_KILLER_COOLDOWN: u32 = 20;
pub const DEFAULT_PLAYER_TIMER_RATE: [f64; 4] = [1.0, 1.5, 2.0, 2.5];

pub const MAX_PARTICIPANTS: usize = 4;

pub const KILLER_BONUS_RATIO: f64 = 0.2;
pub const KILLER_TICK_MS: u64 = 1_000;

// One countdown cycle of `timer_duration / rate` seconds is spread over this many
// units, so each decrement lands every `timer_duration / rate / 60` seconds.
pub const COUNTDOWN_PERIOD_DIVISOR: f64 = 60.0;
pub const MIN_COUNTDOWN_PERIOD_MS: u64 = 1;
pub const MAX_COUNTDOWN_PERIOD_MS: u64 = 24 * 60 * 60 * 1000;

pub const DEFAULT_PORT: u16 = 3000;
pub const SESSION_COMMAND_CAPACITY: usize = 64;
pub const SNAPSHOT_BROADCAST_CAPACITY: usize = 32;

pub fn killer_bonus(timer_duration: u32) -> u32 {
    (timer_duration as f64 * KILLER_BONUS_RATIO).floor() as u32
}

pub fn format_time(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

pub fn progress_percent(remaining: u32, timer_duration: u32) -> u32 {
    if timer_duration == 0 {
        return 0;
    }
    let elapsed = timer_duration.saturating_sub(remaining.min(timer_duration));
    ((elapsed as f64 / timer_duration as f64) * 100.0).round() as u32
}
