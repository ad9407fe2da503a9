use anyhow::{bail, Result};
use clap::Parser;
use hot_potato_server::constants::MAX_PARTICIPANTS;
use hot_potato_server::engine::GameEngine;
use hot_potato_server::server_utils::init_logging;
use hot_potato_server::session::{TimerChange, TimerSync};
use hot_potato_server::settings_client::SettingsClient;
use hot_potato_server::types::{
    GameConfig, ParticipantId, ProfileKind, RuntimeEvent, SessionProfile, Snapshot,
};
use serde::Serialize;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};

const NANOS_PER_MS: u64 = 1_000_000;
/// A scenario waiting for a finish gives up after one simulated day.
const FINISH_SAFETY_NS: u64 = 24 * 60 * 60 * 1_000 * NANOS_PER_MS;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Run one custom scenario with this many holders.
    #[arg(long)]
    players: Option<usize>,
    /// In the custom scenario, hand over to the killer once before finishing.
    #[arg(long)]
    killer_hold: bool,
    /// `killer_cooldown` (default) or `simple`
    #[arg(long)]
    profile: Option<String>,
    /// Fetch the game config from a running server instead of using defaults.
    #[arg(long)]
    settings_url: Option<String>,
    #[arg(long)]
    match_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Begin(ParticipantId),
    End(ParticipantId),
    KillerPress,
    KillerRelease,
    WaitMs(u64),
    UntilFinished,
}

#[derive(Clone, Debug)]
struct Scenario {
    name: String,
    steps: Vec<Step>,
}

#[derive(Clone, Debug, Default, Serialize)]
struct ScenarioResultLine {
    scenario: String,
    profile: Option<ProfileKind>,
    #[serde(rename = "simulatedMs")]
    simulated_ms: u64,
    #[serde(rename = "countdownTicks")]
    countdown_ticks: u64,
    #[serde(rename = "killerTicks")]
    killer_ticks: u64,
    finishes: u64,
    bonuses: u32,
    #[serde(rename = "bonusSeconds")]
    bonus_seconds: u32,
    cancels: u32,
    clamps: u32,
    #[serde(rename = "finalRemaining")]
    final_remaining: u32,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    #[serde(rename = "atMs")]
    at_ms: u64,
    message: String,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "matchId")]
    match_id: String,
    #[serde(rename = "startedAtMs")]
    started_at_ms: u64,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
    config: GameConfig,
    #[serde(rename = "scenarioCount")]
    scenario_count: usize,
    #[serde(rename = "anomalyCount")]
    anomaly_count: usize,
    #[serde(rename = "averageSimulatedMs")]
    average_simulated_ms: u64,
    scenarios: Vec<ScenarioResultLine>,
}

#[derive(Clone, Copy, Debug)]
struct Deadline {
    due_ns: u64,
    period_ns: u64,
}

impl Deadline {
    fn after(now_ns: u64, period: Duration) -> Self {
        let period_ns = u64::try_from(period.as_nanos()).unwrap_or(u64::MAX).max(1);
        Self {
            due_ns: now_ns.saturating_add(period_ns),
            period_ns,
        }
    }

    fn advance(&mut self) {
        self.due_ns = self.due_ns.saturating_add(self.period_ns);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TimerKind {
    Countdown,
    Killer,
}

/// Drives a `GameEngine` with the same timer rebuild rules as the live session,
/// but on a simulated clock so a full round costs microseconds.
struct VirtualRun {
    engine: GameEngine,
    timers: TimerSync,
    now_ns: u64,
    countdown: Option<Deadline>,
    killer: Option<Deadline>,
    result: ScenarioResultLine,
    anomaly_records: Vec<AnomalyRecord>,
    anomaly_seen: HashSet<String>,
}

impl VirtualRun {
    fn new(name: &str, config: GameConfig, profile: SessionProfile) -> Self {
        let mut run = Self {
            engine: GameEngine::new(config, profile),
            timers: TimerSync::new(),
            now_ns: 0,
            countdown: None,
            killer: None,
            result: ScenarioResultLine {
                scenario: name.to_string(),
                profile: Some(profile.kind),
                ..ScenarioResultLine::default()
            },
            anomaly_records: Vec::new(),
            anomaly_seen: HashSet::new(),
        };
        run.settle();
        run
    }

    fn apply(&mut self, step: Step) {
        match step {
            Step::Begin(id) => {
                self.engine.begin(id);
            }
            Step::End(id) => {
                self.engine.end(id);
            }
            Step::KillerPress => {
                self.engine.killer_press();
            }
            Step::KillerRelease => {
                self.engine.killer_release();
            }
            Step::WaitMs(ms) => {
                let target = self.now_ns.saturating_add(ms.saturating_mul(NANOS_PER_MS));
                self.run_until(target);
                return;
            }
            Step::UntilFinished => {
                self.run_until_finished();
                return;
            }
        }
        self.settle();
    }

    fn run_until(&mut self, target_ns: u64) {
        while let Some((kind, due_ns)) = self.next_due() {
            if due_ns > target_ns {
                break;
            }
            self.fire(kind, due_ns);
        }
        self.now_ns = self.now_ns.max(target_ns);
    }

    fn run_until_finished(&mut self) {
        let cycles = self.engine.cycles_finished();
        while self.engine.cycles_finished() == cycles {
            let Some((kind, due_ns)) = self.next_due() else {
                self.push_anomaly("no timer armed before the countdown finished".to_string());
                return;
            };
            if due_ns > FINISH_SAFETY_NS {
                self.push_anomaly("finish safety limit exceeded".to_string());
                return;
            }
            self.fire(kind, due_ns);
        }
    }

    /// Countdown wins ties so a finish lands before a same-instant killer tick.
    fn next_due(&self) -> Option<(TimerKind, u64)> {
        match (self.countdown, self.killer) {
            (Some(countdown), Some(killer)) if killer.due_ns < countdown.due_ns => {
                Some((TimerKind::Killer, killer.due_ns))
            }
            (Some(countdown), _) => Some((TimerKind::Countdown, countdown.due_ns)),
            (None, Some(killer)) => Some((TimerKind::Killer, killer.due_ns)),
            (None, None) => None,
        }
    }

    fn fire(&mut self, kind: TimerKind, due_ns: u64) {
        self.now_ns = due_ns;
        match kind {
            TimerKind::Countdown => {
                if let Some(deadline) = self.countdown.as_mut() {
                    deadline.advance();
                }
                self.result.countdown_ticks += 1;
                self.engine.countdown_tick();
            }
            TimerKind::Killer => {
                if let Some(deadline) = self.killer.as_mut() {
                    deadline.advance();
                }
                self.result.killer_ticks += 1;
                self.engine.killer_tick();
            }
        }
        self.settle();
    }

    fn settle(&mut self) {
        let changes = self.timers.sync(&mut self.engine);
        match changes.countdown {
            TimerChange::Start(period) => self.countdown = Some(Deadline::after(self.now_ns, period)),
            TimerChange::Stop => self.countdown = None,
            TimerChange::Unchanged => {}
        }
        match changes.killer {
            TimerChange::Start(period) => self.killer = Some(Deadline::after(self.now_ns, period)),
            TimerChange::Stop => self.killer = None,
            TimerChange::Unchanged => {}
        }

        let snapshot = self.engine.build_snapshot(true);
        for event in &snapshot.events {
            match event {
                RuntimeEvent::Finished { .. } => self.result.finishes += 1,
                RuntimeEvent::KillerBonus { bonus, .. } => {
                    self.result.bonuses += 1;
                    self.result.bonus_seconds += bonus;
                }
                RuntimeEvent::KillerCancelled => self.result.cancels += 1,
                RuntimeEvent::RateClamped { .. } => self.result.clamps += 1,
                _ => {}
            }
        }
        for message in collect_snapshot_anomalies(&snapshot) {
            self.push_anomaly(message);
        }
    }

    fn push_anomaly(&mut self, message: String) {
        push_anomaly(
            &mut self.result.anomalies,
            &mut self.anomaly_records,
            &mut self.anomaly_seen,
            self.now_ns / NANOS_PER_MS,
            message,
        );
    }

    fn finish(mut self) -> (ScenarioResultLine, Vec<AnomalyRecord>) {
        self.result.simulated_ms = self.now_ns / NANOS_PER_MS;
        self.result.final_remaining = self.engine.remaining();
        (self.result, self.anomaly_records)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let profile = match cli.profile.as_deref() {
        None => SessionProfile::default(),
        Some(raw) => match ProfileKind::parse(raw) {
            Some(kind) => SessionProfile::from_kind(kind),
            None => bail!("unknown game profile `{raw}`; use `killer_cooldown` or `simple`"),
        },
    };
    let config = match cli.settings_url.as_deref() {
        Some(url) => SettingsClient::new(url)?.fetch_or(GameConfig::default()).await,
        None => GameConfig::default(),
    };

    let run_started_at_ms = now_ms();
    let match_id = cli
        .match_id
        .clone()
        .unwrap_or_else(|| default_match_id(run_started_at_ms));
    let scenarios = resolve_scenarios(&cli, &config);

    let mut results = Vec::new();
    let mut total_anomalies = 0usize;
    for scenario in &scenarios {
        info!(match_id = %match_id, scenario = %scenario.name, steps = scenario.steps.len(), "scenario started");
        let (result, anomaly_records) = run_scenario(scenario, &config, profile);

        for anomaly in &anomaly_records {
            warn!(
                match_id = %match_id,
                scenario = %scenario.name,
                at_ms = anomaly.at_ms,
                message = %anomaly.message,
                "anomaly detected"
            );
        }
        total_anomalies += anomaly_records.len();

        info!(
            match_id = %match_id,
            scenario = %scenario.name,
            simulated_ms = result.simulated_ms,
            finishes = result.finishes,
            bonuses = result.bonuses,
            anomaly_count = anomaly_records.len(),
            "scenario finished"
        );
        println!("{}", serde_json::to_string(&result)?);
        results.push(result);
    }

    let has_anomaly = results.iter().any(|result| !result.anomalies.is_empty());
    let summary = build_run_summary(
        match_id.clone(),
        run_started_at_ms,
        now_ms(),
        config,
        results,
        total_anomalies,
    );

    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(write_error) = write_summary(path, &summary) {
            error!(path = %path.display(), %write_error, "summary write failed");
            std::process::exit(2);
        }
    }

    info!(
        match_id = %match_id,
        scenario_count = summary.scenario_count,
        anomaly_count = summary.anomaly_count,
        average_simulated_ms = summary.average_simulated_ms,
        "run finished"
    );

    if has_anomaly {
        std::process::exit(1);
    }
    Ok(())
}

fn run_scenario(
    scenario: &Scenario,
    config: &GameConfig,
    profile: SessionProfile,
) -> (ScenarioResultLine, Vec<AnomalyRecord>) {
    let mut run = VirtualRun::new(&scenario.name, config.clone(), profile);
    for step in &scenario.steps {
        run.apply(*step);
    }
    run.finish()
}

fn collect_snapshot_anomalies(snapshot: &Snapshot) -> Vec<String> {
    let mut anomalies = Vec::new();
    if snapshot.remaining > snapshot.timer_duration {
        anomalies.push(format!(
            "remaining out of range: {}/{}",
            snapshot.remaining, snapshot.timer_duration
        ));
    }
    if snapshot.running && snapshot.remaining == 0 {
        anomalies.push("running with nothing remaining".to_string());
    }
    if snapshot.killer.active && snapshot.killer.cooldown_active {
        anomalies.push("killer active during cooldown".to_string());
    }
    if snapshot.killer.active && snapshot.countdown_period_ms.is_some() {
        anomalies.push("countdown scheduled while killer holds".to_string());
    }
    anomalies
}

/// Time for the killer to charge, cool down, and settle one more tick.
fn killer_cycle_ms(config: &GameConfig) -> u64 {
    (u64::from(config.killer_timer_duration) + u64::from(config.killer_cooldown) + 1) * 1_000
}

fn resolve_scenarios(cli: &Cli, config: &GameConfig) -> Vec<Scenario> {
    if cli.players.is_some() || cli.killer_hold {
        let players = cli.players.unwrap_or(1).clamp(1, MAX_PARTICIPANTS) as ParticipantId;
        let holders = 1..=players;
        let mut steps: Vec<Step> = holders.clone().map(Step::Begin).collect();
        if cli.killer_hold {
            steps.push(Step::WaitMs(10_000));
            steps.extend(holders.clone().map(Step::End));
            steps.push(Step::KillerPress);
            steps.push(Step::WaitMs(killer_cycle_ms(config)));
            steps.extend(holders.map(Step::Begin));
        }
        steps.push(Step::UntilFinished);
        return vec![Scenario {
            name: format!(
                "custom-players{players}{}",
                if cli.killer_hold { "-killer" } else { "" }
            ),
            steps,
        }];
    }

    vec![
        Scenario {
            name: "solo-hold-finish".to_string(),
            steps: vec![Step::Begin(1), Step::UntilFinished],
        },
        Scenario {
            name: "four-players-range-clamp".to_string(),
            steps: vec![
                Step::Begin(1),
                Step::Begin(2),
                Step::Begin(3),
                Step::Begin(4),
                Step::WaitMs(10_000),
                Step::End(4),
                Step::UntilFinished,
            ],
        },
        Scenario {
            name: "killer-bonus-cooldown".to_string(),
            steps: vec![
                Step::Begin(1),
                Step::WaitMs(20_000),
                Step::End(1),
                Step::KillerPress,
                Step::WaitMs(killer_cycle_ms(config)),
                Step::Begin(1),
                Step::UntilFinished,
            ],
        },
        Scenario {
            name: "killer-early-release".to_string(),
            steps: vec![
                Step::KillerPress,
                Step::WaitMs(2_000),
                Step::KillerRelease,
                Step::KillerPress,
                Step::WaitMs(1_000),
                Step::KillerRelease,
            ],
        },
    ]
}

fn push_anomaly(
    anomalies: &mut Vec<String>,
    anomaly_records: &mut Vec<AnomalyRecord>,
    anomaly_seen: &mut HashSet<String>,
    at_ms: u64,
    message: String,
) {
    anomaly_records.push(AnomalyRecord {
        at_ms,
        message: message.clone(),
    });
    if anomaly_seen.insert(message.clone()) {
        anomalies.push(message);
    }
}

fn default_match_id(timestamp_ms: u64) -> String {
    format!("sim-{timestamp_ms}")
}

fn build_run_summary(
    match_id: String,
    started_at_ms: u64,
    finished_at_ms: u64,
    config: GameConfig,
    scenarios: Vec<ScenarioResultLine>,
    anomaly_count: usize,
) -> RunSummary {
    let scenario_count = scenarios.len();
    let total_simulated_ms: u64 = scenarios.iter().map(|result| result.simulated_ms).sum();
    let average_simulated_ms = if scenario_count == 0 {
        0
    } else {
        total_simulated_ms / scenario_count as u64
    };
    RunSummary {
        match_id,
        started_at_ms,
        finished_at_ms,
        config,
        scenario_count,
        anomaly_count,
        average_simulated_ms,
        scenarios,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, summary_text)
}
