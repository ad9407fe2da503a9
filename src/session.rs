use std::future::pending;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::constants::{KILLER_TICK_MS, SESSION_COMMAND_CAPACITY, SNAPSHOT_BROADCAST_CAPACITY};
use crate::engine::{CountdownPlan, GameEngine};
use crate::error::SessionClosed;
use crate::types::{GameConfig, KillerPhase, ParticipantId, RuntimeEvent, SessionProfile, Snapshot};

#[derive(Debug)]
enum SessionInput {
    Begin(ParticipantId),
    End(ParticipantId),
    KillerPress,
    KillerRelease,
    ApplyConfig(GameConfig),
    Restart(Option<GameConfig>),
    Observe,
    Shutdown,
}

struct SessionCommand {
    input: SessionInput,
    reply: oneshot::Sender<CommandOutcome>,
}

/// Result of a control command. `accepted` is false when the engine refused the
/// change or it was already in effect.
#[derive(Clone, Debug)]
pub struct CommandOutcome {
    pub accepted: bool,
    pub snapshot: Snapshot,
}

/// Cloneable front door to one running game session. The session stops when
/// `shutdown` is called or every handle has been dropped.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    updates: broadcast::Sender<Snapshot>,
}

impl SessionHandle {
    pub fn spawn(config: GameConfig, profile: SessionProfile) -> Self {
        let (commands, command_rx) = mpsc::channel(SESSION_COMMAND_CAPACITY);
        let (updates, _) = broadcast::channel(SNAPSHOT_BROADCAST_CAPACITY);
        let runtime = SessionRuntime::new(GameEngine::new(config, profile), updates.clone());
        tokio::spawn(runtime.run(command_rx));
        Self { commands, updates }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.updates.subscribe()
    }

    pub async fn begin(&self, id: ParticipantId) -> Result<CommandOutcome, SessionClosed> {
        self.request(SessionInput::Begin(id)).await
    }

    pub async fn end(&self, id: ParticipantId) -> Result<CommandOutcome, SessionClosed> {
        self.request(SessionInput::End(id)).await
    }

    pub async fn killer_press(&self) -> Result<CommandOutcome, SessionClosed> {
        self.request(SessionInput::KillerPress).await
    }

    pub async fn killer_release(&self) -> Result<CommandOutcome, SessionClosed> {
        self.request(SessionInput::KillerRelease).await
    }

    pub async fn apply_config(&self, config: GameConfig) -> Result<Snapshot, SessionClosed> {
        self.snapshot_of(SessionInput::ApplyConfig(config)).await
    }

    pub async fn restart(&self, config: Option<GameConfig>) -> Result<Snapshot, SessionClosed> {
        self.snapshot_of(SessionInput::Restart(config)).await
    }

    pub async fn snapshot(&self) -> Result<Snapshot, SessionClosed> {
        self.snapshot_of(SessionInput::Observe).await
    }

    pub async fn shutdown(&self) -> Result<(), SessionClosed> {
        self.request(SessionInput::Shutdown).await.map(|_| ())
    }

    async fn snapshot_of(&self, input: SessionInput) -> Result<Snapshot, SessionClosed> {
        self.request(input).await.map(|outcome| outcome.snapshot)
    }

    async fn request(&self, input: SessionInput) -> Result<CommandOutcome, SessionClosed> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionCommand { input, reply })
            .await
            .map_err(|_| SessionClosed)?;
        response.await.map_err(|_| SessionClosed)
    }
}

/// A cancellable periodic timer. Starting replaces any previous interval, so a
/// ticker never has two live tick streams.
#[derive(Default)]
struct Ticker {
    interval: Option<Interval>,
}

impl Ticker {
    fn start(&mut self, period: Duration) {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    fn stop(&mut self) {
        self.interval = None;
    }

    async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => pending::<()>().await,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum KillerClock {
    #[default]
    Off,
    Hold,
    Cooldown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerChange {
    Unchanged,
    Start(Duration),
    Stop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerChanges {
    pub countdown: TimerChange,
    pub killer: TimerChange,
}

/// Decides when the countdown and killer timers must be rebuilt. The countdown
/// only changes with its plan; the killer timer restarts on every phase entry.
#[derive(Debug, Default)]
pub struct TimerSync {
    countdown_plan: Option<CountdownPlan>,
    killer_clock: KillerClock,
}

impl TimerSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sync(&mut self, engine: &mut GameEngine) -> TimerChanges {
        let mut changes = TimerChanges {
            countdown: TimerChange::Unchanged,
            killer: TimerChange::Unchanged,
        };

        let plan = engine.countdown_plan();
        if self.countdown_plan != Some(plan) {
            self.countdown_plan = Some(plan);
            changes.countdown = match engine.schedule_countdown() {
                Some(period) => TimerChange::Start(period),
                None => TimerChange::Stop,
            };
        }

        let clock = if !engine.is_running() {
            KillerClock::Off
        } else {
            match engine.killer_phase() {
                KillerPhase::Idle => KillerClock::Off,
                KillerPhase::Active { .. } => KillerClock::Hold,
                KillerPhase::Cooldown { .. } => KillerClock::Cooldown,
            }
        };
        if clock != self.killer_clock {
            self.killer_clock = clock;
            changes.killer = match clock {
                KillerClock::Off => TimerChange::Stop,
                KillerClock::Hold | KillerClock::Cooldown => {
                    TimerChange::Start(Duration::from_millis(KILLER_TICK_MS))
                }
            };
        }
        changes
    }
}

struct SessionRuntime {
    engine: GameEngine,
    countdown: Ticker,
    killer: Ticker,
    timers: TimerSync,
    updates: broadcast::Sender<Snapshot>,
}

impl SessionRuntime {
    fn new(engine: GameEngine, updates: broadcast::Sender<Snapshot>) -> Self {
        Self {
            engine,
            countdown: Ticker::default(),
            killer: Ticker::default(),
            timers: TimerSync::new(),
            updates,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        info!(profile = ?self.engine.profile().kind, "game session started");
        self.sync_timers();

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if !self.handle_command(command) {
                        break;
                    }
                }
                _ = self.countdown.tick() => {
                    self.engine.countdown_tick();
                    self.publish();
                }
                _ = self.killer.tick() => {
                    self.engine.killer_tick();
                    self.publish();
                }
            }
        }

        self.countdown.stop();
        self.killer.stop();
        info!("game session stopped");
    }

    fn handle_command(&mut self, command: SessionCommand) -> bool {
        let SessionCommand { input, reply } = command;
        debug!(?input, "session command");

        let keep_running = !matches!(input, SessionInput::Shutdown);
        let read_only = matches!(input, SessionInput::Observe | SessionInput::Shutdown);
        let accepted = match input {
            SessionInput::Begin(id) => self.engine.begin(id),
            SessionInput::End(id) => self.engine.end(id),
            SessionInput::KillerPress => self.engine.killer_press(),
            SessionInput::KillerRelease => self.engine.killer_release(),
            SessionInput::ApplyConfig(config) => {
                self.engine.apply_config(config);
                true
            }
            SessionInput::Restart(config) => {
                self.engine.restart(config);
                true
            }
            SessionInput::Observe | SessionInput::Shutdown => false,
        };
        let snapshot = if read_only {
            self.engine.build_snapshot(false)
        } else {
            self.publish()
        };

        let _ = reply.send(CommandOutcome { accepted, snapshot });
        keep_running
    }

    fn publish(&mut self) -> Snapshot {
        self.sync_timers();
        let snapshot = self.engine.build_snapshot(true);
        for event in &snapshot.events {
            log_event(event);
        }
        let _ = self.updates.send(snapshot.clone());
        snapshot
    }

    fn sync_timers(&mut self) {
        let changes = self.timers.sync(&mut self.engine);
        match changes.countdown {
            TimerChange::Start(period) => {
                debug!(
                    active_count = self.engine.active_count(),
                    period_ms = period.as_millis() as u64,
                    "countdown rescheduled"
                );
                self.countdown.start(period);
            }
            TimerChange::Stop => self.countdown.stop(),
            TimerChange::Unchanged => {}
        }
        match changes.killer {
            TimerChange::Start(period) => self.killer.start(period),
            TimerChange::Stop => self.killer.stop(),
            TimerChange::Unchanged => {}
        }
    }
}

fn log_event(event: &RuntimeEvent) {
    match event {
        RuntimeEvent::Finished { cycle } => info!(cycle, "countdown finished"),
        RuntimeEvent::KillerBonus { bonus, remaining } => {
            info!(bonus, remaining, "killer bonus applied")
        }
        RuntimeEvent::Restarted => info!("session restarted"),
        other => debug!(event = ?other, "session event"),
    }
}
