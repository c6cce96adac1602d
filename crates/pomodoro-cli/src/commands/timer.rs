use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Subcommand;
use pomodoro_core::events::TransitionReason;
use pomodoro_core::listeners::completion_message;
use pomodoro_core::sync::{device_id, OnlineFlag, SessionSync};
use pomodoro_core::timer::MonotonicClock;
use pomodoro_core::{
    dispatch, Event, EventBus, Listener, Phase, SessionTally, Settings, SharedEngine, SystemClock,
    TimerDriver, TimerEngine, TitleListener, Watchdog,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::app::{print_json, App, CliResult};

#[derive(Subcommand)]
pub enum TimerAction {
    /// Start (or resume) the countdown
    Start,
    /// Pause the countdown, keeping the remaining time
    Stop,
    /// Stop and refill the countdown
    Reset {
        /// Switch to this phase (focus, short-break, long-break)
        #[arg(long)]
        phase: Option<Phase>,
    },
    /// Print current timer state as JSON
    Status,
    /// Run the timer in the foreground
    Run {
        /// Exit after this many phase transitions
        #[arg(long)]
        phases: Option<u32>,
    },
}

/// Rings the terminal bell and prints a line when a phase completes.
struct Bell {
    settings: Settings,
    last_seq: u64,
}

impl Listener for Bell {
    fn name(&self) -> &'static str {
        "bell"
    }

    fn on_event(&mut self, event: &Event) -> pomodoro_core::error::Result<()> {
        if let Event::SettingsChanged { settings, .. } = event {
            self.settings = settings.clone();
            return Ok(());
        }
        let Event::PhaseChanged {
            from,
            to,
            reason: TransitionReason::Completed,
            seq,
            ..
        } = event
        else {
            return Ok(());
        };
        if *seq <= self.last_seq {
            return Ok(());
        }
        self.last_seq = *seq;

        let mut stderr = std::io::stderr().lock();
        if self.settings.sound {
            write!(stderr, "\x07")?;
        }
        if self.settings.notifications {
            writeln!(stderr, "{}", completion_message(*from, *to))?;
        }
        stderr.flush()?;
        Ok(())
    }
}

/// Listeners and the sync mirror for one invocation.
struct Reactions {
    tally: SessionTally<Arc<pomodoro_core::Database>>,
    title: TitleListener,
    bell: Bell,
    sync: Option<SessionSync>,
    pending: Vec<JoinHandle<()>>,
    timeout: Duration,
}

impl Reactions {
    fn new(app: &App, engine: &TimerEngine) -> Self {
        let seq = engine.transitions();
        let sync = if app.config.sync.enabled {
            match device_id() {
                Ok(id) => Some(
                    SessionSync::new(app.config.sync.clone(), id, Arc::new(OnlineFlag::default()))
                        .with_error_log(app.errors()),
                ),
                Err(e) => {
                    tracing::warn!(error = %e, "no device id, session sync disabled");
                    None
                }
            }
        } else {
            None
        };
        Self {
            tally: SessionTally::starting_after(app.db.clone(), seq),
            title: TitleListener::new(),
            bell: Bell {
                settings: app.settings.get(),
                last_seq: seq,
            },
            sync,
            pending: Vec::new(),
            timeout: Duration::from_secs(app.config.sync.timeout_secs.max(1)),
        }
    }

    fn handle(&mut self, event: &Event) {
        let mut listeners: [&mut dyn Listener; 3] =
            [&mut self.tally, &mut self.title, &mut self.bell];
        dispatch(event, &mut listeners);
        if let Some(handle) = self.sync.as_ref().and_then(|s| s.record(event)) {
            self.pending.push(handle);
        }
    }

    /// Give in-flight pushes a chance to finish before the process exits.
    async fn flush(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return;
        }
        let wait = async {
            for handle in pending {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.timeout, wait).await.is_err() {
            tracing::warn!("session sync still in flight at exit, dropping");
        }
    }
}

pub fn run(action: TimerAction) -> CliResult {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_async(action))
}

async fn run_async(action: TimerAction) -> CliResult {
    let app = App::open()?;
    let mut engine = app.load_engine()?;
    let mut reactions = Reactions::new(&app, &engine);

    // time that passed while no process was running
    if let Some(ev) = engine.tick() {
        reactions.handle(&ev);
        print_json(&ev)?;
    }

    match action {
        TimerAction::Start => {
            let ev = engine.start();
            emit(&mut reactions, ev.as_ref(), &engine)?;
        }
        TimerAction::Stop => {
            let ev = engine.stop();
            emit(&mut reactions, ev.as_ref(), &engine)?;
        }
        TimerAction::Reset { phase } => {
            for ev in engine.reset(phase) {
                reactions.handle(&ev);
                print_json(&ev)?;
            }
        }
        TimerAction::Status => print_json(&engine.snapshot())?,
        TimerAction::Run { phases } => {
            engine = run_foreground(&app, engine, &mut reactions, phases).await?;
        }
    }

    app.save_engine(&engine)?;
    reactions.flush().await;
    Ok(())
}

/// Print `event`, or the current state when the command was a no-op.
fn emit(reactions: &mut Reactions, event: Option<&Event>, engine: &TimerEngine) -> CliResult {
    match event {
        Some(ev) => {
            reactions.handle(ev);
            print_json(ev)
        }
        None => print_json(&engine.snapshot()),
    }
}

/// How often `timer run` looks for settings and timer changes made by other
/// invocations.
const RELOAD_PERIOD: Duration = Duration::from_secs(1);

/// The stored engine as last written by the foreground timer.
///
/// Other invocations (`timer stop`, `timer reset`, `settings set`) write the
/// stored engine directly. When the stored JSON no longer matches what the
/// foreground timer wrote, their state is adopted instead of overwritten.
#[derive(Default)]
struct StoredEngine {
    last_written: Option<String>,
}

impl StoredEngine {
    fn save(&mut self, app: &App, engine: &TimerEngine) -> CliResult {
        let mut wall = engine.clone();
        wall.rebase_clock(Arc::new(SystemClock));
        self.last_written = Some(app.save_engine(&wall)?);
        Ok(())
    }

    /// The engine another invocation stored since our last write, if any.
    fn take_external(&mut self, app: &App) -> CliResult<Option<TimerEngine>> {
        let stored = app.stored_engine_json()?;
        if stored == self.last_written {
            return Ok(None);
        }
        let Some(raw) = stored else {
            return Ok(None);
        };
        self.last_written = Some(raw.clone());
        match serde_json::from_str::<TimerEngine>(&raw) {
            Ok(engine) => Ok(Some(engine)),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable timer state written elsewhere");
                Ok(None)
            }
        }
    }
}

/// Swap an engine stored by another invocation into the running timer and
/// return its snapshot.
fn adopt(shared: &SharedEngine, mut external: TimerEngine, settings: &Settings) -> Event {
    external.rebase_clock(Arc::new(MonotonicClock::new()));
    if external.settings() != settings {
        external.apply_settings(settings.clone());
    }
    let snapshot = external.snapshot();
    *shared.lock().unwrap_or_else(|p| p.into_inner()) = external;
    tracing::info!("timer changed by another invocation, following it");
    snapshot
}

async fn run_foreground(
    app: &App,
    mut engine: TimerEngine,
    reactions: &mut Reactions,
    phases: Option<u32>,
) -> CliResult<TimerEngine> {
    engine.rebase_clock(Arc::new(MonotonicClock::new()));
    if let Some(ev) = engine.start() {
        reactions.handle(&ev);
        print_line(&ev)?;
    }
    let mut stored = StoredEngine::default();
    stored.save(app, &engine)?;

    let shared = Arc::new(Mutex::new(engine));
    let bus = EventBus::new();
    let mut rx = bus.subscribe();

    let follow = shared.clone();
    let notices = bus.clone();
    let subscription = app.settings.subscribe(move |settings| {
        let ev = follow
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .apply_settings(settings.clone());
        notices.publish(ev);
    });
    let watchdog = Watchdog::new(app.kv(), app.config.watchdog.clone())
        .with_settings(app.settings.clone())
        .spawn_periodic(
            Some(shared.clone()),
            Duration::from_secs(app.config.watchdog.interval_secs),
        );
    let driver = TimerDriver::new(shared.clone(), bus).spawn();

    let outcome = follow_events(app, &shared, &mut rx, reactions, &mut stored, phases).await;

    driver.abort();
    watchdog.abort();
    subscription.unsubscribe();
    outcome?;

    let mut engine = shared.lock().unwrap_or_else(|p| p.into_inner()).clone();
    if let Some(external) = stored.take_external(app)? {
        engine = external;
    }
    engine.rebase_clock(Arc::new(SystemClock));
    Ok(engine)
}

/// Print and react to timer events until `phases` transitions were seen,
/// keeping the stored engine and settings in step with other invocations.
async fn follow_events(
    app: &App,
    shared: &SharedEngine,
    rx: &mut broadcast::Receiver<Event>,
    reactions: &mut Reactions,
    stored: &mut StoredEngine,
    phases: Option<u32>,
) -> CliResult {
    let mut reload = tokio::time::interval(RELOAD_PERIOD);
    reload.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut seen = 0u32;
    loop {
        tokio::select! {
            received = rx.recv() => {
                let ev = match received {
                    Ok(ev) => ev,
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "timer events dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => return Ok(()),
                };
                reactions.handle(&ev);
                print_line(&ev)?;
                eprintln!("{}", reactions.title.title());

                match stored.take_external(app)? {
                    Some(external) => print_line(&adopt(shared, external, &app.settings.get()))?,
                    None => {
                        let snapshot = shared.lock().unwrap_or_else(|p| p.into_inner()).clone();
                        stored.save(app, &snapshot)?;
                    }
                }

                if ev.is_phase_change() {
                    seen += 1;
                    if phases.is_some_and(|limit| seen >= limit) {
                        return Ok(());
                    }
                }
            }
            _ = reload.tick() => {
                if let Err(e) = app.settings.reload() {
                    tracing::warn!(error = %e, "could not reload settings");
                }
                if let Some(external) = stored.take_external(app)? {
                    print_line(&adopt(shared, external, &app.settings.get()))?;
                }
            }
        }
    }
}

fn print_line(event: &Event) -> CliResult {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}
