//! Timer engine implementation.
//!
//! The timer engine is a clock-driven state machine. It does not use
//! internal threads - the caller is responsible for calling `tick()`
//! periodically (see [`super::TimerDriver`] for an in-process loop).
//!
//! ## Phase cycle
//!
//! ```text
//! Focus -> ShortBreak -> Focus -> ... -> Focus -> LongBreak -> Focus
//!                         (every `sessions_until_long_break` focus completions)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let mut engine = TimerEngine::new(settings);
//! engine.start();
//! // In a loop:
//! engine.tick(); // Returns Some(Event::PhaseChanged) when a phase expires
//! ```

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::clock::{Clock, SystemClock};
use super::phase::Phase;
use crate::events::{Event, TransitionReason};
use crate::settings::Settings;

fn default_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Core timer engine.
///
/// Operates on clock deltas -- no internal thread.
/// The caller is responsible for calling `tick()` periodically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerEngine {
    settings: Settings,
    phase: Phase,
    running: bool,
    seconds_left: u64,
    /// Focus phases completed so far; drives the long-break policy.
    completed_focus: u32,
    /// Clock reading the countdown was last charged up to. Advances in whole
    /// seconds so the sub-second remainder carries into the next tick.
    #[serde(default)]
    last_tick_ms: Option<u64>,
    /// Number of phase transitions so far.
    #[serde(default)]
    seq: u64,
    #[serde(skip, default = "default_clock")]
    clock: Arc<dyn Clock>,
}

impl TimerEngine {
    /// Create a stopped engine in the focus phase with a full countdown,
    /// reading wall-clock time.
    pub fn new(settings: Settings) -> Self {
        Self::with_clock(settings, default_clock())
    }

    pub fn with_clock(settings: Settings, clock: Arc<dyn Clock>) -> Self {
        let seconds_left = Phase::Focus.duration_secs(&settings);
        Self {
            settings,
            phase: Phase::Focus,
            running: false,
            seconds_left,
            completed_focus: 0,
            last_tick_ms: None,
            seq: 0,
            clock,
        }
    }

    /// Attach a clock on the same timeline as the stored anchor, e.g. after
    /// deserializing a persisted engine. Nothing is re-anchored.
    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    /// Move a running countdown onto another clock's timeline.
    ///
    /// Time elapsed on the old clock but not yet charged (the sub-second
    /// remainder, or more if nobody ticked) stays pending on the new one.
    pub fn rebase_clock(&mut self, clock: Arc<dyn Clock>) {
        let pending = self
            .last_tick_ms
            .map(|last| self.clock.now_ms().saturating_sub(last));
        self.clock = clock;
        if let Some(pending) = pending {
            self.last_tick_ms = Some(self.clock.now_ms().saturating_sub(pending));
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn seconds_left(&self) -> u64 {
        self.seconds_left
    }

    pub fn completed_focus(&self) -> u32 {
        self.completed_focus
    }

    pub fn transitions(&self) -> u64 {
        self.seq
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Full length of the current phase in seconds.
    pub fn total_secs(&self) -> u64 {
        self.phase.duration_secs(&self.settings)
    }

    /// 0.0 .. 1.0 progress within the current phase.
    pub fn progress(&self) -> f64 {
        let total = self.total_secs();
        if total == 0 {
            return 0.0;
        }
        1.0 - (self.seconds_left as f64 / total as f64)
    }

    /// `0 <= seconds_left <= total_secs()`.
    pub fn is_consistent(&self) -> bool {
        self.seconds_left <= self.total_secs()
    }

    /// Window-title style label, e.g. `"24:59 - Focus"`.
    pub fn title(&self) -> String {
        let paused = !self.running && self.seconds_left < self.total_secs();
        format_title(self.seconds_left, self.phase, paused)
    }

    /// Build a full state snapshot event.
    pub fn snapshot(&self) -> Event {
        Event::StateSnapshot {
            phase: self.phase,
            is_running: self.running,
            seconds_left: self.seconds_left,
            total_secs: self.total_secs(),
            progress: self.progress(),
            completed_focus: self.completed_focus,
            title: self.title(),
            at: Utc::now(),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Begin counting down. Returns `None` if already running.
    pub fn start(&mut self) -> Option<Event> {
        if self.running {
            return None;
        }
        self.running = true;
        self.last_tick_ms = Some(self.clock.now_ms());
        Some(Event::TimerStarted {
            phase: self.phase,
            seconds_left: self.seconds_left,
            at: Utc::now(),
        })
    }

    /// Stop counting down, keeping the remaining time. Returns `None` if
    /// already stopped.
    pub fn stop(&mut self) -> Option<Event> {
        if !self.running {
            return None;
        }
        self.flush_elapsed();
        self.running = false;
        self.last_tick_ms = None;
        Some(Event::TimerStopped {
            phase: self.phase,
            seconds_left: self.seconds_left,
            at: Utc::now(),
        })
    }

    /// Stop and refill the countdown for `phase` (default: current phase).
    ///
    /// Switching to a different phase is a manual transition and also
    /// yields a `PhaseChanged` event, placed before the `TimerReset`.
    pub fn reset(&mut self, phase: Option<Phase>) -> Vec<Event> {
        let mut events = Vec::with_capacity(2);
        let from = self.phase;
        let ended_duration_secs = self.total_secs();
        let target = phase.unwrap_or(from);

        self.running = false;
        self.last_tick_ms = None;
        self.phase = target;
        self.seconds_left = self.total_secs();

        if target != from {
            self.seq += 1;
            events.push(Event::PhaseChanged {
                from,
                to: target,
                reason: TransitionReason::Manual,
                completed_focus: self.completed_focus,
                seq: self.seq,
                auto_started: false,
                ended_duration_secs,
                next_duration_secs: self.seconds_left,
                at: Utc::now(),
            });
        }
        events.push(Event::TimerReset {
            phase: self.phase,
            seconds_left: self.seconds_left,
            at: Utc::now(),
        });
        events
    }

    /// Call periodically. Returns `Some(Event::PhaseChanged)` when the
    /// current phase expires.
    ///
    /// At most one transition happens per call; time elapsed past the
    /// expiry is not carried into the next phase.
    pub fn tick(&mut self) -> Option<Event> {
        if !self.running {
            return None;
        }
        self.flush_elapsed();
        if self.seconds_left > 0 {
            return None;
        }
        Some(self.complete_phase())
    }

    /// Adopt new settings.
    ///
    /// If the active phase's length changed, a running countdown keeps its
    /// completion fraction and a stopped one snaps to the new full length.
    pub fn apply_settings(&mut self, settings: Settings) -> Event {
        let old_total = self.total_secs();
        let new_total = self.phase.duration_secs(&settings);

        if self.running {
            self.flush_elapsed();
        }
        self.settings = settings;

        if old_total != new_total {
            self.seconds_left = if self.running {
                rescale_remaining(self.seconds_left, old_total, new_total)
            } else {
                new_total
            };
        }

        Event::SettingsChanged {
            settings: self.settings.clone(),
            at: Utc::now(),
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn flush_elapsed(&mut self) {
        let Some(last) = self.last_tick_ms else {
            return;
        };
        let now = self.clock.now_ms();
        let whole_secs = now.saturating_sub(last) / 1000;
        if whole_secs == 0 {
            return;
        }
        self.seconds_left = self.seconds_left.saturating_sub(whole_secs);
        self.last_tick_ms = Some(last + whole_secs * 1000);
    }

    fn complete_phase(&mut self) -> Event {
        let from = self.phase;
        let ended_duration_secs = self.total_secs();
        if from == Phase::Focus {
            self.completed_focus = self.completed_focus.saturating_add(1);
        }
        let to = from.next(self.completed_focus, self.settings.sessions_until_long_break);

        self.phase = to;
        self.seconds_left = self.total_secs();
        self.seq += 1;

        let auto_started = self.settings.auto_start_next;
        self.running = auto_started;
        self.last_tick_ms = auto_started.then(|| self.clock.now_ms());

        tracing::info!(
            from = %from,
            to = %to,
            completed_focus = self.completed_focus,
            auto_started,
            "phase complete"
        );

        Event::PhaseChanged {
            from,
            to,
            reason: TransitionReason::Completed,
            completed_focus: self.completed_focus,
            seq: self.seq,
            auto_started,
            ended_duration_secs,
            next_duration_secs: self.seconds_left,
            at: Utc::now(),
        }
    }
}

/// `"MM:SS - Phase"`, with a `" (paused)"` suffix when asked.
pub fn format_title(seconds_left: u64, phase: Phase, paused: bool) -> String {
    let title = format!(
        "{:02}:{:02} - {}",
        seconds_left / 60,
        seconds_left % 60,
        phase.label()
    );
    if paused {
        format!("{title} (paused)")
    } else {
        title
    }
}

/// Rescale `left` out of `old_total` onto `new_total`, preserving the
/// completion fraction. Rounds to the nearest second, clamped to
/// `[0, new_total]`.
pub fn rescale_remaining(left: u64, old_total: u64, new_total: u64) -> u64 {
    if old_total == 0 {
        return new_total;
    }
    let scaled = (left as f64 * new_total as f64 / old_total as f64).round();
    (scaled.max(0.0) as u64).min(new_total)
}
