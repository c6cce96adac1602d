//! Independent reactions to timer events.
//!
//! Each listener looks only at the event it is handed, so listeners can run
//! in any order. Phase-change handling is keyed by the event's `seq`, so a
//! redelivered `PhaseChanged` is ignored.

use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::events::{Event, TransitionReason};
use crate::timer::{format_title, Phase};

pub trait Listener {
    fn name(&self) -> &'static str;
    fn on_event(&mut self, event: &Event) -> Result<()>;
}

/// Deliver `event` to every listener.
///
/// A listener that errors or panics is logged and skipped; the others still
/// run. Returns the names of the listeners that failed.
pub fn dispatch(event: &Event, listeners: &mut [&mut dyn Listener]) -> Vec<&'static str> {
    let mut failed = Vec::new();
    for listener in listeners.iter_mut() {
        let name = listener.name();
        match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(listener = name, error = %e, "listener failed");
                failed.push(name);
            }
            Err(_) => {
                tracing::error!(listener = name, "listener panicked");
                failed.push(name);
            }
        }
    }
    failed
}

/// Keeps a window-title style string in sync with the timer.
#[derive(Debug, Default)]
pub struct TitleListener {
    title: String,
    last_seq: u64,
}

impl TitleListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

impl Listener for TitleListener {
    fn name(&self) -> &'static str {
        "title"
    }

    fn on_event(&mut self, event: &Event) -> Result<()> {
        match event {
            Event::PhaseChanged {
                to,
                seq,
                next_duration_secs,
                ..
            } => {
                if *seq > self.last_seq {
                    self.last_seq = *seq;
                    self.title = format_title(*next_duration_secs, *to, false);
                }
            }
            Event::StateSnapshot { title, .. } => self.title = title.clone(),
            Event::TimerStarted {
                phase,
                seconds_left,
                ..
            }
            | Event::TimerReset {
                phase,
                seconds_left,
                ..
            } => self.title = format_title(*seconds_left, *phase, false),
            Event::TimerStopped {
                phase,
                seconds_left,
                ..
            } => self.title = format_title(*seconds_left, *phase, true),
            Event::SettingsChanged { .. } => {}
        }
        Ok(())
    }
}

/// Somewhere to store completed phases.
pub trait SessionRecorder {
    fn record(
        &self,
        phase: Phase,
        duration_min: u64,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Result<()>;
}

impl<T: SessionRecorder + ?Sized> SessionRecorder for &T {
    fn record(
        &self,
        phase: Phase,
        duration_min: u64,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        (**self).record(phase, duration_min, started_at, completed_at)
    }
}

impl<T: SessionRecorder + ?Sized> SessionRecorder for std::sync::Arc<T> {
    fn record(
        &self,
        phase: Phase,
        duration_min: u64,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        (**self).record(phase, duration_min, started_at, completed_at)
    }
}

/// Records one session per phase that ran to completion. Manual
/// transitions are not sessions.
pub struct SessionTally<R: SessionRecorder> {
    recorder: R,
    last_seq: u64,
    recorded: u64,
}

impl<R: SessionRecorder> SessionTally<R> {
    pub fn new(recorder: R) -> Self {
        Self::starting_after(recorder, 0)
    }

    /// Ignore transitions up to and including `seq`.
    pub fn starting_after(recorder: R, seq: u64) -> Self {
        Self {
            recorder,
            last_seq: seq,
            recorded: 0,
        }
    }

    pub fn recorded(&self) -> u64 {
        self.recorded
    }
}

impl<R: SessionRecorder> Listener for SessionTally<R> {
    fn name(&self) -> &'static str {
        "session-tally"
    }

    fn on_event(&mut self, event: &Event) -> Result<()> {
        let Event::PhaseChanged {
            from,
            reason: TransitionReason::Completed,
            seq,
            ended_duration_secs,
            at,
            ..
        } = event
        else {
            return Ok(());
        };
        if *seq <= self.last_seq {
            return Ok(());
        }
        self.last_seq = *seq;

        let started_at = *at - Duration::seconds(*ended_duration_secs as i64);
        self.recorder
            .record(*from, ended_duration_secs / 60, started_at, *at)?;
        self.recorded += 1;
        Ok(())
    }
}

/// Human-readable text for a finished phase, for sound/notification sinks.
pub fn completion_message(from: Phase, to: Phase) -> String {
    match (from, to) {
        (Phase::Focus, Phase::LongBreak) => "Focus complete! Time for a long break.".into(),
        (Phase::Focus, _) => "Focus complete! Time for a short break.".into(),
        (_, Phase::Focus) => "Break is over. Back to focus.".into(),
        (_, to) => format!("Switched to {}.", to.label()),
    }
}
