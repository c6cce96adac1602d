use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::settings::Settings;
use crate::timer::Phase;

/// Why the timer moved to a new phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// The countdown reached zero.
    Completed,
    /// The user reset into a different phase.
    Manual,
}

/// Every state change in the timer produces an Event.
/// Listeners receive them through the [`EventBus`] or [`crate::listeners::dispatch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    TimerStarted {
        phase: Phase,
        seconds_left: u64,
        at: DateTime<Utc>,
    },
    TimerStopped {
        phase: Phase,
        seconds_left: u64,
        at: DateTime<Utc>,
    },
    TimerReset {
        phase: Phase,
        seconds_left: u64,
        at: DateTime<Utc>,
    },
    /// Fired exactly once per transition. `seq` increases by one per
    /// transition and lets listeners ignore redeliveries.
    PhaseChanged {
        from: Phase,
        to: Phase,
        reason: TransitionReason,
        completed_focus: u32,
        seq: u64,
        auto_started: bool,
        /// Full length of the phase that just ended.
        ended_duration_secs: u64,
        /// Countdown the new phase starts from.
        next_duration_secs: u64,
        at: DateTime<Utc>,
    },
    SettingsChanged {
        settings: Settings,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        phase: Phase,
        is_running: bool,
        seconds_left: u64,
        total_secs: u64,
        progress: f64,
        completed_focus: u32,
        title: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn is_phase_change(&self) -> bool {
        matches!(self, Event::PhaseChanged { .. })
    }
}

/// Typed in-process pub/sub for timer events.
///
/// Publishing never fails: with no receivers the event is simply dropped.
/// A receiver that falls more than `capacity` events behind loses the
/// oldest ones.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: Event) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event published with no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> Event {
        Event::TimerStarted {
            phase: Phase::Focus,
            seconds_left: 1500,
            at: Utc::now(),
        }
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(started());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn every_subscriber_gets_every_event() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        let ev = started();
        bus.publish(ev.clone());
        assert_eq!(a.try_recv().unwrap(), ev);
        assert_eq!(b.try_recv().unwrap(), ev);
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(started()).unwrap();
        assert_eq!(json["type"], "TimerStarted");
        assert_eq!(json["phase"], "focus");
    }
}
