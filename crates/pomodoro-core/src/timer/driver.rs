//! In-process ticking loop for a shared [`TimerEngine`].
//!
//! Runs on a tokio interval, so countdown accuracy depends only on the
//! monotonic clock and not on anything rendering-related.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::engine::TimerEngine;
use crate::events::{Event, EventBus};

pub type SharedEngine = Arc<Mutex<TimerEngine>>;

pub struct TimerDriver {
    engine: SharedEngine,
    bus: EventBus,
    period: Duration,
}

impl TimerDriver {
    pub const DEFAULT_PERIOD: Duration = Duration::from_millis(250);

    pub fn new(engine: SharedEngine, bus: EventBus) -> Self {
        Self {
            engine,
            bus,
            period: Self::DEFAULT_PERIOD,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period.max(Duration::from_millis(1));
        self
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    /// Tick once and publish whatever the engine produced.
    pub fn tick_once(&self) -> Option<Event> {
        let event = {
            let mut engine = self.engine.lock().unwrap_or_else(|p| p.into_inner());
            engine.tick()
        };
        if let Some(ev) = &event {
            self.bus.publish(ev.clone());
        }
        event
    }

    /// Tick until an emitted event satisfies `stop_when`, returning it.
    pub async fn run_until<F>(&self, mut stop_when: F) -> Event
    where
        F: FnMut(&Event) -> bool,
    {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Some(ev) = self.tick_once() {
                if stop_when(&ev) {
                    return ev;
                }
            }
        }
    }

    /// Tick forever on a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run_until(|_| false).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::timer::{MonotonicClock, Phase};

    fn shared(settings: Settings) -> SharedEngine {
        Arc::new(Mutex::new(TimerEngine::with_clock(
            settings,
            Arc::new(MonotonicClock::new()),
        )))
    }

    #[tokio::test(start_paused = true)]
    async fn drives_focus_to_break() {
        let settings = Settings {
            focus_minutes: 1,
            ..Settings::default()
        };
        let engine = shared(settings);
        engine.lock().unwrap().start();

        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let driver = TimerDriver::new(engine.clone(), bus);

        let ev = driver.run_until(Event::is_phase_change).await;
        assert!(matches!(
            ev,
            Event::PhaseChanged {
                to: Phase::ShortBreak,
                ..
            }
        ));
        assert_eq!(rx.try_recv().unwrap(), ev);
        assert_eq!(engine.lock().unwrap().seconds_left(), 5 * 60);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_driver_keeps_cycling_with_auto_start() {
        let settings = Settings {
            focus_minutes: 1,
            short_break_minutes: 1,
            auto_start_next: true,
            ..Settings::default()
        };
        let engine = shared(settings);
        engine.lock().unwrap().start();

        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let handle = TimerDriver::new(engine.clone(), bus)
            .with_period(Duration::from_secs(1))
            .spawn();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        handle.abort();

        assert!(matches!(first, Event::PhaseChanged { to: Phase::ShortBreak, seq: 1, .. }));
        assert!(matches!(second, Event::PhaseChanged { to: Phase::Focus, seq: 2, .. }));
    }
}
