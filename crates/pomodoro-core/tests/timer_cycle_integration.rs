//! Integration tests for the focus/break cycle.

use std::sync::Arc;

use pomodoro_core::timer::ManualClock;
use pomodoro_core::{Event, Phase, Settings, TimerEngine, TransitionReason};
use proptest::prelude::*;

fn engine_with(settings: Settings) -> (Arc<ManualClock>, TimerEngine) {
    let clock = Arc::new(ManualClock::new(0));
    let engine = TimerEngine::with_clock(settings, clock.clone());
    (clock, engine)
}

/// Run the current phase to zero and return the transition it produced.
fn finish_phase(clock: &ManualClock, engine: &mut TimerEngine) -> Event {
    engine.start();
    clock.advance_secs(engine.seconds_left());
    engine.tick().expect("phase should complete")
}

fn to_phase(event: &Event) -> Phase {
    match event {
        Event::PhaseChanged { to, .. } => *to,
        other => panic!("expected PhaseChanged, got {other:?}"),
    }
}

#[test]
fn test_default_cycle_scenario() {
    let settings = Settings {
        focus_minutes: 25,
        short_break_minutes: 5,
        sessions_until_long_break: 4,
        ..Settings::default()
    };
    let (clock, mut engine) = engine_with(settings);

    let mut breaks = Vec::new();
    for _ in 0..4 {
        assert_eq!(engine.phase(), Phase::Focus);
        let ev = finish_phase(&clock, &mut engine);
        breaks.push(to_phase(&ev));
        finish_phase(&clock, &mut engine);
    }

    assert_eq!(
        breaks,
        vec![
            Phase::ShortBreak,
            Phase::ShortBreak,
            Phase::ShortBreak,
            Phase::LongBreak
        ]
    );
    assert_eq!(engine.completed_focus(), 4);
    assert_eq!(engine.phase(), Phase::Focus);
    assert_eq!(engine.seconds_left(), 25 * 60);
}

#[test]
fn test_overshoot_yields_single_transition() {
    let (clock, mut engine) = engine_with(Settings::default());
    engine.start();
    clock.advance_secs(3 * 60 * 60);

    let ev = engine.tick().unwrap();
    assert!(matches!(
        ev,
        Event::PhaseChanged {
            reason: TransitionReason::Completed,
            seq: 1,
            ..
        }
    ));
    assert_eq!(engine.phase(), Phase::ShortBreak);
    assert_eq!(engine.seconds_left(), 5 * 60);
    assert!(engine.tick().is_none());
}

#[test]
fn test_auto_start_chains_phases() {
    let settings = Settings {
        focus_minutes: 1,
        short_break_minutes: 1,
        auto_start_next: true,
        ..Settings::default()
    };
    let (clock, mut engine) = engine_with(settings);
    engine.start();
    clock.advance_secs(60);
    engine.tick().unwrap();
    assert!(engine.is_running());
    clock.advance_secs(60);
    let ev = engine.tick().unwrap();
    assert_eq!(to_phase(&ev), Phase::Focus);
}

#[test]
fn test_persisted_engine_resumes() {
    let (mono, mut engine) = engine_with(Settings::default());
    engine.start();
    mono.advance_ms(100_600);
    engine.tick();
    assert_eq!(engine.seconds_left(), 25 * 60 - 100);

    // saved anchored to wall time, then picked up by a later process
    let wall = Arc::new(ManualClock::new(1_700_000_000_000));
    let mut saved = engine.clone();
    saved.rebase_clock(wall.clone());
    let json = serde_json::to_string(&saved).unwrap();
    let mut restored: TimerEngine = serde_json::from_str(&json).unwrap();
    restored.set_clock(wall.clone());
    assert_eq!(restored.seconds_left(), 25 * 60 - 100);

    wall.advance_ms(400);
    restored.tick();
    assert_eq!(restored.seconds_left(), 25 * 60 - 101);

    wall.advance_secs(10);
    restored.tick();
    assert_eq!(restored.seconds_left(), 25 * 60 - 111);
}

#[test]
fn test_repeated_saves_below_a_second_keep_counting() {
    let wall = Arc::new(ManualClock::new(1_700_000_000_000));
    let mut json = {
        let mut engine = TimerEngine::with_clock(Settings::default(), wall.clone());
        engine.start();
        serde_json::to_string(&engine).unwrap()
    };

    // one load, tick and save per poll, 300 ms apart
    for _ in 0..20 {
        wall.advance_ms(300);
        let mut engine: TimerEngine = serde_json::from_str(&json).unwrap();
        engine.set_clock(wall.clone());
        engine.tick();
        engine.rebase_clock(wall.clone());
        json = serde_json::to_string(&engine).unwrap();
    }

    let engine: TimerEngine = serde_json::from_str(&json).unwrap();
    assert!(engine.is_running());
    assert_eq!(engine.seconds_left(), 25 * 60 - 6);
}

proptest! {
    #[test]
    fn long_break_follows_every_nth_focus(n in 1u32..10, rounds in 1usize..25) {
        let settings = Settings {
            focus_minutes: 1,
            short_break_minutes: 1,
            long_break_minutes: 1,
            sessions_until_long_break: n,
            ..Settings::default()
        };
        let (clock, mut engine) = engine_with(settings);

        for completed in 1..=rounds as u32 {
            let ev = finish_phase(&clock, &mut engine);
            let expected = if completed % n == 0 { Phase::LongBreak } else { Phase::ShortBreak };
            prop_assert_eq!(to_phase(&ev), expected);
            prop_assert_eq!(engine.seconds_left(), 60);

            let back = finish_phase(&clock, &mut engine);
            prop_assert_eq!(to_phase(&back), Phase::Focus);
        }
        prop_assert_eq!(engine.completed_focus(), rounds as u32);
        prop_assert_eq!(engine.transitions(), 2 * rounds as u64);
    }

    #[test]
    fn countdown_never_exceeds_phase_length(steps in proptest::collection::vec(0u64..400, 1..40)) {
        let (clock, mut engine) = engine_with(Settings {
            focus_minutes: 2,
            short_break_minutes: 1,
            ..Settings::default()
        });
        engine.start();
        for ms in steps {
            clock.advance_ms(ms * 37);
            engine.tick();
            prop_assert!(engine.is_consistent());
            if !engine.is_running() {
                engine.start();
            }
        }
    }
}
