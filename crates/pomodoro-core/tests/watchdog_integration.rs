//! Integration tests for watchdog recovery against a real database.

use std::sync::Arc;

use pomodoro_core::storage::kv::keys;
use pomodoro_core::storage::WatchdogConfig;
use pomodoro_core::watchdog::CheckOutcome;
use pomodoro_core::{Database, HealthStatus, KvStore, Settings, SettingsStore, TimerEngine, Watchdog};

#[test]
fn test_healthy_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::open_at(&dir.path().join("pomodoro.db")).unwrap());
    let mut engine = TimerEngine::new(Settings::default());

    let report = Watchdog::new(db, WatchdogConfig::default()).check(Some(&mut engine));
    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.checks.iter().all(|c| c.outcome == CheckOutcome::Ok));
}

#[test]
fn test_recovers_settings_and_persisted_engine() {
    let db = Arc::new(Database::open_memory().unwrap());
    let store = SettingsStore::load(db.clone()).unwrap();
    db.set(keys::SETTINGS, "garbage").unwrap();

    let mut engine: TimerEngine = serde_json::from_value(serde_json::json!({
        "settings": { "focus_minutes": 0 },
        "phase": "focus",
        "running": false,
        "seconds_left": 12,
        "completed_focus": 0,
    }))
    .unwrap();

    let dog = Watchdog::new(db.clone(), WatchdogConfig::default()).with_settings(store.clone());
    let report = dog.check(Some(&mut engine));

    assert_eq!(report.status, HealthStatus::Recovered);
    assert_eq!(engine.settings(), &store.get());
    assert_eq!(engine.seconds_left(), 25 * 60);

    let raw = db.get(keys::SETTINGS).unwrap().unwrap();
    assert_eq!(serde_json::from_str::<Settings>(&raw).unwrap(), store.get());

    let logged = dog.errors().entries().unwrap();
    assert_eq!(logged.len(), 2);
    assert!(logged.iter().all(|e| e.source == "watchdog"));
}

#[test]
fn test_error_log_respects_configured_cap() {
    let db = Arc::new(Database::open_memory().unwrap());
    let config = WatchdogConfig {
        error_log_cap: 3,
        ..WatchdogConfig::default()
    };
    let dog = Watchdog::new(db, config);
    for i in 0..10 {
        dog.errors().push("test", format!("e{i}")).unwrap();
    }
    assert_eq!(dog.errors().entries().unwrap().len(), 3);
}
