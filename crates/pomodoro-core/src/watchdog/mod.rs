//! Self-monitoring.
//!
//! [`Watchdog::check`] probes storage and validates persisted settings and
//! the timer invariant, repairing what it can. Anything it had to fix, or
//! could not, is appended to the [`ErrorLog`].

mod error_log;

pub use error_log::{AppErrorEntry, ErrorLog};

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::settings::{Settings, SettingsStore};
use crate::storage::kv::{keys, read_json, write_json, KvStore, Stored};
use crate::storage::WatchdogConfig;
use crate::timer::{SharedEngine, TimerEngine};

/// Window the error-burst check looks back over.
pub const BURST_WINDOW_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Something was broken and has been repaired.
    Recovered,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Ok,
    Recovered,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub outcome: CheckOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn ok(name: &'static str) -> Self {
        Self {
            name,
            outcome: CheckOutcome::Ok,
            detail: None,
        }
    }

    fn recovered(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            outcome: CheckOutcome::Recovered,
            detail: Some(detail.into()),
        }
    }

    fn failed(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            outcome: CheckOutcome::Failed,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<CheckResult>,
    pub at: DateTime<Utc>,
}

impl HealthReport {
    fn from_checks(checks: Vec<CheckResult>) -> Self {
        let status = if checks.iter().any(|c| c.outcome == CheckOutcome::Failed) {
            HealthStatus::Degraded
        } else if checks.iter().any(|c| c.outcome == CheckOutcome::Recovered) {
            HealthStatus::Recovered
        } else {
            HealthStatus::Healthy
        };
        Self {
            status,
            checks,
            at: Utc::now(),
        }
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

#[derive(Clone)]
pub struct Watchdog {
    kv: Arc<dyn KvStore>,
    errors: ErrorLog,
    config: WatchdogConfig,
    settings: Option<SettingsStore>,
}

impl Watchdog {
    pub fn new(kv: Arc<dyn KvStore>, config: WatchdogConfig) -> Self {
        let errors = ErrorLog::new(Arc::clone(&kv), config.error_log_cap);
        Self {
            kv,
            errors,
            config,
            settings: None,
        }
    }

    /// Repair settings through `store` so its in-memory snapshot stays
    /// authoritative.
    pub fn with_settings(mut self, store: SettingsStore) -> Self {
        self.settings = Some(store);
        self
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    /// Run every check once. Pass the engine to also verify (and repair)
    /// the countdown.
    pub fn check(&self, engine: Option<&mut TimerEngine>) -> HealthReport {
        let mut checks = vec![
            self.check_storage(),
            self.check_settings(),
            self.check_timer(engine),
        ];
        for c in &checks {
            if c.outcome != CheckOutcome::Ok {
                let detail = c.detail.as_deref().unwrap_or("");
                self.errors.note("watchdog", format!("{}: {detail}", c.name));
            }
        }
        // last, so this pass's own entries count toward the burst
        checks.push(self.check_error_burst());

        let report = HealthReport::from_checks(checks);
        match report.status {
            HealthStatus::Healthy => tracing::debug!("watchdog: healthy"),
            HealthStatus::Recovered => tracing::info!(checks = ?report.checks, "watchdog recovered state"),
            HealthStatus::Degraded => tracing::warn!(checks = ?report.checks, "watchdog: degraded"),
        }
        report
    }

    fn check_storage(&self) -> CheckResult {
        const NAME: &str = "storage";
        let probe = Utc::now().timestamp_millis().to_string();
        let roundtrip = self
            .kv
            .set(keys::WATCHDOG_PROBE, &probe)
            .and_then(|_| self.kv.get(keys::WATCHDOG_PROBE))
            .and_then(|read| {
                self.kv.remove(keys::WATCHDOG_PROBE)?;
                Ok(read)
            });
        match roundtrip {
            Ok(Some(read)) if read == probe => CheckResult::ok(NAME),
            Ok(_) => CheckResult::failed(NAME, "probe value did not read back"),
            Err(e) => CheckResult::failed(NAME, e.to_string()),
        }
    }

    fn check_settings(&self) -> CheckResult {
        const NAME: &str = "settings";
        let problem = match read_json::<Settings>(self.kv.as_ref(), keys::SETTINGS) {
            Ok(Stored::Missing) => return CheckResult::ok(NAME),
            Ok(Stored::Value(s)) => match s.validate() {
                Ok(()) => return CheckResult::ok(NAME),
                Err(e) => e.to_string(),
            },
            Ok(Stored::Corrupt(e)) => format!("stored settings are corrupted: {e}"),
            Err(e) => return CheckResult::failed(NAME, e.to_string()),
        };

        let repaired = match &self.settings {
            Some(store) => store.persist(),
            None => write_json(self.kv.as_ref(), keys::SETTINGS, &Settings::default()),
        };
        match repaired {
            Ok(()) => CheckResult::recovered(NAME, problem),
            Err(e) => CheckResult::failed(NAME, format!("{problem}; repair failed: {e}")),
        }
    }

    fn check_timer(&self, engine: Option<&mut TimerEngine>) -> CheckResult {
        const NAME: &str = "timer";
        let Some(engine) = engine else {
            return CheckResult::ok(NAME);
        };
        let settings_invalid = engine.settings().validate().is_err();
        if engine.is_consistent() && !settings_invalid {
            return CheckResult::ok(NAME);
        }

        let detail = format!(
            "{}s left in a {}s {} phase",
            engine.seconds_left(),
            engine.total_secs(),
            engine.phase()
        );
        if settings_invalid {
            let fallback = self
                .settings
                .as_ref()
                .map(SettingsStore::get)
                .unwrap_or_default();
            engine.apply_settings(fallback);
        }
        engine.reset(None);
        CheckResult::recovered(NAME, detail)
    }

    fn check_error_burst(&self) -> CheckResult {
        const NAME: &str = "error_burst";
        let threshold = self.config.error_burst_threshold.max(1);
        match self.errors.recent(Duration::minutes(BURST_WINDOW_MINUTES)) {
            Ok(recent) if recent.len() >= threshold => CheckResult::failed(
                NAME,
                format!(
                    "{} errors in the last {BURST_WINDOW_MINUTES} minutes",
                    recent.len()
                ),
            ),
            Ok(_) => CheckResult::ok(NAME),
            Err(e) => CheckResult::failed(NAME, e.to_string()),
        }
    }

    /// Run [`Watchdog::check`] every `interval` on a background task.
    pub fn spawn_periodic(self, engine: Option<SharedEngine>, interval: StdDuration) -> JoinHandle<()> {
        let period = interval.max(StdDuration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match &engine {
                    Some(shared) => {
                        let mut guard = shared.lock().unwrap_or_else(|p| p.into_inner());
                        self.check(Some(&mut *guard));
                    }
                    None => {
                        self.check(None);
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("config", &self.config)
            .field("settings", &self.settings.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKv;

    fn watchdog() -> (Arc<MemoryKv>, Watchdog) {
        let kv = Arc::new(MemoryKv::new());
        let dog = Watchdog::new(kv.clone(), WatchdogConfig::default());
        (kv, dog)
    }

    #[test]
    fn fresh_store_is_healthy() {
        let (kv, dog) = watchdog();
        let report = dog.check(None);
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.checks.len(), 4);
        assert!(kv.get(keys::WATCHDOG_PROBE).unwrap().is_none());
        assert!(dog.errors().entries().unwrap().is_empty());
    }

    #[test]
    fn corrupted_settings_are_reset() {
        let (kv, dog) = watchdog();
        kv.set(keys::SETTINGS, "{\"focus_minutes\":").unwrap();

        let report = dog.check(None);
        assert_eq!(report.status, HealthStatus::Recovered);
        assert_eq!(report.check("settings").unwrap().outcome, CheckOutcome::Recovered);

        let stored: Settings = serde_json::from_str(&kv.get(keys::SETTINGS).unwrap().unwrap()).unwrap();
        assert_eq!(stored, Settings::default());
        assert_eq!(dog.errors().entries().unwrap().len(), 1);
    }

    #[test]
    fn invalid_settings_repaired_from_store() {
        let (kv, dog) = watchdog();
        let custom = Settings {
            focus_minutes: 50,
            ..Settings::default()
        };
        let store = SettingsStore::with_settings(kv.clone(), custom.clone());
        let dog = dog.with_settings(store);
        kv.set(keys::SETTINGS, "{\"focus_minutes\":0}").unwrap();

        dog.check(None);
        let stored: Settings = serde_json::from_str(&kv.get(keys::SETTINGS).unwrap().unwrap()).unwrap();
        assert_eq!(stored, custom);
    }

    #[test]
    fn inconsistent_timer_is_reset() {
        let (_kv, dog) = watchdog();
        let mut engine: TimerEngine = serde_json::from_value(serde_json::json!({
            "settings": Settings::default(),
            "phase": "focus",
            "running": true,
            "seconds_left": 99_999,
            "completed_focus": 2,
        }))
        .unwrap();
        assert!(!engine.is_consistent());

        let report = dog.check(Some(&mut engine));
        assert_eq!(report.check("timer").unwrap().outcome, CheckOutcome::Recovered);
        assert!(engine.is_consistent());
        assert!(!engine.is_running());
        assert_eq!(engine.seconds_left(), 25 * 60);
        assert_eq!(engine.completed_focus(), 2);
    }

    #[test]
    fn error_burst_degrades() {
        let (_kv, dog) = watchdog();
        for i in 0..WatchdogConfig::default().error_burst_threshold {
            dog.errors().push("sync", format!("failure {i}")).unwrap();
        }
        let report = dog.check(None);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.check("error_burst").unwrap().outcome, CheckOutcome::Failed);
    }

    #[test]
    fn report_serializes_status_in_snake_case() {
        let (_kv, dog) = watchdog();
        let json = serde_json::to_value(dog.check(None)).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["checks"][0]["outcome"], "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_checks_repair_settings() {
        let (kv, dog) = watchdog();
        kv.set(keys::SETTINGS, "not json").unwrap();
        let handle = dog.spawn_periodic(None, StdDuration::from_secs(30));
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        assert!(kv.get(keys::SETTINGS).unwrap().unwrap().starts_with('{'));
        handle.abort();
    }
}
