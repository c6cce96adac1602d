//! Daily and weekly focus-session targets.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};
use crate::storage::kv::{keys, read_json_or_default, write_json, KvStore};
use crate::storage::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalData {
    #[serde(default = "default_daily_target")]
    pub daily_target: u32,
    #[serde(default = "default_weekly_target")]
    pub weekly_target: u32,
}

fn default_daily_target() -> u32 {
    8
}
fn default_weekly_target() -> u32 {
    40
}

impl Default for GoalData {
    fn default() -> Self {
        Self {
            daily_target: default_daily_target(),
            weekly_target: default_weekly_target(),
        }
    }
}

impl GoalData {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.daily_target == 0 {
            return Err(ValidationError::invalid("daily_target", "must be at least 1"));
        }
        if self.weekly_target == 0 {
            return Err(ValidationError::invalid("weekly_target", "must be at least 1"));
        }
        Ok(())
    }
}

pub struct GoalStore {
    kv: Arc<dyn KvStore>,
}

impl GoalStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Stored goals; corrupted data is replaced with defaults.
    pub fn load(&self) -> Result<GoalData> {
        read_json_or_default(self.kv.as_ref(), keys::GOALS)
    }

    pub fn save(&self, goals: &GoalData) -> Result<()> {
        goals.validate()?;
        write_json(self.kv.as_ref(), keys::GOALS, goals)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GoalProgress {
    pub today: u64,
    pub daily_target: u32,
    pub daily_percent: u32,
    pub daily_met: bool,
    pub this_week: u64,
    pub weekly_target: u32,
    pub weekly_percent: u32,
    pub weekly_met: bool,
}

fn percent(count: u64, target: u32) -> u32 {
    if target == 0 {
        return 100;
    }
    (count.saturating_mul(100) / u64::from(target)).min(100) as u32
}

impl GoalProgress {
    pub fn compute(goals: &GoalData, today: u64, this_week: u64) -> Self {
        Self {
            today,
            daily_target: goals.daily_target,
            daily_percent: percent(today, goals.daily_target),
            daily_met: today >= u64::from(goals.daily_target),
            this_week,
            weekly_target: goals.weekly_target,
            weekly_percent: percent(this_week, goals.weekly_target),
            weekly_met: this_week >= u64::from(goals.weekly_target),
        }
    }

    /// Progress from the focus sessions recorded in `db`, as of `now`.
    pub fn from_database(goals: &GoalData, db: &Database, now: DateTime<Utc>) -> Result<Self> {
        let today = db.focus_count_since(day_start(now))?;
        let this_week = db.focus_count_since(week_start(now))?;
        Ok(Self::compute(goals, today, this_week))
    }
}

/// Midnight UTC of `now`'s day.
pub fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN))
}

/// Midnight UTC of the Monday starting `now`'s week.
pub fn week_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_since_monday = i64::from(now.weekday().num_days_from_monday());
    day_start(now) - Duration::days(days_since_monday)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKv;

    #[test]
    fn percent_caps_at_hundred() {
        let goals = GoalData::default();
        let p = GoalProgress::compute(&goals, 12, 20);
        assert_eq!(p.daily_percent, 100);
        assert!(p.daily_met);
        assert_eq!(p.weekly_percent, 50);
        assert!(!p.weekly_met);
    }

    #[test]
    fn zero_progress() {
        let p = GoalProgress::compute(&GoalData::default(), 0, 0);
        assert_eq!(p.daily_percent, 0);
        assert!(!p.daily_met);
    }

    #[test]
    fn week_starts_on_monday() {
        // 2024-03-14 was a Thursday
        let now = Utc.with_ymd_and_hms(2024, 3, 14, 15, 30, 0).unwrap();
        assert_eq!(week_start(now), Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());
        let monday = Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 1).unwrap();
        assert_eq!(week_start(monday), Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());
    }

    #[test]
    fn corrupted_goals_fall_back_to_defaults() {
        let kv = Arc::new(MemoryKv::new());
        kv.set(keys::GOALS, "{{{").unwrap();
        let store = GoalStore::new(kv);
        assert_eq!(store.load().unwrap(), GoalData::default());
    }

    #[test]
    fn save_rejects_zero_targets() {
        let store = GoalStore::new(Arc::new(MemoryKv::new()));
        let bad = GoalData {
            daily_target: 0,
            weekly_target: 10,
        };
        assert!(store.save(&bad).is_err());
        let good = GoalData {
            daily_target: 4,
            weekly_target: 20,
        };
        store.save(&good).unwrap();
        assert_eq!(store.load().unwrap(), good);
    }

    #[test]
    fn progress_from_recorded_sessions() {
        use crate::timer::Phase;
        let db = Database::open_memory().unwrap();
        let now = Utc::now();
        for _ in 0..3 {
            db.record_session(Phase::Focus, 25, now - Duration::minutes(25), now)
                .unwrap();
        }
        db.record_session(Phase::ShortBreak, 5, now - Duration::minutes(5), now)
            .unwrap();
        let p = GoalProgress::from_database(&GoalData::default(), &db, now).unwrap();
        assert_eq!(p.today, 3);
        assert_eq!(p.this_week, 3);
    }
}
