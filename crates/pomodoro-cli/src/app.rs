//! State shared by every command: the database, the settings store and the
//! persisted timer engine.

use std::sync::Arc;

use pomodoro_core::storage::kv::{keys, read_json, Stored};
use pomodoro_core::watchdog::ErrorLog;
use pomodoro_core::{Config, Database, KvStore, SettingsStore, TimerEngine};

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub struct App {
    pub db: Arc<Database>,
    pub settings: SettingsStore,
    pub config: Config,
}

impl App {
    pub fn open() -> CliResult<Self> {
        let db = Arc::new(Database::open()?);
        let settings = SettingsStore::load(db.clone())?;
        let config = Config::load()?;
        Ok(Self {
            db,
            settings,
            config,
        })
    }

    pub fn kv(&self) -> Arc<dyn KvStore> {
        self.db.clone()
    }

    pub fn errors(&self) -> ErrorLog {
        ErrorLog::new(self.kv(), self.config.watchdog.error_log_cap)
    }

    /// The persisted engine, or a fresh one. Settings changed since it was
    /// saved are applied on load.
    pub fn load_engine(&self) -> CliResult<TimerEngine> {
        let current = self.settings.get();
        let mut engine = match read_json::<TimerEngine>(self.db.as_ref(), keys::TIMER_ENGINE)? {
            Stored::Value(engine) => engine,
            Stored::Missing => TimerEngine::new(current.clone()),
            Stored::Corrupt(e) => {
                tracing::warn!(error = %e, "discarding corrupted timer state");
                TimerEngine::new(current.clone())
            }
        };
        if engine.settings() != &current {
            engine.apply_settings(current);
        }
        Ok(engine)
    }

    /// Persist `engine` and return the JSON written.
    ///
    /// The engine must run on the wall clock, as engines from `load_engine`
    /// do; see [`TimerEngine::rebase_clock`] for moving one back onto it.
    pub fn save_engine(&self, engine: &TimerEngine) -> CliResult<String> {
        let json = serde_json::to_string(engine)?;
        self.db.kv_set(keys::TIMER_ENGINE, &json)?;
        Ok(json)
    }

    /// The stored engine exactly as written, for change detection.
    pub fn stored_engine_json(&self) -> CliResult<Option<String>> {
        Ok(self.db.kv_get(keys::TIMER_ENGINE)?)
    }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
