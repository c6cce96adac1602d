//! # Pomodoro Core Library
//!
//! Core logic for a Pomodoro timer: the countdown state machine, the shared
//! settings store, session history, goals and a self-monitoring watchdog.
//! Everything is usable from the standalone `pomodoro-cli` binary; a GUI
//! would be a thin layer over the same library.
//!
//! ## Architecture
//!
//! - **Timer Engine**: a clock-driven state machine. The caller invokes
//!   `tick()` periodically, or hands the engine to a [`TimerDriver`]
//! - **Events**: typed [`Event`]s on an in-process [`EventBus`], consumed
//!   by independent [`listeners`]
//! - **Settings**: one observable [`SettingsStore`] per process
//! - **Storage**: SQLite sessions and key-value state, TOML configuration
//! - **Sync**: best-effort mirroring of sessions to a hosted table
//! - **Watchdog**: storage, settings and timer health checks with repair
//!
//! ## Key Components
//!
//! - [`TimerEngine`]: Core timer state machine
//! - [`SettingsStore`]: Shared, persisted settings with subscribers
//! - [`Database`]: Session and statistics persistence
//! - [`Config`]: Application configuration management

pub mod error;
pub mod events;
pub mod goals;
pub mod listeners;
pub mod settings;
pub mod storage;
pub mod sync;
pub mod timer;
pub mod watchdog;

pub use error::{ConfigError, CoreError, DatabaseError, SyncError, ValidationError};
pub use events::{Event, EventBus, TransitionReason};
pub use goals::{GoalData, GoalProgress, GoalStore};
pub use listeners::{dispatch, Listener, SessionRecorder, SessionTally, TitleListener};
pub use settings::{Settings, SettingsStore, Subscription};
pub use storage::{Config, Database, KvStore, MemoryKv, SessionRecord, Stats};
pub use sync::{OnlineFlag, SessionSync};
pub use timer::{Clock, Phase, SharedEngine, SystemClock, TimerDriver, TimerEngine};
pub use watchdog::{ErrorLog, HealthReport, HealthStatus, Watchdog};
