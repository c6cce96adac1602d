//! Timer settings and the shared settings store.
//!
//! There is exactly one [`SettingsStore`] per process, constructed
//! explicitly and handed to whatever owns the timer. Every `set` persists the
//! new snapshot and then synchronously notifies all subscribers.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};
use crate::storage::kv::{keys, read_json, write_json, KvStore, Stored};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_focus_minutes")]
    pub focus_minutes: u32,
    #[serde(default = "default_short_break_minutes")]
    pub short_break_minutes: u32,
    #[serde(default = "default_long_break_minutes")]
    pub long_break_minutes: u32,
    #[serde(default = "default_sessions_until_long_break")]
    pub sessions_until_long_break: u32,
    #[serde(default)]
    pub auto_start_next: bool,
    #[serde(default = "default_true")]
    pub sound: bool,
    #[serde(default = "default_true")]
    pub notifications: bool,
}

fn default_focus_minutes() -> u32 {
    25
}
fn default_short_break_minutes() -> u32 {
    5
}
fn default_long_break_minutes() -> u32 {
    15
}
fn default_sessions_until_long_break() -> u32 {
    4
}
fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            focus_minutes: default_focus_minutes(),
            short_break_minutes: default_short_break_minutes(),
            long_break_minutes: default_long_break_minutes(),
            sessions_until_long_break: default_sessions_until_long_break(),
            auto_start_next: false,
            sound: true,
            notifications: true,
        }
    }
}

impl Settings {
    /// Every duration and the long-break threshold must be at least 1.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let positive = [
            ("focus_minutes", self.focus_minutes),
            ("short_break_minutes", self.short_break_minutes),
            ("long_break_minutes", self.long_break_minutes),
            ("sessions_until_long_break", self.sessions_until_long_break),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ValidationError::invalid(field, "must be at least 1"));
            }
        }
        Ok(())
    }

    /// Set one field from its string form, as typed on the command line.
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<(), ValidationError> {
        fn num(key: &str, value: &str) -> Result<u32, ValidationError> {
            value
                .trim()
                .parse()
                .map_err(|_| ValidationError::invalid(key, format!("'{value}' is not a number")))
        }
        fn flag(key: &str, value: &str) -> Result<bool, ValidationError> {
            match value.trim() {
                "true" | "on" | "yes" | "1" => Ok(true),
                "false" | "off" | "no" | "0" => Ok(false),
                _ => Err(ValidationError::invalid(key, format!("'{value}' is not a boolean"))),
            }
        }

        match key {
            "focus_minutes" => self.focus_minutes = num(key, value)?,
            "short_break_minutes" => self.short_break_minutes = num(key, value)?,
            "long_break_minutes" => self.long_break_minutes = num(key, value)?,
            "sessions_until_long_break" => self.sessions_until_long_break = num(key, value)?,
            "auto_start_next" => self.auto_start_next = flag(key, value)?,
            "sound" => self.sound = flag(key, value)?,
            "notifications" => self.notifications = flag(key, value)?,
            _ => return Err(ValidationError::invalid(key, "unknown setting")),
        }
        Ok(())
    }
}

type Callback = Arc<dyn Fn(&Settings) + Send + Sync>;

struct Inner {
    current: Settings,
    subscribers: Vec<(u64, Callback)>,
    next_id: u64,
}

impl Inner {
    fn callbacks(&self) -> Vec<Callback> {
        self.subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
    }
}

/// Run subscribers outside the snapshot lock; a panicking one does not stop
/// the rest.
fn notify(subscribers: Vec<Callback>, settings: &Settings) {
    for cb in subscribers {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| cb(settings)));
        if outcome.is_err() {
            tracing::error!("settings subscriber panicked; continuing with the rest");
        }
    }
}

/// Shared, observable settings.
///
/// Cloning the store yields another handle to the same snapshot and
/// subscriber list.
#[derive(Clone)]
pub struct SettingsStore {
    kv: Arc<dyn KvStore>,
    inner: Arc<Mutex<Inner>>,
}

/// Handle returned by [`SettingsStore::subscribe`].
///
/// Dropping it keeps the subscription alive; call
/// [`Subscription::unsubscribe`] to remove the listener.
pub struct Subscription {
    id: u64,
    inner: Weak<Mutex<Inner>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = inner.lock().unwrap_or_else(|p| p.into_inner());
            inner.subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl SettingsStore {
    /// Load the stored snapshot.
    ///
    /// A missing value yields defaults; a corrupted one is discarded and
    /// replaced with defaults.
    pub fn load(kv: Arc<dyn KvStore>) -> Result<Self> {
        let current = match read_json::<Settings>(kv.as_ref(), keys::SETTINGS)? {
            Stored::Value(s) if s.validate().is_ok() => s,
            Stored::Value(s) => {
                tracing::warn!(?s, "stored settings failed validation, using defaults");
                let fresh = Settings::default();
                write_json(kv.as_ref(), keys::SETTINGS, &fresh)?;
                fresh
            }
            Stored::Missing => Settings::default(),
            Stored::Corrupt(e) => {
                tracing::warn!(error = %e, "stored settings are corrupted, using defaults");
                let fresh = Settings::default();
                write_json(kv.as_ref(), keys::SETTINGS, &fresh)?;
                fresh
            }
        };
        Ok(Self::with_settings(kv, current))
    }

    /// Build a store around an explicit snapshot without touching storage.
    pub fn with_settings(kv: Arc<dyn KvStore>, current: Settings) -> Self {
        Self {
            kv,
            inner: Arc::new(Mutex::new(Inner {
                current,
                subscribers: Vec::new(),
                next_id: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn get(&self) -> Settings {
        self.lock().current.clone()
    }

    /// Replace the snapshot, persist it, then notify every subscriber.
    ///
    /// Invalid settings are rejected before anything changes. The write to
    /// storage happens under the snapshot lock, so storage always ends up
    /// holding the last snapshot set. A persistence failure is returned after
    /// subscribers have run; the in-memory snapshot is updated either way.
    pub fn set(&self, next: Settings) -> Result<()> {
        next.validate()?;

        let (persisted, subscribers) = {
            let mut inner = self.lock();
            inner.current = next.clone();
            let persisted = write_json(self.kv.as_ref(), keys::SETTINGS, &next);
            (persisted, inner.callbacks())
        };
        if let Err(e) = &persisted {
            tracing::warn!(error = %e, "failed to persist settings");
        }

        notify(subscribers, &next);
        persisted
    }

    /// Adopt a snapshot another process wrote to storage.
    ///
    /// Subscribers are notified only if the stored snapshot differs from the
    /// current one. Missing, corrupted or invalid stored values are left for
    /// [`SettingsStore::load`] and the watchdog to deal with. Returns whether
    /// the snapshot changed.
    pub fn reload(&self) -> Result<bool> {
        let (next, subscribers) = {
            let mut inner = self.lock();
            let stored = match read_json::<Settings>(self.kv.as_ref(), keys::SETTINGS)? {
                Stored::Value(s) if s.validate().is_ok() => s,
                _ => return Ok(false),
            };
            if stored == inner.current {
                return Ok(false);
            }
            inner.current = stored.clone();
            (stored, inner.callbacks())
        };

        tracing::debug!(?next, "picked up settings changed elsewhere");
        notify(subscribers, &next);
        Ok(true)
    }

    /// Read-modify-write helper.
    pub fn update<F>(&self, f: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let mut next = self.get();
        f(&mut next);
        self.set(next.clone())?;
        Ok(next)
    }

    pub fn reset(&self) -> Result<()> {
        self.set(Settings::default())
    }

    /// Write the in-memory snapshot back to storage without notifying.
    pub fn persist(&self) -> Result<()> {
        let inner = self.lock();
        write_json(self.kv.as_ref(), keys::SETTINGS, &inner.current)
    }

    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&Settings) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(f)));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

impl std::fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("SettingsStore")
            .field("current", &inner.current)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}
