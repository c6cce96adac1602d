//! Durable key-value persistence.
//!
//! The timer engine, settings store, goals and error log only need string
//! get/set, so they take a [`KvStore`] instead of a concrete database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Well-known keys.
pub mod keys {
    pub const SETTINGS: &str = "settings";
    pub const TIMER_ENGINE: &str = "timer_engine";
    pub const GOALS: &str = "pomodoro-goal-data";
    pub const APP_ERRORS: &str = "app-errors";
    pub const WATCHDOG_PROBE: &str = "watchdog-probe";
}

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

impl<T: KvStore + ?Sized> KvStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

/// In-process store, used by tests and as a fallback when no database
/// can be opened.
#[derive(Debug, Default)]
pub struct MemoryKv {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.map().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.map().remove(key);
        Ok(())
    }
}

/// Outcome of reading a JSON value from the store.
#[derive(Debug)]
pub enum Stored<T> {
    Missing,
    Value(T),
    /// The key holds something that does not parse as `T`.
    Corrupt(serde_json::Error),
}

/// Read and decode a JSON value. Backend errors propagate; decode errors are
/// reported as [`Stored::Corrupt`] so callers can reinitialize.
pub fn read_json<T: DeserializeOwned>(kv: &dyn KvStore, key: &str) -> Result<Stored<T>> {
    match kv.get(key)? {
        None => Ok(Stored::Missing),
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(value) => Ok(Stored::Value(value)),
            Err(e) => Ok(Stored::Corrupt(e)),
        },
    }
}

pub fn write_json<T: Serialize>(kv: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    kv.set(key, &json)
}

/// Read a JSON value, falling back to `T::default()` when it is missing or
/// corrupt. Corrupt values are overwritten with the default.
pub fn read_json_or_default<T>(kv: &dyn KvStore, key: &str) -> Result<T>
where
    T: DeserializeOwned + Serialize + Default,
{
    match read_json(kv, key)? {
        Stored::Value(v) => Ok(v),
        Stored::Missing => Ok(T::default()),
        Stored::Corrupt(e) => {
            tracing::warn!(key, error = %e, "discarding corrupted stored value");
            let fresh = T::default();
            write_json(kv, key, &fresh)?;
            Ok(fresh)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_kv_roundtrip() {
        let kv = MemoryKv::new();
        assert!(kv.get("a").unwrap().is_none());
        kv.set("a", "1").unwrap();
        assert_eq!(kv.get("a").unwrap().as_deref(), Some("1"));
        kv.remove("a").unwrap();
        assert!(kv.get("a").unwrap().is_none());
    }

    #[test]
    fn corrupt_json_is_reported_and_replaced() {
        let kv = MemoryKv::new();
        kv.set("nums", "{not json").unwrap();
        assert!(matches!(
            read_json::<Vec<u32>>(&kv, "nums").unwrap(),
            Stored::Corrupt(_)
        ));
        let v: Vec<u32> = read_json_or_default(&kv, "nums").unwrap();
        assert!(v.is_empty());
        assert_eq!(kv.get("nums").unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn arc_forwards() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        write_json(&kv, "x", &42u32).unwrap();
        assert!(matches!(read_json::<u32>(&kv, "x").unwrap(), Stored::Value(42)));
    }
}
