use std::sync::{Arc, Mutex};

use clap::Subcommand;

use crate::app::{print_json, App, CliResult};

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Get one setting
    Get {
        /// Setting name (e.g. "focus_minutes", "auto_start_next")
        key: String,
    },
    /// Change one setting
    Set {
        /// Setting name
        key: String,
        /// New value
        value: String,
    },
    /// List all settings
    List,
    /// Reset settings to defaults
    Reset,
}

pub fn run(action: SettingsAction) -> CliResult {
    let app = App::open()?;

    match action {
        SettingsAction::Get { key } => {
            let json = serde_json::to_value(app.settings.get())?;
            match json.get(&key) {
                Some(value) => println!("{value}"),
                None => return Err(format!("unknown setting: {key}").into()),
            }
        }
        SettingsAction::Set { key, value } => {
            let mut next = app.settings.get();
            next.set_field(&key, &value)?;
            apply(&app, |store| store.set(next))?;
            println!("ok");
        }
        SettingsAction::List => print_json(&app.settings.get())?,
        SettingsAction::Reset => {
            apply(&app, |store| store.reset())?;
            println!("settings reset to defaults");
        }
    }
    Ok(())
}

/// Change settings while the persisted timer follows along.
fn apply<F>(app: &App, change: F) -> CliResult
where
    F: FnOnce(&pomodoro_core::SettingsStore) -> pomodoro_core::error::Result<()>,
{
    let engine = Arc::new(Mutex::new(app.load_engine()?));
    let follow = engine.clone();
    let sub = app.settings.subscribe(move |settings| {
        let mut engine = follow.lock().unwrap_or_else(|p| p.into_inner());
        engine.apply_settings(settings.clone());
    });

    let changed = change(&app.settings);
    sub.unsubscribe();
    changed?;

    let engine = engine.lock().unwrap_or_else(|p| p.into_inner()).clone();
    app.save_engine(&engine)?;
    Ok(())
}
