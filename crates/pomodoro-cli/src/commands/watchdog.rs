use clap::Subcommand;
use pomodoro_core::watchdog::CheckOutcome;
use pomodoro_core::Watchdog;

use crate::app::{print_json, App, CliResult};

#[derive(Subcommand)]
pub enum WatchdogAction {
    /// Run health checks once, repairing what can be repaired
    Check,
    /// Show the error log
    Errors,
    /// Clear the error log
    Clear,
}

pub fn run(action: WatchdogAction) -> CliResult {
    let app = App::open()?;

    match action {
        WatchdogAction::Check => {
            let mut engine = app.load_engine()?;
            let report = Watchdog::new(app.kv(), app.config.watchdog.clone())
                .with_settings(app.settings.clone())
                .check(Some(&mut engine));
            let timer_repaired = report
                .check("timer")
                .is_some_and(|c| c.outcome == CheckOutcome::Recovered);
            if timer_repaired {
                app.save_engine(&engine)?;
            }
            print_json(&report)?;
        }
        WatchdogAction::Errors => print_json(&app.errors().entries()?)?,
        WatchdogAction::Clear => {
            app.errors().clear()?;
            println!("error log cleared");
        }
    }
    Ok(())
}
