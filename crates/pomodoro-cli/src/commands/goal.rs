use chrono::Utc;
use clap::Subcommand;
use pomodoro_core::{GoalProgress, GoalStore};

use crate::app::{print_json, App, CliResult};

#[derive(Subcommand)]
pub enum GoalAction {
    /// Show targets and progress
    Show,
    /// Change targets
    Set {
        /// Focus sessions per day
        #[arg(long)]
        daily: Option<u32>,
        /// Focus sessions per week
        #[arg(long)]
        weekly: Option<u32>,
    },
}

pub fn run(action: GoalAction) -> CliResult {
    let app = App::open()?;
    let store = GoalStore::new(app.kv());

    match action {
        GoalAction::Show => {
            let goals = store.load()?;
            let progress = GoalProgress::from_database(&goals, &app.db, Utc::now())?;
            print_json(&progress)?;
        }
        GoalAction::Set { daily, weekly } => {
            if daily.is_none() && weekly.is_none() {
                return Err("nothing to set: pass --daily and/or --weekly".into());
            }
            let mut goals = store.load()?;
            if let Some(daily) = daily {
                goals.daily_target = daily;
            }
            if let Some(weekly) = weekly {
                goals.weekly_target = weekly;
            }
            store.save(&goals)?;
            print_json(&goals)?;
        }
    }
    Ok(())
}
