use clap::Subcommand;
use pomodoro_core::storage::Database;

use crate::app::{print_json, CliResult};

#[derive(Subcommand)]
pub enum StatsAction {
    /// Today's stats
    Today,
    /// All-time stats
    All,
    /// Most recent completed phases
    Recent {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

pub fn run(action: StatsAction) -> CliResult {
    let db = Database::open()?;

    match action {
        StatsAction::Today => print_json(&db.stats_today()?)?,
        StatsAction::All => print_json(&db.stats_all()?)?,
        StatsAction::Recent { limit } => print_json(&db.recent_sessions(limit)?)?,
    }
    Ok(())
}
