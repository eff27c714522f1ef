mod commands;
mod config;
mod remote;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    FoodArgs, Ledger, MAX_HISTORY_DAYS, WeeklyChanges, cmd_alerts, cmd_delete, cmd_export, cmd_goal, cmd_history,
    cmd_log, cmd_move_day, cmd_move_meal, cmd_summary, cmd_sync_flush, cmd_sync_status, cmd_week,
    cmd_weekly_set, cmd_weekly_show,
};
use crate::config::Config;
use crate::remote::HttpRemoteSync;
use nutriledger_core::db::Database;
use nutriledger_core::ledger::LedgerStore;

#[derive(Parser)]
#[command(
    name = "nutriledger",
    version,
    about = "A local-first nutrition ledger",
    long_about = "Log meals, shift calories between meals and days, track a weekly \
                  buffer and get nudged when a food conflicts with your profile."
)]
struct Cli {
    /// Path to config file (default: <config dir>/nutriledger/config.yaml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log a food entry
    Log {
        #[command(flatten)]
        food: FoodArgs,
        /// Number of servings
        #[arg(short, long, default_value = "1")]
        quantity: f64,
        /// Meal type: breakfast, lunch, dinner, snack
        #[arg(short, long, default_value = "snack")]
        meal: String,
        /// Date to log for (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a meal entry by ID (or unique ID prefix)
    Delete {
        /// Entry ID
        entry_id: String,
        /// Date of the entry (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show daily summary (defaults to today)
    Summary {
        /// Date to show (YYYY-MM-DD, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set the calorie goal for a day
    Goal {
        /// Daily calorie goal
        calories: f64,
        /// Date (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move calories from one meal to another within a day
    MoveMeal {
        /// Meal to take calories from
        from: String,
        /// Meal to give calories to
        to: String,
        /// Calories to move (capped at what is available)
        amount: f64,
        /// Date (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move calories from one day to another
    MoveDay {
        /// Source date
        from: String,
        /// Destination date
        to: String,
        /// Calories to move (capped at what is available)
        amount: f64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the weekly summary for the week containing a date
    Week {
        /// Any date in the week (default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage weekly goal settings
    Weekly {
        #[command(subcommand)]
        command: WeeklyCommands,
    },
    /// Show the last N days
    History {
        /// Number of days to show (1-366)
        #[arg(short, long, default_value = "7", value_parser = days_parser())]
        days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a day's entries against your health profile
    Alerts {
        /// Date (default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export the last N days as CSV
    Export {
        /// Number of days to export (1-366)
        #[arg(short, long, default_value = "30", value_parser = days_parser())]
        days: u32,
        /// Output file (default: stdout)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Remote sync
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Subcommand)]
enum WeeklyCommands {
    /// Change weekly goal settings
    Set {
        /// Use the weekly goal (true/false)
        #[arg(long)]
        enabled: Option<bool>,
        /// Track the weekly buffer (true/false)
        #[arg(long)]
        buffer: Option<bool>,
        /// Weekly calorie target (default: 7 x daily goal)
        #[arg(long)]
        target: Option<f64>,
        /// Remove the explicit weekly target
        #[arg(long)]
        clear_target: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show weekly goal settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum SyncCommands {
    /// Show days waiting to be pushed
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push pending days now
    Flush {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn days_parser() -> clap::builder::RangedI64ValueParser<u32> {
    clap::value_parser!(u32).range(1..=i64::from(MAX_HISTORY_DAYS))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(matches!(cli.command, Commands::Serve { .. }));

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing(serving: bool) {
    let default = if serving { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_env("NUTRILEDGER_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn open_ledger(config: &Config) -> Result<Ledger> {
    let db = Database::open(&config.db_path)?;
    let mut ledger = LedgerStore::new(db).with_profile(config.profile.clone());

    if let Some(url) = config.sync.url.as_deref().filter(|_| config.sync.is_configured()) {
        let user_id = match &config.sync.user_id {
            Some(id) => id.clone(),
            None => ledger.store().get_or_create_device_id()?,
        };
        let remote = HttpRemoteSync::new(url, config.sync.api_key.clone())?;
        ledger = ledger.with_remote(Arc::new(remote), user_id);
    }
    Ok(ledger)
}

fn mutates(command: &Commands) -> bool {
    matches!(
        command,
        Commands::Log { .. }
            | Commands::Delete { .. }
            | Commands::Goal { .. }
            | Commands::MoveMeal { .. }
            | Commands::MoveDay { .. }
            | Commands::Weekly {
                command: WeeklyCommands::Set { .. }
            }
    )
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config)?;
    let ledger = Arc::new(open_ledger(&config)?);
    let push_after = mutates(&cli.command) && ledger.has_remote();

    match cli.command {
        Commands::Log {
            food,
            quantity,
            meal,
            date,
            json,
        } => cmd_log(&ledger, food, quantity, &meal, date, json)?,
        Commands::Delete {
            entry_id,
            date,
            json,
        } => cmd_delete(&ledger, &entry_id, date, json)?,
        Commands::Summary { date, json } => cmd_summary(&ledger, date, json)?,
        Commands::Goal {
            calories,
            date,
            json,
        } => cmd_goal(&ledger, calories, date, json)?,
        Commands::MoveMeal {
            from,
            to,
            amount,
            date,
            json,
        } => cmd_move_meal(&ledger, &from, &to, amount, date, json)?,
        Commands::MoveDay {
            from,
            to,
            amount,
            json,
        } => cmd_move_day(&ledger, Some(from), Some(to), amount, json)?,
        Commands::Week { date, json } => cmd_week(&ledger, date, json)?,
        Commands::Weekly { command } => match command {
            WeeklyCommands::Set {
                enabled,
                buffer,
                target,
                clear_target,
                json,
            } => {
                let changes = WeeklyChanges {
                    enabled,
                    buffer,
                    target,
                    clear_target,
                };
                cmd_weekly_set(&ledger, &changes, json)?;
            }
            WeeklyCommands::Show { json } => cmd_weekly_show(&ledger, json)?,
        },
        Commands::History { days, json } => cmd_history(&ledger, days, json)?,
        Commands::Alerts { date, json } => cmd_alerts(&ledger, &config.profile, date, json)?,
        Commands::Export { days, output } => cmd_export(&ledger, days, output.as_deref())?,
        Commands::Sync { command } => match command {
            SyncCommands::Status { json } => cmd_sync_status(&ledger, json)?,
            SyncCommands::Flush { json } => cmd_sync_flush(ledger.clone(), json).await?,
        },
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let (api_key, new_api_key) = if no_auth {
                (None, false)
            } else {
                let (key, new) = config.load_or_create_api_key()?;
                (Some(key), new)
            };
            server::start_server(ledger.clone(), port, &bind, api_key, new_api_key).await?;
        }
    }

    // Best effort: the change is already saved and stays queued on failure.
    if push_after {
        match commands::flush(ledger).await {
            Ok(report) => {
                for warning in &report.warnings {
                    eprintln!("Warning: {warning}");
                }
            }
            Err(e) => tracing::warn!("sync flush failed: {e:#}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn days_of(args: &[&str]) -> Option<u32> {
        match Cli::try_parse_from(args).ok()?.command {
            Commands::History { days, .. } | Commands::Export { days, .. } => Some(days),
            _ => None,
        }
    }

    #[test]
    fn history_days_are_capped() {
        assert_eq!(days_of(&["nutriledger", "history"]), Some(7));
        assert_eq!(days_of(&["nutriledger", "history", "--days", "366"]), Some(366));
        assert_eq!(days_of(&["nutriledger", "history", "--days", "367"]), None);
        assert_eq!(days_of(&["nutriledger", "history", "--days", "0"]), None);
        assert_eq!(days_of(&["nutriledger", "history", "--days", "4294967295"]), None);
    }

    #[test]
    fn export_days_are_capped() {
        assert_eq!(days_of(&["nutriledger", "export"]), Some(30));
        assert_eq!(days_of(&["nutriledger", "export", "-d", "367"]), None);
    }
}
