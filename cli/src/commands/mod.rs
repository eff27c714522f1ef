mod alerts;
mod helpers;
mod log;
mod moves;
mod summary;
mod sync;
mod weekly;

use nutriledger_core::db::Database;
use nutriledger_core::ledger::LedgerStore;

/// The ledger as the CLI and server run it: SQLite-backed.
pub(crate) type Ledger = LedgerStore<Database>;

/// Longest history window `history`, `export` and the API will read.
pub(crate) const MAX_HISTORY_DAYS: u32 = 366;

pub(crate) use alerts::cmd_alerts;
pub(crate) use log::{FoodArgs, cmd_delete, cmd_goal, cmd_log};
pub(crate) use moves::{cmd_move_day, cmd_move_meal};
pub(crate) use summary::{cmd_export, cmd_history, cmd_summary};
pub(crate) use sync::{cmd_sync_flush, cmd_sync_status, flush};
pub(crate) use weekly::{WeeklyChanges, cmd_week, cmd_weekly_set, cmd_weekly_show};
