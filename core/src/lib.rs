pub mod alerts;
pub mod db;
pub mod error;
pub mod export;
pub mod ledger;
pub mod models;
pub mod redistribute;
pub mod store;
pub mod sync;
pub mod weekly;
