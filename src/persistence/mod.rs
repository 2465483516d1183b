//! Persistence - Stored script list and the SQLite settings/history database

mod database;
mod scripts;

pub use database::{Database, HistoryEntry, RunEvent};
pub use scripts::ScriptStore;
