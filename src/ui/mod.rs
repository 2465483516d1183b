//! User interface module - Terminal front-end over the supervisor

mod commands;
mod console;
mod table;

pub use commands::Command;
pub use console::Console;
pub use table::{ScriptRow, ScriptTable};
