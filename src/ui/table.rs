//! Script table - The UI model of every stored script and its latest status

use std::fmt::Write;

use crate::core::{ScriptStatus, StatusUpdate};

/// One row of the script table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRow {
    pub title: String,
    pub status: ScriptStatus,
    pub detail: String,
}

/// Rows in insertion order. Only the front-end task mutates it.
#[derive(Debug, Default)]
pub struct ScriptTable {
    rows: Vec<ScriptRow>,
}

impl ScriptTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stopped row. Returns false if the title already has one.
    pub fn add(&mut self, title: &str) -> bool {
        if self.contains(title) {
            return false;
        }
        self.rows.push(ScriptRow {
            title: title.to_string(),
            status: ScriptStatus::Stopped,
            detail: String::new(),
        });
        true
    }

    pub fn remove(&mut self, title: &str) -> bool {
        let before = self.rows.len();
        self.rows.retain(|row| row.title != title);
        self.rows.len() != before
    }

    pub fn contains(&self, title: &str) -> bool {
        self.rows.iter().any(|row| row.title == title)
    }

    pub fn row(&self, title: &str) -> Option<&ScriptRow> {
        self.rows.iter().find(|row| row.title == title)
    }

    pub fn rows(&self) -> &[ScriptRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Apply a status update. Updates for titles no longer listed are dropped.
    pub fn apply(&mut self, update: &StatusUpdate) -> bool {
        match self.rows.iter_mut().find(|row| row.title == update.title) {
            Some(row) => {
                row.status = update.status;
                row.detail = update.detail.clone();
                true
            }
            None => false,
        }
    }

    /// Fixed-width text rendering
    pub fn render(&self) -> String {
        if self.rows.is_empty() {
            return "No scripts. Use 'add' or 'import' to create one.\n".to_string();
        }

        let width = self
            .rows
            .iter()
            .map(|row| row.title.chars().count())
            .max()
            .unwrap_or(0)
            .max("Title".len());

        let mut out = String::new();
        let _ = writeln!(out, "  # | {:<width$} | {:<10} | Details", "Title", "Status");
        let _ = writeln!(out, "{}", "-".repeat(width + 34));
        for (i, row) in self.rows.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>3} | {:<width$} | {:<10} | {}",
                i + 1,
                row.title,
                row.status.to_string(),
                row.detail
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(title: &str, status: ScriptStatus, detail: &str) -> StatusUpdate {
        StatusUpdate {
            title: title.to_string(),
            status,
            detail: detail.to_string(),
        }
    }

    #[test]
    fn test_apply_updates_known_rows_only() {
        let mut table = ScriptTable::new();
        assert!(table.add("build"));
        assert!(!table.add("build"));

        assert!(table.apply(&update("build", ScriptStatus::Running, "CPU: 1.0% | MEM: 2.0MB")));
        let row = table.row("build").unwrap();
        assert_eq!(row.status, ScriptStatus::Running);
        assert_eq!(row.detail, "CPU: 1.0% | MEM: 2.0MB");

        assert!(!table.apply(&update("deleted", ScriptStatus::Stopped, "")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_removed_row_ignores_late_updates() {
        let mut table = ScriptTable::new();
        table.add("tmp");
        assert!(table.remove("tmp"));
        assert!(!table.remove("tmp"));
        assert!(!table.apply(&update("tmp", ScriptStatus::Stopped, "exited with code 0")));
        assert!(table.is_empty());
    }

    #[test]
    fn test_render_lists_rows_in_order() {
        let mut table = ScriptTable::new();
        table.add("first");
        table.add("second");
        table.apply(&update("second", ScriptStatus::Starting, "PID 7"));

        let text = table.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[2].contains("first"));
        assert!(lines[3].contains("second"));
        assert!(lines[3].contains("PID 7"));
        assert!(lines[3].contains(ScriptStatus::Starting.label()));
    }
}
