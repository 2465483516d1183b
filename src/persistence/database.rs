//! SQLite database implementation for settings and run history

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::core::Settings;

/// Kind of entry in the run history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    Started,
    Stopped,
    LaunchFailed,
}

impl RunEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunEvent::Started => "started",
            RunEvent::Stopped => "stopped",
            RunEvent::LaunchFailed => "launch_failed",
        }
    }
}

/// One row of the run history
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub title: String,
    pub event_type: String,
    pub event_time: DateTime<Utc>,
    pub details: Option<String>,
}

/// Database wrapper for SQLite operations
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file
    pub fn open(db_path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let conn = Connection::open(db_path)
            .context(format!("Failed to open database at {:?}", db_path))?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        info!("Database opened at {:?}", db_path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used when the data directory is unusable
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    /// Initialize database schema
    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            -- Settings table
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Run history
            CREATE TABLE IF NOT EXISTS run_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                event_type TEXT NOT NULL,
                event_time TEXT NOT NULL,
                details TEXT
            );
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }

    // === Settings ===

    /// Load settings from database
    pub fn load_settings(&self) -> Result<Option<Settings>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = 'app_settings'")?;
        let result: Option<String> = stmt.query_row([], |row| row.get(0)).optional()?;

        match result {
            Some(json) => {
                let mut settings: Settings =
                    serde_json::from_str(&json).context("Failed to deserialize settings")?;
                // Validate and fix any invalid values after deserialization
                settings.validate();
                Ok(Some(settings))
            }
            None => Ok(None),
        }
    }

    /// Save settings to database
    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let conn = self.conn()?;
        let json = serde_json::to_string(settings)?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES ('app_settings', ?1)",
            params![json],
        )?;
        debug!("Settings saved");
        Ok(())
    }

    // === History ===

    /// Record a run event for a script title
    pub fn record_run_event(&self, title: &str, event: RunEvent, details: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO run_history (title, event_type, event_time, details)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![title, event.as_str(), Utc::now().to_rfc3339(), details],
        )?;
        Ok(())
    }

    /// Most recent history entries, newest first
    pub fn recent_history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT title, event_type, event_time, details FROM run_history ORDER BY id DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (title, event_type, event_time, details) = row?;
            let event_time = match DateTime::parse_from_rfc3339(&event_time) {
                Ok(time) => time.with_timezone(&Utc),
                Err(e) => {
                    warn!("Skipping history entry with bad timestamp {:?}: {}", event_time, e);
                    continue;
                }
            };
            result.push(HistoryEntry {
                title,
                event_type,
                event_time,
                details,
            });
        }

        Ok(result)
    }

    /// Clean up old history entries
    pub fn cleanup_history(&self, retention_days: u32) -> Result<usize> {
        if retention_days == 0 {
            return Ok(0); // Keep forever
        }

        let conn = self.conn()?;
        let cutoff = Utc::now()
            - chrono::TimeDelta::try_days(retention_days as i64)
                .unwrap_or_else(|| chrono::TimeDelta::days(30));
        let count = conn.execute(
            "DELETE FROM run_history WHERE event_time < ?1",
            params![cutoff.to_rfc3339()],
        )?;

        debug!("Cleaned up {} old history entries", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_settings_round_trip_and_validation() {
        let db = database();
        assert!(db.load_settings().unwrap().is_none());

        let settings = Settings {
            monitor_interval_ms: 10,
            shell: "/bin/sh".into(),
            ..Default::default()
        };
        db.save_settings(&settings).unwrap();

        let loaded = db.load_settings().unwrap().unwrap();
        assert_eq!(loaded.monitor_interval_ms, 100);
        assert_eq!(loaded.shell, std::path::PathBuf::from("/bin/sh"));
    }

    #[test]
    fn test_recent_history_is_newest_first() {
        let db = database();
        db.record_run_event("build", RunEvent::Started, Some("PID 10"))
            .unwrap();
        db.record_run_event("build", RunEvent::Stopped, None).unwrap();
        db.record_run_event("deploy", RunEvent::LaunchFailed, Some("not found"))
            .unwrap();

        let history = db.recent_history(2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].title, "deploy");
        assert_eq!(history[0].event_type, "launch_failed");
        assert_eq!(history[1].event_type, "stopped");
        assert!(history[1].details.is_none());
    }

    #[test]
    fn test_cleanup_history_removes_only_old_entries() {
        let db = database();
        db.record_run_event("fresh", RunEvent::Started, None).unwrap();
        {
            let conn = db.conn().unwrap();
            let old = (Utc::now() - chrono::TimeDelta::days(40)).to_rfc3339();
            conn.execute(
                "INSERT INTO run_history (title, event_type, event_time) VALUES ('old', 'started', ?1)",
                params![old],
            )
            .unwrap();
        }

        assert_eq!(db.cleanup_history(0).unwrap(), 0);
        assert_eq!(db.cleanup_history(30).unwrap(), 1);
        let remaining = db.recent_history(10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].title, "fresh");
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.sqlite");
        let db = Database::open(&path).unwrap();
        db.initialize().unwrap();
        assert!(path.exists());
    }
}
