//! Application settings management

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A long-running service with its own shutdown command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GracefulStopRule {
    /// Display name of the service
    pub name: String,
    /// Case-insensitive substring matched against script titles
    pub title_pattern: String,
    /// Script run under the configured shell to stop the service
    pub stop_script: PathBuf,
}

impl GracefulStopRule {
    pub fn new(
        name: impl Into<String>,
        title_pattern: impl Into<String>,
        stop_script: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            title_pattern: title_pattern.into(),
            stop_script: stop_script.into(),
        }
    }

    /// Kafka broker started from a script, stopped with `kafka-server-stop.sh`
    pub fn kafka() -> Self {
        let kafka_home = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kafka")
            .join("kafka_2.13-3.9.1");
        Self::new(
            "Kafka",
            "kafka",
            kafka_home.join("bin").join("kafka-server-stop.sh"),
        )
    }

    pub fn matches(&self, title: &str) -> bool {
        !self.title_pattern.is_empty()
            && title
                .to_lowercase()
                .contains(&self.title_pattern.to_lowercase())
    }
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Paths
    /// Custom data directory
    pub data_directory: Option<PathBuf>,
    /// Directory for staged script files (defaults to `<data>/staging`)
    pub staging_directory: Option<PathBuf>,
    /// Stored script list (defaults to `<data>/scripts.json`)
    pub scripts_file: Option<PathBuf>,

    // Processes
    /// Shell used to run staged scripts and stop scripts
    pub shell: PathBuf,
    /// Resource sampling period in ms
    pub monitor_interval_ms: u32,
    /// How long a forced kill waits for the process to exit, in ms
    pub termination_timeout_ms: u32,
    /// How long a service stop script and the resulting exit may take, in seconds
    pub graceful_stop_timeout_secs: u32,
    /// Services stopped through their own shutdown script
    pub graceful_services: Vec<GracefulStopRule>,

    // Advanced
    /// Enable debug logging
    pub debug_logging: bool,
    /// Keep run history for N days (0 = forever)
    pub history_retention_days: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_directory: None,
            staging_directory: None,
            scripts_file: None,

            shell: PathBuf::from("/bin/bash"),
            monitor_interval_ms: 2000,
            termination_timeout_ms: 1000,
            graceful_stop_timeout_secs: 30,
            graceful_services: vec![GracefulStopRule::kafka()],

            debug_logging: false,
            history_retention_days: 30,
        }
    }
}

impl Settings {
    /// Get the data directory, using default if not set
    pub fn get_data_directory(&self) -> PathBuf {
        self.data_directory.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ScriptManager")
        })
    }

    /// Get the staging directory for script files
    pub fn get_staging_directory(&self) -> PathBuf {
        self.staging_directory
            .clone()
            .unwrap_or_else(|| self.get_data_directory().join("staging"))
    }

    /// Get the stored script list path
    pub fn get_scripts_file(&self) -> PathBuf {
        self.scripts_file
            .clone()
            .unwrap_or_else(|| self.get_data_directory().join("scripts.json"))
    }

    /// Get the SQLite database path
    pub fn get_database_path(&self) -> PathBuf {
        self.get_data_directory().join("script-manager.db")
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms as u64)
    }

    pub fn termination_timeout(&self) -> Duration {
        Duration::from_millis(self.termination_timeout_ms as u64)
    }

    pub fn graceful_stop_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_stop_timeout_secs as u64)
    }

    /// First graceful stop rule matching a script title
    pub fn graceful_rule_for(&self, title: &str) -> Option<&GracefulStopRule> {
        self.graceful_services.iter().find(|rule| rule.matches(title))
    }

    /// Validate settings and fix any invalid values
    pub fn validate(&mut self) {
        self.monitor_interval_ms = self.monitor_interval_ms.max(100);
        self.termination_timeout_ms = self.termination_timeout_ms.clamp(50, 60_000);
        self.graceful_stop_timeout_secs = self.graceful_stop_timeout_secs.max(1);
        if self.shell.as_os_str().is_empty() {
            self.shell = PathBuf::from("/bin/bash");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_fixes_invalid_values() {
        let mut settings = Settings {
            monitor_interval_ms: 0,
            termination_timeout_ms: 0,
            graceful_stop_timeout_secs: 0,
            shell: PathBuf::new(),
            ..Default::default()
        };
        settings.validate();

        assert_eq!(settings.monitor_interval_ms, 100);
        assert_eq!(settings.termination_timeout_ms, 50);
        assert_eq!(settings.graceful_stop_timeout_secs, 1);
        assert_eq!(settings.shell, PathBuf::from("/bin/bash"));
    }

    #[test]
    fn test_default_paths_derive_from_data_directory() {
        let settings = Settings {
            data_directory: Some(PathBuf::from("/tmp/sm")),
            ..Default::default()
        };
        assert_eq!(
            settings.get_staging_directory(),
            PathBuf::from("/tmp/sm/staging")
        );
        assert_eq!(
            settings.get_scripts_file(),
            PathBuf::from("/tmp/sm/scripts.json")
        );
    }

    #[test]
    fn test_graceful_rule_matches_case_insensitively() {
        let settings = Settings::default();
        assert!(settings.graceful_rule_for("kafkaNode").is_some());
        assert!(settings.graceful_rule_for("Start KAFKA broker").is_some());
        assert!(settings.graceful_rule_for("build").is_none());

        let empty = GracefulStopRule::new("any", "", "/bin/true");
        assert!(!empty.matches("anything"));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"monitor_interval_ms": 500}"#).unwrap();
        assert_eq!(settings.monitor_interval_ms, 500);
        assert_eq!(settings.termination_timeout_ms, 1000);
        assert_eq!(settings.graceful_services.len(), 1);
    }
}
