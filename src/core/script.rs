//! Scripts - Stored shell snippets and the status shown for each

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored shell snippet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Script {
    /// Unique, user-chosen title
    #[serde(alias = "title")]
    pub title: String,
    /// Raw shell text
    #[serde(alias = "content")]
    pub content: String,
}

impl Script {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }

    /// Read a script from disk, titling it after the file stem unless a title is given
    pub fn from_file(path: &Path, title: Option<&str>) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let title = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(title) => title.to_string(),
            None => path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("Script")
                .to_string(),
        };
        Ok(Self::new(title, content))
    }

    /// Title given to a script added without one
    pub fn default_title(existing: usize) -> String {
        format!("Script {}", existing + 1)
    }
}

/// Identifies one execution of a script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a script as seen by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ScriptStatus {
    /// Not running
    #[default]
    Stopped,
    /// Spawned, waiting for its first resource sample
    Starting,
    /// Running with a resource sample
    Running,
}

impl ScriptStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Starting => "Starting",
            Self::Running => "Running",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Stopped => "⚫",
            Self::Starting => "🟡",
            Self::Running => "🟢",
        }
    }
}

impl std::fmt::Display for ScriptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.icon(), self.label())
    }
}
