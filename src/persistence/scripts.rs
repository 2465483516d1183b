//! Stored script list, kept as a JSON file

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::core::{PersistenceError, Script};

/// JSON file holding the user's scripts
#[derive(Debug, Clone)]
pub struct ScriptStore {
    path: PathBuf,
}

impl ScriptStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the script list. Any problem yields an empty list.
    pub fn load(&self) -> Vec<Script> {
        match self.try_load() {
            Ok(scripts) => {
                info!("Loaded {} scripts from {:?}", scripts.len(), self.path);
                scripts
            }
            Err(e) => {
                warn!("Starting with an empty script list: {}", e);
                Vec::new()
            }
        }
    }

    /// Load the script list, reporting why it could not be read.
    /// A missing file is an empty list, not an error.
    pub fn try_load(&self) -> Result<Vec<Script>, PersistenceError> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No script list at {:?}", self.path);
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let scripts: Option<Vec<Script>> =
            serde_json::from_str(&json).map_err(|source| PersistenceError::Malformed {
                path: self.path.clone(),
                source,
            })?;
        Ok(scripts.unwrap_or_default())
    }

    /// Write the list to a sibling temp file, then rename it over the old one
    pub fn save(&self, scripts: &[Script]) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(scripts)?;
        let write_error = |source| PersistenceError::Write {
            path: self.path.clone(),
            source,
        };

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(write_error)?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(write_error)?;
        if let Err(source) = std::fs::rename(&tmp_path, &self.path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(write_error(source));
        }

        debug!("Saved {} scripts to {:?}", scripts.len(), self.path);
        Ok(())
    }
}
