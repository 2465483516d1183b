//! Error types for staging, launching, sampling and stopping scripts

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure to materialize a script into an executable file.
#[derive(Debug, Error)]
pub enum StagingError {
    /// The staging directory could not be created.
    #[error("failed to create staging directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The script file could not be created or written.
    #[error("failed to write staged script {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The script file could not be marked executable.
    #[error("failed to mark {path} executable: {source}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to start a script.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Staging(#[from] StagingError),

    /// The shell could not be spawned.
    #[error("failed to spawn '{title}': {source}")]
    Spawn {
        title: String,
        #[source]
        source: std::io::Error,
    },

    /// A process with the same title is still registered.
    #[error("'{0}' is already running")]
    AlreadyRunning(String),

    /// The supervisor no longer accepts launches.
    #[error("supervisor is shutting down")]
    ShuttingDown,
}

/// Per-process sampling failure. Never fatal; the tick skips the entry.
#[derive(Debug, Error)]
pub enum SamplingError {
    #[error("process {0} is no longer running")]
    Vanished(u32),

    #[error("sampling task failed: {0}")]
    Task(String),
}

/// Failure while terminating a managed process.
///
/// Registry cleanup has always happened by the time one of these is returned.
#[derive(Debug, Error)]
pub enum TerminationError {
    #[error("failed to signal '{title}': {source}")]
    Signal {
        title: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{title}' did not exit within {timeout:?}")]
    Timeout { title: String, timeout: Duration },
}

/// Why a service-specific stop command did not stop the process.
#[derive(Debug, Error)]
pub enum GracefulStopError {
    #[error("stop script {0} not found")]
    ScriptMissing(PathBuf),

    #[error("failed to run stop script: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("stop script exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("stop script did not finish within {0:?}")]
    ScriptTimedOut(Duration),

    #[error("process still running {0:?} after stop script")]
    StillRunning(Duration),
}

/// Failure reading or writing the stored script list.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize script list: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
