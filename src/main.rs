//! ScriptManager - Store shell-script snippets and run them as supervised processes
//!
//! Scripts are staged to executable files, launched under a shell, sampled for
//! CPU and memory usage, and always torn down before the manager exits.

#![allow(dead_code)] // Many API methods are part of a comprehensive public API

mod core;
mod persistence;
mod platform;
mod ui;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use single_instance::SingleInstance;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::core::{Settings, StatusPublisher, Supervisor, SysinfoProbe, TracingSink};
use crate::persistence::{Database, ScriptStore};
use crate::ui::Console;

/// Application name constant
pub const APP_NAME: &str = "ScriptManager";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command line overrides for one run; nothing here is saved
#[derive(Debug, Parser)]
#[command(name = "script-manager", version, about)]
struct Args {
    /// Data directory (database, script list, staging)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Script list file
    #[arg(long)]
    scripts: Option<PathBuf>,

    /// Directory for staged script files
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Shell used to run scripts
    #[arg(long)]
    shell: Option<PathBuf>,

    /// Resource sampling interval in milliseconds
    #[arg(long)]
    monitor_interval_ms: Option<u32>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        if let Some(dir) = &self.data_dir {
            settings.data_directory = Some(dir.clone());
        }
        if let Some(path) = &self.scripts {
            settings.scripts_file = Some(path.clone());
        }
        if let Some(dir) = &self.staging_dir {
            settings.staging_directory = Some(dir.clone());
        }
        if let Some(shell) = &self.shell {
            settings.shell = shell.clone();
        }
        if let Some(interval) = self.monitor_interval_ms {
            settings.monitor_interval_ms = interval;
        }
        settings.debug_logging |= self.debug;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Settings live in the database, which lives in the data directory
    let mut bootstrap = Settings::default();
    args.apply(&mut bootstrap);
    let db_path = bootstrap.get_database_path();

    let database = Database::open(&db_path).and_then(|db| db.initialize().map(|()| db));
    let stored = match &database {
        Ok(db) => db.load_settings(),
        Err(_) => Ok(None),
    };
    let mut settings = match &stored {
        Ok(Some(settings)) => settings.clone(),
        _ => Settings::default(),
    };
    args.apply(&mut settings);
    settings.validate();

    init_logging(settings.debug_logging);
    info!("{} v{} starting...", APP_NAME, APP_VERSION);

    // Ensure only one instance of ScriptManager itself is running
    let instance = SingleInstance::new(APP_NAME).context("Failed to create single instance lock")?;
    if !instance.is_single() {
        error!("Another instance of {} is already running!", APP_NAME);
        eprintln!("{} is already running!", APP_NAME);
        return Ok(());
    }

    let database = match database {
        Ok(db) => db,
        Err(e) => {
            warn!("Falling back to an in-memory database: {:#}", e);
            let db = Database::open_in_memory()?;
            db.initialize()?;
            db
        }
    };
    match stored {
        Ok(Some(_)) => {}
        // first run: store the defaults so they can be edited
        Ok(None) => {
            if let Err(e) = database.save_settings(&Settings::default()) {
                warn!("Failed to save default settings: {:#}", e);
            }
        }
        Err(e) => warn!("Ignoring stored settings: {:#}", e),
    }
    match database.cleanup_history(settings.history_retention_days) {
        Ok(0) => {}
        Ok(count) => info!("Removed {} expired history entries", count),
        Err(e) => warn!("Failed to clean up history: {:#}", e),
    }

    let store = ScriptStore::new(settings.get_scripts_file());
    let (publisher, updates) = StatusPublisher::channel();
    let supervisor = Arc::new(Supervisor::new(settings, publisher, Arc::new(TracingSink)));
    supervisor.start_sampler(SysinfoProbe::new());
    info!("Supervisor initialized");

    let result = Console::new(supervisor.clone(), store, database, updates)
        .run()
        .await;

    // Children never outlive the manager, whatever ended the console
    supervisor.shutdown().await;
    info!("{} shutting down", APP_NAME);
    result
}

/// Initialize the logging system
fn init_logging(debug: bool) {
    let default = if debug {
        "script_manager=debug,script_output=info"
    } else {
        "script_manager=info,script_output=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
