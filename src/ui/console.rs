//! Terminal front-end - Reads commands, drives the supervisor, shows status

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use super::commands::{Command, HELP};
use super::table::ScriptTable;
use crate::core::{Script, ScriptStatus, StatusUpdate, StopAllReport, StopOutcome, Supervisor};
use crate::persistence::{Database, RunEvent, ScriptStore};

/// Results of work spawned off the front-end task
#[derive(Debug)]
enum UiEvent {
    Launched {
        title: String,
        result: Result<u32, String>,
    },
    Stopped {
        title: String,
        result: Result<StopOutcome, String>,
    },
    StoppedAll(StopAllReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Script being typed in after `add`
struct PendingScript {
    title: Option<String>,
    lines: Vec<String>,
}

/// Owns the script list and the UI model. All UI state changes happen on the
/// task running [`Console::run`].
pub struct Console {
    supervisor: Arc<Supervisor>,
    store: ScriptStore,
    database: Database,
    scripts: Vec<Script>,
    table: ScriptTable,
    updates: UnboundedReceiver<StatusUpdate>,
    events_tx: UnboundedSender<UiEvent>,
    events_rx: UnboundedReceiver<UiEvent>,
    pending: Option<PendingScript>,
}

impl Console {
    pub fn new(
        supervisor: Arc<Supervisor>,
        store: ScriptStore,
        database: Database,
        updates: UnboundedReceiver<StatusUpdate>,
    ) -> Self {
        let scripts = store.load();
        let mut table = ScriptTable::new();
        for script in &scripts {
            table.add(&script.title);
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            supervisor,
            store,
            database,
            scripts,
            table,
            updates,
            events_tx,
            events_rx,
            pending: None,
        }
    }

    /// Run until `quit`, end of input, or Ctrl-C
    pub async fn run(mut self) -> Result<()> {
        let mut input = BufReader::new(tokio::io::stdin()).lines();
        println!("{} scripts loaded. Type 'help' for commands.", self.scripts.len());
        print!("{}", self.table.render());

        loop {
            tokio::select! {
                line = input.next_line() => {
                    let line = line.context("Failed to read command input")?;
                    match line {
                        Some(line) => {
                            if self.handle_line(&line) == Flow::Quit {
                                break;
                            }
                        }
                        None => {
                            debug!("Command input closed");
                            break;
                        }
                    }
                }
                Some(update) = self.updates.recv() => self.on_status(update),
                Some(event) = self.events_rx.recv() => self.on_event(event),
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!("Ctrl-C handler failed: {}", e);
                    }
                    info!("Interrupted");
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle_line(&mut self, line: &str) -> Flow {
        if let Some(pending) = self.pending.as_mut() {
            if line.trim() == "." {
                if let Some(pending) = self.pending.take() {
                    self.finish_add(pending);
                }
            } else {
                pending.lines.push(line.to_string());
            }
            return Flow::Continue;
        }

        match Command::parse(line) {
            Ok(command) => self.execute(command),
            Err(message) => {
                if !message.is_empty() {
                    println!("{}", message);
                }
                Flow::Continue
            }
        }
    }

    fn execute(&mut self, command: Command) -> Flow {
        match command {
            Command::Add { title } => {
                println!("Enter the script, then a line with a single '.'");
                self.pending = Some(PendingScript {
                    title,
                    lines: Vec::new(),
                });
            }
            Command::Import { path, title } => match Script::from_file(&path, title.as_deref()) {
                Ok(script) => self.add_script(script),
                Err(e) => println!("Failed to read {}: {}", path.display(), e),
            },
            Command::Delete(target) => self.delete(&target),
            Command::Run(target) => match self.resolve(&target) {
                Some(script) => self.spawn_launch(script),
                None => println!("No script '{}'", target),
            },
            Command::RunAll => self.run_all(),
            Command::Stop(target) => self.stop(&target),
            Command::StopAll => self.stop_all(),
            Command::List => print!("{}", self.table.render()),
            Command::History(count) => self.show_history(count),
            Command::Help => println!("{}", HELP),
            Command::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    fn finish_add(&mut self, pending: PendingScript) {
        let content = pending.lines.join("\n");
        if content.trim().is_empty() {
            println!("Empty script ignored");
            return;
        }
        let title = pending
            .title
            .unwrap_or_else(|| Script::default_title(self.scripts.len()));
        self.add_script(Script::new(title, content));
    }

    fn add_script(&mut self, script: Script) {
        if !self.table.add(&script.title) {
            println!("A script titled '{}' already exists", script.title);
            return;
        }
        println!("Added '{}'", script.title);
        self.scripts.push(script);
        self.save();
    }

    fn delete(&mut self, target: &str) {
        let Some(script) = self.resolve(target) else {
            println!("No script '{}'", target);
            return;
        };
        self.scripts.retain(|s| s.title != script.title);
        self.table.remove(&script.title);
        self.save();
        if self.supervisor.is_running(&script.title) {
            println!("Deleted '{}' (it keeps running until stopped)", script.title);
        } else {
            println!("Deleted '{}'", script.title);
        }
    }

    fn save(&self) {
        if let Err(e) = self.store.save(&self.scripts) {
            warn!("Failed to save scripts: {}", e);
            println!("Could not save the script list: {}", e);
        }
    }

    /// A row number from `list` or an exact title
    fn resolve(&self, target: &str) -> Option<Script> {
        if let Some(script) = self.scripts.iter().find(|s| s.title == target) {
            return Some(script.clone());
        }
        let index = target.parse::<usize>().ok()?.checked_sub(1)?;
        self.table
            .rows()
            .get(index)
            .and_then(|row| self.scripts.iter().find(|s| s.title == row.title))
            .cloned()
    }

    fn spawn_launch(&self, script: Script) {
        if self.supervisor.is_running(&script.title) {
            println!("'{}' is already running", script.title);
            return;
        }
        let supervisor = self.supervisor.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = supervisor
                .launch(&script)
                .await
                .map(|process| process.pid)
                .map_err(|e| e.to_string());
            let _ = events.send(UiEvent::Launched {
                title: script.title,
                result,
            });
        });
    }

    fn run_all(&self) {
        let idle: Vec<Script> = self
            .scripts
            .iter()
            .filter(|s| !self.supervisor.is_running(&s.title))
            .cloned()
            .collect();
        if idle.is_empty() {
            println!("Nothing to start");
            return;
        }
        let supervisor = self.supervisor.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            for (title, result) in supervisor.launch_all(&idle).await {
                let result = result.map(|process| process.pid).map_err(|e| e.to_string());
                let _ = events.send(UiEvent::Launched { title, result });
            }
        });
    }

    fn stop(&self, target: &str) {
        // a deleted script can still be running under its title
        let title = match self.resolve(target) {
            Some(script) => script.title,
            None if self.supervisor.is_running(target) => target.to_string(),
            None => {
                println!("No script '{}'", target);
                return;
            }
        };
        if !self.supervisor.is_running(&title) {
            println!("'{}' is not running", title);
            return;
        }
        let supervisor = self.supervisor.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = supervisor.stop_one(&title).await.map_err(|e| e.to_string());
            let _ = events.send(UiEvent::Stopped { title, result });
        });
    }

    fn stop_all(&self) {
        if self.supervisor.running_count() == 0 {
            println!("No scripts are running");
            return;
        }
        let supervisor = self.supervisor.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let report = supervisor.stop_all().await;
            let _ = events.send(UiEvent::StoppedAll(report));
        });
    }

    fn show_history(&self, count: usize) {
        match self.database.recent_history(count) {
            Ok(entries) if entries.is_empty() => println!("No history yet"),
            Ok(entries) => {
                for entry in entries {
                    println!(
                        "{}  {:<14} {} {}",
                        entry.event_time.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
                        entry.event_type,
                        entry.title,
                        entry.details.as_deref().map(|d| format!("({})", d)).unwrap_or_default()
                    );
                }
            }
            Err(e) => println!("Could not read history: {}", e),
        }
    }

    fn record(&self, title: &str, event: RunEvent, details: Option<&str>) {
        if let Err(e) = self.database.record_run_event(title, event, details) {
            warn!("Failed to record {} event for '{}': {}", event.as_str(), title, e);
        }
    }

    fn on_status(&mut self, update: StatusUpdate) {
        match update.status {
            ScriptStatus::Stopped => {
                self.record(&update.title, RunEvent::Stopped, Some(&update.detail));
                println!("{} {}: {}", update.status, update.title, update.detail);
            }
            ScriptStatus::Starting => {
                println!("{} {}: {}", update.status, update.title, update.detail);
            }
            ScriptStatus::Running => {}
        }
        if !self.table.apply(&update) {
            debug!("Dropped status update for unlisted '{}'", update.title);
        }
    }

    fn on_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::Launched { title, result } => match result {
                Ok(pid) => self.record(&title, RunEvent::Started, Some(&format!("PID {}", pid))),
                Err(e) => {
                    self.record(&title, RunEvent::LaunchFailed, Some(&e));
                    println!("Failed to start '{}': {}", title, e);
                }
            },
            UiEvent::Stopped { title, result } => match result {
                Ok(StopOutcome::Graceful) => println!("'{}' shut down by its stop script", title),
                Ok(StopOutcome::Forced) => println!("'{}' killed", title),
                Ok(StopOutcome::NotRunning) => println!("'{}' was not running", title),
                Err(e) => println!("'{}' removed, but: {}", title, e),
            },
            UiEvent::StoppedAll(report) => {
                println!("Stopped {} scripts", report.total());
                for (title, e) in &report.failures {
                    println!("  {}: {}", title, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::{Settings, StatusPublisher, TracingSink};

    fn console(dir: &std::path::Path) -> Console {
        let settings = Settings {
            data_directory: Some(dir.to_path_buf()),
            graceful_services: Vec::new(),
            ..Default::default()
        };
        let (publisher, updates) = StatusPublisher::channel();
        let store = ScriptStore::new(settings.get_scripts_file());
        let supervisor = Arc::new(Supervisor::new(settings, publisher, Arc::new(TracingSink)));
        let database = Database::open_in_memory().unwrap();
        database.initialize().unwrap();
        Console::new(supervisor, store, database, updates)
    }

    #[tokio::test]
    async fn test_add_collects_lines_until_dot_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let mut console = console(dir.path());

        console.handle_line("add");
        console.handle_line("echo one");
        console.handle_line("echo two");
        assert!(console.scripts.is_empty());
        console.handle_line(".");

        assert_eq!(console.scripts, [Script::new("Script 1", "echo one\necho two")]);
        assert!(console.table.contains("Script 1"));

        let stored = ScriptStore::new(dir.path().join("scripts.json")).load();
        assert_eq!(stored, console.scripts);
    }

    #[tokio::test]
    async fn test_empty_and_duplicate_scripts_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut console = console(dir.path());

        for line in ["add blank", "   ", "."] {
            console.handle_line(line);
        }
        assert!(console.scripts.is_empty());

        for line in ["add job", "true", ".", "add job", "false", "."] {
            console.handle_line(line);
        }
        assert_eq!(console.scripts, [Script::new("job", "true")]);
    }

    #[tokio::test]
    async fn test_resolve_by_title_or_row_number_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut console = console(dir.path());
        for line in ["add alpha", "true", ".", "add beta", "true", "."] {
            console.handle_line(line);
        }

        assert_eq!(console.resolve("2").map(|s| s.title), Some("beta".to_string()));
        assert_eq!(console.resolve("alpha").map(|s| s.title), Some("alpha".to_string()));
        assert!(console.resolve("0").is_none());
        assert!(console.resolve("3").is_none());

        console.handle_line("delete 1");
        assert_eq!(console.table.len(), 1);
        assert_eq!(console.resolve("1").map(|s| s.title), Some("beta".to_string()));
    }

    #[tokio::test]
    async fn test_run_reports_launch_and_records_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut console = console(dir.path());
        for line in ["add quick", "exit 0", ".", "run quick"] {
            console.handle_line(line);
        }

        let event = tokio::time::timeout(Duration::from_secs(10), console.events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        console.on_event(event);

        loop {
            let update = tokio::time::timeout(Duration::from_secs(10), console.updates.recv())
                .await
                .unwrap()
                .unwrap();
            let stopped = update.status == ScriptStatus::Stopped;
            console.on_status(update);
            if stopped {
                break;
            }
        }

        assert_eq!(
            console.table.row("quick").map(|r| r.status),
            Some(ScriptStatus::Stopped)
        );
        let history = console.database.recent_history(10).unwrap();
        let events: Vec<&str> = history.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(events, ["stopped", "started"]);
        console.supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_quit_ends_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let mut console = console(dir.path());
        assert_eq!(console.handle_line("help"), Flow::Continue);
        assert_eq!(console.handle_line("quit"), Flow::Quit);
    }
}
