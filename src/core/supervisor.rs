//! Lifecycle supervisor - Launching, stopping and tearing down managed scripts

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::error::{GracefulStopError, LaunchError, TerminationError};
use super::monitor::{ResourceProbe, ResourceSampler, SamplerHandle};
use super::output::OutputSink;
use super::process::Launcher;
use super::registry::{ManagedProcess, ProcessRegistry};
use super::script::{Script, ScriptStatus};
use super::settings::{GracefulStopRule, Settings};
use super::staging::ScriptStager;
use super::status::StatusPublisher;

/// How `stop_one` ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was registered under the title
    NotRunning,
    /// The service's own stop script shut it down
    Graceful,
    /// The process group was killed
    Forced,
}

/// Aggregate result of a bulk stop
#[derive(Debug, Default)]
pub struct StopAllReport {
    pub stopped: Vec<String>,
    pub failures: Vec<(String, TerminationError)>,
}

impl StopAllReport {
    pub fn total(&self) -> usize {
        self.stopped.len() + self.failures.len()
    }
}

/// Owns every running script from launch until removal
pub struct Supervisor {
    settings: Settings,
    registry: ProcessRegistry,
    launcher: Launcher,
    publisher: StatusPublisher,
    sampler: Mutex<Option<SamplerHandle>>,
    closing: AtomicBool,
    shutdown_done: OnceCell<()>,
}

impl Supervisor {
    pub fn new(settings: Settings, publisher: StatusPublisher, sink: Arc<dyn OutputSink>) -> Self {
        let registry = ProcessRegistry::new();
        let launcher = Launcher::new(
            ScriptStager::new(settings.get_staging_directory()),
            registry.clone(),
            publisher.clone(),
            sink,
            settings.shell.clone(),
        );
        Self {
            settings,
            registry,
            launcher,
            publisher,
            sampler: Mutex::new(None),
            closing: AtomicBool::new(false),
            shutdown_done: OnceCell::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn running_count(&self) -> usize {
        self.registry.count()
    }

    pub fn is_running(&self, title: &str) -> bool {
        self.registry.contains(title)
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Start periodic resource sampling. Returns false if already started or
    /// shutting down.
    pub fn start_sampler(&self, probe: impl ResourceProbe) -> bool {
        if self.is_closing() {
            return false;
        }
        let mut slot = self.sampler.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            debug!("Resource sampler already running");
            return false;
        }
        let interval = self.settings.monitor_interval();
        let sampler = ResourceSampler::new(self.registry.clone(), self.publisher.clone(), probe);
        *slot = Some(sampler.spawn(interval));
        info!("Resource sampler started ({:?} interval)", interval);
        true
    }

    /// Launch one script
    pub async fn launch(&self, script: &Script) -> Result<ManagedProcess, LaunchError> {
        if self.is_closing() {
            return Err(LaunchError::ShuttingDown);
        }
        let process = self.launcher.launch(script).await?;

        // shutdown began while this launch was in flight
        if self.is_closing() {
            let _ = force_stop(
                &process,
                &self.registry,
                &self.publisher,
                self.settings.termination_timeout(),
            )
            .await;
            return Err(LaunchError::ShuttingDown);
        }
        Ok(process)
    }

    /// Launch every script in order. One failure does not stop the rest.
    pub async fn launch_all(
        &self,
        scripts: &[Script],
    ) -> Vec<(String, Result<ManagedProcess, LaunchError>)> {
        let mut results = Vec::with_capacity(scripts.len());
        for script in scripts {
            let result = self.launch(script).await;
            if let Err(e) = &result {
                error!("Failed to launch '{}': {}", script.title, e);
            }
            results.push((script.title.clone(), result));
        }
        results
    }

    /// Stop one script, trying its service stop script first when one is configured.
    ///
    /// The title is out of the registry by the time this returns, even on error.
    pub async fn stop_one(&self, title: &str) -> Result<StopOutcome, TerminationError> {
        let Some(process) = self.registry.get(title) else {
            return Ok(StopOutcome::NotRunning);
        };

        if let Some(rule) = self.settings.graceful_rule_for(title) {
            match self.graceful_stop(&process, rule).await {
                Ok(()) => {
                    info!("Stopped '{}' through the {} stop script", title, rule.name);
                    release(&process, &self.registry, &self.publisher, "Stopped");
                    return Ok(StopOutcome::Graceful);
                }
                Err(e) => {
                    warn!("{} stop for '{}' failed: {}; killing instead", rule.name, title, e);
                }
            }
        }

        force_stop(
            &process,
            &self.registry,
            &self.publisher,
            self.settings.termination_timeout(),
        )
        .await?;
        info!("Stopped process: {}", title);
        Ok(StopOutcome::Forced)
    }

    async fn graceful_stop(
        &self,
        process: &ManagedProcess,
        rule: &GracefulStopRule,
    ) -> Result<(), GracefulStopError> {
        if !tokio::fs::try_exists(&rule.stop_script).await.unwrap_or(false) {
            return Err(GracefulStopError::ScriptMissing(rule.stop_script.clone()));
        }

        let timeout = self.settings.graceful_stop_timeout();
        let deadline = Instant::now() + timeout;
        debug!("Running {:?} to stop '{}'", rule.stop_script, process.title);

        let mut cmd = Command::new(&self.settings.shell);
        cmd.arg(&rule.stop_script)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| GracefulStopError::ScriptTimedOut(timeout))??;

        if !output.status.success() {
            return Err(GracefulStopError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if !process.control().wait_for_exit(remaining).await {
            return Err(GracefulStopError::StillRunning(timeout));
        }
        Ok(())
    }

    /// Force stop everything currently registered.
    ///
    /// Always kills, never runs service stop scripts. Entries are removed even
    /// when their termination fails.
    pub async fn stop_all(&self) -> StopAllReport {
        let processes: Vec<ManagedProcess> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|e| e.process)
            .collect();
        let timeout = self.settings.termination_timeout();

        let mut tasks = JoinSet::new();
        for process in processes.iter().cloned() {
            let registry = self.registry.clone();
            let publisher = self.publisher.clone();
            tasks.spawn(async move {
                let result = force_stop(&process, &registry, &publisher, timeout).await;
                (process.title, result)
            });
        }

        let mut report = StopAllReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((title, Ok(()))) => report.stopped.push(title),
                Ok((title, Err(e))) => {
                    warn!("Failed to stop '{}': {}", title, e);
                    report.failures.push((title, e));
                }
                Err(e) => error!("Stop task failed: {}", e),
            }
        }

        // covers entries whose stop task panicked
        for process in &processes {
            release(process, &self.registry, &self.publisher, "Stopped");
        }

        report.stopped.sort();
        if report.total() > 0 {
            info!(
                "Stopped {} processes ({} failed)",
                report.total(),
                report.failures.len()
            );
        }
        report
    }

    /// Stop sampling, kill every remaining process and release the registry.
    ///
    /// Runs once; concurrent callers wait for the same teardown and later
    /// calls return immediately.
    pub async fn shutdown(&self) {
        self.shutdown_done
            .get_or_init(|| async {
                self.closing.store(true, Ordering::SeqCst);
                info!("Shutting down supervisor");

                let sampler = self
                    .sampler
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(sampler) = sampler {
                    sampler.stop().await;
                }

                let report = self.stop_all().await;
                for (title, e) in &report.failures {
                    error!("'{}' may have outlived shutdown: {}", title, e);
                }

                let leftover = self.registry.clear();
                if !leftover.is_empty() {
                    warn!("Released {} entries registered during shutdown", leftover.len());
                }
                info!("Supervisor shut down");
            })
            .await;
    }
}

/// Kill a process, wait a bounded time for its exit, then release its entry.
///
/// The entry is released on every path; the error only reports what went wrong.
async fn force_stop(
    process: &ManagedProcess,
    registry: &ProcessRegistry,
    publisher: &StatusPublisher,
    timeout: Duration,
) -> Result<(), TerminationError> {
    let title = process.title.as_str();
    let killed = tokio::time::timeout(timeout, process.control().kill()).await;

    let result = match killed {
        Err(_) => Err(TerminationError::Timeout {
            title: title.to_string(),
            timeout,
        }),
        Ok(Err(source)) => Err(TerminationError::Signal {
            title: title.to_string(),
            source,
        }),
        Ok(Ok(_)) if process.control().wait_for_exit(timeout).await => Ok(()),
        Ok(Ok(_)) => Err(TerminationError::Timeout {
            title: title.to_string(),
            timeout,
        }),
    };

    let detail = match &result {
        Ok(()) => "Stopped",
        Err(_) => "Stopped (unresponsive)",
    };
    release(process, registry, publisher, detail);
    result
}

/// Remove this run's entry and publish "stopped" if it was still listed.
/// The exit watcher publishes instead when it got there first.
fn release(
    process: &ManagedProcess,
    registry: &ProcessRegistry,
    publisher: &StatusPublisher,
    detail: &str,
) {
    registry.remove_run_with(&process.title, process.run_id, || {
        publisher.publish(&process.title, ScriptStatus::Stopped, detail);
    });
}
