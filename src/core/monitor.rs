//! Resource monitoring - Periodic per-process CPU and memory sampling

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use super::error::SamplingError;
use super::registry::ProcessRegistry;
use super::resource::ResourceSample;
use super::script::{RunId, ScriptStatus};
use super::status::StatusPublisher;

/// Source of per-process resource readings. Calls may block.
pub trait ResourceProbe: Send + 'static {
    /// Called once per tick before any `sample` call
    fn refresh(&mut self) {}

    fn sample(&mut self, pid: u32) -> Result<ResourceSample, SamplingError>;
}

/// Reads process statistics through sysinfo
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new_all(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    // CPU usage is a delta between refreshes of the same System
    fn refresh(&mut self) {
        self.system.refresh_cpu_all();
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );
        trace!("Process table refreshed");
    }

    fn sample(&mut self, pid: u32) -> Result<ResourceSample, SamplingError> {
        let sys_pid = Pid::from_u32(pid);
        let process = self
            .system
            .process(sys_pid)
            .ok_or(SamplingError::Vanished(pid))?;
        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return Err(SamplingError::Vanished(pid));
        }

        Ok(ResourceSample::new(
            process.cpu_usage(),
            process.memory() / 1024,
        ))
    }
}

/// Outcome of one sampling tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sampled: usize,
    pub skipped: usize,
}

/// Samples every registered process and publishes the readings
#[derive(Clone)]
pub struct ResourceSampler {
    registry: ProcessRegistry,
    publisher: StatusPublisher,
    probe: Arc<Mutex<Box<dyn ResourceProbe>>>,
}

impl ResourceSampler {
    pub fn new(
        registry: ProcessRegistry,
        publisher: StatusPublisher,
        probe: impl ResourceProbe,
    ) -> Self {
        let probe: Box<dyn ResourceProbe> = Box::new(probe);
        Self {
            registry,
            publisher,
            probe: Arc::new(Mutex::new(probe)),
        }
    }

    /// Run one tick. A failure for one process never affects the others.
    pub async fn tick(&self) -> TickReport {
        let targets: Vec<(String, RunId, u32)> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|e| !e.process.has_exited())
            .map(|e| (e.process.title, e.process.run_id, e.process.pid))
            .collect();
        if targets.is_empty() {
            return TickReport::default();
        }

        let probe = Arc::clone(&self.probe);
        let count = targets.len();
        let results = tokio::task::spawn_blocking(move || {
            let mut probe = probe.lock().unwrap_or_else(PoisonError::into_inner);
            probe.refresh();
            targets
                .into_iter()
                .map(|(title, run_id, pid)| {
                    let sample = probe.sample(pid);
                    (title, run_id, sample)
                })
                .collect::<Vec<_>>()
        })
        .await;

        let results = match results {
            Ok(results) => results,
            Err(e) => {
                warn!("Resource sampling task failed: {}", e);
                return TickReport {
                    sampled: 0,
                    skipped: count,
                };
            }
        };

        let mut report = TickReport::default();
        for (title, run_id, sample) in results {
            match sample {
                Ok(sample) => {
                    // published under the registry lock, so never after "Stopped"
                    let updated = self.registry.update_sample_with(&title, run_id, sample, |s| {
                        self.publisher
                            .publish(&title, ScriptStatus::Running, s.summary());
                    });
                    if updated {
                        report.sampled += 1;
                    } else {
                        // the title exited or was relaunched mid-tick
                        report.skipped += 1;
                    }
                }
                Err(e) => {
                    debug!("Skipping resource sample for '{}': {}", title, e);
                    report.skipped += 1;
                }
            }
        }
        trace!("Sampling tick done: {:?}", report);
        report
    }

    /// Tick every `interval` until stopped. Ticks run back to back on one task,
    /// so they never overlap; ticks missed while one runs long are skipped.
    pub fn spawn(self, interval: Duration) -> SamplerHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }
            debug!("Resource sampler stopped");
        });
        SamplerHandle { stop_tx, task }
    }
}

/// Running sampler task
pub struct SamplerHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    /// Stop ticking; waits for a tick in progress to finish
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.task.await {
            warn!("Resource sampler task ended abnormally: {}", e);
        }
    }
}
