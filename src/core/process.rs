//! Process management - Spawning staged scripts and watching them until they exit

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::error::LaunchError;
use super::output::{OutputSink, OutputStream};
use super::registry::{ManagedProcess, ProcessRegistry};
use super::script::{RunId, Script, ScriptStatus};
use super::staging::{remove_staged, ScriptStager};
use super::status::StatusPublisher;
use crate::platform;

type KillReply = oneshot::Sender<io::Result<()>>;

/// Handle for killing a managed process and waiting for it to exit.
///
/// The child itself is owned by its exit watcher task; this handle only sends
/// requests to that task, so a kill can never hit a reaped (and possibly
/// reused) PID.
#[derive(Debug, Clone)]
pub struct ProcessControl {
    kill_tx: mpsc::UnboundedSender<KillReply>,
    exited: watch::Receiver<bool>,
}

/// The watcher's end of a [`ProcessControl`]
#[derive(Debug)]
pub(crate) struct ControlHandle {
    pub(crate) kill_rx: mpsc::UnboundedReceiver<KillReply>,
    pub(crate) exited_tx: watch::Sender<bool>,
}

impl ProcessControl {
    pub(crate) fn new() -> (Self, ControlHandle) {
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        let (exited_tx, exited) = watch::channel(false);
        (Self { kill_tx, exited }, ControlHandle { kill_rx, exited_tx })
    }

    /// True once the exit watcher has finished all cleanup for the process
    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Force kill the process group.
    ///
    /// Returns `Ok(false)` when the process had already exited.
    pub async fn kill(&self) -> io::Result<bool> {
        if self.has_exited() {
            return Ok(false);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.kill_tx.send(reply_tx).is_err() {
            return Ok(false);
        }
        match reply_rx.await {
            Ok(result) => result.map(|()| true),
            // watcher finished before it got to the request
            Err(_) => Ok(false),
        }
    }

    /// Wait up to `timeout` for the exit watcher to finish. Returns whether it did.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let mut exited = self.exited.clone();
        let waited = tokio::time::timeout(timeout, exited.wait_for(|done| *done))
            .await
            .map(|result| result.is_ok());
        match waited {
            Ok(true) => true,
            // sender dropped: the watcher task is gone along with the child
            Ok(false) => true,
            Err(_) => false,
        }
    }
}

/// Spawns staged scripts under a shell and registers them
#[derive(Clone)]
pub struct Launcher {
    stager: ScriptStager,
    registry: ProcessRegistry,
    publisher: StatusPublisher,
    sink: Arc<dyn OutputSink>,
    shell: PathBuf,
}

impl Launcher {
    pub fn new(
        stager: ScriptStager,
        registry: ProcessRegistry,
        publisher: StatusPublisher,
        sink: Arc<dyn OutputSink>,
        shell: impl Into<PathBuf>,
    ) -> Self {
        Self {
            stager,
            registry,
            publisher,
            sink,
            shell: shell.into(),
        }
    }

    /// Stage and start a script.
    ///
    /// The process is in the registry before this returns. Titles that are
    /// already running are rejected.
    pub async fn launch(&self, script: &Script) -> Result<ManagedProcess, LaunchError> {
        let title = script.title.as_str();
        if self.registry.contains(title) {
            return Err(LaunchError::AlreadyRunning(title.to_string()));
        }

        let temp_path = self.stager.stage(&script.content).await?;

        let mut child = match self.spawn_shell(&temp_path) {
            Ok(child) => child,
            Err(source) => {
                discard_staged(&temp_path).await;
                return Err(LaunchError::Spawn {
                    title: title.to_string(),
                    source,
                });
            }
        };

        let Some(pid) = child.id() else {
            let _ = child.wait().await;
            discard_staged(&temp_path).await;
            return Err(LaunchError::Spawn {
                title: title.to_string(),
                source: io::Error::new(io::ErrorKind::Other, "process exited before registration"),
            });
        };

        let (control, handle) = ProcessControl::new();
        let process = ManagedProcess::new(title, pid, temp_path.clone(), control);

        if let Err(rejected) = self.registry.try_insert(process.clone()) {
            // lost a race with a concurrent launch of the same title
            warn!("'{}' was registered concurrently; discarding PID {}", title, rejected.pid);
            let _ = force_kill(pid, &mut child);
            let _ = child.wait().await;
            discard_staged(&temp_path).await;
            return Err(LaunchError::AlreadyRunning(title.to_string()));
        }

        self.publisher
            .publish(title, ScriptStatus::Starting, format!("PID {}", pid));
        self.capture_output(title, &mut child);

        let watcher = ExitWatcher {
            title: title.to_string(),
            run_id: process.run_id,
            pid,
            temp_path,
            registry: self.registry.clone(),
            publisher: self.publisher.clone(),
        };
        tokio::spawn(watcher.run(child, handle));

        info!("Started process: {} (PID: {})", title, pid);
        Ok(process)
    }

    fn spawn_shell(&self, script_path: &Path) -> io::Result<Child> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg(script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own session, so a forced stop reaches everything the script starts
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| platform::detach_session());
        }

        cmd.spawn()
    }

    fn capture_output(&self, title: &str, child: &mut Child) {
        if let Some(stdout) = child.stdout.take() {
            forward_lines(title, OutputStream::Stdout, stdout, self.sink.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(title, OutputStream::Stderr, stderr, self.sink.clone());
        }
    }
}

fn forward_lines<R>(title: &str, stream: OutputStream, reader: R, sink: Arc<dyn OutputSink>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let title = title.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.is_empty() => {}
                Ok(Some(line)) => sink.line(&title, stream, &line),
                Ok(None) => break,
                Err(e) => {
                    debug!("Stopped reading {:?} of '{}': {}", stream, title, e);
                    break;
                }
            }
        }
    });
}

/// SIGKILL the process group, then the child itself as a fallback
fn force_kill(pid: u32, child: &mut Child) -> io::Result<()> {
    let group = platform::kill_process_group(pid);
    if let Err(e) = &group {
        debug!("Process group kill for PID {} failed: {}", pid, e);
    }
    let direct = child.start_kill();
    group.or(direct)
}

async fn discard_staged(path: &Path) {
    if let Err(e) = remove_staged(path).await {
        warn!("Failed to remove staged script {:?}: {}", path, e);
    }
}

/// Per-process exit handling, fixed at launch time
struct ExitWatcher {
    title: String,
    run_id: RunId,
    pid: u32,
    temp_path: PathBuf,
    registry: ProcessRegistry,
    publisher: StatusPublisher,
}

impl ExitWatcher {
    /// Owns the child until it exits, serving kill requests meanwhile, then
    /// cleans up exactly once.
    async fn run(self, mut child: Child, mut handle: ControlHandle) {
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                Some(reply) = handle.kill_rx.recv() => {
                    let _ = reply.send(force_kill(self.pid, &mut child));
                }
            }
        };

        let detail = match &status {
            Ok(status) => {
                info!("Process '{}' (PID: {}) exited: {}", self.title, self.pid, status);
                describe_exit(status)
            }
            Err(e) => {
                error!("Failed to wait for '{}' (PID: {}): {}", self.title, self.pid, e);
                "exit status unknown".to_string()
            }
        };

        if let Err(e) = remove_staged(&self.temp_path).await {
            error!("Error during process cleanup of '{}': {}", self.title, e);
        }

        // Published under the registry lock, so no sample can follow it.
        // A false return means the supervisor removed the entry and published.
        self.registry.remove_run_with(&self.title, self.run_id, || {
            self.publisher
                .publish(&self.title, ScriptStatus::Stopped, detail);
        });

        handle.exited_tx.send_replace(true);
    }
}

fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exited with code {}", code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("killed by signal {}", signal);
        }
    }
    status.to_string()
}
