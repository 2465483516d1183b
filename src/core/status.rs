//! Status publishing - Hands status changes to the task that owns the UI model

use tokio::sync::mpsc;
use tracing::trace;

use super::script::ScriptStatus;

/// A status change for one script title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub title: String,
    pub status: ScriptStatus,
    /// Free-form detail: PID on start, resource summary while running, exit reason on stop
    pub detail: String,
}

/// Sending half of the status channel.
///
/// Cheap to clone and safe to use from any task. The core never touches UI state
/// itself; the receiving task applies updates one at a time.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    tx: mpsc::UnboundedSender<StatusUpdate>,
}

impl StatusPublisher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StatusUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an update. Dropped silently once the UI side has gone away.
    pub fn publish(&self, title: &str, status: ScriptStatus, detail: impl Into<String>) {
        let update = StatusUpdate {
            title: title.to_string(),
            status,
            detail: detail.into(),
        };
        if self.tx.send(update).is_err() {
            trace!("Status receiver closed; dropping update for '{}'", title);
        }
    }
}
