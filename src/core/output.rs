//! Captured child output

use tracing::{info, warn};

/// Which pipe a captured line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stdout => "Output",
            Self::Stderr => "Error",
        }
    }
}

/// Receives every non-empty line a managed process writes, tagged with its title.
///
/// Lines of one stream arrive in the order they were written; the two streams
/// are not ordered relative to each other.
pub trait OutputSink: Send + Sync + 'static {
    fn line(&self, title: &str, stream: OutputStream, line: &str);
}

/// Forwards captured lines to the log under the `script_output` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn line(&self, title: &str, stream: OutputStream, line: &str) {
        match stream {
            OutputStream::Stdout => {
                info!(target: "script_output", title = %title, "{}: {}", stream.label(), line)
            }
            OutputStream::Stderr => {
                warn!(target: "script_output", title = %title, "{}: {}", stream.label(), line)
            }
        }
    }
}
