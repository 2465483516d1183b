//! Core module - Script staging, process supervision, and resource monitoring

pub mod error;
mod monitor;
mod output;
mod process;
mod registry;
pub mod resource;
pub mod script;
pub mod settings;
mod staging;
mod status;
mod supervisor;

pub use error::{LaunchError, PersistenceError, TerminationError};
pub use monitor::{ResourceProbe, ResourceSampler, SamplerHandle, SysinfoProbe, TickReport};
pub use output::{OutputSink, OutputStream, TracingSink};
pub use process::{Launcher, ProcessControl};
pub use registry::{ManagedProcess, ProcessRegistry, RegistryEntry};
pub use resource::ResourceSample;
pub use script::{RunId, Script, ScriptStatus};
pub use settings::{GracefulStopRule, Settings};
pub use staging::ScriptStager;
pub use status::{StatusPublisher, StatusUpdate};
pub use supervisor::{StopAllReport, StopOutcome, Supervisor};
