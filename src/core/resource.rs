//! Resource samples - Last known CPU and memory usage of a managed process

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One CPU/memory reading for a process
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    /// CPU usage percentage (may exceed 100 on multi-core machines)
    pub cpu_percent: f32,
    /// Resident memory in KB
    pub memory_kb: u64,
    /// When the reading was taken
    pub sampled_at: DateTime<Utc>,
}

impl ResourceSample {
    pub fn new(cpu_percent: f32, memory_kb: u64) -> Self {
        Self {
            cpu_percent,
            memory_kb,
            sampled_at: Utc::now(),
        }
    }

    /// Resident memory in MB
    pub fn memory_mb(&self) -> f64 {
        self.memory_kb as f64 / 1024.0
    }

    /// Format CPU percentage
    pub fn cpu_string(&self) -> String {
        format!("{:.1}%", self.cpu_percent)
    }

    /// Format memory in MB
    pub fn memory_string(&self) -> String {
        format!("{:.1}MB", self.memory_mb())
    }

    /// Detail line shown next to a running script
    pub fn summary(&self) -> String {
        format!("CPU: {} | MEM: {}", self.cpu_string(), self.memory_string())
    }
}
