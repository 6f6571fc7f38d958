use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::ports::PortRange;

/// Timed-refresh period of the reconciliation loop.
pub const DEFAULT_UPDATE_INTERVAL_MS: u64 = 30_000;

/// Configuration for the reconciliation agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Timed-refresh period of the reconciliation loop, in milliseconds.
    pub update_interval_ms: u64,
    /// Host port range used for dynamic allocation.
    pub port_range: PortRange,
    /// Location of the persisted execution snapshot.
    pub executions_path: PathBuf,
}

impl AgentConfig {
    /// Configuration with defaults for everything but the snapshot location.
    pub fn new(executions_path: impl Into<PathBuf>) -> Self {
        Self {
            update_interval_ms: DEFAULT_UPDATE_INTERVAL_MS,
            port_range: PortRange::default(),
            executions_path: executions_path.into(),
        }
    }

    /// Set the timed-refresh period.
    pub fn with_update_interval_ms(mut self, interval_ms: u64) -> Self {
        self.update_interval_ms = interval_ms;
        self
    }

    /// Set the dynamic port range.
    pub fn with_port_range(mut self, range: PortRange) -> Self {
        self.port_range = range;
        self
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}
