use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;

use crate::execution::PortAllocation;
use crate::job::{Job, JobId};

/// Observed container state reported by a supervisor.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorStatus {
    PullingImage,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl Display for SupervisorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SupervisorStatus::PullingImage => "pulling_image",
            SupervisorStatus::Starting => "starting",
            SupervisorStatus::Running => "running",
            SupervisorStatus::Stopping => "stopping",
            SupervisorStatus::Stopped => "stopped",
            SupervisorStatus::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Per-job actor owning one container's lifecycle.
///
/// Supervisors are thread-safe. `start` and `stop` dispatch intent and
/// return without waiting for the container; the intent flags report the
/// last dispatched command while `is_done` and `status` report what has
/// actually been observed. The reconciler calls `close` only once the
/// supervisor reports done with a stopped container, except at agent
/// shutdown where every live supervisor is closed unconditionally.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Request the container to be running. Idempotent.
    async fn start(&self) -> anyhow::Result<()>;

    /// Request the container to be halted. Idempotent.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Release supervisor resources. Returns once they are released.
    async fn close(&self) -> anyhow::Result<()>;

    /// Whether the last dispatched command was `start`.
    fn is_starting(&self) -> bool;

    /// Whether the last dispatched command was `stop`.
    fn is_stopping(&self) -> bool;

    /// Whether the supervisor has finished driving the container.
    fn is_done(&self) -> bool;

    /// Last observed container state.
    fn status(&self) -> SupervisorStatus;
}

/// Builds supervisors bound to the host's container runtime.
pub trait SupervisorFactory: Send + Sync {
    fn create(
        &self,
        id: &JobId,
        job: &Job,
        ports: &PortAllocation,
    ) -> Arc<dyn Supervisor>;
}
