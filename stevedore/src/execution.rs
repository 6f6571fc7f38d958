use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::job::{Goal, Job, JobId};

/// Host ports allocated to a job, keyed by the job's logical port names.
pub type PortAllocation = BTreeMap<String, u16>;

/// Process-wide mapping from job id to execution, in id order.
///
/// This is the value held by the agent's persistent cell; the ordered map
/// keeps both the on-disk layout and the allocation walk deterministic.
pub type ExecutionMap = BTreeMap<JobId, Execution>;

/// The committed, durable per-job decision: the job, the goal it should
/// converge to, and the host ports allocated to it.
///
/// Executions are immutable; updates produce derived values via
/// [`with_goal`](Execution::with_goal) and
/// [`with_ports`](Execution::with_ports). `ports` is `None` until the
/// allocator has succeeded for the job.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    job: Job,
    goal: Goal,
    ports: Option<PortAllocation>,
}

impl Execution {
    /// Create an execution with no allocated ports.
    pub fn of(job: Job, goal: Goal) -> Self {
        Self {
            job,
            goal,
            ports: None,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn goal(&self) -> Goal {
        self.goal
    }

    pub fn ports(&self) -> Option<&PortAllocation> {
        self.ports.as_ref()
    }

    /// Derive an execution with a different goal.
    #[must_use]
    pub fn with_goal(&self, goal: Goal) -> Self {
        Self {
            job: self.job.clone(),
            goal,
            ports: self.ports.clone(),
        }
    }

    /// Derive an execution with allocated ports.
    #[must_use]
    pub fn with_ports(&self, ports: PortAllocation) -> Self {
        Self {
            job: self.job.clone(),
            goal: self.goal,
            ports: Some(ports),
        }
    }
}
