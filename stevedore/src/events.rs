use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::execution::PortAllocation;
use crate::job::JobId;

/// Lifecycle event emitted by the reconciler.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentEvent {
    pub timestamp: DateTime<Utc>,
    pub payload: AgentEventPayload,
}

/// What happened during a reconciliation pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum AgentEventPayload {
    /// Host ports were committed to a job.
    PortsAllocated { id: JobId, ports: PortAllocation },
    /// Port allocation failed for a job; it is retried on a later pass.
    PortAllocationFailed { id: JobId },
    /// A supervisor was created for a job.
    SupervisorCreated { id: JobId },
    /// A stopped supervisor was released.
    SupervisorReleased { id: JobId },
    /// A tombstoned execution was removed.
    ExecutionReaped { id: JobId },
}

/// In-process fan-out of agent lifecycle events.
///
/// Publishing never blocks: events are dropped when no subscriber exists,
/// and a subscriber that lags behind receives `RecvError::Lagged` instead
/// of stalling the reconciler.
#[derive(Clone, Debug)]
pub struct AgentEventBus {
    sender: broadcast::Sender<AgentEvent>,
    capacity: usize,
}

impl AgentEventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an event stamped with the current time.
    pub fn publish(&self, payload: AgentEventPayload) {
        let _ = self.sender.send(AgentEvent {
            timestamp: Utc::now(),
            payload,
        });
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }
}
