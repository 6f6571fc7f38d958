use std::collections::HashMap;
use std::sync::Arc;

use crate::job::{JobId, Task};

/// Change-notification capability handed to [`Model::add_listener`].
///
/// Implementations must not block: the model may deliver notifications from
/// arbitrary threads, and the agent satisfies this trait with a reactor
/// handle whose update is non-blocking.
pub trait ModelListener: Send + Sync {
    /// Invoked after any mutation of the model's task set.
    fn tasks_changed(&self);
}

/// Desired-state surface published by the control plane for this host.
///
/// The agent only consumes this interface; the implementation lives with
/// the control-plane integration.
pub trait Model: Send + Sync {
    /// Snapshot of the desired tasks, keyed by job id.
    fn tasks(&self) -> HashMap<JobId, Task>;

    /// Register for change notifications.
    fn add_listener(&self, listener: Arc<dyn ModelListener>);

    /// Remove the undeploy tombstone for a reaped job. Idempotent.
    fn remove_undeploy_tombstone(&self, id: &JobId);

    /// Remove the reported status for a reaped job. Idempotent.
    fn remove_task_status(&self, id: &JobId);
}
