use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use stevedore::{Goal, JobId, Model, ModelListener, Task};

/// In-memory desired-state model with listener fan-out and call recording.
#[derive(Clone)]
pub struct InMemoryModel {
    tasks: Arc<Mutex<HashMap<JobId, Task>>>,
    listeners: Arc<Mutex<Vec<Arc<dyn ModelListener>>>>,
    removed_tombstones: Arc<Mutex<Vec<JobId>>>,
    removed_statuses: Arc<Mutex<Vec<JobId>>>,
}

impl InMemoryModel {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            listeners: Arc::new(Mutex::new(Vec::new())),
            removed_tombstones: Arc::new(Mutex::new(Vec::new())),
            removed_statuses: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn put_task(&self, id: JobId, task: Task) {
        self.tasks.lock().insert(id, task);
        self.notify();
    }

    /// Change the goal of an existing task.
    pub fn set_goal(&self, id: &JobId, goal: Goal) {
        if let Some(task) = self.tasks.lock().get_mut(id) {
            task.goal = goal;
        }
        self.notify();
    }

    pub fn remove_task(&self, id: &JobId) {
        self.tasks.lock().remove(id);
        self.notify();
    }

    pub fn removed_tombstones(&self) -> Vec<JobId> {
        self.removed_tombstones.lock().clone()
    }

    pub fn removed_statuses(&self) -> Vec<JobId> {
        self.removed_statuses.lock().clone()
    }

    // Listeners are invoked outside the task lock so a listener may read
    // the model from the callback.
    fn notify(&self) {
        let listeners: Vec<Arc<dyn ModelListener>> =
            self.listeners.lock().clone();
        for listener in listeners {
            listener.tasks_changed();
        }
    }
}

impl Default for InMemoryModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for InMemoryModel {
    fn tasks(&self) -> HashMap<JobId, Task> {
        self.tasks.lock().clone()
    }

    fn add_listener(&self, listener: Arc<dyn ModelListener>) {
        self.listeners.lock().push(listener);
    }

    fn remove_undeploy_tombstone(&self, id: &JobId) {
        {
            let mut tasks = self.tasks.lock();
            if tasks.get(id).map(|task| task.goal) == Some(Goal::Undeploy) {
                tasks.remove(id);
            }
        }
        self.removed_tombstones.lock().push(id.clone());
        self.notify();
    }

    fn remove_task_status(&self, id: &JobId) {
        self.removed_statuses.lock().push(id.clone());
    }
}
