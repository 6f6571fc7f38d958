use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use stevedore::{
    Job, JobId, PortAllocation, Supervisor, SupervisorFactory,
    SupervisorStatus,
};

/// Scripted supervisor that records every call. Tests drive the observed
/// state by hand via `set_status` / `mark_stopped`.
#[derive(Clone)]
pub struct MockSupervisor {
    state: Arc<Mutex<MockState>>,
}

struct MockState {
    starting: bool,
    stopping: bool,
    done: bool,
    status: SupervisorStatus,
    start_calls: u32,
    stop_calls: u32,
    close_calls: u32,
    fail_ops: bool,
}

impl MockSupervisor {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                starting: false,
                stopping: false,
                done: false,
                status: SupervisorStatus::Stopped,
                start_calls: 0,
                stop_calls: 0,
                close_calls: 0,
                fail_ops: false,
            })),
        }
    }

    pub fn set_status(&self, status: SupervisorStatus) {
        self.state.lock().status = status;
    }

    pub fn set_done(&self, done: bool) {
        self.state.lock().done = done;
    }

    /// Report the container as observed stopped and the supervisor done,
    /// which makes the agent release it on the next pass.
    pub fn mark_stopped(&self) {
        let mut state = self.state.lock();
        state.status = SupervisorStatus::Stopped;
        state.done = true;
    }

    /// Make `start` and `stop` return errors.
    pub fn fail_operations(&self, fail: bool) {
        self.state.lock().fail_ops = fail;
    }

    pub fn start_calls(&self) -> u32 {
        self.state.lock().start_calls
    }

    pub fn stop_calls(&self) -> u32 {
        self.state.lock().stop_calls
    }

    pub fn close_calls(&self) -> u32 {
        self.state.lock().close_calls
    }

    pub fn is_closed(&self) -> bool {
        self.close_calls() > 0
    }
}

impl Default for MockSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Supervisor for MockSupervisor {
    async fn start(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.fail_ops {
            anyhow::bail!("start refused");
        }
        state.start_calls += 1;
        state.starting = true;
        state.stopping = false;
        state.done = false;
        state.status = SupervisorStatus::Starting;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.fail_ops {
            anyhow::bail!("stop refused");
        }
        state.stop_calls += 1;
        state.stopping = true;
        state.starting = false;
        state.status = SupervisorStatus::Stopping;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.state.lock().close_calls += 1;
        Ok(())
    }

    fn is_starting(&self) -> bool {
        self.state.lock().starting
    }

    fn is_stopping(&self) -> bool {
        self.state.lock().stopping
    }

    fn is_done(&self) -> bool {
        self.state.lock().done
    }

    fn status(&self) -> SupervisorStatus {
        self.state.lock().status
    }
}

/// One factory invocation, with a handle to the supervisor it produced.
#[derive(Clone)]
pub struct CreatedSupervisor {
    pub id: JobId,
    pub job: Job,
    pub ports: PortAllocation,
    pub supervisor: MockSupervisor,
}

/// Factory that hands out recorded [`MockSupervisor`]s.
#[derive(Clone)]
pub struct MockSupervisorFactory {
    created: Arc<Mutex<Vec<CreatedSupervisor>>>,
}

impl MockSupervisorFactory {
    pub fn new() -> Self {
        Self {
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn created(&self) -> Vec<CreatedSupervisor> {
        self.created.lock().clone()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    /// All supervisors created for a job, in creation order.
    pub fn created_for(&self, id: &JobId) -> Vec<CreatedSupervisor> {
        self.created
            .lock()
            .iter()
            .filter(|record| &record.id == id)
            .cloned()
            .collect()
    }

    /// The most recently created supervisor for a job.
    pub fn latest_for(&self, id: &JobId) -> Option<CreatedSupervisor> {
        self.created_for(id).pop()
    }
}

impl Default for MockSupervisorFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SupervisorFactory for MockSupervisorFactory {
    fn create(
        &self,
        id: &JobId,
        job: &Job,
        ports: &PortAllocation,
    ) -> Arc<dyn Supervisor> {
        let supervisor = MockSupervisor::new();
        self.created.lock().push(CreatedSupervisor {
            id: id.clone(),
            job: job.clone(),
            ports: ports.clone(),
            supervisor: supervisor.clone(),
        });
        Arc::new(supervisor)
    }
}
