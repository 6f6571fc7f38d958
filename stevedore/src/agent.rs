use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::cell::{AtomicPersistentCell, CellError};
use crate::config::AgentConfig;
use crate::events::{AgentEvent, AgentEventBus, AgentEventPayload};
use crate::execution::{Execution, ExecutionMap};
use crate::job::{Goal, JobId};
use crate::model::{Model, ModelListener};
use crate::ports::PortAllocator;
use crate::reactor::{Reactor, ReactorHandle, Tick, TickOutcome};
use crate::supervisor::{Supervisor, SupervisorFactory, SupervisorStatus};
use crate::telemetry;

const REACTOR_NAME: &str = "agent";
const EVENT_CAPACITY: usize = 256;

impl ModelListener for ReactorHandle {
    fn tasks_changed(&self) {
        self.update();
    }
}

/// Drives supervisors to reflect the desired deployment state.
///
/// The agent diffs the model's tasks against its durable executions and the
/// live supervisor map on every reconciliation pass, allocating host ports,
/// persisting decisions before acting on them, and creating, commanding,
/// and releasing supervisors. Passes are level-triggered and serialized by
/// a [`Reactor`]; missed notifications cannot cause divergence because each
/// pass works from current snapshots.
pub struct Agent {
    reactor: Reactor<Reconciler>,
    executions: AtomicPersistentCell<ExecutionMap>,
    events: AgentEventBus,
}

impl Agent {
    /// Start the agent.
    ///
    /// Rebuilds a supervisor for every persisted execution with allocated
    /// ports (without starting it; the first pass commands goals),
    /// subscribes to model changes, spawns the reconciliation loop, and
    /// requests an immediate first pass.
    ///
    /// Fails when the persisted snapshot cannot be read, in particular with
    /// [`CellError::StateIncompatible`] when it was written by an
    /// incompatible version.
    pub async fn start(
        model: Arc<dyn Model>,
        factory: Arc<dyn SupervisorFactory>,
        config: AgentConfig,
    ) -> Result<Self, CellError> {
        let executions = AtomicPersistentCell::open(
            &config.executions_path,
            ExecutionMap::new(),
        )
        .await?;
        let events = AgentEventBus::new(EVENT_CAPACITY);

        let mut supervisors: HashMap<JobId, Arc<dyn Supervisor>> =
            HashMap::new();
        for (id, execution) in executions.get() {
            if let Some(ports) = execution.ports() {
                tracing::debug!(job = %id, "restoring supervisor");
                let supervisor = factory.create(&id, execution.job(), ports);
                supervisors.insert(id.clone(), supervisor);
                events.publish(AgentEventPayload::SupervisorCreated { id });
            }
        }

        let reconciler = Reconciler {
            model: Arc::clone(&model),
            factory,
            executions: executions.clone(),
            allocator: PortAllocator::new(config.port_range),
            supervisors,
            events: events.clone(),
        };
        let reactor = Reactor::spawn(
            REACTOR_NAME,
            reconciler,
            config.update_interval(),
        );
        model.add_listener(Arc::new(reactor.handle()));
        reactor.update();

        Ok(Self {
            reactor,
            executions,
            events,
        })
    }

    /// Request an immediate reconciliation pass.
    pub fn update(&self) {
        self.reactor.update();
    }

    /// Copied snapshot of the committed executions.
    pub fn executions(&self) -> ExecutionMap {
        self.executions.get()
    }

    /// Subscribe to reconciliation lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    /// Stop reconciling and release every supervisor.
    ///
    /// The reconciliation loop is joined first, so no pass is in flight
    /// while supervisors are closed. Close errors are logged per job and do
    /// not abort the remaining closes.
    pub async fn shutdown(self) {
        let reconciler = self.reactor.stop().await;
        for (id, supervisor) in reconciler.supervisors {
            if let Err(err) = supervisor.close().await {
                tracing::warn!(job = %id, error = %err, "supervisor close failed");
            }
        }
    }
}

/// The reconciliation state machine. Owned and driven exclusively by the
/// reactor worker, so all mutation is single-threaded.
struct Reconciler {
    model: Arc<dyn Model>,
    factory: Arc<dyn SupervisorFactory>,
    executions: AtomicPersistentCell<ExecutionMap>,
    allocator: PortAllocator,
    supervisors: HashMap<JobId, Arc<dyn Supervisor>>,
    events: AgentEventBus,
}

#[async_trait]
impl Tick for Reconciler {
    async fn tick(&mut self, handle: &ReactorHandle) -> TickOutcome {
        self.reconcile(handle)
            .instrument(telemetry::reconcile_span(REACTOR_NAME))
            .await
    }
}

impl Reconciler {
    // When changing this sequence, preserve:
    // * supervisors for the same job never run concurrently
    // * a supervisor is not released before its container has stopped
    // * ports are persisted before any container can be started with them
    // * book-keeping one job never stalls the others
    async fn reconcile(&mut self, handle: &ReactorHandle) -> TickOutcome {
        let tasks = self.model.tasks();
        let current = self.executions.get();
        tracing::debug!(
            tasks = tasks.len(),
            executions = current.len(),
            supervisors = self.supervisors.len(),
            "reconciling"
        );

        // Merge goals and introduce executions for new tasks. Executions
        // absent from the task set stay: removal is driven by an undeploy
        // tombstone, not by task deletion.
        let mut next = current.clone();
        for (id, task) in &tasks {
            let merged = match next.get(id) {
                Some(existing) if existing.goal() != task.goal => {
                    Some(existing.with_goal(task.goal))
                }
                Some(_) => None,
                None if task.goal != Goal::Undeploy => {
                    Some(Execution::of(task.job.clone(), task.goal))
                }
                None => None,
            };
            if let Some(execution) = merged {
                next.insert(id.clone(), execution);
            }
        }

        // Allocate host ports for executions that lack them, in id order
        // against everything already committed or picked this pass.
        let mut used: HashSet<u16> = next
            .values()
            .filter_map(|execution| execution.ports())
            .flat_map(|ports| ports.values().copied())
            .collect();
        let pending: Vec<JobId> = next
            .iter()
            .filter(|(_, execution)| execution.ports().is_none())
            .map(|(id, _)| id.clone())
            .collect();
        for id in pending {
            let _span =
                telemetry::port_allocation_span(id.as_str()).entered();
            let execution = next[&id].clone();
            match self.allocator.allocate(&execution.job().ports, &used) {
                Some(ports) => {
                    tracing::debug!(job = %id, ?ports, "allocated ports");
                    used.extend(ports.values().copied());
                    self.events.publish(AgentEventPayload::PortsAllocated {
                        id: id.clone(),
                        ports: ports.clone(),
                    });
                    next.insert(id.clone(), execution.with_ports(ports));
                }
                None => {
                    tracing::warn!(job = %id, "unable to allocate ports, will retry");
                    self.events.publish(
                        AgentEventPayload::PortAllocationFailed { id },
                    );
                }
            }
        }

        // Persist before anything acts on the new decisions. A failed write
        // aborts the pass with supervisors untouched; the level-triggered
        // loop retries later.
        if next != current {
            if let Err(err) = self.executions.set(next).await {
                tracing::warn!(error = %err, "failed to persist executions, aborting pass");
                return TickOutcome::Completed;
            }
        }

        // Release supervisors whose containers have stopped, and ask for a
        // follow-up pass so a replacement can be spawned if still desired.
        let stopped: Vec<JobId> = self
            .supervisors
            .iter()
            .filter(|(_, supervisor)| {
                supervisor.is_done()
                    && supervisor.status() == SupervisorStatus::Stopped
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in stopped {
            if let Some(supervisor) = self.supervisors.remove(&id) {
                tracing::debug!(job = %id, "releasing stopped supervisor");
                if let Err(err) = supervisor
                    .close()
                    .instrument(telemetry::supervisor_op_span(
                        id.as_str(),
                        "close",
                    ))
                    .await
                {
                    tracing::warn!(job = %id, error = %err, "supervisor close failed");
                }
                self.events
                    .publish(AgentEventPayload::SupervisorReleased { id });
                handle.update();
            }
        }

        // Create supervisors for executions that should be running.
        let committed = self.executions.get();
        for (id, execution) in &committed {
            if execution.goal() == Goal::Start
                && !self.supervisors.contains_key(id)
            {
                if let Some(ports) = execution.ports() {
                    tracing::debug!(job = %id, "creating supervisor");
                    let supervisor =
                        self.factory.create(id, execution.job(), ports);
                    self.supervisors.insert(id.clone(), supervisor);
                    self.events.publish(
                        AgentEventPayload::SupervisorCreated {
                            id: id.clone(),
                        },
                    );
                }
            }
        }

        // Command goals. A failing supervisor is logged and skipped so one
        // bad job does not stall the others.
        for (id, supervisor) in &self.supervisors {
            let Some(execution) = committed.get(id) else {
                continue;
            };
            if let Err(err) =
                delegate(id, supervisor.as_ref(), execution.goal()).await
            {
                tracing::warn!(job = %id, error = %err, "supervisor command failed");
            }
        }

        // Reap tombstones whose supervisors are gone.
        let mut reaped: Vec<JobId> = Vec::new();
        for (id, execution) in &committed {
            if execution.goal() == Goal::Undeploy
                && !self.supervisors.contains_key(id)
            {
                tracing::debug!(job = %id, "reaping tombstoned execution");
                self.model.remove_undeploy_tombstone(id);
                self.model.remove_task_status(id);
                self.events.publish(AgentEventPayload::ExecutionReaped {
                    id: id.clone(),
                });
                reaped.push(id.clone());
            }
        }
        if !reaped.is_empty() {
            let mut survivors = committed;
            for id in &reaped {
                survivors.remove(id);
            }
            if let Err(err) = self.executions.set(survivors).await {
                tracing::warn!(error = %err, "failed to persist reap, will retry");
            }
        }

        TickOutcome::Completed
    }
}

/// Dispatch the command a goal calls for, skipping already-dispatched
/// intents.
async fn delegate(
    id: &JobId,
    supervisor: &dyn Supervisor,
    goal: Goal,
) -> anyhow::Result<()> {
    match goal {
        Goal::Start => {
            if !supervisor.is_starting() {
                supervisor
                    .start()
                    .instrument(telemetry::supervisor_op_span(
                        id.as_str(),
                        "start",
                    ))
                    .await?;
            }
        }
        Goal::Stop | Goal::Undeploy => {
            if !supervisor.is_stopping() {
                supervisor
                    .stop()
                    .instrument(telemetry::supervisor_op_span(
                        id.as_str(),
                        "stop",
                    ))
                    .await?;
            }
        }
    }
    Ok(())
}
