//! Basic reconciliation walkthrough with in-memory collaborators.
//!
//! This demo wires stevedore-testkit's InMemoryModel and mock supervisor
//! factory into an Agent, deploys a job, flips its goal, and undeploys it,
//! printing the lifecycle events the agent emits along the way.
//!
//! Run with:
//! ```bash
//! cargo run --example deploy_basic
//! ```

use std::sync::Arc;
use std::time::Duration;

use stevedore::{
    Agent, AgentConfig, Goal, Job, JobId, PortSpec, Protocol, Task,
};
use stevedore_testkit::{wait_until, InMemoryModel, MockSupervisorFactory};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let model = InMemoryModel::new();
    let factory = MockSupervisorFactory::new();

    let agent = Agent::start(
        Arc::new(model.clone()),
        Arc::new(factory.clone()),
        AgentConfig::new(dir.path().join("executions.json")),
    )
    .await?;

    let mut events = agent.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("[EVENT] {:?}", event.payload);
        }
    });

    // Publish a desired task; the agent allocates a port, persists the
    // decision, and spawns a supervisor.
    let id = JobId::new("web:1");
    let job = Job::new("example/web:1")
        .with_command(["/bin/server"])
        .with_port("http", PortSpec::dynamic(80, Protocol::Tcp));
    model.put_task(id.clone(), Task::new(job, Goal::Start));

    wait_until(Duration::from_secs(5), || factory.created_count() == 1).await;
    let created = factory.latest_for(&id).expect("supervisor created");
    println!(
        "[DEMO] deployed {} on host port {}",
        id, created.ports["http"]
    );

    // Halt the container but keep the job around.
    model.set_goal(&id, Goal::Stop);
    wait_until(Duration::from_secs(5), || {
        created.supervisor.stop_calls() == 1
    })
    .await;
    println!("[DEMO] stop dispatched");

    // Undeploy: once the supervisor reports the container stopped, the
    // agent releases it and reaps the execution.
    model.set_goal(&id, Goal::Undeploy);
    created.supervisor.mark_stopped();
    agent.update();
    wait_until(Duration::from_secs(5), || {
        model.removed_tombstones().contains(&id)
    })
    .await;
    println!("[DEMO] undeployed and reaped");

    agent.shutdown().await;
    Ok(())
}
