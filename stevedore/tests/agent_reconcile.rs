//! End-to-end reconciliation tests for the agent.
//!
//! Covers deploy/stop/undeploy flows, port collision handling, restart
//! fidelity, and the safety properties of the pass ordering, using the
//! in-memory model and mock supervisors from stevedore-testkit.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use stevedore::{
    Agent, AgentConfig, AgentEventPayload, Goal, Job, JobId, PortRange,
    PortSpec, Protocol, Task,
};
use stevedore_testkit::{
    fixed_port_job, wait_until, web_job, InMemoryModel, MockSupervisorFactory,
};
use tempfile::TempDir;
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_millis(200);

async fn start_agent(
    model: &InMemoryModel,
    factory: &MockSupervisorFactory,
    path: &Path,
) -> Agent {
    // A long refresh interval so only explicit updates drive the tests.
    let config = AgentConfig::new(path)
        .with_update_interval_ms(60_000)
        .with_port_range(PortRange::new(20000, 20099));
    Agent::start(Arc::new(model.clone()), Arc::new(factory.clone()), config)
        .await
        .unwrap()
}

struct Harness {
    model: InMemoryModel,
    factory: MockSupervisorFactory,
    agent: Agent,
    dir: TempDir,
}

impl Harness {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let model = InMemoryModel::new();
        let factory = MockSupervisorFactory::new();
        let agent =
            start_agent(&model, &factory, &dir.path().join("executions.json"))
                .await;
        Self {
            model,
            factory,
            agent,
            dir,
        }
    }

    fn deploy(&self, id: &str, job: Job) -> JobId {
        let id = JobId::new(id);
        self.model.put_task(id.clone(), Task::new(job, Goal::Start));
        id
    }

    async fn await_supervisors(&self, count: usize) {
        assert!(
            wait_until(DEADLINE, || self.factory.created_count() == count)
                .await,
            "expected {count} supervisors, got {}",
            self.factory.created_count()
        );
    }
}

#[tokio::test]
async fn test_deploy_start_allocates_ports_persists_and_starts() {
    let harness = Harness::start().await;
    let mut events = harness.agent.subscribe();

    let j1 = harness.deploy("web:1", web_job());
    harness.await_supervisors(1).await;

    let executions = harness.agent.executions();
    let execution = &executions[&j1];
    assert_eq!(execution.goal(), Goal::Start);
    let ports = execution.ports().expect("ports allocated");
    assert!(PortRange::new(20000, 20099).contains(ports["http"]));

    let created = harness.factory.latest_for(&j1).unwrap();
    assert_eq!(created.ports, ports.clone());
    assert!(
        wait_until(DEADLINE, || created.supervisor.start_calls() == 1).await
    );

    // The decision was persisted before the supervisor acted on it.
    let raw = std::fs::read_to_string(
        harness.dir.path().join("executions.json"),
    )
    .unwrap();
    let snapshot: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(snapshot["version"], 1);
    assert_eq!(
        snapshot["value"]["web:1"]["ports"]["http"],
        u64::from(ports["http"])
    );

    // Observers saw the allocation and the supervisor creation.
    let mut saw_allocation = false;
    let mut saw_creation = false;
    while !(saw_allocation && saw_creation) {
        let event = timeout(DEADLINE, events.recv())
            .await
            .expect("event expected")
            .unwrap();
        match event.payload {
            AgentEventPayload::PortsAllocated { ref id, .. } if *id == j1 => {
                saw_allocation = true;
            }
            AgentEventPayload::SupervisorCreated { ref id } if *id == j1 => {
                saw_creation = true;
            }
            _ => {}
        }
    }

    harness.agent.shutdown().await;
}

#[tokio::test]
async fn test_goal_flip_reuses_supervisor_and_ports() {
    let harness = Harness::start().await;
    let j1 = harness.deploy("web:1", web_job());
    harness.await_supervisors(1).await;

    let created = harness.factory.latest_for(&j1).unwrap();
    assert!(
        wait_until(DEADLINE, || created.supervisor.start_calls() == 1).await
    );
    let ports_before = harness.agent.executions()[&j1].ports().cloned();

    harness.model.set_goal(&j1, Goal::Stop);
    assert!(
        wait_until(DEADLINE, || created.supervisor.stop_calls() == 1).await
    );

    harness.model.set_goal(&j1, Goal::Start);
    assert!(
        wait_until(DEADLINE, || created.supervisor.start_calls() == 2).await
    );

    // Same supervisor instance throughout; allocation untouched.
    assert_eq!(harness.factory.created_count(), 1);
    assert_eq!(
        harness.agent.executions()[&j1].ports().cloned(),
        ports_before
    );

    harness.agent.shutdown().await;
}

#[tokio::test]
async fn test_undeploy_stops_releases_then_reaps() {
    let harness = Harness::start().await;
    let j1 = harness.deploy("web:1", web_job());
    harness.await_supervisors(1).await;
    let created = harness.factory.latest_for(&j1).unwrap();

    harness.model.set_goal(&j1, Goal::Undeploy);
    assert!(
        wait_until(DEADLINE, || created.supervisor.stop_calls() == 1).await
    );

    // The execution stays until the supervisor is observed stopped.
    assert_eq!(harness.agent.executions()[&j1].goal(), Goal::Undeploy);
    assert!(!created.supervisor.is_closed());

    created.supervisor.mark_stopped();
    harness.agent.update();

    assert!(wait_until(DEADLINE, || created.supervisor.is_closed()).await);
    assert!(
        wait_until(DEADLINE, || harness.agent.executions().is_empty()).await
    );
    assert!(
        wait_until(DEADLINE, || {
            harness.model.removed_tombstones().contains(&j1)
                && harness.model.removed_statuses().contains(&j1)
        })
        .await
    );

    harness.agent.shutdown().await;
}

#[tokio::test]
async fn test_explicit_port_collision_one_wins_until_reap() {
    let harness = Harness::start().await;
    let j1 = harness.deploy("api:1", fixed_port_job(20080));
    let j2 = harness.deploy("web:1", fixed_port_job(20080));

    // Exactly one job gets the port; the other stays unallocated with no
    // supervisor.
    harness.await_supervisors(1).await;
    assert!(
        wait_until(DEADLINE, || {
            harness.agent.executions().contains_key(&j2)
        })
        .await
    );
    tokio::time::sleep(SETTLE).await;
    let executions = harness.agent.executions();
    assert_eq!(
        executions[&j1].ports().map(|p| p["http"]),
        Some(20080),
        "lowest job id wins the deterministic walk"
    );
    assert_eq!(executions[&j2].ports(), None);
    assert_eq!(harness.factory.created_count(), 1);
    assert!(harness.factory.created_for(&j2).is_empty());

    // Undeploy the winner; once reaped, the loser becomes allocatable.
    let winner = harness.factory.latest_for(&j1).unwrap();
    harness.model.set_goal(&j1, Goal::Undeploy);
    assert!(
        wait_until(DEADLINE, || winner.supervisor.stop_calls() == 1).await
    );
    winner.supervisor.mark_stopped();
    harness.agent.update();

    assert!(
        wait_until(DEADLINE, || {
            harness.factory.created_for(&j2).len() == 1
        })
        .await
    );
    let loser = harness.factory.latest_for(&j2).unwrap();
    assert_eq!(loser.ports["http"], 20080);

    harness.agent.shutdown().await;
}

#[tokio::test]
async fn test_restart_restores_supervisor_with_stable_ports() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("executions.json");
    let model = InMemoryModel::new();

    let factory = MockSupervisorFactory::new();
    let agent = start_agent(&model, &factory, &path).await;
    let j1 = JobId::new("web:1");
    model.put_task(j1.clone(), Task::new(web_job(), Goal::Start));
    assert!(wait_until(DEADLINE, || factory.created_count() == 1).await);
    let port = harness_port(&agent, &j1);
    agent.shutdown().await;

    // A fresh process with the same cell and model rebuilds the supervisor
    // bound to the same port before the first pass, then commands start.
    let factory = MockSupervisorFactory::new();
    let agent = start_agent(&model, &factory, &path).await;
    assert_eq!(factory.created_count(), 1);
    let restored = factory.latest_for(&j1).unwrap();
    assert_eq!(restored.ports["http"], port);
    assert!(
        wait_until(DEADLINE, || restored.supervisor.start_calls() == 1).await
    );
    assert_eq!(harness_port(&agent, &j1), port);

    agent.shutdown().await;
}

fn harness_port(agent: &Agent, id: &JobId) -> u16 {
    agent.executions()[id].ports().expect("ports allocated")["http"]
}

#[tokio::test]
async fn test_descriptor_change_on_existing_job_is_ignored() {
    let harness = Harness::start().await;
    let j1 = harness.deploy("web:1", web_job());
    harness.await_supervisors(1).await;

    let changed = Job::new("example/web:2")
        .with_port("http", PortSpec::dynamic(80, Protocol::Tcp));
    harness
        .model
        .put_task(j1.clone(), Task::new(changed, Goal::Start));
    tokio::time::sleep(SETTLE).await;

    // Only the goal field merges into an existing execution; a changed
    // descriptor on the same id does not re-reflect.
    assert_eq!(harness.agent.executions()[&j1].job().image, "example/web:1");
    assert_eq!(harness.factory.created_count(), 1);

    harness.agent.shutdown().await;
}

#[tokio::test]
async fn test_redeploy_after_undeploy_waits_for_old_supervisor() {
    let harness = Harness::start().await;
    let j1 = harness.deploy("web:1", web_job());
    harness.await_supervisors(1).await;
    let first = harness.factory.latest_for(&j1).unwrap();

    harness.model.set_goal(&j1, Goal::Undeploy);
    assert!(wait_until(DEADLINE, || first.supervisor.stop_calls() == 1).await);

    // While the old supervisor lives, no replacement may appear.
    harness.agent.update();
    tokio::time::sleep(SETTLE).await;
    assert_eq!(harness.factory.created_count(), 1);

    first.supervisor.mark_stopped();
    harness.agent.update();
    assert!(
        wait_until(DEADLINE, || {
            harness.model.removed_tombstones().contains(&j1)
        })
        .await
    );

    let j1_again = harness.deploy("web:1", web_job());
    assert!(
        wait_until(DEADLINE, || {
            harness.factory.created_for(&j1_again).len() == 2
        })
        .await
    );
    assert!(first.supervisor.is_closed());
    let second = harness.factory.latest_for(&j1_again).unwrap();
    assert!(
        wait_until(DEADLINE, || second.supervisor.start_calls() == 1).await
    );

    harness.agent.shutdown().await;
}

#[tokio::test]
async fn test_reconcile_is_idempotent_without_changes() {
    let harness = Harness::start().await;
    let j1 = harness.deploy("web:1", web_job());
    harness.await_supervisors(1).await;
    let created = harness.factory.latest_for(&j1).unwrap();
    assert!(
        wait_until(DEADLINE, || created.supervisor.start_calls() == 1).await
    );

    let executions_before = harness.agent.executions();
    harness.agent.update();
    tokio::time::sleep(SETTLE).await;

    assert_eq!(harness.agent.executions(), executions_before);
    assert_eq!(harness.factory.created_count(), 1);
    assert_eq!(created.supervisor.start_calls(), 1);
    assert_eq!(created.supervisor.stop_calls(), 0);

    harness.agent.shutdown().await;
}

#[tokio::test]
async fn test_allocated_ports_are_pairwise_disjoint() {
    let harness = Harness::start().await;
    for name in ["api:1", "web:1", "worker:1"] {
        let job = Job::new("example/app:1")
            .with_port("http", PortSpec::dynamic(80, Protocol::Tcp))
            .with_port("admin", PortSpec::dynamic(8081, Protocol::Tcp));
        harness.deploy(name, job);
    }
    harness.await_supervisors(3).await;

    let executions = harness.agent.executions();
    let mut seen: HashSet<u16> = HashSet::new();
    for execution in executions.values() {
        for port in execution.ports().expect("ports allocated").values() {
            assert!(seen.insert(*port), "port {port} allocated twice");
            assert!(PortRange::new(20000, 20099).contains(*port));
        }
    }
    assert_eq!(seen.len(), 6);

    harness.agent.shutdown().await;
}

#[tokio::test]
async fn test_failing_supervisor_does_not_stall_others() {
    let harness = Harness::start().await;
    let j1 = harness.deploy("api:1", web_job());
    let j2 = harness.deploy("web:1", web_job());
    harness.await_supervisors(2).await;

    let bad = harness.factory.latest_for(&j1).unwrap();
    let good = harness.factory.latest_for(&j2).unwrap();
    assert!(wait_until(DEADLINE, || good.supervisor.start_calls() == 1).await);

    bad.supervisor.fail_operations(true);
    harness.model.set_goal(&j1, Goal::Stop);
    harness.model.set_goal(&j2, Goal::Stop);

    assert!(wait_until(DEADLINE, || good.supervisor.stop_calls() == 1).await);
    assert_eq!(bad.supervisor.stop_calls(), 0);

    harness.agent.shutdown().await;
}

#[tokio::test]
async fn test_persistence_failure_leaves_supervisors_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let state_dir = dir.path().join("state");
    std::fs::create_dir(&state_dir).unwrap();
    let model = InMemoryModel::new();
    let factory = MockSupervisorFactory::new();
    let agent =
        start_agent(&model, &factory, &state_dir.join("executions.json"))
            .await;

    let j1 = JobId::new("web:1");
    model.put_task(j1.clone(), Task::new(web_job(), Goal::Start));
    assert!(wait_until(DEADLINE, || factory.created_count() == 1).await);

    // Break the storage domain; every later pass fails to persist and must
    // abort before touching supervisors.
    std::fs::remove_dir_all(&state_dir).unwrap();
    model.put_task(JobId::new("api:1"), Task::new(web_job(), Goal::Start));
    tokio::time::sleep(SETTLE).await;

    assert_eq!(factory.created_count(), 1);
    let executions = agent.executions();
    assert!(executions.contains_key(&j1));
    assert!(!executions.contains_key(&JobId::new("api:1")));

    agent.shutdown().await;
}
