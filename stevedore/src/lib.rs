//! Stevedore - node-local reconciliation agent for container deployments.
//!
//! A foundational crate providing the reconciliation core that drives the
//! containers on a single host toward the desired state published by a
//! cluster control plane, with durable intermediate state and collision-free
//! host port allocation.
//!
//! # Core Concepts
//!
//! - **Task**: The desired-state element. The control plane publishes a
//!   [`Task`] per [`JobId`]: the [`Job`] descriptor plus the [`Goal`] it
//!   should converge to (`Start`, `Stop`, or the `Undeploy` tombstone).
//!
//! - **Execution**: The committed, host-local decision for a job: its
//!   goal and the host ports allocated to it. Executions live in an
//!   [`AtomicPersistentCell`] so the intent to run with those ports
//!   survives a crash-restart.
//!
//! - **Supervisor**: The per-job actor owning one container's lifecycle.
//!   The agent consumes the [`Supervisor`] interface only; implementations
//!   bind to the host's container runtime via a [`SupervisorFactory`].
//!
//! - **Reactor**: A single-worker, level-triggered runner. Every
//!   reconciliation pass is serialized through the [`Reactor`]; update
//!   requests arriving mid-pass coalesce into exactly one follow-up pass.
//!
//! - **Agent**: Ties the pieces together. [`Agent`] listens to the model,
//!   reconciles on every change and on a timed refresh, and exposes
//!   execution snapshots and lifecycle events to observers.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use stevedore::{Agent, AgentConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Wire in your control-plane model and supervisor factory
//!     // (see stevedore-testkit for in-memory stand-ins).
//!     let agent = Agent::start(
//!         model,
//!         factory,
//!         AgentConfig::new("/var/lib/stevedore/executions.json"),
//!     )
//!     .await?;
//!
//!     // ... the agent reconciles until shut down.
//!     agent.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! Reconciliation is **level-triggered**: each pass diffs current snapshots
//! of the desired tasks, the durable executions, and the live supervisor
//! map, so a missed notification can never cause permanent divergence. The
//! pass ordering carries the safety properties:
//!
//! 1. Goals are merged and new executions introduced.
//! 2. Host ports are allocated deterministically, in job-id order.
//! 3. The result is **persisted before any supervisor is touched**, so a
//!    crash between deciding ports and running containers never leaks a
//!    port to a different job.
//! 4. Stopped supervisors are released **before** missing ones are
//!    spawned, so no two supervisors ever own the same job.
//! 5. Undeploy tombstones are reaped only after the job's supervisor is
//!    gone, and always after at least one stop signal.
//!
//! Mutation is confined to the reactor worker; everything observers see is
//! a copied snapshot.

/// The reconciler: owns the supervisor map and the executions cell,
/// orchestrates allocation, persistence, and supervisor lifecycles.
pub mod agent;

/// Atomic, durable single-value storage for the execution snapshot.
pub mod cell;

/// Agent configuration: refresh interval, port range, snapshot location.
pub mod config;

/// Lifecycle events published during reconciliation passes.
pub mod events;

/// The durable per-job decision type and the persisted execution map.
pub mod execution;

/// Desired-state data model: job ids, jobs, goals, tasks.
pub mod job;

/// The control-plane surface the agent consumes.
pub mod model;

/// Collision-free host port allocation.
pub mod ports;

/// Level-triggered, coalescing single-worker task runner.
pub mod reactor;

/// The per-job supervisor interface the agent consumes.
pub mod supervisor;

/// Tracing span helpers for reconciliation work.
pub mod telemetry;

pub use agent::*;
pub use cell::*;
pub use config::*;
pub use events::*;
pub use execution::*;
pub use job::*;
pub use model::*;
pub use ports::*;
pub use reactor::*;
pub use supervisor::*;
