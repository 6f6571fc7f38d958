use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

/// Opaque identifier for a deployable unit.
///
/// Job ids are totally ordered, hashable, and serializable. The ordering is
/// load-bearing: the reconciler visits executions in id order, which is what
/// makes port allocation deterministic across runs.
#[derive(
    Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct JobId(String);

impl JobId {
    /// Create a job id from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Transport protocol of a container port.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// Specification of a single named container port.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Port the process listens on inside the container.
    pub internal: u16,
    /// Transport protocol.
    pub protocol: Protocol,
    /// Externally requested host port. `None` means any free port.
    pub external: Option<u16>,
}

impl PortSpec {
    /// A port that accepts any free host port.
    pub fn dynamic(internal: u16, protocol: Protocol) -> Self {
        Self {
            internal,
            protocol,
            external: None,
        }
    }

    /// A port that demands a specific host port.
    pub fn fixed(internal: u16, protocol: Protocol, external: u16) -> Self {
        Self {
            internal,
            protocol,
            external: Some(external),
        }
    }
}

/// Immutable descriptor of what to run: image, command, environment, and the
/// job's logical port map.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Container image reference.
    pub image: String,
    /// Command to run in the container.
    pub command: Vec<String>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Named logical ports to expose on the host.
    pub ports: BTreeMap<String, PortSpec>,
}

impl Job {
    /// Create a job running the given image with no command, environment,
    /// or ports.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            command: Vec::new(),
            env: BTreeMap::new(),
            ports: BTreeMap::new(),
        }
    }

    /// Set the container command.
    pub fn with_command(
        mut self,
        command: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Add an environment variable.
    pub fn with_env(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Add a named port.
    pub fn with_port(mut self, name: impl Into<String>, spec: PortSpec) -> Self {
        self.ports.insert(name.into(), spec);
        self
    }
}

/// Desired disposition of a job on this host.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Goal {
    /// The job's container is to be running.
    Start,
    /// The job's container is to be halted but retained.
    Stop,
    /// Tombstone: the job is to be removed once its supervisor is gone.
    Undeploy,
}

/// Desired-state element: a job paired with the goal it should converge to.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub job: Job,
    pub goal: Goal,
}

impl Task {
    pub fn new(job: Job, goal: Goal) -> Self {
        Self { job, goal }
    }
}
