//! The container engine seam.
//!
//! Everything above this module talks to containers through
//! [`ContainerEngine`]. [`DockerClient`](super::DockerClient) is the real
//! implementation; tests substitute in-memory engines.

use super::DockerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// A container port published on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    /// Fixed host port; `None` lets the engine pick one.
    pub host_port: Option<u16>,
}

/// Everything needed to launch one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub name: Option<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub ports: Vec<PortBinding>,
    pub command: Vec<String>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_port(mut self, container_port: u16, host_port: Option<u16>) -> Self {
        self.ports.push(PortBinding {
            container_port,
            host_port,
        });
        self
    }
}

/// A container the engine accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
}

/// One private port of a listed container, with its host side if published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContainerPort {
    pub private: u16,
    pub public: Option<u16>,
}

/// Row of `list_containers`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainerSummary {
    pub id: String,
    pub image: String,
    pub names: Vec<String>,
    pub labels: HashMap<String, String>,
    pub ports: Vec<ContainerPort>,
    pub state: String,
}

impl ContainerSummary {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Host port published for `private`, if any.
    pub fn public_port(&self, private: u16) -> Option<u16> {
        self.ports
            .iter()
            .find(|p| p.private == private && p.public.is_some())
            .and_then(|p| p.public)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Starting,
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "starting" => Some(HealthStatus::Starting),
            "healthy" => Some(HealthStatus::Healthy),
            "unhealthy" => Some(HealthStatus::Unhealthy),
            _ => None,
        }
    }
}

/// Runtime state reported by `inspect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContainerState {
    pub running: bool,
    /// `None` when the container has no health check.
    pub health: Option<HealthStatus>,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Whether the engine answers at all.
    async fn is_available(&self) -> bool;

    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, DockerError>;

    /// Stop and remove. Succeeds if the container is already gone.
    async fn stop(&self, container: &str) -> Result<(), DockerError>;

    /// Running containers.
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, DockerError>;

    async fn inspect(&self, container: &str) -> Result<ContainerState, DockerError>;

    /// Container port to host port.
    async fn mapped_ports(&self, container: &str) -> Result<HashMap<u16, u16>, DockerError>;

    /// Combined stdout/stderr: the last `tail` lines, or everything for `None`.
    async fn logs(&self, container: &str, tail: Option<usize>) -> Result<String, DockerError>;

    /// Host name under which published ports are reachable.
    fn host(&self) -> String {
        "localhost".to_string()
    }

    /// Whether `host:port` accepts TCP connections right now.
    async fn is_listening(&self, host: &str, port: u16) -> bool {
        matches!(
            tokio::time::timeout(
                PROBE_TIMEOUT,
                tokio::net::TcpStream::connect((host, port))
            )
            .await,
            Ok(Ok(_))
        )
    }
}
