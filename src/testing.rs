//! In-memory implementations for tests.
//!
//! [`StubEngine`] behaves like a tiny container engine: containers start
//! instantly, publish ports from a private range and answer TCP probes
//! while they run. [`CountingRelease`] and [`RecordingStartable`] record
//! how often the lifecycle hooks fired.

use crate::docker::{
    ContainerEngine, ContainerHandle, ContainerPort, ContainerSpec, ContainerState,
    ContainerSummary, DockerError, HealthStatus,
};
use crate::error::{Error, Result};
use crate::service::{Release, Startable};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const FIRST_STUB_PORT: u16 = 30000;

#[derive(Debug, Clone)]
struct StubContainer {
    summary: ContainerSummary,
    running: bool,
    health: Option<HealthStatus>,
    logs: String,
    mapped: HashMap<u16, u16>,
}

#[derive(Debug)]
struct StubState {
    containers: BTreeMap<String, StubContainer>,
    next_id: usize,
    next_port: u16,
    started: usize,
    stopped: usize,
    fail_starts: bool,
    exit_log: Option<String>,
    initial_health: Option<HealthStatus>,
    available: bool,
    accept_connections: bool,
}

impl Default for StubState {
    fn default() -> Self {
        Self {
            containers: BTreeMap::new(),
            next_id: 0,
            next_port: FIRST_STUB_PORT,
            started: 0,
            stopped: 0,
            fail_starts: false,
            exit_log: None,
            initial_health: None,
            available: true,
            accept_connections: true,
        }
    }
}

/// Container engine that keeps everything in memory.
#[derive(Debug, Default)]
pub struct StubEngine {
    state: Mutex<StubState>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a running container this process did not start.
    pub fn add_external(&self, summary: ContainerSummary) {
        let mapped = summary
            .ports
            .iter()
            .filter_map(|p| p.public.map(|public| (p.private, public)))
            .collect();
        let container = StubContainer {
            summary: summary.clone(),
            running: true,
            health: None,
            logs: String::new(),
            mapped,
        };
        self.state
            .lock()
            .containers
            .insert(summary.id.clone(), container);
    }

    /// Number of successful `start` calls.
    pub fn started(&self) -> usize {
        self.state.lock().started
    }

    /// Number of `stop` calls that removed a container.
    pub fn stopped(&self) -> usize {
        self.state.lock().stopped
    }

    pub fn fail_starts(&self, fail: bool) {
        self.state.lock().fail_starts = fail;
    }

    /// Containers started from now on exit right away, leaving `log` behind.
    pub fn exit_on_start(&self, log: &str) {
        self.state.lock().exit_log = Some(log.to_string());
    }

    /// Health reported by containers started from now on.
    pub fn start_with_health(&self, health: Option<HealthStatus>) {
        self.state.lock().initial_health = health;
    }

    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    /// When false, no published port accepts connections.
    pub fn accept_connections(&self, accept: bool) {
        self.state.lock().accept_connections = accept;
    }

    pub fn set_running(&self, id: &str, running: bool) {
        if let Some(c) = self.state.lock().containers.get_mut(id) {
            c.running = running;
        }
    }

    pub fn set_health(&self, id: &str, health: Option<HealthStatus>) {
        if let Some(c) = self.state.lock().containers.get_mut(id) {
            c.health = health;
        }
    }

    pub fn append_logs(&self, id: &str, text: &str) {
        if let Some(c) = self.state.lock().containers.get_mut(id) {
            c.logs.push_str(text);
            if !text.ends_with('\n') {
                c.logs.push('\n');
            }
        }
    }

    pub fn is_container_running(&self, id: &str) -> bool {
        self.state
            .lock()
            .containers
            .get(id)
            .is_some_and(|c| c.running)
    }

    /// Ids of all known containers, running or not.
    pub fn container_ids(&self) -> Vec<String> {
        self.state.lock().containers.keys().cloned().collect()
    }

    /// Labels a started container was given.
    pub fn labels_of(&self, id: &str) -> Option<HashMap<String, String>> {
        self.state
            .lock()
            .containers
            .get(id)
            .map(|c| c.summary.labels.clone())
    }
}

#[async_trait]
impl ContainerEngine for StubEngine {
    async fn is_available(&self) -> bool {
        self.state.lock().available
    }

    async fn start(&self, spec: &ContainerSpec) -> std::result::Result<ContainerHandle, DockerError> {
        let mut state = self.state.lock();
        if state.fail_starts {
            return Err(DockerError::cmd_failed(
                format!("docker run {}", spec.image),
                "stub engine refused to start",
                Some(125),
            ));
        }
        state.next_id += 1;
        let id = format!("stub-{}", state.next_id);

        let mut mapped = HashMap::new();
        let mut ports = Vec::new();
        for binding in &spec.ports {
            let public = match binding.host_port {
                Some(port) => port,
                None => {
                    state.next_port += 1;
                    state.next_port
                }
            };
            mapped.insert(binding.container_port, public);
            ports.push(ContainerPort {
                private: binding.container_port,
                public: Some(public),
            });
        }

        let exit_log = state.exit_log.clone();
        let container = StubContainer {
            summary: ContainerSummary {
                id: id.clone(),
                image: spec.image.clone(),
                names: spec.name.iter().cloned().collect(),
                labels: spec.labels.clone().into_iter().collect(),
                ports,
                state: "running".to_string(),
            },
            running: exit_log.is_none(),
            health: state.initial_health,
            logs: exit_log.unwrap_or_default(),
            mapped,
        };
        state.containers.insert(id.clone(), container);
        state.started += 1;
        Ok(ContainerHandle { id })
    }

    async fn stop(&self, container: &str) -> std::result::Result<(), DockerError> {
        let mut state = self.state.lock();
        if state.containers.remove(container).is_some() {
            state.stopped += 1;
        }
        Ok(())
    }

    async fn list_containers(&self) -> std::result::Result<Vec<ContainerSummary>, DockerError> {
        Ok(self
            .state
            .lock()
            .containers
            .values()
            .filter(|c| c.running)
            .map(|c| c.summary.clone())
            .collect())
    }

    async fn inspect(&self, container: &str) -> std::result::Result<ContainerState, DockerError> {
        self.state
            .lock()
            .containers
            .get(container)
            .map(|c| ContainerState {
                running: c.running,
                health: c.health,
            })
            .ok_or_else(|| DockerError::ContainerNotFound {
                container: container.to_string(),
            })
    }

    async fn mapped_ports(
        &self,
        container: &str,
    ) -> std::result::Result<HashMap<u16, u16>, DockerError> {
        self.state
            .lock()
            .containers
            .get(container)
            .map(|c| c.mapped.clone())
            .ok_or_else(|| DockerError::ContainerNotFound {
                container: container.to_string(),
            })
    }

    async fn logs(
        &self,
        container: &str,
        tail: Option<usize>,
    ) -> std::result::Result<String, DockerError> {
        let state = self.state.lock();
        let c = state
            .containers
            .get(container)
            .ok_or_else(|| DockerError::ContainerNotFound {
                container: container.to_string(),
            })?;
        let lines: Vec<&str> = c.logs.lines().collect();
        let skip = tail.map_or(0, |n| lines.len().saturating_sub(n));
        Ok(lines[skip..].join("\n"))
    }

    async fn is_listening(&self, _host: &str, port: u16) -> bool {
        let state = self.state.lock();
        state.accept_connections
            && state
                .containers
                .values()
                .any(|c| c.running && c.mapped.values().any(|p| *p == port))
    }
}

/// Release that counts successful calls and can fail the first few.
#[derive(Debug, Default)]
pub struct CountingRelease {
    released: AtomicUsize,
    failures_left: AtomicUsize,
}

impl CountingRelease {
    pub fn failing_first(failures: usize) -> Self {
        Self {
            released: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(failures),
        }
    }

    pub fn count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Release for CountingRelease {
    async fn release(&self) -> Result<()> {
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::DockerCompose("release failed".to_string()));
        }
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Start action that only records its calls. Container ids are
/// `recorded-1`, `recorded-2` and so on.
#[derive(Debug, Default)]
pub struct RecordingStartable {
    starts: AtomicUsize,
    releases: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingStartable {
    pub fn failing() -> Self {
        let startable = Self::default();
        startable.fail.store(true, Ordering::SeqCst);
        startable
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Startable for RecordingStartable {
    async fn start(&self) -> Result<Option<String>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::StartFailed {
                service: "recorded".to_string(),
                reason: "configured to fail".to_string(),
                startup_log: None,
            });
        }
        let n = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(format!("recorded-{}", n)))
    }
}

#[async_trait]
impl Release for RecordingStartable {
    async fn release(&self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
