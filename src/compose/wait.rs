//! Container readiness waits.
//!
//! A wait polls one target on a spawned task at a fixed interval. The caller
//! races that task against the startup timeout and its cancellation token,
//! so neither depends on how long a single probe takes.

use crate::docker::{ContainerEngine, HealthStatus};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Time between two probes of the same target.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Used when neither the service nor its labels set a timeout.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Targets polled at the same time by one waiter.
pub const DEFAULT_MAX_CONCURRENT_WAITS: usize = 8;

/// Something that can be polled for readiness.
#[async_trait]
pub trait ReadinessTarget: Send + Sync {
    fn service_name(&self) -> &str;

    fn host(&self) -> String;

    /// `false` once the target has stopped; a wait fails on it immediately.
    async fn is_running(&self) -> bool;

    /// Container port to host port for the ports published right now.
    async fn mapped_ports(&self) -> HashMap<u16, u16>;

    async fn is_listening(&self, host_port: u16) -> bool;

    /// `None` when the target has no health check.
    async fn health(&self) -> Option<HealthStatus>;

    /// Recent combined output.
    async fn logs(&self) -> String;
}

/// What "ready" means for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitStrategy {
    /// The engine reports the container healthy.
    HealthCheck,
    /// `message` appears in the output at least `times` times.
    LogMessage { message: String, times: usize },
    /// Every mapped port accepts TCP connections. Container ports without a
    /// host mapping are skipped.
    Ports {
        ports: Vec<u16>,
        timeout: Option<Duration>,
    },
}

impl WaitStrategy {
    pub fn ports(ports: Vec<u16>) -> Self {
        WaitStrategy::Ports {
            ports,
            timeout: None,
        }
    }

    pub fn log_message(message: impl Into<String>, times: usize) -> Self {
        WaitStrategy::LogMessage {
            message: message.into(),
            times: times.max(1),
        }
    }
}

#[derive(Debug, Clone)]
enum Check {
    Healthy,
    Log { message: String, times: usize },
    Listening(Vec<u16>),
}

impl Check {
    async fn is_ready(&self, target: &dyn ReadinessTarget) -> bool {
        match self {
            Check::Healthy => target.health().await == Some(HealthStatus::Healthy),
            Check::Log { message, times } => {
                let logs = target.logs().await;
                logs.lines().filter(|l| l.contains(message.as_str())).count() >= *times
            }
            Check::Listening(ports) => {
                for port in ports {
                    if !target.is_listening(*port).await {
                        return false;
                    }
                }
                true
            }
        }
    }
}

#[derive(Debug)]
enum PollEnd {
    Ready,
    Exited,
}

#[derive(Debug)]
enum PollFailure {
    Exited,
    TimedOut,
    Cancelled,
    Aborted(String),
}

/// Runs readiness waits, at most a fixed number of them at a time.
#[derive(Debug, Clone)]
pub struct ReadinessWaiter {
    default_timeout: Duration,
    interval: Duration,
    permits: Arc<Semaphore>,
}

impl Default for ReadinessWaiter {
    fn default() -> Self {
        Self::new(DEFAULT_STARTUP_TIMEOUT)
    }
}

impl ReadinessWaiter {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            interval: POLL_INTERVAL,
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_WAITS)),
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Block until `target` is ready according to `strategy`.
    pub async fn wait(
        &self,
        target: Arc<dyn ReadinessTarget>,
        strategy: &WaitStrategy,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let service = target.service_name().to_string();
        let _permit = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| Error::Cancelled(service.clone()))?
            }
            _ = cancel.cancelled() => return Err(Error::Cancelled(service.clone())),
        };

        match strategy {
            WaitStrategy::HealthCheck => {
                tracing::debug!("Waiting for '{}' to report healthy", service);
                self.poll(target, Check::Healthy, self.default_timeout, cancel)
                    .await
                    .map_err(|f| {
                        self.failure(f, &service, || Error::WaitTimeout {
                            service: service.clone(),
                            condition: "report healthy".to_string(),
                            timeout: self.default_timeout,
                        })
                    })
            }
            WaitStrategy::LogMessage { message, times } => {
                tracing::debug!(
                    "Waiting for '{}' to log '{}' {} time(s)",
                    service,
                    message,
                    times
                );
                let check = Check::Log {
                    message: message.clone(),
                    times: *times,
                };
                self.poll(target, check, self.default_timeout, cancel)
                    .await
                    .map_err(|f| {
                        self.failure(f, &service, || Error::WaitTimeout {
                            service: service.clone(),
                            condition: format!("log '{}' {} time(s)", message, times),
                            timeout: self.default_timeout,
                        })
                    })
            }
            WaitStrategy::Ports { ports, timeout } => {
                let mapped = target.mapped_ports().await;
                let host_ports: Vec<u16> = ports
                    .iter()
                    .filter_map(|p| {
                        let host = mapped.get(p).copied();
                        if host.is_none() {
                            tracing::debug!("Port {} of '{}' is not published", p, service);
                        }
                        host
                    })
                    .collect();
                if host_ports.is_empty() {
                    tracing::debug!("No published ports to wait for on '{}'", service);
                    return Ok(());
                }

                let timeout = timeout.unwrap_or(self.default_timeout);
                let host = target.host();
                tracing::debug!(
                    "Waiting up to {:?} for '{}' on {} ports {:?}",
                    timeout,
                    service,
                    host,
                    host_ports
                );
                self.poll(target, Check::Listening(host_ports.clone()), timeout, cancel)
                    .await
                    .map_err(|f| {
                        self.failure(f, &service, || Error::ReadinessTimeout {
                            service: service.clone(),
                            host: host.clone(),
                            ports: host_ports.clone(),
                            timeout,
                        })
                    })
            }
        }
    }

    fn failure(
        &self,
        failure: PollFailure,
        service: &str,
        timed_out: impl FnOnce() -> Error,
    ) -> Error {
        match failure {
            PollFailure::TimedOut => timed_out(),
            PollFailure::Exited => Error::ContainerExited {
                service: service.to_string(),
            },
            PollFailure::Cancelled => Error::Cancelled(service.to_string()),
            PollFailure::Aborted(reason) => Error::StartFailed {
                service: service.to_string(),
                reason: format!("readiness check aborted: {}", reason),
                startup_log: None,
            },
        }
    }

    async fn poll(
        &self,
        target: Arc<dyn ReadinessTarget>,
        check: Check,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), PollFailure> {
        let interval = self.interval;
        let mut handle = tokio::spawn(async move {
            loop {
                if !target.is_running().await {
                    return PollEnd::Exited;
                }
                if check.is_ready(target.as_ref()).await {
                    return PollEnd::Ready;
                }
                tokio::time::sleep(interval).await;
            }
        });

        let result = tokio::select! {
            res = tokio::time::timeout(timeout, &mut handle) => match res {
                Ok(Ok(PollEnd::Ready)) => Ok(()),
                Ok(Ok(PollEnd::Exited)) => Err(PollFailure::Exited),
                Ok(Err(join)) => Err(PollFailure::Aborted(join.to_string())),
                Err(_) => Err(PollFailure::TimedOut),
            },
            _ = cancel.cancelled() => Err(PollFailure::Cancelled),
        };
        handle.abort();
        result
    }
}

// ============================================================================
// Engine-backed target
// ============================================================================

/// A container reached through a [`ContainerEngine`].
pub struct ContainerTarget {
    engine: Arc<dyn ContainerEngine>,
    container_id: String,
    service: String,
    host: String,
}

impl ContainerTarget {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        container_id: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        let host = engine.host();
        Self {
            engine,
            container_id: container_id.into(),
            service: service.into(),
            host,
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }
}

#[async_trait]
impl ReadinessTarget for ContainerTarget {
    fn service_name(&self) -> &str {
        &self.service
    }

    fn host(&self) -> String {
        self.host.clone()
    }

    async fn is_running(&self) -> bool {
        match self.engine.inspect(&self.container_id).await {
            Ok(state) => state.running,
            Err(e) if e.is_not_found() => false,
            Err(e) => {
                tracing::debug!("Inspect of {} failed, retrying: {}", self.container_id, e);
                true
            }
        }
    }

    async fn mapped_ports(&self) -> HashMap<u16, u16> {
        self.engine
            .mapped_ports(&self.container_id)
            .await
            .unwrap_or_else(|e| {
                tracing::debug!("No port mappings for {}: {}", self.container_id, e);
                HashMap::new()
            })
    }

    async fn is_listening(&self, host_port: u16) -> bool {
        self.engine.is_listening(&self.host, host_port).await
    }

    async fn health(&self) -> Option<HealthStatus> {
        self.engine
            .inspect(&self.container_id)
            .await
            .ok()
            .and_then(|s| s.health)
    }

    async fn logs(&self) -> String {
        self.engine
            .logs(&self.container_id, None)
            .await
            .unwrap_or_default()
    }
}
