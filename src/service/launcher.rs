use super::{Release, Startable};
use crate::compose::wait::{ContainerTarget, ReadinessWaiter, WaitStrategy};
use crate::docker::{ContainerEngine, ContainerSpec};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Lines of container output attached to a failed start.
const STARTUP_LOG_LINES: usize = 50;

/// Ask the OS for a currently free TCP port.
///
/// Lets connection config be computed before the container exists. The port
/// is only free at the time of the call.
pub fn find_free_port() -> Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Starts one container from a [`ContainerSpec`] and removes it on release.
///
/// Every published port gets a fixed host port before start, either the
/// configured one or a free one, so [`host_port`](Self::host_port) answers
/// before the container runs.
pub struct ContainerLauncher {
    engine: Arc<dyn ContainerEngine>,
    service: String,
    spec: ContainerSpec,
    host_ports: BTreeMap<u16, u16>,
    readiness: Option<(ReadinessWaiter, CancellationToken)>,
    container_id: Mutex<Option<String>>,
}

impl ContainerLauncher {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        service: impl Into<String>,
        mut spec: ContainerSpec,
    ) -> Result<Self> {
        let mut host_ports = BTreeMap::new();
        for binding in &mut spec.ports {
            let host = match binding.host_port {
                Some(port) => port,
                None => find_free_port()?,
            };
            binding.host_port = Some(host);
            host_ports.insert(binding.container_port, host);
        }
        Ok(Self {
            engine,
            service: service.into(),
            spec,
            host_ports,
            readiness: None,
            container_id: Mutex::new(None),
        })
    }

    /// Block `start` until every published port accepts connections.
    pub fn wait_for_ports(mut self, timeout: Duration, cancel: CancellationToken) -> Self {
        self.readiness = Some((ReadinessWaiter::new(timeout), cancel));
        self
    }

    pub fn host(&self) -> String {
        self.engine.host()
    }

    /// Host port published for `container_port`.
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.host_ports.get(&container_port).copied()
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    pub fn container_id(&self) -> Option<String> {
        self.container_id.lock().clone()
    }

    async fn startup_log(&self, container_id: &str) -> Option<String> {
        self.engine
            .logs(container_id, Some(STARTUP_LOG_LINES))
            .await
            .ok()
            .filter(|l| !l.trim().is_empty())
    }
}

#[async_trait]
impl Startable for ContainerLauncher {
    async fn start(&self) -> Result<Option<String>> {
        tracing::info!("Starting container for '{}' from {}", self.service, self.spec.image);
        let handle = self
            .engine
            .start(&self.spec)
            .await
            .map_err(|e| Error::StartFailed {
                service: self.service.clone(),
                reason: e.to_string(),
                startup_log: None,
            })?;
        *self.container_id.lock() = Some(handle.id.clone());

        if let Some((waiter, cancel)) = &self.readiness {
            let target = Arc::new(ContainerTarget::new(
                Arc::clone(&self.engine),
                handle.id.clone(),
                self.service.clone(),
            ));
            let strategy = WaitStrategy::Ports {
                ports: self.host_ports.keys().copied().collect(),
                timeout: None,
            };
            if let Err(e) = waiter.wait(target, &strategy, cancel).await {
                let startup_log = self.startup_log(&handle.id).await;
                if let Err(stop_err) = self.engine.stop(&handle.id).await {
                    tracing::warn!(
                        "Failed to remove container {} after failed start: {}",
                        handle.id,
                        stop_err
                    );
                }
                *self.container_id.lock() = None;
                return Err(Error::StartFailed {
                    service: self.service.clone(),
                    reason: e.to_string(),
                    startup_log,
                });
            }
        }

        Ok(Some(handle.id))
    }
}

#[async_trait]
impl Release for ContainerLauncher {
    async fn release(&self) -> Result<()> {
        let Some(id) = self.container_id() else {
            return Ok(());
        };
        tracing::info!("Stopping container {} of '{}'", id, self.service);
        self.engine.stop(&id).await?;
        *self.container_id.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubEngine;

    #[test]
    fn free_port_is_nonzero() {
        assert_ne!(find_free_port().unwrap(), 0);
    }

    #[test]
    fn ports_are_fixed_before_start() {
        let engine = Arc::new(StubEngine::new());
        let spec = ContainerSpec::new("redis:7")
            .with_port(6379, None)
            .with_port(8080, Some(18080));
        let launcher = ContainerLauncher::new(engine, "cache", spec).unwrap();

        assert_eq!(launcher.host_port(8080), Some(18080));
        let assigned = launcher.host_port(6379).unwrap();
        assert_ne!(assigned, 0);
        assert!(launcher.spec().ports.iter().all(|p| p.host_port.is_some()));
    }

    #[tokio::test]
    async fn start_and_release_drive_the_engine() {
        let engine = Arc::new(StubEngine::new());
        let launcher =
            ContainerLauncher::new(engine.clone(), "cache", ContainerSpec::new("redis:7")).unwrap();

        let id = launcher.start().await.unwrap().unwrap();
        assert_eq!(engine.started(), 1);
        assert!(engine.is_container_running(&id));

        launcher.release().await.unwrap();
        launcher.release().await.unwrap();
        assert_eq!(engine.stopped(), 1);
        assert!(!engine.is_container_running(&id));
    }

    #[tokio::test]
    async fn engine_failure_is_a_start_failure() {
        let engine = Arc::new(StubEngine::new());
        engine.fail_starts(true);
        let launcher =
            ContainerLauncher::new(engine, "cache", ContainerSpec::new("redis:7")).unwrap();
        let err = launcher.start().await.unwrap_err();
        assert!(matches!(err, Error::StartFailed { ref service, .. } if service == "cache"));
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_failure_removes_the_container_and_keeps_logs() {
        let engine = Arc::new(StubEngine::new());
        engine.exit_on_start("fatal: bad config");
        let launcher = ContainerLauncher::new(
            engine.clone(),
            "cache",
            ContainerSpec::new("redis:7").with_port(6379, None),
        )
        .unwrap()
        .wait_for_ports(Duration::from_secs(5), CancellationToken::new());

        let err = launcher.start().await.unwrap_err();
        match err {
            Error::StartFailed { startup_log, .. } => {
                assert_eq!(startup_log.as_deref(), Some("fatal: bad config"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(engine.stopped(), 1);
        assert!(launcher.container_id().is_none());
    }
}
