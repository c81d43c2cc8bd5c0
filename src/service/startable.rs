use super::running::RunningService;
use super::{ConfigSupplier, DevService, LazyValue, Release, ServiceId, Startable};
use crate::error::{Error, Result};
use crate::registry::{Registry, ServiceConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Lifecycle of a [`StartableService`]. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Running,
    Closed,
}

impl ServiceState {
    pub fn is_valid_transition(&self, to: &ServiceState) -> bool {
        matches!(
            (self, to),
            (ServiceState::Created, ServiceState::Running)
                | (ServiceState::Created, ServiceState::Closed)
                | (ServiceState::Running, ServiceState::Closed)
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Created => write!(f, "created"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Closed => write!(f, "closed"),
        }
    }
}

/// What `start()` decided.
pub enum StartOutcome {
    /// The start action ran; stale services under the same identity were closed.
    Started {
        evicted: Vec<Arc<dyn DevService>>,
        eviction_errors: Vec<Error>,
    },
    /// A compatible service was already running; nothing was started.
    Reused { existing: Arc<dyn DevService> },
    /// This instance had already been started.
    AlreadyRunning,
}

impl StartOutcome {
    pub fn is_reused(&self) -> bool {
        matches!(self, StartOutcome::Reused { .. })
    }
}

impl fmt::Debug for StartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartOutcome::Started {
                evicted,
                eviction_errors,
            } => f
                .debug_struct("Started")
                .field("evicted", &evicted.len())
                .field("eviction_errors", eviction_errors)
                .finish(),
            StartOutcome::Reused { existing } => f
                .debug_struct("Reused")
                .field("existing", &existing.id())
                .finish(),
            StartOutcome::AlreadyRunning => f.write_str("AlreadyRunning"),
        }
    }
}

/// A dev service that is started on demand, unless the registry already
/// holds a compatible one.
///
/// Static config lives in the base handle; lazy entries are evaluated on every
/// read so values only known after start (mapped ports) stay current.
pub struct StartableService {
    base: RunningService,
    key: ServiceConfig,
    startable: Arc<dyn Startable>,
    lazy_config: BTreeMap<String, LazyValue>,
    state: Mutex<ServiceState>,
    registry: Arc<Registry>,
    start_lock: tokio::sync::Mutex<()>,
}

impl StartableService {
    pub fn new<S>(
        name: impl Into<String>,
        key: ServiceConfig,
        action: Arc<S>,
        static_config: BTreeMap<String, String>,
        registry: Arc<Registry>,
    ) -> Self
    where
        S: Startable + Release + 'static,
    {
        let release: Arc<dyn Release> = action.clone();
        let startable: Arc<dyn Startable> = action;
        Self {
            base: RunningService::pending(name, static_config, release),
            key,
            startable,
            lazy_config: BTreeMap::new(),
            state: Mutex::new(ServiceState::Created),
            registry,
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Add a config entry computed at read time.
    pub fn with_lazy_config(
        mut self,
        key: impl Into<String>,
        value: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.lazy_config.insert(key.into(), Arc::new(value));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.base = self.base.with_description(description);
        self
    }

    pub fn key(&self) -> &ServiceConfig {
        &self.key
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    fn transition(&self, to: ServiceState) {
        let mut state = self.state.lock();
        if state.is_valid_transition(&to) {
            *state = to;
        } else if *state != to {
            tracing::debug!(
                "Ignoring {} -> {} transition for '{}'",
                *state,
                to,
                self.base.name()
            );
        }
    }

    /// Start the service, reuse a compatible one, or do nothing if already started.
    ///
    /// Order: reuse check, then eviction of differently configured services
    /// under the same identity, then the start action. Eviction failures are
    /// reported in the outcome and never abort the start. A failed start
    /// action leaves this service `Created` and unregistered.
    pub async fn start(self: &Arc<Self>) -> Result<StartOutcome> {
        let _start = self.start_lock.lock().await;
        match self.state() {
            ServiceState::Running => return Ok(StartOutcome::AlreadyRunning),
            ServiceState::Closed => return Err(Error::ServiceClosed(self.base.name().to_string())),
            ServiceState::Created => {}
        }

        if let Some(existing) = self
            .registry
            .lookup(&self.key)
            .into_iter()
            .find(|s| s.is_running())
        {
            tracing::info!(
                "Reusing running dev service '{}' ({})",
                existing.name(),
                existing.container_id().unwrap_or_else(|| "no container".to_string())
            );
            return Ok(StartOutcome::Reused { existing });
        }

        let mut evicted = Vec::new();
        let mut eviction_errors = Vec::new();
        for (other_key, other) in self.registry.lookup_others_keyed(&self.key) {
            tracing::info!(
                "Configuration of '{}' changed, stopping the previous instance",
                other.name()
            );
            match other.close().await {
                Ok(()) => {
                    self.registry.unregister(&other_key, other.as_ref());
                    evicted.push(other);
                }
                Err(e) => {
                    tracing::warn!("Failed to stop previous '{}': {}", other.name(), e);
                    eviction_errors.push(e);
                }
            }
        }

        let container_id = self.startable.start().await?;

        if self.state() == ServiceState::Closed {
            // Closed while the action ran: undo it rather than register a dead handle
            if let super::Ownership::Owned(release) = self.base.ownership() {
                release.release().await?;
            }
            return Err(Error::ServiceClosed(self.base.name().to_string()));
        }

        self.base.mark_started(container_id);
        let this: Arc<dyn DevService> = Arc::clone(self) as Arc<dyn DevService>;
        self.registry.register(self.key.clone(), this);
        self.transition(ServiceState::Running);
        tracing::info!("Dev service '{}' started", self.base.name());

        Ok(StartOutcome::Started {
            evicted,
            eviction_errors,
        })
    }
}

#[async_trait]
impl DevService for StartableService {
    fn id(&self) -> ServiceId {
        self.base.id()
    }

    fn name(&self) -> &str {
        self.base.name()
    }

    fn description(&self) -> Option<&str> {
        self.base.description()
    }

    fn container_id(&self) -> Option<String> {
        self.base.container_id()
    }

    fn is_running(&self) -> bool {
        self.state() == ServiceState::Running && self.base.is_running()
    }

    fn is_owner(&self) -> bool {
        self.base.is_owner()
    }

    fn config_snapshot(&self) -> BTreeMap<String, String> {
        let mut config = self.base.static_config().clone();
        for (key, value) in &self.lazy_config {
            config.insert(key.clone(), value());
        }
        config
    }

    async fn close(&self) -> Result<()> {
        if self.state() == ServiceState::Created {
            // Nothing was started; an in-flight start notices and undoes itself
            self.transition(ServiceState::Closed);
            return Ok(());
        }
        self.base.close().await?;
        self.transition(ServiceState::Closed);
        self.registry.unregister(&self.key, self);
        Ok(())
    }

    fn as_supplier(self: Arc<Self>) -> Option<Arc<dyn ConfigSupplier>> {
        Some(self)
    }
}

impl ConfigSupplier for StartableService {
    fn config(&self) -> BTreeMap<String, String> {
        self.config_snapshot()
    }
}

impl fmt::Debug for StartableService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartableService")
            .field("name", &self.base.name())
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AppIdentity, LaunchMode};
    use crate::testing::RecordingStartable;

    fn key(image: &str) -> ServiceConfig {
        ServiceConfig::new(AppIdentity::new("redis", LaunchMode::Development), BTreeMap::new())
            .with("image", image)
    }

    fn service(
        registry: &Arc<Registry>,
        image: &str,
        action: &Arc<RecordingStartable>,
    ) -> Arc<StartableService> {
        Arc::new(StartableService::new(
            "redis",
            key(image),
            Arc::clone(action),
            BTreeMap::new(),
            Arc::clone(registry),
        ))
    }

    #[test]
    fn state_transitions() {
        use ServiceState::*;
        assert!(Created.is_valid_transition(&Running));
        assert!(Created.is_valid_transition(&Closed));
        assert!(Running.is_valid_transition(&Closed));
        assert!(!Closed.is_valid_transition(&Running));
        assert!(!Closed.is_valid_transition(&Created));
        assert!(!Running.is_valid_transition(&Created));
    }

    #[tokio::test]
    async fn start_registers_and_runs() {
        let registry = Arc::new(Registry::new());
        let action = Arc::new(RecordingStartable::default());
        let svc = service(&registry, "redis:7", &action);
        assert!(!svc.is_running());

        let outcome = svc.start().await.unwrap();
        assert!(matches!(outcome, StartOutcome::Started { .. }));
        assert!(svc.is_running());
        assert_eq!(svc.state(), ServiceState::Running);
        assert_eq!(registry.lookup(&key("redis:7")).len(), 1);
        assert_eq!(registry.live_config_suppliers().len(), 1);
        assert_eq!(svc.container_id().as_deref(), Some("recorded-1"));
    }

    #[tokio::test]
    async fn second_start_is_noop() {
        let registry = Arc::new(Registry::new());
        let action = Arc::new(RecordingStartable::default());
        let svc = service(&registry, "redis:7", &action);
        svc.start().await.unwrap();
        assert!(matches!(svc.start().await.unwrap(), StartOutcome::AlreadyRunning));
        assert_eq!(action.starts(), 1);
    }

    #[tokio::test]
    async fn failed_start_stays_created() {
        let registry = Arc::new(Registry::new());
        let action = Arc::new(RecordingStartable::failing());
        let svc = service(&registry, "redis:7", &action);

        assert!(svc.start().await.is_err());
        assert_eq!(svc.state(), ServiceState::Created);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn closed_service_cannot_restart() {
        let registry = Arc::new(Registry::new());
        let action = Arc::new(RecordingStartable::default());
        let svc = service(&registry, "redis:7", &action);
        svc.start().await.unwrap();
        svc.close().await.unwrap();

        assert_eq!(action.releases(), 1);
        assert!(registry.is_empty());
        assert!(registry.live_config_suppliers().is_empty());
        assert!(matches!(svc.start().await, Err(Error::ServiceClosed(_))));
    }

    #[tokio::test]
    async fn lazy_config_is_evaluated_on_each_read() {
        use std::sync::atomic::{AtomicU16, Ordering};
        let registry = Arc::new(Registry::new());
        let action = Arc::new(RecordingStartable::default());
        let port = Arc::new(AtomicU16::new(1000));
        let reader = Arc::clone(&port);
        let svc = StartableService::new(
            "redis",
            key("redis:7"),
            action,
            BTreeMap::from([("image".to_string(), "redis:7".to_string())]),
            registry,
        )
        .with_lazy_config("url", move || format!("redis://localhost:{}", reader.load(Ordering::SeqCst)));

        assert_eq!(svc.config_snapshot()["url"], "redis://localhost:1000");
        port.store(2000, Ordering::SeqCst);
        assert_eq!(svc.config_snapshot()["url"], "redis://localhost:2000");
        assert_eq!(svc.config_snapshot()["image"], "redis:7");
    }
}
