//! Build steps.
//!
//! One build step per dev service, run on every restart. Each step builds
//! the service's registry key, then either reuses what the registry already
//! holds, connects to a container found running, or starts a new one.
//! The compose project runs first so declared services can be found inside
//! it.

mod compose;
mod container;

pub use compose::start_compose;
pub use container::start_container_service;

use crate::config::Config;
use crate::docker::ContainerEngine;
use crate::error::Error;
use crate::registry::{AppIdentity, LaunchMode, Registry, ServiceConfig};
use crate::service::{DevService, StartOutcome};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything a build step needs from its surroundings.
#[derive(Clone)]
pub struct BuildContext {
    pub registry: Arc<Registry>,
    pub engine: Arc<dyn ContainerEngine>,
    pub launch_mode: LaunchMode,
    pub auxiliary: bool,
    pub application: String,
    pub project_root: PathBuf,
    /// Startup timeout for readiness waits.
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl BuildContext {
    pub fn new(
        config: &Config,
        project_root: impl Into<PathBuf>,
        registry: Arc<Registry>,
        engine: Arc<dyn ContainerEngine>,
    ) -> Self {
        let project_root = project_root.into();
        Self {
            registry,
            engine,
            launch_mode: config.launch_mode,
            auxiliary: config.auxiliary,
            application: config.application_name(&project_root),
            project_root,
            timeout: config.startup_timeout(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn identity(&self, feature: &str) -> AppIdentity {
        AppIdentity::new(feature, self.launch_mode).auxiliary(self.auxiliary)
    }

    pub fn key(&self, feature: &str, config: BTreeMap<String, String>) -> ServiceConfig {
        ServiceConfig::new(self.identity(feature), config)
    }

    /// A running service already registered under exactly `key`.
    fn running(&self, key: &ServiceConfig) -> Option<Arc<dyn DevService>> {
        self.registry.lookup(key).into_iter().find(|s| s.is_running())
    }

    /// Close and unregister everything under `key`'s identity with a
    /// different configuration. Returns how many were closed and what failed.
    async fn evict_stale(&self, key: &ServiceConfig) -> (usize, Vec<Error>) {
        let mut evicted = 0;
        let mut errors = Vec::new();
        for (other_key, other) in self.registry.lookup_others_keyed(key) {
            tracing::info!(
                "Configuration of '{}' changed, stopping the previous instance",
                other.name()
            );
            match other.close().await {
                Ok(()) => {
                    self.registry.unregister(&other_key, other.as_ref());
                    evicted += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to stop previous '{}': {}", other.name(), e);
                    errors.push(e);
                }
            }
        }
        (evicted, errors)
    }
}

impl fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext")
            .field("application", &self.application)
            .field("launch_mode", &self.launch_mode)
            .field("auxiliary", &self.auxiliary)
            .field("project_root", &self.project_root)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// What one build step did.
pub enum ServiceOutcome {
    /// A new service was started.
    Started {
        service: Arc<dyn DevService>,
        evicted: usize,
        eviction_errors: Vec<Error>,
    },
    /// A compatible service from an earlier restart was kept.
    Reused(Arc<dyn DevService>),
    /// A container started by someone else was found and connected to.
    Discovered(Arc<dyn DevService>),
    /// Nothing to do.
    Skipped { reason: String },
}

impl ServiceOutcome {
    pub(crate) fn skipped(reason: impl Into<String>) -> Self {
        ServiceOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub(crate) fn from_start(outcome: StartOutcome, service: Arc<dyn DevService>) -> Self {
        match outcome {
            StartOutcome::Started {
                evicted,
                eviction_errors,
            } => ServiceOutcome::Started {
                service,
                evicted: evicted.len(),
                eviction_errors,
            },
            StartOutcome::Reused { existing } => ServiceOutcome::Reused(existing),
            StartOutcome::AlreadyRunning => ServiceOutcome::Reused(service),
        }
    }

    /// Count evictions done before the start action ran.
    pub(crate) fn with_prior_evictions(mut self, count: usize, errors: Vec<Error>) -> Self {
        if let ServiceOutcome::Started {
            evicted,
            eviction_errors,
            ..
        } = &mut self
        {
            *evicted += count;
            eviction_errors.extend(errors);
        }
        self
    }

    pub fn service(&self) -> Option<&Arc<dyn DevService>> {
        match self {
            ServiceOutcome::Started { service, .. }
            | ServiceOutcome::Reused(service)
            | ServiceOutcome::Discovered(service) => Some(service),
            ServiceOutcome::Skipped { .. } => None,
        }
    }

    /// Connection properties the service publishes.
    pub fn config(&self) -> BTreeMap<String, String> {
        self.service()
            .map(|s| s.config_snapshot())
            .unwrap_or_default()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServiceOutcome::Started { .. } => "started",
            ServiceOutcome::Reused(_) => "reused",
            ServiceOutcome::Discovered(_) => "discovered",
            ServiceOutcome::Skipped { .. } => "skipped",
        }
    }
}

impl fmt::Debug for ServiceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceOutcome::Skipped { reason } => write!(f, "Skipped({})", reason),
            other => match other.service() {
                Some(service) => write!(f, "{}({})", other.kind(), service.name()),
                None => f.write_str(other.kind()),
            },
        }
    }
}

/// Result of running every build step once.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Compose project name and what happened to it.
    pub compose: Option<(String, ServiceOutcome)>,
    pub services: BTreeMap<String, ServiceOutcome>,
    /// Build steps that failed, by service name.
    pub failures: Vec<(String, Error)>,
}

impl BuildReport {
    /// Every published property. Declared services override compose.
    pub fn config(&self) -> BTreeMap<String, String> {
        let mut config = BTreeMap::new();
        if let Some((_, outcome)) = &self.compose {
            config.extend(outcome.config());
        }
        for outcome in self.services.values() {
            config.extend(outcome.config());
        }
        config
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run the compose step, then every declared service.
///
/// A failing step is recorded in the report and does not stop the others.
pub async fn run_build_steps(ctx: &BuildContext, config: &Config) -> BuildReport {
    let mut report = BuildReport::default();
    if !config.enabled {
        tracing::info!("Dev services are disabled");
        return report;
    }

    let mut compose_project = None;
    match start_compose(ctx, &config.compose).await {
        Ok(Some((project, outcome))) => {
            if !matches!(outcome, ServiceOutcome::Skipped { .. }) {
                compose_project = Some(project.clone());
            }
            report.compose = Some((project, outcome));
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!("Compose dev services failed: {}", e);
            report.failures.push(("compose".to_string(), e));
        }
    }

    for (name, service) in &config.services {
        match start_container_service(ctx, name, service, compose_project.as_deref()).await {
            Ok(outcome) => {
                report.services.insert(name.clone(), outcome);
            }
            Err(e) => {
                tracing::warn!("Dev service '{}' failed: {}", name, e);
                report.failures.push((name.clone(), e));
            }
        }
    }
    report
}
