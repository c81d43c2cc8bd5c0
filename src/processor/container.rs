use super::{BuildContext, ServiceOutcome};
use crate::config::ContainerServiceConfig;
use crate::docker::labels::{DEV_SERVICE_FEATURE_LABEL, DEV_SERVICE_LABEL};
use crate::docker::{ContainerAddress, ContainerLocator, ContainerSpec};
use crate::error::{Error, Result};
use crate::registry::{LaunchMode, ServiceConfig};
use crate::service::{ContainerLauncher, DevService, RunningService, StartableService};
use std::collections::BTreeMap;
use std::sync::Arc;

fn connection_config(
    name: &str,
    service: &ContainerServiceConfig,
    host: &str,
    port: u16,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            service.config_key(name),
            format!("{}://{}:{}", service.url_scheme(name), host, port),
        ),
        (format!("{}.host", name), host.to_string()),
        (format!("{}.port", name), port.to_string()),
    ])
}

/// Build step for one declared single-container service.
///
/// In order: skip when disabled, when an explicit connection is configured
/// or when no engine answers; reuse a running registered service with the
/// same key; connect to a shared container found by label, or to the
/// matching container of the compose project; otherwise start a container.
pub async fn start_container_service(
    ctx: &BuildContext,
    name: &str,
    service: &ContainerServiceConfig,
    compose_project: Option<&str>,
) -> Result<ServiceOutcome> {
    if !service.enabled {
        tracing::debug!("Dev service '{}' is disabled", name);
        return Ok(ServiceOutcome::skipped("disabled"));
    }
    if service.connection.is_some() {
        tracing::debug!("'{}' has an explicit connection, not starting a dev service", name);
        return Ok(ServiceOutcome::skipped("connection configured"));
    }
    if !ctx.engine.is_available().await {
        tracing::warn!(
            "Docker isn't working, please configure the '{}' connection manually",
            name
        );
        return Ok(ServiceOutcome::skipped("container engine unavailable"));
    }

    let key = ctx.key(name, service.identifying_config());
    if let Some(existing) = ctx.running(&key) {
        tracing::info!("Reusing running dev service '{}'", existing.name());
        return Ok(ServiceOutcome::Reused(existing));
    }

    // A changed configuration must not find its own previous container
    // through the shared label.
    let (evicted, eviction_errors) = ctx.evict_stale(&key).await;

    let label = service.service_label(name);
    let by_label = ContainerLocator::with_labels(service.container_port, &[DEV_SERVICE_LABEL]);
    let mut found = by_label
        .locate(ctx.engine.as_ref(), &label, service.shared, ctx.launch_mode)
        .await?;
    if found.is_none() {
        if let Some(project) = compose_project {
            let image = service.compose_image();
            found = ContainerLocator::compose_by_image(service.container_port, &[image.as_str()])
                .locate_in_project(ctx.engine.as_ref(), project)
                .await?;
        }
    }
    if let Some(address) = found {
        return Ok(discovered(ctx, name, service, key, address));
    }

    let mut spec = ContainerSpec::new(&service.image)
        .with_label(DEV_SERVICE_FEATURE_LABEL, name)
        .with_port(service.container_port, service.port);
    if service.shared && ctx.launch_mode == LaunchMode::Development {
        spec = spec.with_label(DEV_SERVICE_LABEL, &label);
    }
    for (k, v) in &service.env {
        spec = spec.with_env(k, v);
    }
    for (k, v) in &service.labels {
        spec = spec.with_label(k, v);
    }
    spec.command = service.command.clone();

    let launcher = Arc::new(
        ContainerLauncher::new(Arc::clone(&ctx.engine), name, spec)?
            .wait_for_ports(ctx.timeout, ctx.cancel.clone()),
    );
    let host = launcher.host();
    let Some(port) = launcher.host_port(service.container_port) else {
        return Err(Error::Config(format!(
            "No host port assigned for '{}'",
            name
        )));
    };

    let id_reader = Arc::clone(&launcher);
    let startable = Arc::new(
        StartableService::new(
            name,
            key,
            launcher,
            connection_config(name, service, &host, port),
            Arc::clone(&ctx.registry),
        )
        .with_description(service.image.clone())
        .with_lazy_config(format!("{}.container-id", name), move || {
            id_reader.container_id().unwrap_or_default()
        }),
    );

    let outcome = startable.start().await?;
    let handle: Arc<dyn DevService> = startable;
    Ok(ServiceOutcome::from_start(outcome, handle).with_prior_evictions(evicted, eviction_errors))
}

/// Register a container somebody else owns under `key`.
fn discovered(
    ctx: &BuildContext,
    name: &str,
    service: &ContainerServiceConfig,
    key: ServiceConfig,
    address: ContainerAddress,
) -> ServiceOutcome {
    let handle: Arc<dyn DevService> = Arc::new(
        RunningService::discovered(
            name,
            Some(address.id.clone()),
            connection_config(name, service, &address.host, address.port),
        )
        .with_description(format!("shared {}", service.image)),
    );
    ctx.registry.register(key, Arc::clone(&handle));
    ServiceOutcome::Discovered(handle)
}
